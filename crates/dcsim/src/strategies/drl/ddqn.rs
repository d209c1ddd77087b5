//! Double-DQN agent.

use log::debug;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;

use crate::strategies::drl::agent::{QAgent, ReplayBuffer, Transition};
use crate::strategies::drl::dqn::AgentParams;
use crate::strategies::drl::qnet::{train_step, Adam, QNetwork};

/// Double DQN: the policy network selects the next action, a periodically
/// synchronized target network evaluates it. Decoupling selection from
/// evaluation dampens the value over-estimation of plain DQN.
pub struct DdqnAgent {
    policy_net: QNetwork,
    target_net: QNetwork,
    optimizer: Adam,
    replay: ReplayBuffer,
    rng: Pcg64,
    params: AgentParams,
    epsilon: f64,
    action_count: usize,
    update_count: u64,
}

impl DdqnAgent {
    pub fn new(state_dim: usize, action_count: usize, params: AgentParams, seed: u64) -> Self {
        let mut rng = Pcg64::seed_from_u64(seed);
        let policy_net = QNetwork::new(state_dim, action_count, &mut rng);
        let target_net = policy_net.clone();
        let optimizer = Adam::new(params.learning_rate, &policy_net);
        Self {
            policy_net,
            target_net,
            optimizer,
            replay: ReplayBuffer::new(params.replay_capacity),
            rng,
            epsilon: params.epsilon_start,
            params,
            action_count,
            update_count: 0,
        }
    }
}

impl QAgent for DdqnAgent {
    fn select_action(&mut self, state: &[f64]) -> usize {
        if self.rng.gen::<f64>() < self.epsilon {
            self.rng.gen_range(0..self.action_count)
        } else {
            self.policy_net.argmax(state)
        }
    }

    fn store(&mut self, transition: Transition) {
        self.replay.push(transition);
    }

    fn update(&mut self) {
        if self.replay.len() < self.params.batch_size {
            return;
        }
        let indices = self.replay.sample_indices(self.params.batch_size, &mut self.rng);
        let targets: Vec<(usize, f64)> = indices
            .iter()
            .map(|index| {
                let transition = self.replay.get(*index);
                let mut target = transition.reward;
                if !transition.terminal {
                    let next_action = self.policy_net.argmax(&transition.next_state);
                    let next_value = self.target_net.forward(&transition.next_state)[next_action];
                    target += self.params.gamma * next_value;
                }
                (*index, target)
            })
            .collect();

        let batch: Vec<(&[f64], usize, f64)> = targets
            .iter()
            .map(|(index, target)| {
                let transition = self.replay.get(*index);
                (transition.state.as_slice(), transition.action, *target)
            })
            .collect();
        train_step(&mut self.policy_net, &mut self.optimizer, &batch);

        self.epsilon = (self.epsilon - self.params.epsilon_decay).max(self.params.epsilon_min);

        self.update_count += 1;
        if self.update_count % self.params.target_update_interval == 0 {
            self.target_net = self.policy_net.clone();
            debug!(target: "drl", "synchronized target network at step {}", self.update_count);
        }
    }

    fn epsilon(&self) -> f64 {
        self.epsilon
    }

    fn batch_size(&self) -> usize {
        self.params.batch_size
    }
}
