//! DQN agent.

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;

use crate::strategies::drl::agent::{QAgent, ReplayBuffer, Transition};
use crate::strategies::drl::qnet::{train_step, Adam, QNetwork};

/// Hyper-parameters shared by the bundled agents.
#[derive(Clone, Debug)]
pub struct AgentParams {
    pub learning_rate: f64,
    pub replay_capacity: usize,
    pub batch_size: usize,
    pub gamma: f64,
    pub epsilon_start: f64,
    pub epsilon_min: f64,
    /// Linear decay applied per update step.
    pub epsilon_decay: f64,
    /// How many updates between target-network copies (Double-DQN only).
    pub target_update_interval: u64,
}

impl Default for AgentParams {
    fn default() -> Self {
        Self {
            learning_rate: 1e-4,
            replay_capacity: 100_000,
            batch_size: 128,
            gamma: 0.99,
            epsilon_start: 1.0,
            epsilon_min: 0.01,
            epsilon_decay: 1e-5,
            target_update_interval: 1000,
        }
    }
}

/// Epsilon-greedy Q-learning with a single policy network: the TD target
/// bootstraps from the policy network's own maximum.
pub struct DqnAgent {
    net: QNetwork,
    optimizer: Adam,
    replay: ReplayBuffer,
    rng: Pcg64,
    params: AgentParams,
    epsilon: f64,
    action_count: usize,
}

impl DqnAgent {
    pub fn new(state_dim: usize, action_count: usize, params: AgentParams, seed: u64) -> Self {
        let mut rng = Pcg64::seed_from_u64(seed);
        let net = QNetwork::new(state_dim, action_count, &mut rng);
        let optimizer = Adam::new(params.learning_rate, &net);
        Self {
            net,
            optimizer,
            replay: ReplayBuffer::new(params.replay_capacity),
            rng,
            epsilon: params.epsilon_start,
            params,
            action_count,
        }
    }

    fn decay_epsilon(&mut self) {
        self.epsilon = (self.epsilon - self.params.epsilon_decay).max(self.params.epsilon_min);
    }
}

impl QAgent for DqnAgent {
    fn select_action(&mut self, state: &[f64]) -> usize {
        if self.rng.gen::<f64>() < self.epsilon {
            self.rng.gen_range(0..self.action_count)
        } else {
            self.net.argmax(state)
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
                    target += self.params.gamma * self.net.max_q(&transition.next_state);
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
        train_step(&mut self.net, &mut self.optimizer, &batch);
        self.decay_epsilon();
    }

    fn epsilon(&self) -> f64 {
        self.epsilon
    }

    fn batch_size(&self) -> usize {
        self.params.batch_size
    }
}
