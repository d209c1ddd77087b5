//! ILP consolidation with learned hyper-parameter selection.

use std::time::Duration;

use log::debug;

use crate::core::config::options::Options;
use crate::core::error::SimulationError;
use crate::core::vm::VirtualMachine;
use crate::strategies::drl::agent::{QAgent, Transition};
use crate::strategies::drl::ddqn::DdqnAgent;
use crate::strategies::drl::dqn::{AgentParams, DqnAgent};
use crate::strategies::ilp::consolidator::{IlpConsolidator, IlpParams};
use crate::strategies::{ClusterState, PlacementStrategy, StrategyDecisions};

/// Reward for an infeasible solve; dominates every feasible objective.
const INFEASIBLE_REWARD: f64 = -1000.;

const STATE_DIM: usize = 18;

/// Which agent variant drives the action selection.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AgentKind {
    Dqn,
    DoubleDqn,
}

/// One point of the discrete action grid applied to the consolidator.
#[derive(Clone, Copy, Debug)]
struct Action {
    bundle_size: usize,
    mu: f64,
    tau: f64,
    beta: f64,
    gamma: f64,
    mst: f64,
}

fn action_grid() -> Vec<Action> {
    let bundle_sizes = [5usize, 10, 20];
    let mus = [200., 250., 300.];
    let taus = [0.75, 0.8, 0.85, 0.9, 0.95, 1.0];
    let beta_gammas = [
        (1.0, 1.0),
        (0.5, 0.5),
        (1.0, -1.0),
        (0.5, -1.0),
        (0.8, -1.0),
        (0.8, 0.8),
        (0.85, -1.0),
    ];
    let msts = [0.8, 0.9, 1.0];

    let mut actions = Vec::new();
    for bundle_size in bundle_sizes {
        for mu in mus {
            for tau in taus {
                for (beta, gamma) in beta_gammas {
                    for mst in msts {
                        actions.push(Action {
                            bundle_size,
                            mu,
                            tau,
                            beta,
                            gamma,
                            mst,
                        });
                    }
                }
            }
        }
    }
    actions
}

struct PendingTransition {
    state: Vec<f64>,
    action: usize,
    reward: f64,
    terminal: bool,
}

/// Wraps the ILP consolidator with an epsilon-greedy head over a finite
/// grid of its tunable knobs. Each placement run selects an action, applies
/// it to the program, and after the decisions are applied the observed
/// outcome is stored and one learning step runs.
pub struct IlpRlStrategy {
    ilp: IlpConsolidator,
    agent: Box<dyn QAgent>,
    actions: Vec<Action>,
    kind: AgentKind,
    pending: Option<PendingTransition>,
}

impl IlpRlStrategy {
    pub fn new(kind: AgentKind, ilp_params: IlpParams, agent_params: AgentParams, seed: u64) -> Self {
        let actions = action_grid();
        let agent: Box<dyn QAgent> = match kind {
            AgentKind::Dqn => Box::new(DqnAgent::new(STATE_DIM, actions.len(), agent_params, seed)),
            AgentKind::DoubleDqn => {
                Box::new(DdqnAgent::new(STATE_DIM, actions.len(), agent_params, seed))
            }
        };
        Self {
            ilp: IlpConsolidator::new(ilp_params),
            agent,
            actions,
            kind,
            pending: None,
        }
    }

    pub fn from_options(kind: AgentKind, options: &Options) -> Result<Self, SimulationError> {
        let ilp_defaults = IlpParams::default();
        let agent_defaults = AgentParams::default();
        let ilp_params = IlpParams {
            time_limit: Duration::from_secs_f64(options.get("time_limit", 60.)?),
            mip_gap: options.get("mip_gap", ilp_defaults.mip_gap)?,
            extra_machine_coef: options.get("extra_coef", ilp_defaults.extra_machine_coef)?,
            max_requests_per_pm: options.get("max_requests_per_pm", ilp_defaults.max_requests_per_pm)?,
            ..ilp_defaults
        };
        let agent_params = AgentParams {
            learning_rate: options.get("lr", agent_defaults.learning_rate)?,
            replay_capacity: options.get("replay_capacity", agent_defaults.replay_capacity)?,
            batch_size: options.get("batch_size", agent_defaults.batch_size)?,
            gamma: options.get("discount", agent_defaults.gamma)?,
            epsilon_start: options.get("epsilon_start", agent_defaults.epsilon_start)?,
            epsilon_min: options.get("epsilon_min", agent_defaults.epsilon_min)?,
            epsilon_decay: options.get("epsilon_decay", agent_defaults.epsilon_decay)?,
            target_update_interval: options
                .get("target_update_interval", agent_defaults.target_update_interval)?,
        };
        let seed = options.get("seed", 123)?;
        Ok(Self::new(kind, ilp_params, agent_params, seed))
    }

    /// Compact summary of the data-center state: entity counts, first and
    /// second moments of the per-machine loads, a coarse CPU occupancy
    /// histogram and the windowed activity counters.
    fn compute_state(cluster: &ClusterState) -> Vec<f64> {
        let mut state = vec![0.; STATE_DIM];
        state[0] = cluster.vm_count as f64;

        let turned_on: Vec<_> = cluster
            .machines
            .iter()
            .filter(|pm| pm.is_powered_on())
            .collect();
        state[1] = turned_on.len() as f64;

        let utilizations: Vec<[f64; 4]> = turned_on
            .iter()
            .map(|pm| {
                let u = pm.utilization();
                [u.cpu, u.ram, u.disk, u.bandwidth]
            })
            .collect();
        for axis in 0..4 {
            let values: Vec<f64> = utilizations.iter().map(|u| u[axis]).collect();
            let (mean, std) = moments(&values);
            state[2 + axis * 2] = mean;
            state[3 + axis * 2] = std;
        }

        // 5-bin histogram of CPU utilization in 20% steps.
        if !turned_on.is_empty() {
            for utilization in &utilizations {
                let bin = ((utilization[0] / 20.) as usize).min(4);
                state[10 + bin] += 1.;
            }
            for bin in 0..5 {
                state[10 + bin] /= turned_on.len() as f64;
            }
        }

        state[15] = cluster.window.sla_violations as f64;
        state[16] = cluster.window.migrations as f64;
        state[17] = cluster.window.new_requests as f64;
        state
    }
}

fn moments(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0., 0.);
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / values.len() as f64;
    (mean, variance.sqrt())
}

impl PlacementStrategy for IlpRlStrategy {
    fn run(
        &mut self,
        new_requests: &[&VirtualMachine],
        to_migrate: &[&VirtualMachine],
        cluster: &ClusterState,
    ) -> Result<StrategyDecisions, SimulationError> {
        let state = Self::compute_state(cluster);
        let action_index = self.agent.select_action(&state);
        let action = self.actions[action_index];
        debug!(
            target: "drl",
            "selected action {}: bundle={} mu={} tau={} beta={} gamma={} mst={} (epsilon {:.3})",
            action_index,
            action.bundle_size,
            action.mu,
            action.tau,
            action.beta,
            action.gamma,
            action.mst,
            self.agent.epsilon()
        );

        self.ilp.params.bundle_size = action.bundle_size;
        self.ilp.params.mu = action.mu;
        self.ilp.params.tau = action.tau;
        self.ilp.params.beta = action.beta;
        self.ilp.params.gamma = action.gamma;
        self.ilp.params.mst = action.mst;

        let (decisions, outcome) = self.ilp.solve(new_requests, to_migrate, cluster)?;

        let reward = if outcome.feasible {
            -outcome.objective
        } else {
            INFEASIBLE_REWARD
        };
        self.pending = Some(PendingTransition {
            state,
            action: action_index,
            reward,
            terminal: !outcome.feasible,
        });
        Ok(decisions)
    }

    fn observe(&mut self, cluster: &ClusterState) {
        if let Some(pending) = self.pending.take() {
            let next_state = Self::compute_state(cluster);
            self.agent.store(Transition {
                state: pending.state,
                action: pending.action,
                reward: pending.reward,
                next_state,
                terminal: pending.terminal,
            });
            self.agent.update();
        }
    }

    fn bundle_size(&self) -> usize {
        self.ilp.params.bundle_size
    }

    fn migration_threshold(&self) -> f64 {
        self.ilp.params.mst
    }

    fn name(&self) -> &str {
        match self.kind {
            AgentKind::Dqn => "IlpDqn",
            AgentKind::DoubleDqn => "IlpDoubleDqn",
        }
    }
}
