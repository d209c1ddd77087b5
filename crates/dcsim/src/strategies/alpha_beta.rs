//! Weighted-sort first-fit strategy.

use crate::core::config::options::Options;
use crate::core::error::SimulationError;
use crate::core::vm::VirtualMachine;
use crate::strategies::machine_state::snapshot;
use crate::strategies::{ClusterState, Decision, PlacementStrategy, StrategyDecisions};

/// First fit over new requests ordered by a weighted CPU/RAM usage score
/// `alpha * cpu + beta * ram`. Migration candidates are left in place.
pub struct AlphaBeta {
    alpha: f64,
    beta: f64,
}

impl AlphaBeta {
    pub fn new(alpha: f64, beta: f64) -> Self {
        Self { alpha, beta }
    }

    pub fn from_options(options: &Options) -> Result<Self, SimulationError> {
        Ok(Self::new(options.get("alpha", 1.0)?, options.get("beta", 2.0)?))
    }

    fn score(&self, vm: &VirtualMachine) -> f64 {
        self.alpha * vm.current_usage().cpu + self.beta * vm.current_usage().ram
    }
}

impl PlacementStrategy for AlphaBeta {
    fn run(
        &mut self,
        new_requests: &[&VirtualMachine],
        _to_migrate: &[&VirtualMachine],
        cluster: &ClusterState,
    ) -> Result<StrategyDecisions, SimulationError> {
        let mut states = snapshot(cluster.machines);
        let mut decisions = StrategyDecisions::default();

        let mut sorted = new_requests.to_vec();
        sorted.sort_by(|a, b| self.score(b).total_cmp(&self.score(a)));

        for vm in sorted {
            let need = vm.requested();
            let target = states.iter_mut().find(|state| state.can_host(&need)).map(|state| {
                state.allocate(need);
                state.id
            });
            decisions.placements.push(Decision {
                vm_id: vm.id(),
                target,
            });
        }
        Ok(decisions)
    }

    fn name(&self) -> &str {
        "AlphaBeta"
    }
}
