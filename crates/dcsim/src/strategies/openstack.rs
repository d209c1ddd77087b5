//! OpenStack-like power-aware placement.

use crate::core::common::Resources;
use crate::core::config::options::Options;
use crate::core::error::SimulationError;
use crate::core::vm::VirtualMachine;
use crate::strategies::machine_state::{snapshot, MachineState};
use crate::strategies::{ClusterState, Decision, PlacementStrategy, StrategyDecisions};

/// Places every VM on the machine with the smallest incremental power draw
/// among those that keep `(1 - ial) * total` headroom free on every axis
/// after the placement. `ial` is the initial allocation limit in `(0, 1]`.
pub struct OpenStack {
    ial: f64,
}

impl OpenStack {
    pub fn new(ial: f64) -> Self {
        Self { ial }
    }

    pub fn from_options(options: &Options) -> Result<Self, SimulationError> {
        Ok(Self::new(options.get("ial", 0.8)?))
    }

    fn within_allocation_limit(&self, state: &MachineState, need: &Resources) -> bool {
        let headroom = state.total * (1. - self.ial);
        let free_after = state.total - state.used - *need;
        Resources::fits(&headroom, &free_after)
    }

    fn select(&self, need: &Resources, states: &mut [MachineState]) -> Option<u32> {
        let mut best: Option<usize> = None;
        let mut best_power_increase = f64::INFINITY;
        for (index, state) in states.iter().enumerate() {
            if !state.can_host(need) || !self.within_allocation_limit(state, need) {
                continue;
            }
            let mut power_increase = if state.powered_on { 0. } else { state.power_on_cost };
            power_increase += state.power_per_cpu_unit * need.cpu;
            if power_increase < best_power_increase {
                best_power_increase = power_increase;
                best = Some(index);
            }
        }
        best.map(|index| {
            states[index].allocate(*need);
            states[index].id
        })
    }
}

impl PlacementStrategy for OpenStack {
    fn run(
        &mut self,
        new_requests: &[&VirtualMachine],
        to_migrate: &[&VirtualMachine],
        cluster: &ClusterState,
    ) -> Result<StrategyDecisions, SimulationError> {
        let mut states = snapshot(cluster.machines);
        let mut decisions = StrategyDecisions::default();

        for vm in new_requests {
            let target = self.select(&vm.requested(), &mut states);
            decisions.placements.push(Decision {
                vm_id: vm.id(),
                target,
            });
        }
        for vm in to_migrate {
            let target = self.select(&vm.current_usage(), &mut states);
            decisions.migrations.push(Decision {
                vm_id: vm.id(),
                target,
            });
        }
        Ok(decisions)
    }

    fn bundle_size(&self) -> usize {
        1
    }

    fn name(&self) -> &str {
        "OpenStack"
    }
}
