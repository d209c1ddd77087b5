//! First Fit Decreasing strategy.

use crate::core::error::SimulationError;
use crate::core::vm::VirtualMachine;
use crate::strategies::machine_state::{snapshot, MachineState};
use crate::strategies::{ClusterState, Decision, PlacementStrategy, StrategyDecisions};

/// Sorts the bundle by descending requested CPU and drops every VM onto the
/// first machine that still has room in the ephemeral shadow state.
#[derive(Default)]
pub struct FirstFitDecreasing;

impl FirstFitDecreasing {
    pub fn new() -> Self {
        Default::default()
    }
}

fn first_fit(vm: &VirtualMachine, states: &mut [MachineState]) -> Decision {
    let need = vm.requested();
    for state in states.iter_mut() {
        if state.can_host(&need) {
            state.allocate(need);
            return Decision {
                vm_id: vm.id(),
                target: Some(state.id),
            };
        }
    }
    Decision {
        vm_id: vm.id(),
        target: None,
    }
}

fn sorted_by_requested_cpu<'a>(vms: &[&'a VirtualMachine]) -> Vec<&'a VirtualMachine> {
    let mut sorted = vms.to_vec();
    sorted.sort_by(|a, b| b.requested().cpu.total_cmp(&a.requested().cpu));
    sorted
}

impl PlacementStrategy for FirstFitDecreasing {
    fn run(
        &mut self,
        new_requests: &[&VirtualMachine],
        to_migrate: &[&VirtualMachine],
        cluster: &ClusterState,
    ) -> Result<StrategyDecisions, SimulationError> {
        let mut states = snapshot(cluster.machines);
        let mut decisions = StrategyDecisions::default();

        for vm in sorted_by_requested_cpu(new_requests) {
            decisions.placements.push(first_fit(vm, &mut states));
        }
        for vm in sorted_by_requested_cpu(to_migrate) {
            decisions.migrations.push(first_fit(vm, &mut states));
        }
        Ok(decisions)
    }

    fn name(&self) -> &str {
        "FirstFitDecreasing"
    }
}
