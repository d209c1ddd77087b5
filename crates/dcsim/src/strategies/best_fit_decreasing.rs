//! Best Fit Decreasing strategy.

use crate::core::error::SimulationError;
use crate::core::vm::VirtualMachine;
use crate::strategies::machine_state::{snapshot, MachineState};
use crate::strategies::{ClusterState, Decision, PlacementStrategy, StrategyDecisions};

/// Sorts the bundle by descending CPU usage and places every VM on the
/// machine that is left with the least CPU slack; ties go to the machine
/// with the smaller index.
#[derive(Default)]
pub struct BestFitDecreasing;

impl BestFitDecreasing {
    pub fn new() -> Self {
        Default::default()
    }
}

fn best_fit(vm: &VirtualMachine, states: &mut [MachineState]) -> Decision {
    let need = vm.requested();
    let mut best: Option<usize> = None;
    let mut best_leftover = f64::INFINITY;
    for (index, state) in states.iter().enumerate() {
        if state.can_host(&need) {
            let leftover = (state.total.cpu - state.used.cpu) - need.cpu;
            if leftover < best_leftover {
                best_leftover = leftover;
                best = Some(index);
            }
        }
    }
    match best {
        Some(index) => {
            states[index].allocate(need);
            Decision {
                vm_id: vm.id(),
                target: Some(states[index].id),
            }
        }
        None => Decision {
            vm_id: vm.id(),
            target: None,
        },
    }
}

fn sorted_by_usage_cpu<'a>(vms: &[&'a VirtualMachine]) -> Vec<&'a VirtualMachine> {
    let mut sorted = vms.to_vec();
    sorted.sort_by(|a, b| b.current_usage().cpu.total_cmp(&a.current_usage().cpu));
    sorted
}

impl PlacementStrategy for BestFitDecreasing {
    fn run(
        &mut self,
        new_requests: &[&VirtualMachine],
        to_migrate: &[&VirtualMachine],
        cluster: &ClusterState,
    ) -> Result<StrategyDecisions, SimulationError> {
        let mut states = snapshot(cluster.machines);
        let mut decisions = StrategyDecisions::default();

        for vm in sorted_by_usage_cpu(new_requests) {
            decisions.placements.push(best_fit(vm, &mut states));
        }
        for vm in sorted_by_usage_cpu(to_migrate) {
            decisions.migrations.push(best_fit(vm, &mut states));
        }
        Ok(decisions)
    }

    fn name(&self) -> &str {
        "BestFitDecreasing"
    }
}
