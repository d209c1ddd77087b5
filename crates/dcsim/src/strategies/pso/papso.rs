//! Power-aware particle-swarm placement (PAPSO).

use rand::SeedableRng;
use rand_pcg::Pcg64;

use crate::core::common::Resources;
use crate::core::config::options::Options;
use crate::core::error::SimulationError;
use crate::core::physical_machine::PhysicalMachine;
use crate::core::vm::VirtualMachine;
use crate::strategies::pso::swarm::{self, PsoParams};
use crate::strategies::{ClusterState, Decision, PlacementStrategy, StrategyDecisions};

const OVERFLOW_PENALTY: f64 = 1e10;
const NEW_MACHINE_PENALTY: f64 = 1e5;

/// Encodes an assignment of the bundled VMs as a real vector with one
/// dimension per VM in `[0, machines - 1]`; rounding a coordinate yields
/// the machine index. The swarm minimizes a weighted sum of the active and
/// overloaded machine fractions, with a capacity-overflow penalty large
/// enough to dominate both terms and an extra charge per newly powered-on
/// machine.
pub struct Papso {
    w1: f64,
    w2: f64,
    util_threshold: f64,
    bundle_size: usize,
    params: PsoParams,
    rng: Pcg64,
}

impl Papso {
    pub fn from_options(options: &Options) -> Result<Self, SimulationError> {
        Ok(Self {
            w1: options.get("w1", 0.5)?,
            w2: options.get("w2", 0.5)?,
            util_threshold: options.get("util_threshold", 0.8)?,
            bundle_size: options.get("bundle_size", 10)?,
            params: PsoParams {
                swarm_size: options.get("swarm_size", 60)?,
                max_iterations: options.get("max_iters", 100)?,
                inertia_min: options.get("inertia_min", 0.4)?,
                inertia_max: options.get("inertia_max", 0.9)?,
                cognitive: options.get("c1", 2.05)?,
                social: options.get("c2", 2.05)?,
                max_velocity: options.get("max_velocity", 10.)?,
            },
            rng: Pcg64::seed_from_u64(options.get("seed", 123)?),
        })
    }
}

fn decode(position: f64, machine_count: usize) -> usize {
    (position.round() as isize).clamp(0, machine_count as isize - 1) as usize
}

fn assignment_cost(
    w1: f64,
    w2: f64,
    util_threshold: f64,
    assignment: &[f64],
    vms: &[&VirtualMachine],
    machines: &[PhysicalMachine],
) -> f64 {
    let machine_count = machines.len();
    let mut loads: Vec<Resources> = machines.iter().map(|pm| pm.used()).collect();
    let initially_on = machines.iter().filter(|pm| pm.is_powered_on()).count();

    for (vm, position) in vms.iter().zip(assignment) {
        let index = decode(*position, machine_count);
        loads[index] += vm.current_usage();
    }

    let mut active: usize = 0;
    let mut overloaded = 0;
    let mut penalty = 0.;
    for (pm, load) in machines.iter().zip(&loads) {
        if load.cpu > 0. {
            active += 1;
        }
        let utilization = *load / pm.total();
        if utilization.any_axis_above(util_threshold) {
            overloaded += 1;
        }

        let total = pm.total();
        for (used, capacity) in [
            (load.cpu, total.cpu),
            (load.ram, total.ram),
            (load.disk, total.disk),
            (load.bandwidth, total.bandwidth),
            (load.fpga, total.fpga),
        ] {
            if used > capacity && capacity > 0. {
                penalty += OVERFLOW_PENALTY * (used - capacity) / capacity;
            }
        }
    }

    let frac_active = active as f64 / machine_count as f64;
    let frac_overloaded = overloaded as f64 / machine_count as f64;
    let newly_on = active.saturating_sub(initially_on);

    w1 * frac_active + w2 * frac_overloaded + penalty + newly_on as f64 * NEW_MACHINE_PENALTY
}

impl PlacementStrategy for Papso {
    fn run(
        &mut self,
        new_requests: &[&VirtualMachine],
        to_migrate: &[&VirtualMachine],
        cluster: &ClusterState,
    ) -> Result<StrategyDecisions, SimulationError> {
        let mut decisions = StrategyDecisions::default();
        let machine_count = cluster.machines.len();

        let all_vms: Vec<&VirtualMachine> = new_requests.iter().chain(to_migrate).copied().collect();
        if all_vms.is_empty() || machine_count == 0 {
            decisions.placements = new_requests
                .iter()
                .map(|vm| Decision {
                    vm_id: vm.id(),
                    target: None,
                })
                .collect();
            return Ok(decisions);
        }

        let bounds = vec![(0., machine_count as f64 - 1.); all_vms.len()];
        let (w1, w2, util_threshold) = (self.w1, self.w2, self.util_threshold);
        let result = swarm::minimize(
            |assignment| assignment_cost(w1, w2, util_threshold, assignment, &all_vms, cluster.machines),
            &bounds,
            &self.params.clone(),
            &mut self.rng,
        );

        let assignment: Vec<u32> = result
            .position
            .iter()
            .map(|position| cluster.machines[decode(*position, machine_count)].id())
            .collect();

        for (vm, target) in new_requests.iter().zip(&assignment) {
            decisions.placements.push(Decision {
                vm_id: vm.id(),
                target: Some(*target),
            });
        }
        for (vm, target) in to_migrate.iter().zip(&assignment[new_requests.len()..]) {
            decisions.migrations.push(Decision {
                vm_id: vm.id(),
                target: Some(*target),
            });
        }
        Ok(decisions)
    }

    fn bundle_size(&self) -> usize {
        self.bundle_size
    }

    fn migration_threshold(&self) -> f64 {
        self.util_threshold
    }

    fn name(&self) -> &str {
        "Papso"
    }
}
