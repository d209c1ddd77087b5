//! Ephemeral machine snapshots used by the greedy strategies.

use crate::core::common::Resources;
use crate::core::physical_machine::PhysicalMachine;

/// A lightweight shadow of a machine that strategies mutate while packing a
/// bundle, leaving the real machines untouched.
#[derive(Clone, Debug)]
pub struct MachineState {
    pub id: u32,
    pub powered_on: bool,
    pub power_on_cost: f64,
    pub power_per_cpu_unit: f64,
    pub total: Resources,
    pub used: Resources,
}

impl MachineState {
    pub fn of(pm: &PhysicalMachine) -> Self {
        Self {
            id: pm.id(),
            powered_on: pm.is_powered_on(),
            power_on_cost: pm.power_on_cost(),
            power_per_cpu_unit: pm.power_per_cpu_unit(),
            total: pm.total(),
            used: pm.used(),
        }
    }

    pub fn can_host(&self, request: &Resources) -> bool {
        Resources::fits(request, &(self.total - self.used))
    }

    pub fn allocate(&mut self, request: Resources) {
        self.used += request;
    }
}

pub fn snapshot(machines: &[PhysicalMachine]) -> Vec<MachineState> {
    machines.iter().map(MachineState::of).collect()
}
