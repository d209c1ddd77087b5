//! Representation of a physical machine.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::core::common::{MachineUsageInfo, Resources};

/// Represents a physical machine (PM) which hosts a set of VMs and tracks
/// their summed resource usage.
///
/// The machine powers on when the first VM is added and powers off once the
/// hosted set is empty, unless it is still an endpoint of an in-flight
/// migration. During a migration both the source and the destination machine
/// reserve the resources of the moving VM, so `used` faithfully reflects
/// what placement math and over-commit detection should see.
#[derive(Clone, Debug, Serialize)]
pub struct PhysicalMachine {
    id: u32,
    total: Resources,
    used: Resources,
    powered_on: bool,
    power_on_cost: f64,
    power_per_cpu_unit: f64,
    power_per_fpga_unit: f64,
    ongoing_migrations: u32,
    vms: BTreeSet<u32>,
}

impl PhysicalMachine {
    /// Creates a machine with the given capacity. The idle power draw is
    /// proportional to the CPU capacity via `per_core_base_power`.
    pub fn new(
        id: u32,
        total: Resources,
        per_core_base_power: f64,
        power_per_cpu_unit: f64,
        power_per_fpga_unit: f64,
    ) -> Self {
        Self {
            id,
            total,
            used: Resources::default(),
            powered_on: false,
            power_on_cost: per_core_base_power * total.cpu,
            power_per_cpu_unit,
            power_per_fpga_unit,
            ongoing_migrations: 0,
            vms: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn total(&self) -> Resources {
        self.total
    }

    pub fn used(&self) -> Resources {
        self.used
    }

    pub fn free(&self) -> Resources {
        self.total - self.used
    }

    pub fn is_powered_on(&self) -> bool {
        self.powered_on
    }

    pub fn power_on_cost(&self) -> f64 {
        self.power_on_cost
    }

    pub fn power_per_cpu_unit(&self) -> f64 {
        self.power_per_cpu_unit
    }

    pub fn power_per_fpga_unit(&self) -> f64 {
        self.power_per_fpga_unit
    }

    pub fn can_host(&self, request: &Resources) -> bool {
        Resources::fits(request, &self.free())
    }

    /// Current utilization in percent on every axis.
    pub fn utilization(&self) -> Resources {
        self.used / self.total * 100.
    }

    /// True iff utilization on any axis exceeds the normalized threshold.
    pub fn is_overcommitted(&self, threshold: f64) -> bool {
        self.utilization().any_axis_above(threshold * 100.)
    }

    /// Current power draw: zero when off, otherwise the power-on cost plus
    /// the usage-proportional CPU and FPGA terms.
    pub fn power_consumption(&self) -> f64 {
        if !self.powered_on {
            return 0.;
        }
        self.power_on_cost
            + self.power_per_cpu_unit * self.used.cpu
            + self.power_per_fpga_unit * self.used.fpga
    }

    pub fn allocate(&mut self, usage: Resources) {
        self.used += usage;
    }

    pub fn release(&mut self, usage: Resources) {
        self.used -= usage;
    }

    /// Adds a VM and reserves its usage, powering the machine on if needed.
    pub fn add_vm(&mut self, vm_id: u32, usage: Resources) {
        if !self.powered_on {
            self.powered_on = true;
        }
        self.vms.insert(vm_id);
        self.allocate(usage);
    }

    /// Removes a VM and frees its usage. The machine powers off once nothing
    /// is hosted and no migration is in flight.
    pub fn remove_vm(&mut self, vm_id: u32, usage: Resources) {
        if self.vms.remove(&vm_id) {
            self.release(usage);
        }
        self.maybe_power_off();
    }

    pub fn hosted_vms(&self) -> &BTreeSet<u32> {
        &self.vms
    }

    pub fn ongoing_migration_count(&self) -> u32 {
        self.ongoing_migrations
    }

    pub fn is_migrating(&self) -> bool {
        self.ongoing_migrations > 0
    }

    pub fn begin_migration(&mut self) {
        debug_assert!(self.powered_on, "migration endpoint must be powered on");
        self.ongoing_migrations += 1;
    }

    pub fn end_migration(&mut self) {
        self.ongoing_migrations = self.ongoing_migrations.saturating_sub(1);
        self.maybe_power_off();
    }

    fn maybe_power_off(&mut self) {
        if self.vms.is_empty() && self.ongoing_migrations == 0 {
            self.powered_on = false;
        }
    }

    pub fn usage_info(&self) -> MachineUsageInfo {
        MachineUsageInfo {
            machine_id: self.id,
            used: self.used,
            total: self.total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> PhysicalMachine {
        PhysicalMachine::new(0, Resources::new(8., 16., 100., 1000., 0.), 0.5, 1., 2.)
    }

    #[test]
    fn powers_on_and_off_with_hosted_set() {
        let mut pm = machine();
        assert!(!pm.is_powered_on());
        let usage = Resources::new(2., 8., 10., 100., 0.);
        pm.add_vm(1, usage);
        assert!(pm.is_powered_on());
        assert_eq!(pm.used(), usage);
        pm.remove_vm(1, usage);
        assert!(!pm.is_powered_on());
        assert_eq!(pm.used(), Resources::default());
    }

    #[test]
    fn stays_on_while_migration_in_flight() {
        let mut pm = machine();
        let usage = Resources::new(2., 8., 10., 100., 0.);
        pm.add_vm(1, usage);
        pm.begin_migration();
        pm.remove_vm(1, usage);
        assert!(pm.is_powered_on());
        pm.end_migration();
        assert!(!pm.is_powered_on());
    }

    #[test]
    fn overcommit_checks_every_axis() {
        let mut pm = machine();
        pm.add_vm(1, Resources::new(1., 15., 10., 100., 0.));
        assert!(pm.is_overcommitted(0.8));
        assert!(!pm.is_overcommitted(0.95));
    }

    #[test]
    fn power_draw_follows_usage() {
        let mut pm = machine();
        assert_eq!(pm.power_consumption(), 0.);
        pm.add_vm(1, Resources::new(2., 8., 10., 100., 0.));
        // power-on cost 0.5 * 8 plus 1.0 per used CPU unit
        assert_eq!(pm.power_consumption(), 4. + 2.);
    }
}
