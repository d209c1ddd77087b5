//! Representation of a virtual machine.

use serde::Serialize;

use crate::core::common::Resources;

/// A utilization change scheduled relative to the VM placement time.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct UsageUpdate {
    /// Time offset from the moment the VM is placed.
    pub offset: f64,
    /// Utilization fraction in `[0, 1]`.
    pub utilization: f64,
}

/// Represents a virtual machine (VM).
///
/// A VM is characterized by its resource request, which is fixed at creation,
/// and its current usage, which follows the utilization updates delivered by
/// the trace. The CPU axis of the current usage is the requested CPU scaled
/// by the utilization fraction; the remaining axes stay at their requested
/// values for the whole VM lifetime.
#[derive(Clone, Debug, Serialize)]
pub struct VirtualMachine {
    id: u32,
    requested: Resources,
    current_usage: Resources,
    utilization: f64,
    duration: f64,
    start_time: f64,
    placed: bool,
    migrating: bool,
    current_pm_id: Option<u32>,
    old_pm_id: Option<u32>,
    future_updates: Vec<UsageUpdate>,
}

impl VirtualMachine {
    /// Creates a VM with the given request and lifetime. Usage starts at zero
    /// utilization until [`set_utilization`](Self::set_utilization) is called.
    pub fn new(id: u32, requested: Resources, duration: f64) -> Self {
        Self {
            id,
            requested,
            current_usage: Resources { cpu: 0., ..requested },
            utilization: 0.,
            duration,
            start_time: -1.,
            placed: false,
            migrating: false,
            current_pm_id: None,
            old_pm_id: None,
            future_updates: Vec::new(),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn requested(&self) -> Resources {
        self.requested
    }

    /// Current usage: requested resources with the CPU axis scaled by the
    /// current utilization fraction.
    pub fn current_usage(&self) -> Resources {
        self.current_usage
    }

    pub fn utilization(&self) -> f64 {
        self.utilization
    }

    /// Applies a utilization fraction in `[0, 1]` to the CPU axis.
    pub fn set_utilization(&mut self, utilization: f64) {
        self.utilization = utilization;
        self.current_usage = Resources {
            cpu: self.requested.cpu * utilization,
            ..self.requested
        };
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    pub fn set_start_time(&mut self, time: f64) {
        self.start_time = time;
    }

    pub fn is_placed(&self) -> bool {
        self.placed
    }

    pub fn set_placed(&mut self) {
        self.placed = true;
    }

    pub fn is_migrating(&self) -> bool {
        self.migrating
    }

    pub fn current_pm_id(&self) -> Option<u32> {
        self.current_pm_id
    }

    pub fn set_current_pm_id(&mut self, pm_id: u32) {
        self.current_pm_id = Some(pm_id);
    }

    /// The source machine of an in-flight migration. Defined only while
    /// [`is_migrating`](Self::is_migrating) returns true.
    pub fn old_pm_id(&self) -> Option<u32> {
        self.old_pm_id
    }

    /// Marks the start of a migration, snapshotting the current machine as
    /// the migration source.
    pub fn begin_migration(&mut self) {
        self.migrating = true;
        self.old_pm_id = self.current_pm_id;
    }

    /// Clears the migration state once the transfer finished or was cancelled.
    pub fn end_migration(&mut self) {
        self.migrating = false;
        self.old_pm_id = None;
    }

    pub fn add_future_update(&mut self, offset: f64, utilization: f64) {
        self.future_updates.push(UsageUpdate { offset, utilization });
    }

    pub fn future_updates(&self) -> &[UsageUpdate] {
        &self.future_updates
    }
}
