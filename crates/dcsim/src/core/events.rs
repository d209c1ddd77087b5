//! Simulation events.

use crate::core::vm::VirtualMachine;

/// Payload of a simulation event.
///
/// A `VmRequest` owns its VM until the data center takes it at placement
/// time; every other variant refers to VMs through their ids and is resolved
/// against the data-center index.
#[derive(Debug)]
pub enum EventPayload {
    VmRequest(Box<VirtualMachine>),
    VmUtilUpdate { vm_id: u32, utilization: f64 },
    VmDeparture { vm_id: u32 },
    MigrationComplete { vm_id: u32, old_pm_id: u32, new_pm_id: u32 },
    ReconfigureStrategy { name: String },
}

/// An event scheduled at a point of simulated time.
#[derive(Debug)]
pub struct Event {
    /// Simulated time in seconds.
    pub time: f64,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(time: f64, payload: EventPayload) -> Self {
        Self { time, payload }
    }

    /// The VM the event refers to, if any.
    pub fn vm_id(&self) -> Option<u32> {
        match &self.payload {
            EventPayload::VmRequest(vm) => Some(vm.id()),
            EventPayload::VmUtilUpdate { vm_id, .. } => Some(*vm_id),
            EventPayload::VmDeparture { vm_id } => Some(*vm_id),
            EventPayload::MigrationComplete { vm_id, .. } => Some(*vm_id),
            EventPayload::ReconfigureStrategy { .. } => None,
        }
    }
}
