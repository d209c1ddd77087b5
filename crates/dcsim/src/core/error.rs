//! Simulation error kinds.

use thiserror::Error;

/// Errors surfaced by trace producers.
#[derive(Debug, Error)]
pub enum TraceError {
    /// The record declares zero utilization values, which leaves the VM
    /// without even an initial utilization. Fatal for the producer.
    #[error("{file}:{line}: declared utilization value count is zero")]
    ZeroValSize { file: String, line: u64 },

    #[error("failed to read trace {file}: {source}")]
    Io {
        file: String,
        #[source]
        source: std::io::Error,
    },
}

/// Fatal conditions that stop a simulation run.
#[derive(Debug, Error)]
pub enum SimulationError {
    /// An event was delivered with a timestamp older than the engine clock.
    #[error("event at time {event_time} is older than current time {current_time}")]
    CausalityViolation { event_time: f64, current_time: f64 },

    /// A handler referenced a VM that is not in the index.
    #[error("vm {0} is not registered in the data center")]
    UnknownVm(u32),

    /// A strategy decision targeted a machine that cannot host the VM.
    #[error("machine {pm_id} cannot host vm {vm_id}")]
    InsufficientCapacity { vm_id: u32, pm_id: u32 },

    /// A strategy found no machine for a new request. The workload is
    /// assumed feasible, so this aborts the run.
    #[error("no feasible machine found for vm {0}")]
    NoFit(u32),

    /// The underlying solver of a strategy failed.
    #[error("placement strategy failed: {0}")]
    Strategy(String),

    #[error("unknown placement strategy: {0}")]
    UnknownStrategy(String),

    #[error(transparent)]
    Trace(#[from] TraceError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
