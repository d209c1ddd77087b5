//! Virtual machine placement strategies.

pub mod alpha_beta;
pub mod best_fit_decreasing;
pub mod drl;
pub mod first_fit_decreasing;
pub mod ilp;
pub mod machine_state;
pub mod openstack;
pub mod pso;

use crate::core::config::options::parse_config_value;
use crate::core::error::SimulationError;
use crate::core::physical_machine::PhysicalMachine;
use crate::core::vm::VirtualMachine;

pub use alpha_beta::AlphaBeta;
pub use best_fit_decreasing::BestFitDecreasing;
pub use first_fit_decreasing::FirstFitDecreasing;
pub use openstack::OpenStack;

/// Counters accumulated since the previous placement run.
#[derive(Clone, Copy, Debug, Default)]
pub struct WindowCounters {
    pub sla_violations: u64,
    pub migrations: u64,
    pub new_requests: u64,
}

/// Read-only view of the data center handed to a strategy.
pub struct ClusterState<'a> {
    pub machines: &'a [PhysicalMachine],
    /// Number of live VMs in the data-center index.
    pub vm_count: usize,
    pub window: WindowCounters,
}

/// A single strategy decision: the machine chosen for a VM, or `None` when
/// no feasible machine was found.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Decision {
    pub vm_id: u32,
    pub target: Option<u32>,
}

/// The output of one strategy invocation.
#[derive(Debug, Default)]
pub struct StrategyDecisions {
    pub placements: Vec<Decision>,
    pub migrations: Vec<Decision>,
}

/// Trait for implementation of VM placement strategies.
///
/// A strategy maps a bundle of new requests and migration candidates onto
/// machines. It must not mutate VMs or machines; the data center applies the
/// returned decisions. Besides the placement itself a strategy owns two
/// values the data center consults between runs: the bundle size that
/// triggers a placement run, and the utilization threshold above which a
/// machine counts as overcommitted.
pub trait PlacementStrategy: Send {
    fn run(
        &mut self,
        new_requests: &[&VirtualMachine],
        to_migrate: &[&VirtualMachine],
        cluster: &ClusterState,
    ) -> Result<StrategyDecisions, SimulationError>;

    /// Number of pending requests that triggers a placement run.
    fn bundle_size(&self) -> usize {
        10
    }

    /// Normalized utilization threshold for over-commitment detection.
    /// The default of 1.0 disables SLA-driven migration.
    fn migration_threshold(&self) -> f64 {
        1.0
    }

    /// Called after the decisions of a run have been applied, with the
    /// resulting cluster state. Lets learning strategies observe outcomes.
    fn observe(&mut self, _cluster: &ClusterState) {}

    fn name(&self) -> &str;
}

/// Resolves a strategy config string like `"OpenStack[ial=0.5]"` into a
/// strategy instance.
pub fn placement_strategy_resolver(
    config_str: &str,
) -> Result<Box<dyn PlacementStrategy>, SimulationError> {
    let (name, options) = parse_config_value(config_str);
    match name.as_str() {
        "FirstFitDecreasing" => Ok(Box::new(FirstFitDecreasing::new())),
        "BestFitDecreasing" => Ok(Box::new(BestFitDecreasing::new())),
        "AlphaBeta" => Ok(Box::new(AlphaBeta::from_options(&options)?)),
        "OpenStack" => Ok(Box::new(OpenStack::from_options(&options)?)),
        "Papso" => Ok(Box::new(pso::Papso::from_options(&options)?)),
        "Ilp" => Ok(Box::new(ilp::IlpConsolidator::from_options(&options)?)),
        "IlpDqn" => Ok(Box::new(drl::IlpRlStrategy::from_options(
            drl::AgentKind::Dqn,
            &options,
        )?)),
        "IlpDoubleDqn" => Ok(Box::new(drl::IlpRlStrategy::from_options(
            drl::AgentKind::DoubleDqn,
            &options,
        )?)),
        _ => Err(SimulationError::UnknownStrategy(config_str.to_string())),
    }
}
