use std::io::Write;

use dcsim::core::common::Resources;
use dcsim::core::config::{ConfigMachine, MigrationTimeModel, SimulationConfig};
use dcsim::core::error::SimulationError;
use dcsim::core::events::{Event, EventPayload};
use dcsim::core::recorder::StatsSample;
use dcsim::core::vm::VirtualMachine;
use dcsim::simulation::DataCenterSimulation;
use dcsim::strategies::{ClusterState, Decision, PlacementStrategy, StrategyDecisions};

/// Test strategy: places every request on the first machine with room and
/// migrates candidates the same way, with an immediate (bundle of one)
/// trigger and a configurable over-commit threshold.
struct ImmediateFirstFit {
    threshold: f64,
}

impl ImmediateFirstFit {
    fn new(threshold: f64) -> Self {
        Self { threshold }
    }
}

impl PlacementStrategy for ImmediateFirstFit {
    fn run(
        &mut self,
        new_requests: &[&VirtualMachine],
        to_migrate: &[&VirtualMachine],
        cluster: &ClusterState,
    ) -> Result<StrategyDecisions, SimulationError> {
        let mut states = dcsim::strategies::machine_state::snapshot(cluster.machines);
        let mut decisions = StrategyDecisions::default();
        for vm in new_requests {
            let need = vm.current_usage();
            let target = states.iter_mut().find(|state| state.can_host(&need)).map(|state| {
                state.allocate(need);
                state.id
            });
            decisions.placements.push(Decision {
                vm_id: vm.id(),
                target,
            });
        }
        for vm in to_migrate {
            let need = vm.current_usage();
            let target = states.iter_mut().find(|state| state.can_host(&need)).map(|state| {
                state.allocate(need);
                state.id
            });
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

    fn migration_threshold(&self) -> f64 {
        self.threshold
    }

    fn name(&self) -> &str {
        "ImmediateFirstFit"
    }
}

fn simulation(threshold: f64) -> DataCenterSimulation {
    let _ = env_logger::builder().is_test(true).try_init();
    DataCenterSimulation::with_strategy(
        Box::new(ImmediateFirstFit::new(threshold)),
        MigrationTimeModel::Batched,
    )
}

fn default_machine(sim: &mut DataCenterSimulation) -> u32 {
    sim.add_physical_machine(Resources::new(8., 16., 100., 1000., 0.), 0.5, 1., 2.)
}

fn request(id: u32, time: f64, duration: f64, requested: Resources, utilization: f64) -> Event {
    let mut vm = VirtualMachine::new(id, requested, duration);
    vm.set_utilization(utilization);
    Event::new(time, EventPayload::VmRequest(Box::new(vm)))
}

fn total_used_cpu(sim: &DataCenterSimulation) -> f64 {
    sim.get_machine_usage_info().iter().map(|info| info.used.cpu).sum()
}

#[test]
// VM with 50% utilization occupies half of its requested CPU, then departs
// and leaves the machine powered off
fn single_machine_vm_cycle() {
    let mut sim = simulation(1.0);
    default_machine(&mut sim);

    sim.push_event(request(1, 0., 10., Resources::new(4., 8., 10., 100., 0.), 0.5));
    assert!(sim.step().unwrap());

    assert_eq!(sim.vm_count(), 1);
    assert_eq!(sim.vm_location(1), Some(0));
    assert_eq!(sim.get_turned_on_machine_count(), 1);
    let info = &sim.get_machine_usage_info()[0];
    assert_eq!(info.used.cpu, 2.);
    assert_eq!(info.used.ram, 8.);
    assert_eq!(sim.get_resource_utilizations().cpu, 25.);
    // power-on cost 0.5 * 8 plus 1.0 per used CPU unit
    assert_eq!(sim.get_total_power_consumption(), 6.);
    assert_eq!(sim.get_average_power_consumption(), 6.);

    // departure was scheduled at start + duration
    assert!(sim.step().unwrap());
    assert_eq!(sim.current_time(), 10.);
    assert_eq!(sim.vm_count(), 0);
    assert_eq!(sim.get_turned_on_machine_count(), 0);
    assert_eq!(sim.get_number_of_sla_violations(), 0);
    assert!(!sim.step().unwrap());
}

#[test]
// A request that fits nowhere aborts the run
fn no_fit_is_fatal() {
    let mut sim = simulation(1.0);
    sim.add_physical_machine(Resources::new(4., 16., 100., 1000., 0.), 0.5, 1., 2.);
    sim.add_physical_machine(Resources::new(4., 16., 100., 1000., 0.), 0.5, 1., 2.);

    sim.push_event(request(1, 0., 10., Resources::new(5., 8., 10., 100., 0.), 1.0));
    let result = sim.step();
    assert!(matches!(result, Err(SimulationError::NoFit(1))));
}

#[test]
// Utilization updates propagate into machine usage and both migration
// endpoints reserve the VM while it moves
fn utilization_update_and_migration_reservation() {
    let mut sim = simulation(0.8);
    default_machine(&mut sim);
    default_machine(&mut sim);

    sim.push_event(request(7, 0., 100., Resources::new(8., 8., 10., 100., 0.), 0.5));
    sim.push_event(Event::new(
        5.,
        EventPayload::VmUtilUpdate {
            vm_id: 7,
            utilization: 1.0,
        },
    ));
    sim.steps(2).unwrap();

    // the update overcommitted machine 0 and scheduled a migration to 1
    assert_eq!(sim.get_number_of_sla_violations(), 1);
    assert_eq!(sim.vm_location(7), Some(1));
    let info = sim.get_machine_usage_info();
    assert_eq!(info[0].used.cpu, 8.);
    assert_eq!(info[1].used.cpu, 8.);
    assert_eq!(sim.get_turned_on_machine_count(), 2);
}

#[test]
// Departure during migration cancels it on both endpoints; the stale
// MigrationComplete event is a no-op
fn migration_cancelled_by_departure() {
    let mut sim = simulation(0.8);
    default_machine(&mut sim);
    default_machine(&mut sim);

    sim.push_event(request(7, 0., 8., Resources::new(8., 8., 10., 100., 0.), 0.5));
    sim.push_event(Event::new(
        5.,
        EventPayload::VmUtilUpdate {
            vm_id: 7,
            utilization: 1.0,
        },
    ));
    // placement, then the update that schedules the migration
    sim.steps(2).unwrap();
    assert_eq!(sim.vm_location(7), Some(1));

    // departure at t = 8 arrives before the transfer completes
    assert!(sim.step().unwrap());
    assert_eq!(sim.current_time(), 8.);
    assert_eq!(sim.vm_count(), 0);
    assert_eq!(sim.get_turned_on_machine_count(), 0);
    assert_eq!(total_used_cpu(&sim), 0.);

    // the pending MigrationComplete finds no VM and changes nothing
    assert!(sim.step().unwrap());
    assert_eq!(sim.vm_count(), 0);
    assert_eq!(sim.get_migration_count(), 0);
    assert_eq!(sim.get_turned_on_machine_count(), 0);
}

#[test]
// A completed migration conserves the index and the summed usage
fn migration_conservation() {
    let mut sim = simulation(0.8);
    default_machine(&mut sim);
    default_machine(&mut sim);

    sim.push_event(request(7, 0., 1000., Resources::new(8., 8., 10., 100., 0.), 0.5));
    sim.push_event(Event::new(
        5.,
        EventPayload::VmUtilUpdate {
            vm_id: 7,
            utilization: 1.0,
        },
    ));
    sim.steps(2).unwrap();
    // while migrating both endpoints reserve the usage
    assert_eq!(total_used_cpu(&sim), 16.);

    // transfer time with the batched model: 10 / (100 / 1000) = 100
    assert!(sim.step().unwrap());
    assert_eq!(sim.current_time(), 105.);
    assert_eq!(sim.vm_count(), 1);
    assert_eq!(sim.vm_location(7), Some(1));
    assert_eq!(sim.get_migration_count(), 1);
    assert_eq!(total_used_cpu(&sim), 8.);
    let info = sim.get_machine_usage_info();
    assert_eq!(info[0].used.cpu, 0.);
    assert_eq!(sim.get_turned_on_machine_count(), 1);
}

#[test]
// Over-commitment detection counts one SLA violation per triggering event
fn overcommit_detection_counts_once() {
    let mut sim = simulation(0.8);
    sim.add_physical_machine(Resources::new(10., 100., 100., 1000., 0.), 0.5, 1., 2.);

    sim.push_event(request(1, 0., 100., Resources::new(6., 8., 10., 100., 0.), 0.5));
    sim.push_event(request(2, 0., 100., Resources::new(6., 8., 10., 100., 0.), 1.0));
    sim.steps(2).unwrap();
    assert_eq!(sim.get_number_of_sla_violations(), 0);

    // 3 + 6 = 9 of 10 so far; the update takes vm 1 to 4.2 and the machine
    // to 102%
    sim.push_event(Event::new(
        1.,
        EventPayload::VmUtilUpdate {
            vm_id: 1,
            utilization: 0.7,
        },
    ));
    assert!(sim.step().unwrap());
    assert_eq!(sim.get_number_of_sla_violations(), 1);
    // no second machine, so the migration candidates found no fit
    assert_eq!(sim.vm_count(), 2);
    assert_eq!(sim.get_migration_count(), 0);
}

#[test]
// Events pushed at the same time are processed in insertion order
fn equal_time_requests_keep_insertion_order() {
    let mut sim = simulation(1.0);
    for _ in 0..3 {
        sim.add_physical_machine(Resources::new(4., 16., 100., 1000., 0.), 0.5, 1., 2.);
    }

    for id in [3, 1, 2] {
        sim.push_event(request(id, 0., 100., Resources::new(3., 8., 10., 100., 0.), 1.0));
    }
    sim.steps(3).unwrap();

    assert_eq!(sim.vm_location(3), Some(0));
    assert_eq!(sim.vm_location(1), Some(1));
    assert_eq!(sim.vm_location(2), Some(2));
}

#[test]
// After all arrivals are processed the index holds every VM and the summed
// request equals the summed machine usage
fn arrivals_conserve_requested_resources() {
    let mut sim = simulation(1.0);
    for _ in 0..5 {
        default_machine(&mut sim);
    }

    let mut requested_cpu = 0.;
    for id in 0..8 {
        let cpu = 1. + (id % 4) as f64;
        requested_cpu += cpu;
        sim.push_event(request(id, 0., 1e6, Resources::new(cpu, 1., 1., 10., 0.), 1.0));
    }
    sim.steps(8).unwrap();

    assert_eq!(sim.vm_count(), 8);
    assert!((total_used_cpu(&sim) - requested_cpu).abs() < 1e-9);
}

#[test]
// An event older than the engine clock is a fatal causality violation
fn stale_event_is_a_causality_violation() {
    let mut sim = simulation(1.0);
    default_machine(&mut sim);

    sim.push_event(request(1, 5., 100., Resources::new(1., 1., 1., 10., 0.), 1.0));
    assert!(sim.step().unwrap());
    assert_eq!(sim.current_time(), 5.);

    sim.push_event(request(2, 1., 100., Resources::new(1., 1., 1., 10., 0.), 1.0));
    let result = sim.step();
    assert!(matches!(
        result,
        Err(SimulationError::CausalityViolation { .. })
    ));
}

#[test]
// An update for an unregistered VM is an error
fn update_for_unknown_vm_fails() {
    let mut sim = simulation(1.0);
    default_machine(&mut sim);

    sim.push_event(Event::new(
        0.,
        EventPayload::VmUtilUpdate {
            vm_id: 99,
            utilization: 0.5,
        },
    ));
    let result = sim.step();
    assert!(matches!(result, Err(SimulationError::UnknownVm(99))));
}

#[test]
// The strategy can be swapped by a scheduled event
fn reconfigure_strategy_event_swaps_the_strategy() {
    let mut sim = simulation(1.0);
    default_machine(&mut sim);
    assert_eq!(sim.strategy_name(), "ImmediateFirstFit");

    sim.push_event(Event::new(
        0.,
        EventPayload::ReconfigureStrategy {
            name: "BestFitDecreasing".to_string(),
        },
    ));
    assert!(sim.step().unwrap());
    assert_eq!(sim.strategy_name(), "BestFitDecreasing");
}

#[test]
// remove_events drops everything tied to a VM
fn remove_events_filters_the_queue() {
    let sim = simulation(1.0);
    for id in 0..4 {
        sim.push_event(Event::new(id as f64, EventPayload::VmDeparture { vm_id: id }));
    }
    let removed = sim.remove_events(|event| event.vm_id() == Some(2));
    assert_eq!(removed, 1);
    assert_eq!(sim.remaining_event_count(), 3);
}

#[test]
// Full threaded run from a trace file, with binary statistics recording
fn trace_driven_run_records_statistics() {
    let mut trace = tempfile::NamedTempFile::new().unwrap();
    writeln!(trace, "# id,type,start,duration,cpu,fpga,ram,disk,bw,valSize,utils").unwrap();
    writeln!(trace, "1,0,0,10,4,0,8,10,100,1,50").unwrap();
    let stats = tempfile::NamedTempFile::new().unwrap();

    let config = SimulationConfig {
        strategy: "OpenStack".to_string(),
        migration_time_model: MigrationTimeModel::Batched,
        statistics_output: Some(stats.path().to_string_lossy().into_owned()),
        trace_files: vec![trace.path().to_string_lossy().into_owned()],
        machines: vec![ConfigMachine {
            cpu: 8.,
            ram: 16.,
            disk: 100.,
            bandwidth: 1000.,
            fpga: 0.,
            per_core_base_power: 0.5,
            power_per_cpu_unit: 1.,
            power_per_fpga_unit: 2.,
            amount: 1,
        }],
    };
    let mut sim = DataCenterSimulation::new(config).unwrap();
    sim.start();
    sim.wait_until_idle();
    sim.stop();

    assert!(sim.fatal_error().is_none());
    assert!(sim.trace_failures().is_empty());
    assert_eq!(sim.processed_event_count(), 2);
    assert_eq!(sim.current_time(), 10.);
    assert_eq!(sim.vm_count(), 0);
    assert_eq!(sim.get_turned_on_machine_count(), 0);

    let samples = StatsSample::read_file(stats.path()).unwrap();
    assert_eq!(samples.len(), 2);
    assert_eq!(samples[0].time, 0.);
    assert_eq!(samples[0].utilization.cpu, 25.);
    assert_eq!(samples[0].turned_on_machine_count, 1);
    assert_eq!(samples[1].time, 10.);
    assert_eq!(samples[1].turned_on_machine_count, 0);
}

#[test]
// Stopping twice is observationally identical to stopping once
fn stop_is_idempotent() {
    let mut trace = tempfile::NamedTempFile::new().unwrap();
    writeln!(trace, "1,0,0,10,4,0,8,10,100,1,50").unwrap();

    let mut sim = simulation(1.0);
    default_machine(&mut sim);
    sim.read_trace_file(trace.path());
    sim.start();
    sim.wait_until_idle();
    sim.stop();

    let time = sim.current_time();
    let processed = sim.processed_event_count();
    assert!(!sim.is_running());

    sim.stop();
    assert_eq!(sim.current_time(), time);
    assert_eq!(sim.processed_event_count(), processed);
    assert!(!sim.is_running());
}

#[test]
// A no-fit in the threaded mode surfaces as a terminal error
fn fatal_error_is_observable_after_threaded_run() {
    let mut sim = simulation(1.0);
    sim.add_physical_machine(Resources::new(4., 16., 100., 1000., 0.), 0.5, 1., 2.);

    sim.start();
    sim.push_event(request(1, 0., 10., Resources::new(5., 8., 10., 100., 0.), 1.0));
    sim.wait_until_idle();
    sim.stop();

    let error = sim.take_fatal_error();
    assert!(matches!(error, Some(SimulationError::NoFit(1))));
}
