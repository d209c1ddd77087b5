//! Simulation assembly and host-facing API.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::core::common::{MachineUsageInfo, Resources};
use crate::core::config::SimulationConfig;
use crate::core::data_center::DataCenter;
use crate::core::engine::SimulationEngine;
use crate::core::error::{SimulationError, TraceError};
use crate::core::event_queue::EventQueue;
use crate::core::events::Event;
use crate::core::recorder::StatisticsRecorder;
use crate::extensions::trace_reader::TraceReader;
use crate::strategies::{placement_strategy_resolver, PlacementStrategy};

/// Wires the event queue, data center, engine, trace producers and the
/// statistics recorder together and exposes the embedder API.
///
/// Two driving modes are supported: a background consumer thread
/// ([`start`](Self::start) / [`wait_until_idle`](Self::wait_until_idle) /
/// [`stop`](Self::stop)), and synchronous stepping through
/// [`step`](Self::step) for deterministic, single-threaded runs.
pub struct DataCenterSimulation {
    queue: Arc<EventQueue>,
    data_center: Arc<Mutex<DataCenter>>,
    recorder: Arc<Mutex<StatisticsRecorder>>,
    engine: SimulationEngine,
    trace_reader: TraceReader,
}

impl DataCenterSimulation {
    /// Builds a simulation from a configuration: resolves the strategy,
    /// creates the machines, opens the statistics output and attaches one
    /// producer per trace file.
    pub fn new(config: SimulationConfig) -> Result<Self, SimulationError> {
        let strategy = placement_strategy_resolver(&config.strategy)?;
        let mut sim = Self::with_strategy(strategy, config.migration_time_model);

        for machine in &config.machines {
            for _ in 0..machine.amount {
                sim.add_physical_machine(
                    Resources::new(machine.cpu, machine.ram, machine.disk, machine.bandwidth, machine.fpga),
                    machine.per_core_base_power,
                    machine.power_per_cpu_unit,
                    machine.power_per_fpga_unit,
                );
            }
        }
        if let Some(path) = &config.statistics_output {
            sim.set_statistics_output(Path::new(path))?;
        }
        for trace in &config.trace_files {
            sim.read_trace_file(PathBuf::from(trace));
        }
        Ok(sim)
    }

    /// Builds an empty simulation around the given strategy.
    pub fn with_strategy(
        strategy: Box<dyn PlacementStrategy>,
        migration_time_model: crate::core::config::MigrationTimeModel,
    ) -> Self {
        let queue = Arc::new(EventQueue::new());
        let data_center = Arc::new(Mutex::new(DataCenter::new(strategy, migration_time_model)));
        let recorder = Arc::new(Mutex::new(StatisticsRecorder::new()));
        let engine = SimulationEngine::new(data_center.clone(), queue.clone(), recorder.clone());
        let trace_reader = TraceReader::new(queue.clone());
        Self {
            queue,
            data_center,
            recorder,
            engine,
            trace_reader,
        }
    }

    // CONFIGURATION ///////////////////////////////////////////////////////

    /// Adds a machine and returns its id.
    pub fn add_physical_machine(
        &mut self,
        total: Resources,
        per_core_base_power: f64,
        power_per_cpu_unit: f64,
        power_per_fpga_unit: f64,
    ) -> u32 {
        self.data_center.lock().unwrap().add_physical_machine(
            total,
            per_core_base_power,
            power_per_cpu_unit,
            power_per_fpga_unit,
        )
    }

    pub fn set_placement_strategy(&mut self, strategy: Box<dyn PlacementStrategy>) {
        self.data_center.lock().unwrap().set_placement_strategy(strategy);
    }

    /// Resolves and installs a strategy from its config string.
    pub fn set_placement_strategy_named(&mut self, config_str: &str) -> Result<(), SimulationError> {
        let strategy = placement_strategy_resolver(config_str)?;
        self.set_placement_strategy(strategy);
        Ok(())
    }

    pub fn set_statistics_output(&mut self, path: &Path) -> Result<(), SimulationError> {
        self.recorder.lock().unwrap().set_output_path(path)?;
        Ok(())
    }

    /// Starts a producer thread feeding events from the trace file.
    pub fn read_trace_file(&mut self, path: impl Into<PathBuf>) {
        self.trace_reader.read_trace_file(path);
    }

    // EXECUTION ///////////////////////////////////////////////////////////

    /// Launches the consumer thread.
    pub fn start(&mut self) {
        self.engine.start();
    }

    /// Stops the run: the consumer is joined first, then the producers.
    pub fn stop(&mut self) {
        self.engine.stop();
        self.trace_reader.stop();
    }

    /// Blocks until every producer finished and the queue has drained, or
    /// the run died on a fatal error.
    pub fn wait_until_idle(&mut self) {
        self.trace_reader.wait();
        loop {
            if self.engine.fatal_error().is_some() || !self.engine.is_running() {
                return;
            }
            if self.engine.is_idle() {
                // Settle: an idle observation can race the last dispatch.
                std::thread::sleep(Duration::from_millis(2));
                if self.engine.is_idle() {
                    return;
                }
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    /// Synchronously processes the next pending event; see
    /// [`SimulationEngine::step`].
    pub fn step(&self) -> Result<bool, SimulationError> {
        self.engine.step()
    }

    /// Processes up to `count` pending events and returns how many ran.
    pub fn steps(&self, count: u64) -> Result<u64, SimulationError> {
        self.engine.steps(count)
    }

    /// Pushes an externally produced event.
    pub fn push_event(&self, event: Event) {
        self.queue.push(event);
    }

    /// Drops queued events matching the predicate, e.g. everything tied to
    /// a deleted VM. Returns the number removed.
    pub fn remove_events<F>(&self, predicate: F) -> usize
    where
        F: Fn(&Event) -> bool,
    {
        self.queue.remove(predicate)
    }

    // OBSERVABILITY ///////////////////////////////////////////////////////

    pub fn current_time(&self) -> f64 {
        self.engine.current_time()
    }

    pub fn is_running(&self) -> bool {
        self.engine.is_running()
    }

    pub fn event_count(&self) -> u64 {
        self.engine.event_count()
    }

    pub fn processed_event_count(&self) -> u64 {
        self.engine.processed_event_count()
    }

    pub fn remaining_event_count(&self) -> usize {
        self.engine.remaining_event_count()
    }

    pub fn fatal_error(&self) -> Option<String> {
        self.engine.fatal_error()
    }

    pub fn take_fatal_error(&self) -> Option<SimulationError> {
        self.engine.take_fatal_error()
    }

    pub fn trace_failures(&self) -> Vec<TraceError> {
        self.trace_reader.take_failures()
    }

    pub fn machine_count(&self) -> usize {
        self.data_center.lock().unwrap().machine_count()
    }

    pub fn vm_count(&self) -> usize {
        self.data_center.lock().unwrap().vm_count()
    }

    pub fn vm_location(&self, vm_id: u32) -> Option<u32> {
        self.data_center.lock().unwrap().vm_location(vm_id)
    }

    pub fn get_machine_usage_info(&self) -> Vec<MachineUsageInfo> {
        self.data_center.lock().unwrap().machine_usage_info()
    }

    /// System-wide used/total utilization in percent over powered-on
    /// machines.
    pub fn get_resource_utilizations(&self) -> Resources {
        self.data_center.lock().unwrap().resource_utilizations()
    }

    pub fn get_turned_on_machine_count(&self) -> usize {
        self.data_center.lock().unwrap().turned_on_machine_count()
    }

    pub fn get_total_power_consumption(&self) -> f64 {
        self.data_center.lock().unwrap().total_power_consumption()
    }

    pub fn get_average_power_consumption(&self) -> f64 {
        self.data_center.lock().unwrap().average_power_consumption()
    }

    pub fn get_number_of_sla_violations(&self) -> u64 {
        self.data_center.lock().unwrap().sla_violation_count()
    }

    pub fn get_migration_count(&self) -> u64 {
        self.data_center.lock().unwrap().migration_count()
    }

    pub fn strategy_name(&self) -> String {
        self.data_center.lock().unwrap().strategy_name()
    }

    pub fn bundle_size(&self) -> usize {
        self.data_center.lock().unwrap().bundle_size()
    }
}
