//! Simulation engine: the single event consumer driving the data center.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use log::{error, info};

use crate::core::data_center::DataCenter;
use crate::core::error::SimulationError;
use crate::core::event_queue::EventQueue;
use crate::core::events::Event;
use crate::core::recorder::StatisticsRecorder;

/// The virtual clock. Written only by the engine; observers read an
/// instantaneous snapshot that may be one event stale.
#[derive(Clone, Default)]
pub struct SimTime(Arc<AtomicU64>);

impl SimTime {
    pub fn new() -> Self {
        Self(Arc::new(AtomicU64::new(0f64.to_bits())))
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    fn set(&self, time: f64) {
        self.0.store(time.to_bits(), Ordering::Release);
    }
}

/// Producer-side handle the data center uses to schedule follow-up events
/// (utilization updates, departures, migration completions) and to read the
/// current virtual time.
pub struct EngineHandle {
    queue: Arc<EventQueue>,
    time: SimTime,
}

impl EngineHandle {
    pub fn now(&self) -> f64 {
        self.time.get()
    }

    pub fn push(&self, event: Event) {
        self.queue.push(event);
    }
}

/// Pops events in time order, advances the virtual clock monotonically and
/// dispatches each event to the data center. Exactly one consumer exists per
/// simulation, which makes event processing deterministic.
///
/// The engine can either run on its own thread ([`start`](Self::start) /
/// [`stop`](Self::stop)) or be driven synchronously with
/// [`step`](Self::step); the two modes must not be mixed.
pub struct SimulationEngine {
    data_center: Arc<Mutex<DataCenter>>,
    queue: Arc<EventQueue>,
    recorder: Arc<Mutex<StatisticsRecorder>>,
    time: SimTime,
    stop_flag: Arc<AtomicBool>,
    dispatching: Arc<AtomicBool>,
    fatal: Arc<Mutex<Option<SimulationError>>>,
    worker: Option<JoinHandle<()>>,
}

impl SimulationEngine {
    pub fn new(
        data_center: Arc<Mutex<DataCenter>>,
        queue: Arc<EventQueue>,
        recorder: Arc<Mutex<StatisticsRecorder>>,
    ) -> Self {
        Self {
            data_center,
            queue,
            recorder,
            time: SimTime::new(),
            stop_flag: Arc::new(AtomicBool::new(false)),
            dispatching: Arc::new(AtomicBool::new(false)),
            fatal: Arc::new(Mutex::new(None)),
            worker: None,
        }
    }

    /// Launches the consumer thread.
    pub fn start(&mut self) {
        if self.worker.is_some() {
            return;
        }
        self.stop_flag.store(false, Ordering::Release);
        let data_center = self.data_center.clone();
        let queue = self.queue.clone();
        let recorder = self.recorder.clone();
        let time = self.time.clone();
        let stop_flag = self.stop_flag.clone();
        let dispatching = self.dispatching.clone();
        let fatal = self.fatal.clone();
        self.worker = Some(std::thread::spawn(move || {
            while !stop_flag.load(Ordering::Acquire) {
                let event = match queue.pop() {
                    Some(event) => event,
                    None => break,
                };
                dispatching.store(true, Ordering::Release);
                let result =
                    Self::process_event(event, &data_center, &queue, &recorder, &time);
                if let Err(e) = result {
                    error!("simulation stopped: {}", e);
                    *fatal.lock().unwrap() = Some(e);
                    queue.terminate();
                    dispatching.store(false, Ordering::Release);
                    break;
                }
                dispatching.store(false, Ordering::Release);
            }
            info!("event loop finished at time {}", time.get());
        }));
    }

    /// Stops the run: raises the stop flag, terminates the queue, joins the
    /// consumer and flushes the recorder. Idempotent; pending events are
    /// discarded.
    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::Release);
        self.queue.terminate();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        self.recorder.lock().unwrap().flush();
    }

    /// Synchronously processes the next pending event. Returns `Ok(false)`
    /// when the queue holds no event. Only for use without a running
    /// consumer thread.
    pub fn step(&self) -> Result<bool, SimulationError> {
        let event = match self.queue.try_pop() {
            Some(event) => event,
            None => return Ok(false),
        };
        Self::process_event(
            event,
            &self.data_center,
            &self.queue,
            &self.recorder,
            &self.time,
        )?;
        Ok(true)
    }

    /// Processes up to `count` pending events, stopping early when the queue
    /// drains; returns the number processed.
    pub fn steps(&self, count: u64) -> Result<u64, SimulationError> {
        let mut processed = 0;
        while processed < count && self.step()? {
            processed += 1;
        }
        Ok(processed)
    }

    fn process_event(
        event: Event,
        data_center: &Arc<Mutex<DataCenter>>,
        queue: &Arc<EventQueue>,
        recorder: &Arc<Mutex<StatisticsRecorder>>,
        time: &SimTime,
    ) -> Result<(), SimulationError> {
        let current_time = time.get();
        if event.time < current_time {
            return Err(SimulationError::CausalityViolation {
                event_time: event.time,
                current_time,
            });
        }
        time.set(event.time);

        let handle = EngineHandle {
            queue: queue.clone(),
            time: time.clone(),
        };
        data_center.lock().unwrap().handle_event(event, &handle)?;
        recorder
            .lock()
            .unwrap()
            .record(time.get(), &data_center.lock().unwrap());
        Ok(())
    }

    // OBSERVABILITY ///////////////////////////////////////////////////////

    pub fn current_time(&self) -> f64 {
        self.time.get()
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .map(|worker| !worker.is_finished())
            .unwrap_or(false)
    }

    /// True while the queue is drained and no dispatch is in flight.
    pub fn is_idle(&self) -> bool {
        self.queue.is_empty() && !self.dispatching.load(Ordering::Acquire)
    }

    pub fn event_count(&self) -> u64 {
        self.queue.pushed_count()
    }

    pub fn processed_event_count(&self) -> u64 {
        self.queue.popped_count()
    }

    pub fn remaining_event_count(&self) -> usize {
        self.queue.len()
    }

    /// Description of the fatal error that stopped the run, if any.
    pub fn fatal_error(&self) -> Option<String> {
        self.fatal.lock().unwrap().as_ref().map(|e| e.to_string())
    }

    /// Takes the fatal error out of the engine, leaving the terminal state
    /// observable as "stopped".
    pub fn take_fatal_error(&self) -> Option<SimulationError> {
        self.fatal.lock().unwrap().take()
    }
}

impl Drop for SimulationEngine {
    fn drop(&mut self) {
        self.stop();
    }
}
