//! Trace file readers feeding the event queue.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use log::{error, info, warn};

use crate::core::common::Resources;
use crate::core::error::TraceError;
use crate::core::event_queue::EventQueue;
use crate::core::events::{Event, EventPayload};
use crate::core::vm::VirtualMachine;

/// Reads workload trace files and pushes one `VmRequest` event per arrival
/// record, with one producer thread per file.
///
/// Record format, comma-separated:
/// `reqId,reqType,tStart,duration,cpu,fpga,ram,disk,bandwidth,valSize,u_0,...,u_{valSize-1}`.
/// Blank lines and lines starting with `#` are skipped. Only `reqType = 0`
/// (VM arrival) is understood; other types are logged and skipped. The
/// utilization values are percentages; the first is the initial utilization
/// and the remaining `valSize - 1` are spread evenly across the VM's
/// duration. Malformed lines are skipped with a diagnostic, except a
/// declared `valSize` of zero, which aborts the producer that read it.
pub struct TraceReader {
    queue: Arc<EventQueue>,
    stop_flag: Arc<AtomicBool>,
    failures: Arc<Mutex<Vec<TraceError>>>,
    workers: Vec<JoinHandle<()>>,
}

impl TraceReader {
    pub fn new(queue: Arc<EventQueue>) -> Self {
        Self {
            queue,
            stop_flag: Arc::new(AtomicBool::new(false)),
            failures: Arc::new(Mutex::new(Vec::new())),
            workers: Vec::new(),
        }
    }

    /// Starts a producer thread for the given trace file.
    pub fn read_trace_file(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        let queue = self.queue.clone();
        let stop_flag = self.stop_flag.clone();
        let failures = self.failures.clone();
        self.workers.push(std::thread::spawn(move || {
            if let Err(e) = parse_loop(&path, &queue, &stop_flag) {
                error!(target: "trace", "{}", e);
                failures.lock().unwrap().push(e);
            }
        }));
    }

    /// Waits for every producer to reach the end of its file.
    pub fn wait(&mut self) {
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }

    /// Asks every producer to stop and joins them. Lines read after the
    /// stop request are not emitted.
    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::Release);
        self.wait();
    }

    /// Structural errors hit by producers so far.
    pub fn take_failures(&self) -> Vec<TraceError> {
        std::mem::take(&mut *self.failures.lock().unwrap())
    }
}

impl Drop for TraceReader {
    fn drop(&mut self) {
        self.stop();
    }
}

fn parse_loop(path: &PathBuf, queue: &EventQueue, stop_flag: &AtomicBool) -> Result<(), TraceError> {
    let display_name = path.display().to_string();
    let file = File::open(path).map_err(|source| TraceError::Io {
        file: display_name.clone(),
        source,
    })?;
    let reader = BufReader::new(file);

    let mut emitted: u64 = 0;
    for (line_index, line) in reader.lines().enumerate() {
        if stop_flag.load(Ordering::Acquire) {
            break;
        }
        let line_no = line_index as u64 + 1;
        let line = line.map_err(|source| TraceError::Io {
            file: display_name.clone(),
            source,
        })?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        match parse_record(line) {
            Ok(Record::Arrival { time, vm }) => {
                queue.push(Event::new(time, EventPayload::VmRequest(Box::new(vm))));
                emitted += 1;
            }
            Ok(Record::Unknown { req_type }) => {
                warn!(
                    target: "trace",
                    "{}:{}: unknown record type {}, skipped", display_name, line_no, req_type
                );
            }
            Err(ParseError::ZeroValSize) => {
                return Err(TraceError::ZeroValSize {
                    file: display_name,
                    line: line_no,
                });
            }
            Err(ParseError::Malformed(reason)) => {
                warn!(
                    target: "trace",
                    "{}:{}: {}, line skipped", display_name, line_no, reason
                );
            }
        }
    }
    info!(target: "trace", "{}: finished, {} requests emitted", display_name, emitted);
    Ok(())
}

enum Record {
    Arrival { time: f64, vm: VirtualMachine },
    Unknown { req_type: i64 },
}

enum ParseError {
    ZeroValSize,
    Malformed(String),
}

fn field<'a>(fields: &[&'a str], index: usize) -> Result<&'a str, ParseError> {
    fields
        .get(index)
        .copied()
        .ok_or_else(|| ParseError::Malformed(format!("missing field {}", index)))
}

fn parse_field<T: std::str::FromStr>(fields: &[&str], index: usize) -> Result<T, ParseError> {
    let raw = field(fields, index)?;
    raw.trim()
        .parse()
        .map_err(|_| ParseError::Malformed(format!("bad value in field {}: {}", index, raw)))
}

fn parse_record(line: &str) -> Result<Record, ParseError> {
    let fields: Vec<&str> = line.split(',').collect();

    let req_id: u32 = parse_field(&fields, 0)?;
    let req_type: i64 = parse_field(&fields, 1)?;
    if req_type != 0 {
        return Ok(Record::Unknown { req_type });
    }

    let time: f64 = parse_field(&fields, 2)?;
    let duration: f64 = parse_field(&fields, 3)?;
    let cpu: f64 = parse_field(&fields, 4)?;
    let fpga: f64 = parse_field(&fields, 5)?;
    let ram: f64 = parse_field(&fields, 6)?;
    let disk: f64 = parse_field(&fields, 7)?;
    let bandwidth: f64 = parse_field(&fields, 8)?;
    let val_size: usize = parse_field(&fields, 9)?;
    if val_size == 0 {
        return Err(ParseError::ZeroValSize);
    }

    let mut vm = VirtualMachine::new(req_id, Resources::new(cpu, ram, disk, bandwidth, fpga), duration);
    let initial: f64 = parse_field(&fields, 10)?;
    vm.set_utilization(initial / 100.);

    // The remaining values are spread evenly across the duration.
    let updates = val_size - 1;
    if updates > 0 {
        let step = duration / updates as f64;
        for i in 0..updates {
            let utilization: f64 = parse_field(&fields, 11 + i)?;
            vm.add_future_update((i + 1) as f64 * step, utilization / 100.);
        }
    }
    Ok(Record::Arrival { time, vm })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn read_all(content: &str) -> (Arc<EventQueue>, Vec<TraceError>) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        let queue = Arc::new(EventQueue::new());
        let mut reader = TraceReader::new(queue.clone());
        reader.read_trace_file(file.path());
        reader.wait();
        let failures = reader.take_failures();
        (queue, failures)
    }

    #[test]
    fn parses_arrivals_and_normalizes_percentages() {
        let (queue, failures) =
            read_all("# comment\n\n1,0,0.0,10.0,4,0,8,10,100,3,50,75,100\n");
        assert!(failures.is_empty());
        assert_eq!(queue.len(), 1);

        let event = queue.try_pop().unwrap();
        assert_eq!(event.time, 0.);
        let EventPayload::VmRequest(vm) = event.payload else {
            panic!("expected a request event");
        };
        assert_eq!(vm.id(), 1);
        assert_eq!(vm.current_usage().cpu, 2.);
        assert_eq!(vm.requested(), Resources::new(4., 8., 10., 100., 0.));
        let updates = vm.future_updates();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].offset, 5.);
        assert_eq!(updates[0].utilization, 0.75);
        assert_eq!(updates[1].offset, 10.);
        assert_eq!(updates[1].utilization, 1.);
    }

    #[test]
    fn single_value_records_are_valid() {
        let (queue, failures) = read_all("7,0,1.5,10,2,0,4,5,50,1,80\n");
        assert!(failures.is_empty());
        let event = queue.try_pop().unwrap();
        let EventPayload::VmRequest(vm) = event.payload else {
            panic!("expected a request event");
        };
        assert_eq!(vm.utilization(), 0.8);
        assert!(vm.future_updates().is_empty());
    }

    #[test]
    fn skips_unknown_types_and_malformed_lines() {
        let (queue, failures) = read_all("1,3,0,1,1,0,1,1,1,1,50\nnot,a,number\n2,0,0,1,1,0,1,1,1,1,50\n");
        assert!(failures.is_empty());
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.try_pop().unwrap().vm_id(), Some(2));
    }

    #[test]
    fn zero_val_size_is_fatal_for_the_producer() {
        let (queue, failures) = read_all("1,0,0,1,1,0,1,1,1,0\n2,0,0,1,1,0,1,1,1,1,50\n");
        assert_eq!(queue.len(), 0);
        assert_eq!(failures.len(), 1);
        assert!(matches!(failures[0], TraceError::ZeroValSize { line: 1, .. }));
    }
}
