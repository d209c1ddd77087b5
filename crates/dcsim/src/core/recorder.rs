//! Periodic binary recording of simulation statistics.

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::error;

use crate::core::common::Resources;
use crate::core::data_center::DataCenter;

/// One statistics record as written to the output file.
///
/// The on-disk layout is packed little-endian, field order as declared:
/// six `f64` (time and the five utilization axes in percent), one `u64`
/// (powered-on machine count), two `f64` (average and total power). The
/// layout is a stable contract for offline readers.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StatsSample {
    pub time: f64,
    pub utilization: Resources,
    pub turned_on_machine_count: u64,
    pub average_power: f64,
    pub total_power: f64,
}

impl StatsSample {
    /// Reads one record; `Ok(None)` at a clean end of the stream.
    pub fn read_from<R: Read>(reader: &mut R) -> std::io::Result<Option<StatsSample>> {
        let time = match reader.read_f64::<LittleEndian>() {
            Ok(time) => time,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(Some(StatsSample {
            time,
            utilization: Resources {
                cpu: reader.read_f64::<LittleEndian>()?,
                ram: reader.read_f64::<LittleEndian>()?,
                disk: reader.read_f64::<LittleEndian>()?,
                bandwidth: reader.read_f64::<LittleEndian>()?,
                fpga: reader.read_f64::<LittleEndian>()?,
            },
            turned_on_machine_count: reader.read_u64::<LittleEndian>()?,
            average_power: reader.read_f64::<LittleEndian>()?,
            total_power: reader.read_f64::<LittleEndian>()?,
        }))
    }

    /// Reads all records from a file.
    pub fn read_file(path: &Path) -> std::io::Result<Vec<StatsSample>> {
        let mut reader = std::io::BufReader::new(File::open(path)?);
        let mut samples = Vec::new();
        while let Some(sample) = StatsSample::read_from(&mut reader)? {
            samples.push(sample);
        }
        Ok(samples)
    }
}

/// Appends one [`StatsSample`] per processed event to the configured output
/// file. Recording is disabled until an output path is set.
#[derive(Default)]
pub struct StatisticsRecorder {
    writer: Option<BufWriter<File>>,
}

impl StatisticsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the output file; errors opening it surface to the caller.
    pub fn set_output_path(&mut self, path: &Path) -> std::io::Result<()> {
        self.writer = Some(BufWriter::new(File::create(path)?));
        Ok(())
    }

    /// Samples the data center. A write failure stops further recording for
    /// the rest of the run.
    pub fn record(&mut self, time: f64, data_center: &DataCenter) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        let utilization = data_center.resource_utilizations();
        let result = (|| -> std::io::Result<()> {
            writer.write_f64::<LittleEndian>(time)?;
            writer.write_f64::<LittleEndian>(utilization.cpu)?;
            writer.write_f64::<LittleEndian>(utilization.ram)?;
            writer.write_f64::<LittleEndian>(utilization.disk)?;
            writer.write_f64::<LittleEndian>(utilization.bandwidth)?;
            writer.write_f64::<LittleEndian>(utilization.fpga)?;
            writer.write_u64::<LittleEndian>(data_center.turned_on_machine_count() as u64)?;
            writer.write_f64::<LittleEndian>(data_center.average_power_consumption())?;
            writer.write_f64::<LittleEndian>(data_center.total_power_consumption())?;
            Ok(())
        })();
        if let Err(e) = result {
            error!(target: "stats", "stopping statistics recording: {}", e);
            self.writer = None;
        }
    }

    pub fn flush(&mut self) {
        if let Some(writer) = self.writer.as_mut() {
            if let Err(e) = writer.flush() {
                error!(target: "stats", "failed to flush statistics: {}", e);
            }
        }
    }
}
