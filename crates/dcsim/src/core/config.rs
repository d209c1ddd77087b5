//! Simulation configuration.

pub mod options;

use serde::{Deserialize, Serialize};

use crate::core::error::SimulationError;

/// Which transfer-time formula migrations use.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationTimeModel {
    /// `disk / bandwidth` of the moving VM.
    Simple,
    /// `disk / (bandwidth / (1000 * n))` where `n` is the number of
    /// migrations scheduled in the same batch sharing the bandwidth.
    Batched,
}

#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct SimulationConfigRaw {
    /// placement strategy with options, e.g. "Papso[w1=0.7]"
    pub strategy: Option<String>,
    /// migration transfer-time formula
    pub migration_time_model: Option<MigrationTimeModel>,
    /// path of the binary statistics output, omitted to disable recording
    pub statistics_output: Option<String>,
    /// trace files, one producer thread each
    pub trace_files: Option<Vec<String>>,
    /// physical machines of the data center
    pub machines: Option<Vec<ConfigMachine>>,
}

/// Represents physical machine properties.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct ConfigMachine {
    pub cpu: f64,
    pub ram: f64,
    pub disk: f64,
    pub bandwidth: f64,
    #[serde(default)]
    pub fpga: f64,
    /// idle power draw per CPU capacity unit
    #[serde(default = "default_per_core_base_power")]
    pub per_core_base_power: f64,
    /// power draw per used CPU unit
    #[serde(default = "default_power_per_cpu_unit")]
    pub power_per_cpu_unit: f64,
    /// power draw per used FPGA unit
    #[serde(default = "default_power_per_fpga_unit")]
    pub power_per_fpga_unit: f64,
    /// number of such machines
    #[serde(default = "default_machine_amount")]
    pub amount: u32,
}

fn default_per_core_base_power() -> f64 {
    0.4
}

fn default_power_per_cpu_unit() -> f64 {
    0.6
}

fn default_power_per_fpga_unit() -> f64 {
    1.0
}

fn default_machine_amount() -> u32 {
    1
}

/// Represents simulation configuration.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct SimulationConfig {
    /// placement strategy with options, e.g. "Papso[w1=0.7]"
    pub strategy: String,
    /// migration transfer-time formula
    pub migration_time_model: MigrationTimeModel,
    /// path of the binary statistics output, omitted to disable recording
    pub statistics_output: Option<String>,
    /// trace files, one producer thread each
    pub trace_files: Vec<String>,
    /// physical machines of the data center
    pub machines: Vec<ConfigMachine>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            strategy: "FirstFitDecreasing".to_string(),
            migration_time_model: MigrationTimeModel::Batched,
            statistics_output: None,
            trace_files: Vec::new(),
            machines: Vec::new(),
        }
    }
}

impl SimulationConfig {
    /// Creates simulation config with default parameter values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates simulation config by reading parameter values from a YAML
    /// file (uses default values for absent parameters).
    pub fn from_file(file_name: &str) -> Result<Self, SimulationError> {
        let content = std::fs::read_to_string(file_name)?;
        let raw: SimulationConfigRaw = serde_yaml::from_str(&content)
            .map_err(|e| SimulationError::Config(format!("can't parse {}: {}", file_name, e)))?;
        let default = SimulationConfig::new();
        Ok(Self {
            strategy: raw.strategy.unwrap_or(default.strategy),
            migration_time_model: raw.migration_time_model.unwrap_or(default.migration_time_model),
            statistics_output: raw.statistics_output,
            trace_files: raw.trace_files.unwrap_or(default.trace_files),
            machines: raw.machines.unwrap_or(default.machines),
        })
    }
}
