//! Config utils.

use std::collections::HashMap;
use std::str::FromStr;

use crate::core::error::SimulationError;

/// Splits a config value string into a name and an options part.
/// Example: `Papso[w1=0.7,swarm_size=40]` yields name `Papso` and options
/// `w1=0.7,swarm_size=40`.
pub fn parse_config_value(config_str: &str) -> (String, Options) {
    match config_str.split_once('[') {
        Some((name, rest)) => (name.trim().to_string(), Options::parse(&rest.replace(']', ""))),
        None => (config_str.trim().to_string(), Options::default()),
    }
}

/// Parsed `name=value` options of a config value.
#[derive(Debug, Default)]
pub struct Options {
    values: HashMap<String, String>,
}

impl Options {
    pub fn parse(options_str: &str) -> Self {
        let mut values = HashMap::new();
        for option_str in options_str.split(',') {
            if let Some((name, value)) = option_str.split_once('=') {
                values.insert(name.trim().to_string(), value.trim().to_string());
            }
        }
        Self { values }
    }

    /// Returns the parsed option value, or `default` when the option is
    /// absent. A present but malformed value is a configuration error.
    pub fn get<T: FromStr>(&self, name: &str, default: T) -> Result<T, SimulationError> {
        match self.values.get(name) {
            None => Ok(default),
            Some(raw) => raw
                .parse()
                .map_err(|_| SimulationError::Config(format!("bad value for option {}: {}", name, raw))),
        }
    }
}
