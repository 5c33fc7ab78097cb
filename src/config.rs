//! Meter and server configuration.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_METER_NAME: &str = "SmartMeter";
pub const METER_POINT_NUMBER_LEN: usize = 33;
pub const DEFAULT_DB_PATH: &str = "data/linznetz.sqlite";
pub const DEFAULT_ADDR: &str = "127.0.0.1:8123";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("meter point number must be 33 characters, got {0}")]
    InvalidMeterPointNumber(usize),
    #[error("missing required environment variable {0}")]
    MissingEnv(&'static str),
    #[error("invalid value for {name}: {value}")]
    InvalidEnv { name: &'static str, value: String },
}

/// One smart meter as configured by the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeterConfig {
    meter_point_number: String,
    name: String,
}

impl MeterConfig {
    pub fn new(
        meter_point_number: impl Into<String>,
        name: Option<String>,
    ) -> Result<Self, ConfigError> {
        let meter_point_number = meter_point_number.into().trim().to_string();
        let len = meter_point_number.chars().count();
        if len != METER_POINT_NUMBER_LEN {
            return Err(ConfigError::InvalidMeterPointNumber(len));
        }

        let name = name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| DEFAULT_METER_NAME.to_string());

        Ok(Self {
            meter_point_number,
            name,
        })
    }

    pub fn meter_point_number(&self) -> &str {
        &self.meter_point_number
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Statistic id of the meter's energy series, e.g. `sensor.smartmeter_energy`.
    pub fn series_id(&self) -> String {
        format!("sensor.{}_energy", slugify(&self.name))
    }

    pub fn unique_id(&self) -> String {
        format!("{}_energy", self.meter_point_number)
    }

    pub fn display_name(&self) -> String {
        format!("{} Energy", self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub db_path: PathBuf,
    pub meter: MeterConfig,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let meter_point_number = env_non_empty("LINZNETZ_METER_POINT_NUMBER")
            .ok_or(ConfigError::MissingEnv("LINZNETZ_METER_POINT_NUMBER"))?;
        let meter = MeterConfig::new(meter_point_number, env_non_empty("LINZNETZ_METER_NAME"))?;

        let raw_addr =
            env_non_empty("LINZNETZ_ADDR").unwrap_or_else(|| DEFAULT_ADDR.to_string());
        let addr = raw_addr.parse().map_err(|_| ConfigError::InvalidEnv {
            name: "LINZNETZ_ADDR",
            value: raw_addr.clone(),
        })?;

        let db_path = env_non_empty("LINZNETZ_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH));

        Ok(Self {
            addr,
            db_path,
            meter,
        })
    }
}

pub(crate) fn env_non_empty(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
}

fn slugify(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last_was_sep = true;
    for ch in input.chars().flat_map(char::to_lowercase) {
        if ch.is_ascii_alphanumeric() {
            out.push(ch);
            last_was_sep = false;
        } else if !last_was_sep {
            out.push('_');
            last_was_sep = true;
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

/// Serializes tests that mutate process env vars.
#[cfg(test)]
pub(crate) mod test_env {
    use std::env;
    use std::sync::{Mutex, OnceLock};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    pub(crate) fn with_env_vars<R>(vars: &[(&str, Option<&str>)], f: impl FnOnce() -> R) -> R {
        let _guard = ENV_LOCK
            .get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let saved: Vec<(String, Option<String>)> = vars
            .iter()
            .map(|(key, _)| (key.to_string(), env::var(key).ok()))
            .collect();
        apply(vars.iter().map(|(key, value)| (*key, value.map(str::to_string))));

        let output = f();

        apply(saved.iter().map(|(key, value)| (key.as_str(), value.clone())));
        output
    }

    fn apply<'a>(vars: impl Iterator<Item = (&'a str, Option<String>)>) {
        for (key, value) in vars {
            match value {
                Some(value) => env::set_var(key, value),
                None => env::remove_var(key),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_env::with_env_vars;
    use super::*;

    const MPN: &str = "AT0000000000000000000000000000000";

    #[test]
    fn default_name_drives_series_id() {
        let meter = MeterConfig::new(MPN, None).unwrap();
        assert_eq!(meter.name(), "SmartMeter");
        assert_eq!(meter.series_id(), "sensor.smartmeter_energy");
        assert_eq!(meter.display_name(), "SmartMeter Energy");
        assert_eq!(meter.unique_id(), format!("{MPN}_energy"));
    }

    #[test]
    fn custom_name_is_slugified() {
        let meter = MeterConfig::new(MPN, Some("Haus Süd 2".to_string())).unwrap();
        assert_eq!(meter.series_id(), "sensor.haus_s_d_2_energy");
        assert_eq!(meter.display_name(), "Haus Süd 2 Energy");
    }

    #[test]
    fn meter_point_number_length_is_enforced() {
        assert_eq!(
            MeterConfig::new("AT123", None).unwrap_err(),
            ConfigError::InvalidMeterPointNumber(5)
        );
    }

    #[test]
    fn server_config_reads_env_with_defaults() {
        let cfg = with_env_vars(
            &[
                ("LINZNETZ_METER_POINT_NUMBER", Some(MPN)),
                ("LINZNETZ_METER_NAME", None),
                ("LINZNETZ_ADDR", None),
                ("LINZNETZ_DB_PATH", Some("/tmp/stats.sqlite")),
            ],
            ServerConfig::from_env,
        )
        .unwrap();

        assert_eq!(cfg.addr, DEFAULT_ADDR.parse::<SocketAddr>().unwrap());
        assert_eq!(cfg.db_path, PathBuf::from("/tmp/stats.sqlite"));
        assert_eq!(cfg.meter.series_id(), "sensor.smartmeter_energy");
    }

    #[test]
    fn server_config_rejects_bad_addr_and_missing_meter() {
        let err = with_env_vars(
            &[
                ("LINZNETZ_METER_POINT_NUMBER", Some(MPN)),
                ("LINZNETZ_ADDR", Some("not-an-addr")),
            ],
            ServerConfig::from_env,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { .. }));

        let err = with_env_vars(
            &[("LINZNETZ_METER_POINT_NUMBER", None)],
            ServerConfig::from_env,
        )
        .unwrap_err();
        assert_eq!(err, ConfigError::MissingEnv("LINZNETZ_METER_POINT_NUMBER"));
    }
}
