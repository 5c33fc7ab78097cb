//! Logging setup shared by both binaries, plus the lifecycle events they emit.
//!
//! Configured through `LINZNETZ_LOG_LEVEL` (an `EnvFilter` directive),
//! `LINZNETZ_LOG_FORMAT` (`json` or `pretty`) and `LINZNETZ_LOG_TARGET`.

use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;

use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::env_non_empty;
use crate::import::ImportSummary;

const LEVEL_ENV: &str = "LINZNETZ_LOG_LEVEL";
const FORMAT_ENV: &str = "LINZNETZ_LOG_FORMAT";
const TARGET_ENV: &str = "LINZNETZ_LOG_TARGET";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = ();

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            include_target: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoggingInitError {
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Reads the logging env vars; unparsable values keep the default.
pub fn logging_config_from_env() -> LoggingConfig {
    let defaults = LoggingConfig::default();
    LoggingConfig {
        level: env_non_empty(LEVEL_ENV).unwrap_or(defaults.level),
        format: env_non_empty(FORMAT_ENV)
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(defaults.format),
        include_target: env_non_empty(TARGET_ENV)
            .and_then(|raw| parse_switch(&raw))
            .unwrap_or(defaults.include_target),
    }
}

pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingInitError> {
    let filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.include_target)
        .with_ansi(config.format == LogFormat::Pretty);

    match config.format {
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
        LogFormat::Pretty => tracing::subscriber::set_global_default(builder.pretty().finish())?,
    }
    Ok(())
}

pub fn log_app_start(component: &'static str, config: &LoggingConfig) {
    info!(
        component,
        event = "app.start",
        log_level = %config.level,
        log_format = ?config.format,
        include_target = config.include_target
    );
}

pub fn log_app_bind(bound_addr: SocketAddr, db_path: &Path) {
    info!(
        component = "linznetz_server",
        event = "app.bind",
        bind_addr = %bound_addr,
        route = crate::http::IMPORT_ROUTE,
        db_path = %db_path.display()
    );
}

pub fn log_import_summary(summary: &ImportSummary) {
    info!(
        component = "linznetz_import",
        event = "import.summary",
        series_id = %summary.series_id,
        report_sha256 = %summary.report_sha256,
        baseline_source = ?summary.baseline_source,
        baseline = %summary.baseline,
        final_sum = %summary.final_sum,
        first_start = %summary.first_start,
        last_start = %summary.last_start
    );
}

fn parse_switch(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_env::with_env_vars;

    #[test]
    fn missing_env_gives_pretty_info_with_target() {
        let cfg = with_env_vars(
            &[(LEVEL_ENV, None), (FORMAT_ENV, None), (TARGET_ENV, None)],
            logging_config_from_env,
        );
        assert_eq!(cfg, LoggingConfig::default());
    }

    #[test]
    fn env_overrides_are_applied() {
        let cfg = with_env_vars(
            &[
                (LEVEL_ENV, Some("linznetz=debug,warn")),
                (FORMAT_ENV, Some(" Json ")),
                (TARGET_ENV, Some("0")),
            ],
            logging_config_from_env,
        );

        assert_eq!(cfg.level, "linznetz=debug,warn");
        assert_eq!(cfg.format, LogFormat::Json);
        assert!(!cfg.include_target);
    }

    #[test]
    fn unknown_values_keep_defaults() {
        let cfg = with_env_vars(
            &[
                (LEVEL_ENV, Some("  ")),
                (FORMAT_ENV, Some("logfmt")),
                (TARGET_ENV, Some("sometimes")),
            ],
            logging_config_from_env,
        );
        assert_eq!(cfg, LoggingConfig::default());
    }

    #[test]
    fn log_format_parses_case_insensitively() {
        assert_eq!("PRETTY".parse(), Ok(LogFormat::Pretty));
        assert_eq!("json".parse(), Ok(LogFormat::Json));
        assert!("text".parse::<LogFormat>().is_err());
    }
}
