//! LINZ NETZ smart meter report importer.
//!
//! Turns the quarter-hour CSV export of a LINZ NETZ smart meter into an
//! hourly cumulative energy series and merges it into a statistics store:
//! - `report`: structural CSV decode
//! - `blocks`: hour-block validation
//! - `aggregate`: hourly sums and DST handling
//! - `reconcile`: baseline lookup and overlap repair
//! - `store` / `sqlite_store`: persistence boundary

mod aggregate;
mod blocks;
mod config;
mod http;
mod import;
mod observability;
mod reconcile;
mod report;
mod sqlite_store;
mod store;

pub use aggregate::{
    aggregate_hourly, local_to_utc, parse_report_decimal, parse_report_timestamp, DstState,
    HourlyDelta, QuarterHourReading, REPORT_TIMESTAMP_FORMAT, SOURCE_TIME_ZONE,
};
pub use blocks::{hour_blocks, validate_hour_block, validate_report_length, QUARTER_HOURS_PER_HOUR};
pub use config::{
    ConfigError, MeterConfig, ServerConfig, DEFAULT_ADDR, DEFAULT_DB_PATH, DEFAULT_METER_NAME,
    METER_POINT_NUMBER_LEN,
};
pub use http::{import_router, ImportRequest, IMPORT_ROUTE};
pub use import::{import_parsed_report, import_report, ImportError, ImportService, ImportSummary};
pub use observability::{
    init_logging, log_app_bind, log_app_start, log_import_summary, logging_config_from_env,
    LogFormat, LoggingConfig, LoggingInitError,
};
pub use reconcile::{find_baseline, reconcile, Baseline, BaselineSource, Reconciliation};
pub use report::{
    parse_report_bytes, parse_report_text, read_report_file, RawReport, ReportRow,
    END_TIME_COLUMN, START_TIME_COLUMN, VALUE_COLUMN,
};
pub use sqlite_store::SqliteStatisticsStore;
pub use store::{
    HourlyStatistic, ImportRecord, InMemoryStatisticsStore, StatisticMetadata, StatisticsStore,
    StoreError, ENERGY_UNIT, STATISTICS_SOURCE,
};
