use std::path::PathBuf;

use chrono::Utc;
use clap::Parser;
use linznetz::{
    import_report, init_logging, log_app_start, log_import_summary, logging_config_from_env,
    MeterConfig, SqliteStatisticsStore, StatisticMetadata, DEFAULT_DB_PATH,
};

#[derive(Parser)]
#[command(name = "linznetz-import")]
#[command(about = "Import a LINZ NETZ quarter-hour report into the statistics database", long_about = None)]
struct Cli {
    /// Path to the `;`-separated quarter-hour report
    #[arg(short, long)]
    report: PathBuf,

    /// Path to the SQLite statistics database (created if missing)
    #[arg(short, long, env = "LINZNETZ_DB_PATH", default_value = DEFAULT_DB_PATH)]
    database: PathBuf,

    /// 33 character meter point number
    #[arg(short, long, env = "LINZNETZ_METER_POINT_NUMBER")]
    meter_point_number: String,

    /// Meter name used for the series id
    #[arg(short, long, env = "LINZNETZ_METER_NAME")]
    name: Option<String>,

    /// Target series id, overriding the one derived from the meter name
    #[arg(long)]
    series_id: Option<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start("linznetz_import", &logging_cfg);

    let meter = MeterConfig::new(cli.meter_point_number, cli.name)?;
    let metadata = match cli.series_id {
        Some(series_id) => StatisticMetadata::for_series(series_id, meter.display_name()),
        None => StatisticMetadata::for_meter(&meter),
    };

    let mut store = SqliteStatisticsStore::open(&cli.database)?;
    let summary = import_report(&mut store, &metadata, &cli.report, Utc::now())?;
    log_import_summary(&summary);

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
