//! End-to-end report import: parse, validate, aggregate, reconcile, persist.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::aggregate::aggregate_hourly;
use crate::config::MeterConfig;
use crate::reconcile::{reconcile, BaselineSource};
use crate::report::{read_report_file, RawReport};
use crate::store::{ImportRecord, StatisticMetadata, StatisticsStore, StoreError};

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("malformed input: {0}")]
    MalformedInput(String),
    #[error("corrupt report: {0}")]
    CorruptReport(String),
    #[error("reconciliation failed: {0}")]
    ReconciliationFailed(#[from] StoreError),
}

impl ImportError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedInput(_) => "malformed_input",
            Self::CorruptReport(_) => "corrupt_report",
            Self::ReconciliationFailed(_) => "reconciliation_failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub series_id: String,
    pub report_sha256: String,
    pub quarter_hours: usize,
    pub hours_imported: usize,
    pub hours_carried_over: usize,
    pub baseline_source: BaselineSource,
    pub baseline: BigDecimal,
    pub final_sum: BigDecimal,
    pub first_start: DateTime<Utc>,
    pub last_start: DateTime<Utc>,
}

pub fn import_report<S>(
    store: &mut S,
    metadata: &StatisticMetadata,
    path: &Path,
    now: DateTime<Utc>,
) -> Result<ImportSummary, ImportError>
where
    S: StatisticsStore + ?Sized,
{
    info!(
        component = "import",
        event = "import.start",
        series_id = %metadata.series_id,
        path = %path.display()
    );
    let report = read_report_file(path)?;
    import_parsed_report(store, metadata, &report, now)
}

/// Runs the import for an already decoded report. Nothing is written unless
/// every hour block validates and the baseline lookup succeeds.
pub fn import_parsed_report<S>(
    store: &mut S,
    metadata: &StatisticMetadata,
    report: &RawReport,
    now: DateTime<Utc>,
) -> Result<ImportSummary, ImportError>
where
    S: StatisticsStore + ?Sized,
{
    let hourly = aggregate_hourly(report.rows())?;
    let (first_start, last_start) = match (hourly.first(), hourly.last()) {
        (Some(first), Some(last)) => (first.start, last.start),
        _ => {
            return Err(ImportError::MalformedInput(
                "report contains no hour blocks".to_string(),
            ))
        }
    };

    let reconciliation = reconcile(&*store, &metadata.series_id, &hourly, now)?;
    let record = ImportRecord {
        series_id: metadata.series_id.clone(),
        report_sha256: report.sha256().to_string(),
        quarter_hours: report.len(),
        hours_written: reconciliation.statistics.len(),
        first_start,
        last_start,
        imported_at: now,
    };
    store.commit_import(metadata, &reconciliation.statistics, &record)?;

    let summary = ImportSummary {
        series_id: metadata.series_id.clone(),
        report_sha256: report.sha256().to_string(),
        quarter_hours: report.len(),
        hours_imported: reconciliation.imported_hours,
        hours_carried_over: reconciliation.carried_over_hours,
        baseline_source: reconciliation.baseline.source,
        baseline: reconciliation.baseline.sum.clone(),
        final_sum: reconciliation.final_sum(),
        first_start,
        last_start,
    };

    info!(
        component = "import",
        event = "import.finish",
        series_id = %summary.series_id,
        quarter_hours = summary.quarter_hours,
        hours_imported = summary.hours_imported,
        hours_carried_over = summary.hours_carried_over,
        final_sum = %summary.final_sum
    );
    Ok(summary)
}

/// Runs imports on the blocking pool. The store lock is held for the whole
/// baseline-query/write sequence so imports never interleave.
#[derive(Debug)]
pub struct ImportService<S> {
    store: Arc<Mutex<S>>,
    meter: MeterConfig,
}

impl<S> Clone for ImportService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            meter: self.meter.clone(),
        }
    }
}

impl<S> ImportService<S>
where
    S: StatisticsStore + Send + 'static,
{
    pub fn new(store: S, meter: MeterConfig) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
            meter,
        }
    }

    pub fn meter(&self) -> &MeterConfig {
        &self.meter
    }

    /// Imports `path` into `series_id`, defaulting to the meter's own series.
    pub async fn import_report(
        &self,
        series_id: Option<String>,
        path: PathBuf,
    ) -> Result<ImportSummary, ImportError> {
        let metadata = match series_id {
            Some(series_id) if series_id != self.meter.series_id() => {
                StatisticMetadata::for_series(series_id, self.meter.display_name())
            }
            _ => StatisticMetadata::for_meter(&self.meter),
        };
        let series_for_log = metadata.series_id.clone();
        let store = Arc::clone(&self.store);

        let result = tokio::task::spawn_blocking(move || {
            let mut guard = store.lock().map_err(|_| {
                ImportError::ReconciliationFailed(StoreError::Unavailable(
                    "statistics store lock poisoned".to_string(),
                ))
            })?;
            import_report(&mut *guard, &metadata, &path, Utc::now())
        })
        .await
        .unwrap_or_else(|err| {
            Err(ImportError::ReconciliationFailed(StoreError::Unavailable(
                format!("import worker failed: {err}"),
            )))
        });

        if let Err(err) = &result {
            warn!(
                component = "import",
                event = "import.error",
                series_id = %series_for_log,
                kind = err.kind(),
                error = %err
            );
        }
        result
    }
}
