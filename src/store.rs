//! Statistics store boundary and an in-memory implementation.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::MeterConfig;

pub const ENERGY_UNIT: &str = "kWh";
pub const STATISTICS_SOURCE: &str = "recorder";

/// One hour of the cumulative series, either stored or about to be stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourlyStatistic {
    pub start: DateTime<Utc>,
    pub delta: BigDecimal,
    pub sum: BigDecimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticMetadata {
    pub series_id: String,
    pub name: String,
    pub unit_of_measurement: String,
    pub source: String,
    pub has_mean: bool,
    pub has_sum: bool,
}

impl StatisticMetadata {
    pub fn for_meter(meter: &MeterConfig) -> Self {
        Self::for_series(meter.series_id(), meter.display_name())
    }

    pub fn for_series(series_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            series_id: series_id.into(),
            name: name.into(),
            unit_of_measurement: ENERGY_UNIT.to_string(),
            source: STATISTICS_SOURCE.to_string(),
            has_mean: false,
            has_sum: true,
        }
    }
}

/// Audit entry committed together with an import's hours.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportRecord {
    pub series_id: String,
    pub report_sha256: String,
    pub quarter_hours: usize,
    pub hours_written: usize,
    pub first_start: DateTime<Utc>,
    pub last_start: DateTime<Utc>,
    pub imported_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("stored {column} value '{value}' is invalid")]
    CorruptValue { column: &'static str, value: String },
    #[error("statistics store unavailable: {0}")]
    Unavailable(String),
}

/// Time-indexed statistics storage keyed by series id.
///
/// `upsert` and `commit_import` must be all-or-nothing and keyed by `start`,
/// so replaying the same batch leaves the series unchanged.
pub trait StatisticsStore {
    /// Most recent stored hour of the series.
    fn last_point(&self, series_id: &str) -> Result<Option<HourlyStatistic>, StoreError>;

    /// Stored hours with `from <= start < to`, ordered by start.
    fn query_range(
        &self,
        series_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<HourlyStatistic>, StoreError>;

    fn upsert(
        &mut self,
        metadata: &StatisticMetadata,
        statistics: &[HourlyStatistic],
    ) -> Result<(), StoreError>;

    /// Writes an import's hours and its audit entry as one unit: either both
    /// land or neither does.
    fn commit_import(
        &mut self,
        metadata: &StatisticMetadata,
        statistics: &[HourlyStatistic],
        record: &ImportRecord,
    ) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
struct InMemoryState {
    series: HashMap<String, BTreeMap<DateTime<Utc>, HourlyStatistic>>,
    metadata: HashMap<String, StatisticMetadata>,
    imports: Vec<ImportRecord>,
    unavailable: bool,
}

impl InMemoryState {
    fn apply(&mut self, metadata: &StatisticMetadata, statistics: &[HourlyStatistic]) {
        self.metadata
            .insert(metadata.series_id.clone(), metadata.clone());
        let points = self.series.entry(metadata.series_id.clone()).or_default();
        for stat in statistics {
            points.insert(stat.start, stat.clone());
        }
    }
}

/// Shared in-memory store; clones see the same data.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStatisticsStore {
    inner: Arc<RwLock<InMemoryState>>,
}

impl InMemoryStatisticsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        if let Ok(mut guard) = self.inner.write() {
            guard.unavailable = unavailable;
        }
    }

    pub fn series(&self, series_id: &str) -> Vec<HourlyStatistic> {
        self.inner
            .read()
            .map(|guard| {
                guard
                    .series
                    .get(series_id)
                    .map(|points| points.values().cloned().collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    pub fn metadata(&self, series_id: &str) -> Option<StatisticMetadata> {
        self.inner
            .read()
            .ok()
            .and_then(|guard| guard.metadata.get(series_id).cloned())
    }

    pub fn imports(&self) -> Vec<ImportRecord> {
        self.inner
            .read()
            .map(|guard| guard.imports.clone())
            .unwrap_or_default()
    }

    fn read_state(&self) -> Result<std::sync::RwLockReadGuard<'_, InMemoryState>, StoreError> {
        let guard = self
            .inner
            .read()
            .map_err(|_| StoreError::Unavailable("in-memory store lock poisoned".to_string()))?;
        if guard.unavailable {
            return Err(StoreError::Unavailable("in-memory store offline".to_string()));
        }
        Ok(guard)
    }

    fn write_state(&self) -> Result<std::sync::RwLockWriteGuard<'_, InMemoryState>, StoreError> {
        let guard = self
            .inner
            .write()
            .map_err(|_| StoreError::Unavailable("in-memory store lock poisoned".to_string()))?;
        if guard.unavailable {
            return Err(StoreError::Unavailable("in-memory store offline".to_string()));
        }
        Ok(guard)
    }
}

impl StatisticsStore for InMemoryStatisticsStore {
    fn last_point(&self, series_id: &str) -> Result<Option<HourlyStatistic>, StoreError> {
        let state = self.read_state()?;
        Ok(state
            .series
            .get(series_id)
            .and_then(|points| points.values().next_back().cloned()))
    }

    fn query_range(
        &self,
        series_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<HourlyStatistic>, StoreError> {
        if to <= from {
            return Ok(Vec::new());
        }
        let state = self.read_state()?;
        Ok(state
            .series
            .get(series_id)
            .map(|points| points.range(from..to).map(|(_, p)| p.clone()).collect())
            .unwrap_or_default())
    }

    fn upsert(
        &mut self,
        metadata: &StatisticMetadata,
        statistics: &[HourlyStatistic],
    ) -> Result<(), StoreError> {
        let mut state = self.write_state()?;
        state.apply(metadata, statistics);
        Ok(())
    }

    fn commit_import(
        &mut self,
        metadata: &StatisticMetadata,
        statistics: &[HourlyStatistic],
        record: &ImportRecord,
    ) -> Result<(), StoreError> {
        let mut state = self.write_state()?;
        state.apply(metadata, statistics);
        state.imports.push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn stat(hour: u32, sum: i64) -> HourlyStatistic {
        HourlyStatistic {
            start: Utc.with_ymd_and_hms(2022, 9, 17, hour, 0, 0).unwrap(),
            delta: BigDecimal::from(1),
            sum: BigDecimal::from(sum),
        }
    }

    #[test]
    fn upsert_replaces_points_with_same_start() {
        let mut store = InMemoryStatisticsStore::new();
        let meta = StatisticMetadata::for_series("sensor.test_energy", "Test Energy");
        store.upsert(&meta, &[stat(0, 1), stat(1, 2)]).unwrap();
        store.upsert(&meta, &[stat(1, 5)]).unwrap();

        let series = store.series("sensor.test_energy");
        assert_eq!(series.len(), 2);
        assert_eq!(series[1].sum, BigDecimal::from(5));
        assert_eq!(store.metadata("sensor.test_energy"), Some(meta));
    }

    #[test]
    fn range_is_half_open_and_ordered() {
        let mut store = InMemoryStatisticsStore::new();
        let meta = StatisticMetadata::for_series("s", "S");
        store
            .upsert(&meta, &[stat(2, 3), stat(0, 1), stat(1, 2)])
            .unwrap();

        let got = store
            .query_range("s", stat(0, 0).start, stat(2, 0).start)
            .unwrap();
        assert_eq!(got, vec![stat(0, 1), stat(1, 2)]);
        assert_eq!(store.last_point("s").unwrap(), Some(stat(2, 3)));
        assert_eq!(store.last_point("other").unwrap(), None);
    }

    #[test]
    fn commit_import_writes_hours_and_log_together() {
        let mut store = InMemoryStatisticsStore::new();
        let meta = StatisticMetadata::for_series("s", "S");
        let stats = [stat(0, 1), stat(1, 2)];
        let record = ImportRecord {
            series_id: "s".to_string(),
            report_sha256: "00".repeat(32),
            quarter_hours: 8,
            hours_written: 2,
            first_start: stats[0].start,
            last_start: stats[1].start,
            imported_at: stats[1].start,
        };

        store.commit_import(&meta, &stats, &record).unwrap();
        assert_eq!(store.series("s"), stats.to_vec());
        assert_eq!(store.imports(), vec![record.clone()]);

        store.set_unavailable(true);
        assert!(store.commit_import(&meta, &stats, &record).is_err());
        store.set_unavailable(false);
        assert_eq!(store.imports().len(), 1);
    }

    #[test]
    fn unavailable_store_fails_every_call() {
        let store = InMemoryStatisticsStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.last_point("s"),
            Err(StoreError::Unavailable(_))
        ));
    }
}
