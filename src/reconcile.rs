//! Merges freshly aggregated hours into an existing cumulative series.
//!
//! The baseline is the stored sum of the hour immediately before the new
//! data. When the store already holds hours at or after the new data's first
//! hour, the range from one hour before the new data up to `now` is loaded;
//! any of those hours that lie after the new data are re-emitted on top of
//! the new running total so the series stays continuous.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::aggregate::HourlyDelta;
use crate::store::{HourlyStatistic, StatisticsStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineSource {
    /// Series had no stored hours.
    EmptySeries,
    /// New data starts after the last stored hour.
    Append,
    /// New data overlaps or precedes stored hours.
    Overlap,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Baseline {
    pub source: BaselineSource,
    pub sum: BigDecimal,
    /// Stored hours from the lookback window, only populated on overlap.
    pub existing: Vec<HourlyStatistic>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub baseline: Baseline,
    pub statistics: Vec<HourlyStatistic>,
    pub imported_hours: usize,
    pub carried_over_hours: usize,
}

impl Reconciliation {
    pub fn final_sum(&self) -> BigDecimal {
        self.statistics
            .last()
            .map(|stat| stat.sum.clone())
            .unwrap_or_else(|| self.baseline.sum.clone())
    }
}

pub fn find_baseline<S>(
    store: &S,
    series_id: &str,
    first_start: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<Baseline, StoreError>
where
    S: StatisticsStore + ?Sized,
{
    let Some(last) = store.last_point(series_id)? else {
        return Ok(Baseline {
            source: BaselineSource::EmptySeries,
            sum: BigDecimal::from(0),
            existing: Vec::new(),
        });
    };

    if last.start < first_start {
        return Ok(Baseline {
            source: BaselineSource::Append,
            sum: last.sum,
            existing: Vec::new(),
        });
    }

    let existing = store.query_range(series_id, first_start - ChronoDuration::hours(1), now)?;
    // Falls back to zero when nothing precedes the new data in the window.
    let sum = existing
        .first()
        .filter(|stat| stat.start < first_start)
        .map(|stat| stat.sum.clone())
        .unwrap_or_else(|| BigDecimal::from(0));

    Ok(Baseline {
        source: BaselineSource::Overlap,
        sum,
        existing,
    })
}

pub fn reconcile<S>(
    store: &S,
    series_id: &str,
    hourly: &[HourlyDelta],
    now: DateTime<Utc>,
) -> Result<Reconciliation, StoreError>
where
    S: StatisticsStore + ?Sized,
{
    let (Some(first), Some(last)) = (hourly.first(), hourly.last()) else {
        return Ok(Reconciliation {
            baseline: Baseline {
                source: BaselineSource::EmptySeries,
                sum: BigDecimal::from(0),
                existing: Vec::new(),
            },
            statistics: Vec::new(),
            imported_hours: 0,
            carried_over_hours: 0,
        });
    };

    let baseline = find_baseline(store, series_id, first.start, now)?;
    info!(
        component = "reconcile",
        event = "import.baseline",
        series_id,
        source = ?baseline.source,
        baseline_sum = %baseline.sum,
        existing_points = baseline.existing.len()
    );

    let mut running = baseline.sum.clone();
    let mut statistics = Vec::with_capacity(hourly.len() + baseline.existing.len());
    for hour in hourly {
        running += &hour.delta;
        statistics.push(HourlyStatistic {
            start: hour.start,
            delta: hour.delta.clone(),
            sum: running.clone(),
        });
    }

    let mut carried_over_hours = 0;
    for stored in baseline.existing.iter().filter(|stat| stat.start > last.start) {
        running += &stored.delta;
        statistics.push(HourlyStatistic {
            start: stored.start,
            delta: stored.delta.clone(),
            sum: running.clone(),
        });
        carried_over_hours += 1;
    }

    Ok(Reconciliation {
        baseline,
        statistics,
        imported_hours: hourly.len(),
        carried_over_hours,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryStatisticsStore, StatisticMetadata};
    use chrono::TimeZone;

    const SERIES: &str = "sensor.smartmeter_energy";

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2022, 9, day, hour, 0, 0).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap()
    }

    fn deltas(day: u32, hours: std::ops::Range<u32>, delta: i64) -> Vec<HourlyDelta> {
        hours
            .map(|hour| HourlyDelta {
                start: at(day, hour),
                delta: BigDecimal::from(delta),
            })
            .collect()
    }

    fn persist(store: &mut InMemoryStatisticsStore, reconciliation: &Reconciliation) {
        store
            .upsert(
                &StatisticMetadata::for_series(SERIES, "SmartMeter Energy"),
                &reconciliation.statistics,
            )
            .unwrap();
    }

    fn assert_continuous(stats: &[HourlyStatistic]) {
        for pair in stats.windows(2) {
            assert!(pair[1].start > pair[0].start);
            assert!(pair[1].sum >= pair[0].sum);
            assert_eq!(pair[1].sum, &pair[0].sum + &pair[1].delta);
        }
    }

    #[test]
    fn empty_series_starts_at_zero() {
        let store = InMemoryStatisticsStore::new();
        let result = reconcile(&store, SERIES, &deltas(17, 0..24, 4), now()).unwrap();

        assert_eq!(result.baseline.source, BaselineSource::EmptySeries);
        assert_eq!(result.statistics.len(), 24);
        assert_eq!(result.final_sum(), BigDecimal::from(96));
        assert_eq!(result.statistics[0].sum, BigDecimal::from(4));
        assert_continuous(&result.statistics);
    }

    #[test]
    fn appending_continues_from_last_stored_sum() {
        let mut store = InMemoryStatisticsStore::new();
        let day1 = reconcile(&store, SERIES, &deltas(17, 0..24, 1), now()).unwrap();
        persist(&mut store, &day1);

        let day2 = reconcile(&store, SERIES, &deltas(18, 0..24, 2), now()).unwrap();
        assert_eq!(day2.baseline.source, BaselineSource::Append);
        assert_eq!(day2.baseline.sum, BigDecimal::from(24));
        assert_eq!(day2.carried_over_hours, 0);
        assert_eq!(day2.final_sum(), BigDecimal::from(72));
        persist(&mut store, &day2);

        let all = store.series(SERIES);
        assert_eq!(all.len(), 48);
        assert_continuous(&all);
    }

    #[test]
    fn reimport_reproduces_identical_series() {
        let mut store = InMemoryStatisticsStore::new();
        let day = deltas(17, 0..24, 3);
        let first = reconcile(&store, SERIES, &day, now()).unwrap();
        persist(&mut store, &first);
        let before = store.series(SERIES);

        let again = reconcile(&store, SERIES, &day, now()).unwrap();
        assert_eq!(again.baseline.source, BaselineSource::Overlap);
        assert_eq!(again.baseline.sum, BigDecimal::from(0));
        persist(&mut store, &again);

        assert_eq!(store.series(SERIES), before);
    }

    #[test]
    fn backfill_reemits_later_hours_on_new_total() {
        let mut store = InMemoryStatisticsStore::new();
        let later = reconcile(&store, SERIES, &deltas(18, 0..24, 2), now()).unwrap();
        persist(&mut store, &later);

        let earlier = reconcile(&store, SERIES, &deltas(17, 0..24, 1), now()).unwrap();
        assert_eq!(earlier.baseline.source, BaselineSource::Overlap);
        assert_eq!(earlier.imported_hours, 24);
        assert_eq!(earlier.carried_over_hours, 24);
        assert_eq!(earlier.final_sum(), BigDecimal::from(72));
        persist(&mut store, &earlier);

        let all = store.series(SERIES);
        assert_eq!(all.len(), 48);
        assert_eq!(all[23].sum, BigDecimal::from(24));
        assert_continuous(&all);
    }

    #[test]
    fn partial_overlap_uses_hour_before_as_baseline() {
        let mut store = InMemoryStatisticsStore::new();
        let day = reconcile(&store, SERIES, &deltas(17, 0..24, 1), now()).unwrap();
        persist(&mut store, &day);

        // Replace 10:00..12:00 with larger values; hours after 12:00 shift up.
        let patch = reconcile(&store, SERIES, &deltas(17, 10..12, 5), now()).unwrap();
        assert_eq!(patch.baseline.sum, BigDecimal::from(10));
        assert_eq!(patch.carried_over_hours, 12);
        assert_eq!(patch.final_sum(), BigDecimal::from(32));
        persist(&mut store, &patch);

        let all = store.series(SERIES);
        assert_eq!(all.len(), 24);
        assert_continuous(&all);
    }

    #[test]
    fn store_failure_is_surfaced() {
        let store = InMemoryStatisticsStore::new();
        store.set_unavailable(true);
        let err = reconcile(&store, SERIES, &deltas(17, 0..1, 1), now()).unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }

    #[test]
    fn no_hours_yields_nothing_to_write() {
        let store = InMemoryStatisticsStore::new();
        let result = reconcile(&store, SERIES, &[], now()).unwrap();
        assert!(result.statistics.is_empty());
    }
}
