//! Quarter-hour to hourly aggregation with DST handling.
//!
//! Source timestamps are Europe/Vienna wall-clock times. On the autumn
//! transition the export repeats the `02:xx` hour and marks the first
//! occurrence by giving its last row an end time equal to the block start.
//! Both occurrences resolve to the same UTC instant, so the second one is
//! moved forward by one hour. In spring the skipped hour is simply absent.

use std::str::FromStr;

use bigdecimal::BigDecimal;
use chrono::{
    DateTime, Duration as ChronoDuration, LocalResult, NaiveDateTime, Offset, TimeZone, Utc,
};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::blocks::hour_blocks;
use crate::report::ReportRow;
use crate::ImportError;

pub const SOURCE_TIME_ZONE: Tz = chrono_tz::Europe::Vienna;
pub const REPORT_TIMESTAMP_FORMAT: &str = "%d.%m.%Y %H:%M";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuarterHourReading {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub value: BigDecimal,
}

impl QuarterHourReading {
    pub fn from_row(row: &ReportRow) -> Result<Self, ImportError> {
        let value = parse_report_decimal(row.value())?;
        if value < BigDecimal::from(0) {
            return Err(ImportError::CorruptReport(format!(
                "negative energy value '{}' at {}",
                row.value(),
                row.start_time()
            )));
        }

        Ok(Self {
            start: parse_report_timestamp(row.start_time())?,
            end: parse_report_timestamp(row.end_time())?,
            value,
        })
    }

    pub fn start_utc(&self) -> DateTime<Utc> {
        local_to_utc(self.start)
    }

    pub fn end_utc(&self) -> DateTime<Utc> {
        local_to_utc(self.end)
    }
}

/// One aggregated hour before the running sum is known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourlyDelta {
    pub start: DateTime<Utc>,
    pub delta: BigDecimal,
}

/// Single-shot marker carried from one hour block to the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DstState {
    #[default]
    Clean,
    PendingRepeatCheck,
}

impl DstState {
    /// State to carry into the next block after emitting a block that starts
    /// at `block_start` and whose last reading ends at `block_end`.
    pub fn after_block(block_start: DateTime<Utc>, block_end: DateTime<Utc>) -> Self {
        if block_start == block_end {
            Self::PendingRepeatCheck
        } else {
            Self::Clean
        }
    }

    /// Canonical start for a block, shifted by one hour if it repeats the
    /// previously emitted start while a repeat check is pending.
    pub fn resolve_start(
        self,
        previous_start: Option<DateTime<Utc>>,
        start: DateTime<Utc>,
    ) -> DateTime<Utc> {
        match self {
            Self::PendingRepeatCheck if previous_start == Some(start) => {
                start + ChronoDuration::hours(1)
            }
            Self::PendingRepeatCheck | Self::Clean => start,
        }
    }
}

pub fn aggregate_hourly(rows: &[ReportRow]) -> Result<Vec<HourlyDelta>, ImportError> {
    let blocks = hour_blocks(rows)?;
    let mut hourly: Vec<HourlyDelta> = Vec::with_capacity(blocks.len());
    let mut dst_state = DstState::Clean;

    for block in blocks {
        let readings = block
            .iter()
            .map(QuarterHourReading::from_row)
            .collect::<Result<Vec<_>, _>>()?;
        let (first, last) = match (readings.first(), readings.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => continue,
        };

        let raw_start = first.start_utc();
        let start = dst_state.resolve_start(hourly.last().map(|hour| hour.start), raw_start);
        if start != raw_start {
            debug!(
                component = "aggregate",
                event = "import.dst.repeat_hour",
                local_start = %first.start,
                start = %start
            );
        }

        let delta = readings
            .iter()
            .fold(BigDecimal::from(0), |acc, reading| acc + &reading.value);

        dst_state = DstState::after_block(start, last.end_utc());
        hourly.push(HourlyDelta { start, delta });
    }

    Ok(hourly)
}

pub fn parse_report_timestamp(raw: &str) -> Result<NaiveDateTime, ImportError> {
    NaiveDateTime::parse_from_str(raw.trim(), REPORT_TIMESTAMP_FORMAT).map_err(|_| {
        ImportError::CorruptReport(format!(
            "timestamp '{raw}' does not match dd.mm.yyyy HH:MM"
        ))
    })
}

/// Parses a German-formatted number (`0,123`) without going through floats.
pub fn parse_report_decimal(raw: &str) -> Result<BigDecimal, ImportError> {
    let normalized = raw.trim().replace(',', ".");
    BigDecimal::from_str(&normalized)
        .map_err(|_| ImportError::CorruptReport(format!("energy value '{raw}' is not a number")))
}

/// Converts Vienna wall-clock time to UTC. Repeated times take the earlier
/// instant; times inside the spring gap use the offset in force before it.
pub fn local_to_utc(local: NaiveDateTime) -> DateTime<Utc> {
    match SOURCE_TIME_ZONE.from_local_datetime(&local) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        LocalResult::None => {
            let offset = SOURCE_TIME_ZONE
                .offset_from_local_datetime(&(local - ChronoDuration::hours(1)))
                .earliest()
                .unwrap_or_else(|| SOURCE_TIME_ZONE.offset_from_utc_datetime(&local));
            let utc_offset_secs = i64::from(offset.fix().local_minus_utc());
            Utc.from_utc_datetime(&(local - ChronoDuration::seconds(utc_offset_secs)))
        }
    }
}
