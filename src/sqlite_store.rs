//! SQLite-backed statistics store.
//!
//! Decimals are kept as TEXT so sums read back exactly as written.

use std::path::Path;
use std::str::FromStr;

use bigdecimal::BigDecimal;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use tracing::info;

use crate::store::{HourlyStatistic, ImportRecord, StatisticMetadata, StatisticsStore, StoreError};

#[derive(Debug)]
pub struct SqliteStatisticsStore {
    conn: Connection,
}

impl SqliteStatisticsStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA temp_store=MEMORY;
            ",
        )?;
        ensure_schema(&conn)?;

        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        ensure_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn metadata(&self, series_id: &str) -> Result<Option<StatisticMetadata>, StoreError> {
        let meta = self
            .conn
            .query_row(
                "
                SELECT series_id, name, unit_of_measurement, source, has_mean, has_sum
                FROM statistics_meta
                WHERE series_id = ?1
                ",
                params![series_id],
                |row| {
                    Ok(StatisticMetadata {
                        series_id: row.get(0)?,
                        name: row.get(1)?,
                        unit_of_measurement: row.get(2)?,
                        source: row.get(3)?,
                        has_mean: row.get(4)?,
                        has_sum: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(meta)
    }

    pub fn import_count(&self, series_id: &str) -> Result<u64, StoreError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM import_log WHERE series_id = ?1",
            params![series_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

impl StatisticsStore for SqliteStatisticsStore {
    fn last_point(&self, series_id: &str) -> Result<Option<HourlyStatistic>, StoreError> {
        let raw = self
            .conn
            .query_row(
                "
                SELECT start_ts, delta, sum
                FROM statistics
                WHERE series_id = ?1
                ORDER BY start_ts DESC
                LIMIT 1
                ",
                params![series_id],
                raw_point,
            )
            .optional()?;
        raw.map(decode_point).transpose()
    }

    fn query_range(
        &self,
        series_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<HourlyStatistic>, StoreError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT start_ts, delta, sum
            FROM statistics
            WHERE series_id = ?1
              AND start_ts >= ?2
              AND start_ts < ?3
            ORDER BY start_ts
            ",
        )?;
        let rows = stmt.query_map(
            params![series_id, from.timestamp(), to.timestamp()],
            raw_point,
        )?;

        let mut out = Vec::new();
        for row in rows {
            out.push(decode_point(row?)?);
        }
        Ok(out)
    }

    fn upsert(
        &mut self,
        metadata: &StatisticMetadata,
        statistics: &[HourlyStatistic],
    ) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        write_statistics(&tx, metadata, statistics)?;
        tx.commit()?;
        log_upsert(metadata, statistics.len());
        Ok(())
    }

    fn commit_import(
        &mut self,
        metadata: &StatisticMetadata,
        statistics: &[HourlyStatistic],
        record: &ImportRecord,
    ) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        write_statistics(&tx, metadata, statistics)?;
        tx.execute(
            "
            INSERT INTO import_log (
                series_id, report_sha256, quarter_hours, hours_written,
                first_start_ts, last_start_ts, imported_at_ts
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ",
            params![
                record.series_id,
                record.report_sha256,
                record.quarter_hours as i64,
                record.hours_written as i64,
                record.first_start.timestamp(),
                record.last_start.timestamp(),
                record.imported_at.timestamp(),
            ],
        )?;
        tx.commit()?;
        log_upsert(metadata, statistics.len());
        Ok(())
    }
}

fn write_statistics(
    tx: &Transaction<'_>,
    metadata: &StatisticMetadata,
    statistics: &[HourlyStatistic],
) -> Result<(), StoreError> {
    tx.execute(
        "
        INSERT INTO statistics_meta (
            series_id, name, unit_of_measurement, source, has_mean, has_sum
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ON CONFLICT(series_id) DO UPDATE SET
            name = excluded.name,
            unit_of_measurement = excluded.unit_of_measurement,
            source = excluded.source,
            has_mean = excluded.has_mean,
            has_sum = excluded.has_sum
        ",
        params![
            metadata.series_id,
            metadata.name,
            metadata.unit_of_measurement,
            metadata.source,
            metadata.has_mean,
            metadata.has_sum,
        ],
    )?;

    let mut stmt = tx.prepare(
        "
        INSERT INTO statistics (series_id, start_ts, delta, sum)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT(series_id, start_ts) DO UPDATE SET
            delta = excluded.delta,
            sum = excluded.sum
        ",
    )?;
    for stat in statistics {
        stmt.execute(params![
            metadata.series_id,
            stat.start.timestamp(),
            stat.delta.to_string(),
            stat.sum.to_string(),
        ])?;
    }
    Ok(())
}

fn log_upsert(metadata: &StatisticMetadata, rows: usize) {
    info!(
        component = "sqlite_store",
        event = "store.upsert",
        series_id = %metadata.series_id,
        rows
    );
}

fn ensure_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS statistics (
            series_id TEXT NOT NULL,
            start_ts INTEGER NOT NULL,
            delta TEXT NOT NULL,
            sum TEXT NOT NULL,
            PRIMARY KEY(series_id, start_ts)
        ) WITHOUT ROWID;

        CREATE TABLE IF NOT EXISTS statistics_meta (
            series_id TEXT PRIMARY KEY NOT NULL,
            name TEXT NOT NULL,
            unit_of_measurement TEXT NOT NULL,
            source TEXT NOT NULL,
            has_mean INTEGER NOT NULL,
            has_sum INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS import_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            series_id TEXT NOT NULL,
            report_sha256 TEXT NOT NULL,
            quarter_hours INTEGER NOT NULL,
            hours_written INTEGER NOT NULL,
            first_start_ts INTEGER NOT NULL,
            last_start_ts INTEGER NOT NULL,
            imported_at_ts INTEGER NOT NULL
        );
        ",
    )?;
    Ok(())
}

type RawPoint = (i64, String, String);

fn raw_point(row: &Row<'_>) -> rusqlite::Result<RawPoint> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
}

fn decode_point((start_ts, delta, sum): RawPoint) -> Result<HourlyStatistic, StoreError> {
    let start = Utc
        .timestamp_opt(start_ts, 0)
        .single()
        .ok_or_else(|| StoreError::CorruptValue {
            column: "start_ts",
            value: start_ts.to_string(),
        })?;
    Ok(HourlyStatistic {
        start,
        delta: decode_decimal("delta", delta)?,
        sum: decode_decimal("sum", sum)?,
    })
}

fn decode_decimal(column: &'static str, raw: String) -> Result<BigDecimal, StoreError> {
    BigDecimal::from_str(&raw).map_err(|_| StoreError::CorruptValue { column, value: raw })
}
