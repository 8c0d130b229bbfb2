//! Flush transactions, retention pruning and reset.

use super::{to_i64, StoreSettings};
use crate::collector::types::{is_valid_key_code, DeviceClass};
use crate::core::buckets::Granularity;
use crate::core::TypingTotals;
use crate::engine::pending::FlushBatch;
use crate::store::error::{SqlResultExt, StoreError};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, Transaction};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Outcome of one committed flush.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Keystrokes written; session-break rows are not counted
    pub events_written: u64,
    /// Events dropped because their key code is out of range
    pub events_rejected: u64,
    pub words_written: u64,
}

/// Rows removed by one retention pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub raw_events: u64,
    pub hourly_rows: u64,
}

impl PruneReport {
    pub fn total(&self) -> u64 {
        self.raw_events + self.hourly_rows
    }
}

const HOURLY_TABLES: [&str; 4] = [
    "key_counts_hourly",
    "word_counts_hourly",
    "app_word_counts_hourly",
    "typing_stats_hourly",
];

const ALL_TABLES: [&str; 9] = [
    "raw_events",
    "key_counts_hourly",
    "key_counts_daily",
    "word_counts_hourly",
    "word_counts_daily",
    "app_word_counts_hourly",
    "app_word_counts_daily",
    "typing_stats_hourly",
    "typing_stats_daily",
];

type KeyBuckets = BTreeMap<(i64, u16, DeviceClass), u64>;
type WordBuckets = BTreeMap<(i64, DeviceClass), u64>;
type AppBuckets = BTreeMap<(i64, String), (Option<String>, u64)>;
type TypingBuckets = BTreeMap<i64, TypingTotals>;

/// Write a batch in a single transaction.
///
/// Nothing is visible to readers unless every statement succeeds.
pub(crate) fn write_batch(
    conn: &mut Connection,
    settings: &StoreSettings,
    batch: &FlushBatch,
) -> Result<FlushReport, StoreError> {
    let calendar = &settings.calendar;
    let mut report = FlushReport::default();

    let mut keys_hourly = KeyBuckets::new();
    let mut keys_daily = KeyBuckets::new();
    let mut words_hourly = WordBuckets::new();
    let mut words_daily = WordBuckets::new();
    let mut apps_hourly = AppBuckets::new();
    let mut apps_daily = AppBuckets::new();
    let mut typing_hourly = TypingBuckets::new();
    let mut typing_daily = TypingBuckets::new();

    let tx = conn
        .transaction()
        .or_step("failed to begin flush transaction")?;

    {
        let mut insert_raw = tx
            .prepare_cached(
                "INSERT INTO raw_events (timestamp_ms, key_code, device_class, word_role, app_bundle_id)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .or_prepare("raw_events insert")?;

        for event in &batch.events {
            if !is_valid_key_code(event.key_code) {
                report.events_rejected += 1;
                continue;
            }
            insert_raw
                .execute(params![
                    event.timestamp.timestamp_millis(),
                    i64::from(event.key_code),
                    event.device_class.as_str(),
                    event.word_role.as_i64(),
                    event.app_bundle_id,
                ])
                .or_step("raw_events insert")?;
            if !event.word_role.is_keystroke() {
                continue;
            }
            report.events_written += 1;

            let hour = calendar.align(event.timestamp, Granularity::Hourly).timestamp();
            let day = calendar.align(event.timestamp, Granularity::Daily).timestamp();
            *keys_hourly
                .entry((hour, event.key_code, event.device_class))
                .or_default() += 1;
            *keys_daily
                .entry((day, event.key_code, event.device_class))
                .or_default() += 1;
        }
    }

    for word in &batch.words {
        let hour = calendar.align(word.timestamp, Granularity::Hourly).timestamp();
        let day = calendar.align(word.timestamp, Granularity::Daily).timestamp();
        *words_hourly.entry((hour, word.device_class)).or_default() += 1;
        *words_daily.entry((day, word.device_class)).or_default() += 1;
        for (bucket, target) in [(hour, &mut apps_hourly), (day, &mut apps_daily)] {
            let entry = target
                .entry((bucket, word.app_bundle_id.clone()))
                .or_default();
            entry.1 += 1;
            if word.app_name.is_some() {
                entry.0 = word.app_name.clone();
            }
        }
        report.words_written += 1;
    }

    for increment in &batch.typing {
        let hour = calendar
            .align(increment.bucket_start, Granularity::Hourly)
            .timestamp();
        let day = calendar
            .align(increment.bucket_start, Granularity::Daily)
            .timestamp();
        typing_hourly.entry(hour).or_default().add(&increment.totals);
        typing_daily.entry(day).or_default().add(&increment.totals);
    }

    upsert_key_counts(&tx, "key_counts_hourly", &keys_hourly)?;
    upsert_key_counts(&tx, "key_counts_daily", &keys_daily)?;
    upsert_word_counts(&tx, "word_counts_hourly", &words_hourly)?;
    upsert_word_counts(&tx, "word_counts_daily", &words_daily)?;
    upsert_app_words(&tx, "app_word_counts_hourly", &apps_hourly)?;
    upsert_app_words(&tx, "app_word_counts_daily", &apps_daily)?;
    upsert_typing(&tx, "typing_stats_hourly", &typing_hourly)?;
    upsert_typing(&tx, "typing_stats_daily", &typing_daily)?;

    tx.commit().or_step("failed to commit flush")?;

    if report.events_rejected > 0 {
        warn!(
            rejected = report.events_rejected,
            "dropped events with invalid key codes"
        );
    }
    debug!(
        events = report.events_written,
        words = report.words_written,
        "flush committed"
    );
    Ok(report)
}

fn upsert_key_counts(
    tx: &Transaction<'_>,
    table: &str,
    rows: &KeyBuckets,
) -> Result<(), StoreError> {
    let sql = format!(
        "INSERT INTO {table} (bucket_start, key_code, device_class, count) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(bucket_start, key_code, device_class) DO UPDATE SET count = count + excluded.count"
    );
    let mut stmt = tx.prepare_cached(&sql).or_prepare(table)?;
    for ((bucket, key_code, device), count) in rows {
        stmt.execute(params![
            bucket,
            i64::from(*key_code),
            device.as_str(),
            to_i64(*count)?
        ])
        .or_step(table)?;
    }
    Ok(())
}

fn upsert_word_counts(
    tx: &Transaction<'_>,
    table: &str,
    rows: &WordBuckets,
) -> Result<(), StoreError> {
    let sql = format!(
        "INSERT INTO {table} (bucket_start, device_class, count) VALUES (?1, ?2, ?3)
         ON CONFLICT(bucket_start, device_class) DO UPDATE SET count = count + excluded.count"
    );
    let mut stmt = tx.prepare_cached(&sql).or_prepare(table)?;
    for ((bucket, device), count) in rows {
        stmt.execute(params![bucket, device.as_str(), to_i64(*count)?])
            .or_step(table)?;
    }
    Ok(())
}

fn upsert_app_words(
    tx: &Transaction<'_>,
    table: &str,
    rows: &AppBuckets,
) -> Result<(), StoreError> {
    let sql = format!(
        "INSERT INTO {table} (bucket_start, app_bundle_id, app_name, count) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(bucket_start, app_bundle_id) DO UPDATE SET
             count = count + excluded.count,
             app_name = COALESCE(excluded.app_name, app_name)"
    );
    let mut stmt = tx.prepare_cached(&sql).or_prepare(table)?;
    for ((bucket, app), (name, count)) in rows {
        stmt.execute(params![bucket, app, name, to_i64(*count)?])
            .or_step(table)?;
    }
    Ok(())
}

fn upsert_typing(
    tx: &Transaction<'_>,
    table: &str,
    rows: &TypingBuckets,
) -> Result<(), StoreError> {
    let sql = format!(
        "INSERT INTO {table} (bucket_start, word_count, active_seconds, active_seconds_flow,
                              active_seconds_skill, typed_words, pasted_words_est, paste_events, edit_events)
         VALUES (?1, ?2, ?3, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(bucket_start) DO UPDATE SET
             word_count = word_count + excluded.word_count,
             active_seconds = active_seconds + excluded.active_seconds,
             active_seconds_flow = active_seconds_flow + excluded.active_seconds_flow,
             active_seconds_skill = active_seconds_skill + excluded.active_seconds_skill,
             typed_words = typed_words + excluded.typed_words,
             pasted_words_est = pasted_words_est + excluded.pasted_words_est,
             paste_events = paste_events + excluded.paste_events,
             edit_events = edit_events + excluded.edit_events"
    );
    let mut stmt = tx.prepare_cached(&sql).or_prepare(table)?;
    for (bucket, totals) in rows {
        stmt.execute(params![
            bucket,
            to_i64(totals.word_count)?,
            totals.active_seconds_flow,
            totals.active_seconds_skill,
            to_i64(totals.typed_words)?,
            to_i64(totals.pasted_words_est)?,
            to_i64(totals.paste_events)?,
            to_i64(totals.edit_events)?,
        ])
        .or_step(table)?;
    }
    Ok(())
}

/// Delete raw events and hourly rows older than the retention window.
/// Daily tables are kept forever.
pub(crate) fn prune(
    conn: &mut Connection,
    settings: &StoreSettings,
    now: DateTime<Utc>,
) -> Result<PruneReport, StoreError> {
    let cutoff = now - Duration::days(i64::from(settings.retention_days));
    let tx = conn
        .transaction()
        .or_step("failed to begin prune transaction")?;

    let raw_events = tx
        .execute(
            "DELETE FROM raw_events WHERE timestamp_ms < ?1",
            [cutoff.timestamp_millis()],
        )
        .or_step("raw_events prune")?;

    let mut hourly_rows = 0;
    for table in HOURLY_TABLES {
        hourly_rows += tx
            .execute(
                &format!("DELETE FROM {table} WHERE bucket_start < ?1"),
                [cutoff.timestamp()],
            )
            .or_step(table)?;
    }

    tx.commit().or_step("failed to commit prune")?;

    Ok(PruneReport {
        raw_events: raw_events as u64,
        hourly_rows: hourly_rows as u64,
    })
}

/// Remove every persisted row. The schema stays in place.
pub(crate) fn reset_all(conn: &mut Connection) -> Result<(), StoreError> {
    let tx = conn
        .transaction()
        .or_step("failed to begin reset transaction")?;
    for table in ALL_TABLES {
        tx.execute(&format!("DELETE FROM {table}"), [])
            .or_step(table)?;
    }
    tx.commit().or_step("failed to commit reset")?;
    Ok(())
}

/// Row count of every table, in schema order.
pub(crate) fn row_counts(conn: &Connection) -> Result<Vec<(String, u64)>, StoreError> {
    let mut counts = Vec::with_capacity(ALL_TABLES.len());
    for table in ALL_TABLES {
        let count: i64 = conn
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get(0)
            })
            .or_step(table)?;
        counts.push((table.to_string(), count.max(0) as u64));
    }
    Ok(counts)
}
