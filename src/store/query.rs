//! Windowed reads over committed data.

use super::{from_millis, from_secs, StoreSettings};
use crate::collector::types::DeviceClass;
use crate::core::buckets::Granularity;
use crate::core::timeframe::Timeframe;
use crate::core::words::WordRole;
use crate::core::{TypingTotals, WindowAggregates};
use crate::store::error::{SqlResultExt, StoreError};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

/// Aggregates for `timeframe` as seen at `now`, from committed rows only.
pub(crate) fn load_window(
    conn: &Connection,
    settings: &StoreSettings,
    timeframe: Timeframe,
    now: DateTime<Utc>,
) -> Result<WindowAggregates, StoreError> {
    let mut window = WindowAggregates::new(timeframe, now);
    match window.window_start {
        Some(start) => load_bounded(conn, settings, &mut window, start)?,
        None => load_all_time(conn, settings, &mut window)?,
    }
    Ok(window)
}

/// Raw events for exact counts, hourly tables for typing and app views.
fn load_bounded(
    conn: &Connection,
    settings: &StoreSettings,
    window: &mut WindowAggregates,
    start: DateTime<Utc>,
) -> Result<(), StoreError> {
    let calendar = &settings.calendar;
    let now = window.now;
    let mut replay = window
        .replay
        .take()
        .ok_or_else(|| StoreError::Step("bounded window without replay state".to_string()))?;

    // Word state at the window start is whatever the last state-setting
    // row of each application left behind, however long ago it was.
    let mut seed = conn
        .prepare_cached(
            "SELECT app_bundle_id, word_role FROM (
                 SELECT app_bundle_id, word_role,
                        ROW_NUMBER() OVER (
                            PARTITION BY app_bundle_id ORDER BY timestamp_ms DESC, id DESC
                        ) AS latest
                 FROM raw_events
                 WHERE timestamp_ms < ?1 AND word_role IN (?2, ?3, ?4)
             ) WHERE latest = 1",
        )
        .or_prepare("replay seed")?;
    let mut rows = seed
        .query(params![
            start.timestamp_millis(),
            WordRole::Separator.as_i64(),
            WordRole::WordChar.as_i64(),
            WordRole::SessionBreak.as_i64(),
        ])
        .or_step("replay seed")?;
    while let Some(row) = rows.next().or_step("replay seed")? {
        let app: String = row.get(0).or_step("replay seed")?;
        let role = WordRole::from_i64(row.get(1).or_step("replay seed")?);
        replay.seed(&app, role);
    }

    let mut events = conn
        .prepare_cached(
            "SELECT timestamp_ms, key_code, device_class, word_role, app_bundle_id FROM raw_events
             WHERE timestamp_ms >= ?1 AND timestamp_ms <= ?2
             ORDER BY timestamp_ms, id",
        )
        .or_prepare("window events")?;
    let mut rows = events
        .query(params![start.timestamp_millis(), now.timestamp_millis()])
        .or_step("window events")?;
    while let Some(row) = rows.next().or_step("window events")? {
        let timestamp = from_millis(row.get(0).or_step("window events")?)?;
        let key_code: i64 = row.get(1).or_step("window events")?;
        let device: String = row.get(2).or_step("window events")?;
        let role = WordRole::from_i64(row.get(3).or_step("window events")?);
        let app: String = row.get(4).or_step("window events")?;

        if role.is_keystroke() {
            if let Ok(key_code) = u16::try_from(key_code) {
                window.add_keystrokes(
                    calendar,
                    timestamp,
                    key_code,
                    DeviceClass::from_str_lossy(&device),
                    1,
                );
            }
        }
        if let Some(done) = replay.feed(timestamp, &app, role) {
            if done >= start {
                window.add_words(calendar, done, 1);
            }
        }
    }
    window.replay = Some(replay);

    let floor = calendar.align(start, Granularity::Hourly).timestamp();
    load_typing(conn, window, "typing_stats_hourly", settings, floor)?;
    load_app_words(conn, window, "app_word_counts_hourly", floor)?;
    Ok(())
}

/// Daily tables only; raw events may already be pruned.
fn load_all_time(
    conn: &Connection,
    settings: &StoreSettings,
    window: &mut WindowAggregates,
) -> Result<(), StoreError> {
    let calendar = &settings.calendar;
    let now_secs = window.now.timestamp();

    let mut keys = conn
        .prepare_cached(
            "SELECT bucket_start, key_code, device_class, count FROM key_counts_daily
             WHERE bucket_start <= ?1",
        )
        .or_prepare("daily key counts")?;
    let mut rows = keys.query([now_secs]).or_step("daily key counts")?;
    while let Some(row) = rows.next().or_step("daily key counts")? {
        let bucket = from_secs(row.get(0).or_step("daily key counts")?)?;
        let key_code: i64 = row.get(1).or_step("daily key counts")?;
        let device: String = row.get(2).or_step("daily key counts")?;
        let count: i64 = row.get(3).or_step("daily key counts")?;
        let Ok(key_code) = u16::try_from(key_code) else {
            continue;
        };
        window.add_keystrokes(
            calendar,
            bucket,
            key_code,
            DeviceClass::from_str_lossy(&device),
            count.max(0) as u64,
        );
    }

    let mut words = conn
        .prepare_cached(
            "SELECT bucket_start, SUM(count) FROM word_counts_daily
             WHERE bucket_start <= ?1 GROUP BY bucket_start",
        )
        .or_prepare("daily word counts")?;
    let mut rows = words.query([now_secs]).or_step("daily word counts")?;
    while let Some(row) = rows.next().or_step("daily word counts")? {
        let bucket = from_secs(row.get(0).or_step("daily word counts")?)?;
        let count: i64 = row.get(1).or_step("daily word counts")?;
        window.add_words(calendar, bucket, count.max(0) as u64);
    }

    load_typing(conn, window, "typing_stats_daily", settings, i64::MIN)?;
    load_app_words(conn, window, "app_word_counts_daily", i64::MIN)?;
    Ok(())
}

fn load_typing(
    conn: &Connection,
    window: &mut WindowAggregates,
    table: &str,
    settings: &StoreSettings,
    floor: i64,
) -> Result<(), StoreError> {
    let sql = format!(
        "SELECT bucket_start, word_count, active_seconds_flow, active_seconds_skill,
                typed_words, pasted_words_est, paste_events, edit_events
         FROM {table} WHERE bucket_start >= ?1 AND bucket_start <= ?2
         ORDER BY bucket_start"
    );
    let mut stmt = conn.prepare_cached(&sql).or_prepare(table)?;
    let mut rows = stmt
        .query(params![floor, window.now.timestamp()])
        .or_step(table)?;
    while let Some(row) = rows.next().or_step(table)? {
        let bucket = from_secs(row.get(0).or_step(table)?)?;
        let totals = typing_row(row).or_step(table)?;
        window.add_typing(&settings.calendar, bucket, &totals);
    }
    Ok(())
}

fn load_app_words(
    conn: &Connection,
    window: &mut WindowAggregates,
    table: &str,
    floor: i64,
) -> Result<(), StoreError> {
    let sql = format!(
        "SELECT app_bundle_id, MAX(app_name), SUM(count) FROM {table}
         WHERE bucket_start >= ?1 AND bucket_start <= ?2
         GROUP BY app_bundle_id"
    );
    let mut stmt = conn.prepare_cached(&sql).or_prepare(table)?;
    let mut rows = stmt
        .query(params![floor, window.now.timestamp()])
        .or_step(table)?;
    while let Some(row) = rows.next().or_step(table)? {
        let app: String = row.get(0).or_step(table)?;
        let name: Option<String> = row.get(1).or_step(table)?;
        let count: i64 = row.get(2).or_step(table)?;
        window.add_app_words(&app, name.as_deref(), count.max(0) as u64);
    }
    Ok(())
}

fn typing_row(row: &Row<'_>) -> rusqlite::Result<TypingTotals> {
    let count = |idx: usize| -> rusqlite::Result<u64> {
        let value: i64 = row.get(idx)?;
        Ok(value.max(0) as u64)
    };
    Ok(TypingTotals {
        word_count: count(1)?,
        active_seconds_flow: row.get(2)?,
        active_seconds_skill: row.get(3)?,
        typed_words: count(4)?,
        pasted_words_est: count(5)?,
        paste_events: count(6)?,
        edit_events: count(7)?,
    })
}
