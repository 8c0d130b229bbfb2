//! Windowed statistics.
//!
//! `WindowAggregates` is the mergeable intermediate form: the store fills it
//! from committed rows, the engine overlays its pending deltas, and
//! `into_snapshot` derives the rankings and series exposed to callers.

use crate::collector::types::DeviceClass;
use crate::core::buckets::{BucketCalendar, Granularity};
use crate::core::timeframe::Timeframe;
use crate::core::words::WordReplay;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Additive typing statistics for one bucket (or a whole window).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TypingTotals {
    pub word_count: u64,
    pub active_seconds_flow: f64,
    pub active_seconds_skill: f64,
    pub typed_words: u64,
    pub pasted_words_est: u64,
    pub paste_events: u64,
    pub edit_events: u64,
}

impl TypingTotals {
    pub fn add(&mut self, other: &TypingTotals) {
        self.word_count += other.word_count;
        self.active_seconds_flow += other.active_seconds_flow;
        self.active_seconds_skill += other.active_seconds_skill;
        self.typed_words += other.typed_words;
        self.pasted_words_est += other.pasted_words_est;
        self.paste_events += other.paste_events;
        self.edit_events += other.edit_events;
    }

    pub fn is_empty(&self) -> bool {
        *self == TypingTotals::default()
    }

    pub fn flow_wpm(&self) -> Option<f64> {
        wpm(self.typed_words, self.active_seconds_flow)
    }

    pub fn skill_wpm(&self) -> Option<f64> {
        wpm(self.typed_words, self.active_seconds_skill)
    }
}

fn wpm(words: u64, active_seconds: f64) -> Option<f64> {
    if active_seconds > 0.0 {
        Some(words as f64 / (active_seconds / 60.0))
    } else {
        None
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppWords {
    pub app_name: Option<String>,
    pub words: u64,
}

/// Union-able aggregates for one timeframe.
#[derive(Debug, Clone)]
pub struct WindowAggregates {
    pub timeframe: Timeframe,
    pub now: DateTime<Utc>,
    pub window_start: Option<DateTime<Utc>>,
    pub keystrokes: u64,
    pub device_keystrokes: BTreeMap<DeviceClass, u64>,
    pub key_counts: BTreeMap<u16, u64>,
    pub keystroke_buckets: BTreeMap<DateTime<Utc>, u64>,
    pub words: u64,
    pub word_buckets: BTreeMap<DateTime<Utc>, u64>,
    pub typing: TypingTotals,
    pub typing_buckets: BTreeMap<DateTime<Utc>, TypingTotals>,
    pub app_words: BTreeMap<String, AppWords>,
    /// Word replay state at the end of the committed events (bounded windows)
    pub replay: Option<WordReplay>,
}

impl WindowAggregates {
    pub fn new(timeframe: Timeframe, now: DateTime<Utc>) -> Self {
        let window_start = timeframe.window_start(now);
        Self {
            timeframe,
            now,
            window_start,
            keystrokes: 0,
            device_keystrokes: BTreeMap::new(),
            key_counts: BTreeMap::new(),
            keystroke_buckets: BTreeMap::new(),
            words: 0,
            word_buckets: BTreeMap::new(),
            typing: TypingTotals::default(),
            typing_buckets: BTreeMap::new(),
            app_words: BTreeMap::new(),
            replay: window_start.map(|_| WordReplay::new()),
        }
    }

    /// Whether an exact timestamp falls inside the window.
    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        timestamp <= self.now && self.window_start.map_or(true, |start| timestamp >= start)
    }

    /// Lowest hourly bucket start included for hour-resolution views.
    pub fn hourly_floor(&self, calendar: &BucketCalendar) -> Option<DateTime<Utc>> {
        self.window_start
            .map(|start| calendar.align(start, Granularity::Hourly))
    }

    /// Whether a bucket of hour resolution or finer belongs to the window.
    pub fn includes_bucket(&self, calendar: &BucketCalendar, bucket_start: DateTime<Utc>) -> bool {
        let hour = calendar.align(bucket_start, Granularity::Hourly);
        hour <= self.now && self.hourly_floor(calendar).map_or(true, |floor| hour >= floor)
    }

    pub fn add_keystrokes(
        &mut self,
        calendar: &BucketCalendar,
        at: DateTime<Utc>,
        key_code: u16,
        device: DeviceClass,
        count: u64,
    ) {
        if count == 0 {
            return;
        }
        self.keystrokes += count;
        *self.device_keystrokes.entry(device).or_default() += count;
        *self.key_counts.entry(key_code).or_default() += count;
        let bucket = calendar.align(at, self.timeframe.trend_granularity());
        *self.keystroke_buckets.entry(bucket).or_default() += count;
    }

    pub fn add_words(&mut self, calendar: &BucketCalendar, at: DateTime<Utc>, count: u64) {
        if count == 0 {
            return;
        }
        self.words += count;
        let bucket = calendar.align(at, self.timeframe.trend_granularity());
        *self.word_buckets.entry(bucket).or_default() += count;
    }

    pub fn add_typing(
        &mut self,
        calendar: &BucketCalendar,
        bucket_start: DateTime<Utc>,
        totals: &TypingTotals,
    ) {
        self.typing.add(totals);
        let bucket = calendar.align(bucket_start, self.timeframe.speed_granularity());
        self.typing_buckets.entry(bucket).or_default().add(totals);
    }

    pub fn add_app_words(&mut self, app_bundle_id: &str, app_name: Option<&str>, count: u64) {
        if count == 0 {
            return;
        }
        let entry = self.app_words.entry(app_bundle_id.to_string()).or_default();
        entry.words += count;
        if let Some(name) = app_name.filter(|n| !n.is_empty()) {
            entry.app_name = Some(name.to_string());
        }
    }

    /// Derive the externally visible snapshot.
    pub fn into_snapshot(self, calendar: &BucketCalendar, top_n: usize) -> StatsSnapshot {
        let trend_gran = self.timeframe.trend_granularity();
        let speed_gran = self.timeframe.speed_granularity();

        let trend_from = self.window_start.or_else(|| {
            let first_key = self.keystroke_buckets.keys().next().copied();
            let first_word = self.word_buckets.keys().next().copied();
            match (first_key, first_word) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            }
        });
        let trend = trend_from
            .map(|from| calendar.bucket_starts(from, self.now, trend_gran))
            .unwrap_or_default()
            .into_iter()
            .map(|bucket_start| TrendPoint {
                bucket_start,
                keystrokes: self.keystroke_buckets.get(&bucket_start).copied().unwrap_or(0),
                words: self.word_buckets.get(&bucket_start).copied().unwrap_or(0),
            })
            .collect();

        let speed_from = self
            .window_start
            .or_else(|| self.typing_buckets.keys().next().copied());
        let speed_trend = speed_from
            .map(|from| calendar.bucket_starts(from, self.now, speed_gran))
            .unwrap_or_default()
            .into_iter()
            .map(|bucket_start| {
                let totals = self
                    .typing_buckets
                    .get(&bucket_start)
                    .copied()
                    .unwrap_or_default();
                SpeedPoint {
                    bucket_start,
                    typed_words: totals.typed_words,
                    active_seconds_flow: totals.active_seconds_flow,
                    active_seconds_skill: totals.active_seconds_skill,
                    flow_wpm: totals.flow_wpm(),
                    skill_wpm: totals.skill_wpm(),
                }
            })
            .collect();

        let total_keys = self.keystrokes;
        let mut key_distribution: Vec<KeyCount> = self
            .key_counts
            .iter()
            .map(|(&key_code, &count)| KeyCount {
                key_code,
                count,
                share: if total_keys > 0 {
                    count as f64 / total_keys as f64
                } else {
                    0.0
                },
            })
            .collect();
        key_distribution.sort_by(|a, b| b.count.cmp(&a.count).then(a.key_code.cmp(&b.key_code)));
        let top_keys = key_distribution.iter().take(top_n).cloned().collect();

        let mut top_apps: Vec<AppUsage> = self
            .app_words
            .into_iter()
            .map(|(app_bundle_id, usage)| AppUsage {
                app_bundle_id,
                app_name: usage.app_name,
                words: usage.words,
            })
            .collect();
        top_apps.sort_by(|a, b| {
            b.words
                .cmp(&a.words)
                .then_with(|| a.app_bundle_id.cmp(&b.app_bundle_id))
        });
        top_apps.truncate(top_n);

        let device = |class: DeviceClass| self.device_keystrokes.get(&class).copied().unwrap_or(0);

        StatsSnapshot {
            timeframe: self.timeframe,
            window_start: self.window_start,
            generated_at: self.now,
            total_keystrokes: self.keystrokes,
            total_words: self.words,
            typed_words: self.typing.typed_words,
            pasted_words_est: self.typing.pasted_words_est,
            paste_events: self.typing.paste_events,
            edit_events: self.typing.edit_events,
            active_seconds_flow: self.typing.active_seconds_flow,
            active_seconds_skill: self.typing.active_seconds_skill,
            flow_wpm: self.typing.flow_wpm(),
            skill_wpm: self.typing.skill_wpm(),
            device_breakdown: DeviceBreakdown {
                built_in: device(DeviceClass::BuiltIn),
                external: device(DeviceClass::External),
                unknown: device(DeviceClass::Unknown),
            },
            key_distribution,
            top_keys,
            trend,
            speed_trend,
            top_apps,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceBreakdown {
    pub built_in: u64,
    pub external: u64,
    pub unknown: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyCount {
    pub key_code: u16,
    pub count: u64,
    /// Fraction of all keystrokes in the window
    pub share: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub bucket_start: DateTime<Utc>,
    pub keystrokes: u64,
    pub words: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeedPoint {
    pub bucket_start: DateTime<Utc>,
    pub typed_words: u64,
    pub active_seconds_flow: f64,
    pub active_seconds_skill: f64,
    pub flow_wpm: Option<f64>,
    pub skill_wpm: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppUsage {
    pub app_bundle_id: String,
    pub app_name: Option<String>,
    pub words: u64,
}

/// Immutable statistics for one timeframe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub timeframe: Timeframe,
    pub window_start: Option<DateTime<Utc>>,
    pub generated_at: DateTime<Utc>,
    pub total_keystrokes: u64,
    pub total_words: u64,
    pub typed_words: u64,
    pub pasted_words_est: u64,
    pub paste_events: u64,
    pub edit_events: u64,
    pub active_seconds_flow: f64,
    pub active_seconds_skill: f64,
    pub flow_wpm: Option<f64>,
    pub skill_wpm: Option<f64>,
    pub device_breakdown: DeviceBreakdown,
    /// Every key seen, most frequent first
    pub key_distribution: Vec<KeyCount>,
    pub top_keys: Vec<KeyCount>,
    pub trend: Vec<TrendPoint>,
    pub speed_trend: Vec<SpeedPoint>,
    pub top_apps: Vec<AppUsage>,
}
