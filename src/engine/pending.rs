//! In-memory deltas awaiting the next flush.

use crate::collector::types::DeviceClass;
use crate::core::words::WordRole;
use crate::core::TypingTotals;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// A row of the raw event log: a keystroke, or a session break.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedKey {
    pub timestamp: DateTime<Utc>,
    pub key_code: u16,
    pub device_class: DeviceClass,
    pub app_bundle_id: String,
    pub word_role: WordRole,
}

impl RecordedKey {
    /// Marks the point where a session end closed the word in progress.
    pub fn session_break(
        timestamp: DateTime<Utc>,
        device_class: DeviceClass,
        app_bundle_id: &str,
    ) -> Self {
        Self {
            timestamp,
            key_code: 0,
            device_class,
            app_bundle_id: app_bundle_id.to_string(),
            word_role: WordRole::SessionBreak,
        }
    }
}

/// One completed word.
#[derive(Debug, Clone, PartialEq)]
pub struct WordIncrement {
    pub timestamp: DateTime<Utc>,
    pub device_class: DeviceClass,
    pub app_bundle_id: String,
    pub app_name: Option<String>,
}

/// Typing statistics earned inside one five-minute bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActiveTypingIncrement {
    pub bucket_start: DateTime<Utc>,
    pub totals: TypingTotals,
}

/// Everything handed to the store in one transaction.
#[derive(Debug, Clone, Default)]
pub struct FlushBatch {
    pub created_at: Option<DateTime<Utc>>,
    pub events: Vec<RecordedKey>,
    pub words: Vec<WordIncrement>,
    pub typing: Vec<ActiveTypingIncrement>,
}

impl FlushBatch {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.words.is_empty() && self.typing.is_empty()
    }

    /// Clock used for retention decisions.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at.unwrap_or_else(Utc::now)
    }
}

/// Pending deltas, keyed the way they will be flushed.
#[derive(Debug, Default)]
pub struct PendingBuffers {
    events: Vec<RecordedKey>,
    words: Vec<WordIncrement>,
    typing: BTreeMap<DateTime<Utc>, TypingTotals>,
}

impl PendingBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_key(&mut self, key: RecordedKey) {
        self.events.push(key);
    }

    /// Record a completed word and bump the typing counters of its bucket.
    pub fn record_word(&mut self, word: WordIncrement, bucket: DateTime<Utc>, pasted: bool) {
        let totals = self.typing.entry(bucket).or_default();
        totals.word_count += 1;
        if pasted {
            totals.pasted_words_est += 1;
        } else {
            totals.typed_words += 1;
        }
        self.words.push(word);
    }

    pub fn add_active(&mut self, bucket: DateTime<Utc>, flow: f64, skill: f64) {
        let totals = self.typing.entry(bucket).or_default();
        totals.active_seconds_flow += flow;
        totals.active_seconds_skill += skill;
    }

    pub fn add_paste(&mut self, bucket: DateTime<Utc>) {
        self.typing.entry(bucket).or_default().paste_events += 1;
    }

    pub fn add_edit(&mut self, bucket: DateTime<Utc>) {
        self.typing.entry(bucket).or_default().edit_events += 1;
    }

    pub fn events(&self) -> &[RecordedKey] {
        &self.events
    }

    pub fn words(&self) -> &[WordIncrement] {
        &self.words
    }

    pub fn typing(&self) -> &BTreeMap<DateTime<Utc>, TypingTotals> {
        &self.typing
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.words.is_empty() && self.typing.is_empty()
    }

    /// Move everything pending into a batch, leaving the buffers empty.
    pub fn take_batch(&mut self, created_at: DateTime<Utc>) -> FlushBatch {
        let typing = std::mem::take(&mut self.typing)
            .into_iter()
            .map(|(bucket_start, totals)| ActiveTypingIncrement {
                bucket_start,
                totals,
            })
            .collect();

        FlushBatch {
            created_at: Some(created_at),
            events: std::mem::take(&mut self.events),
            words: std::mem::take(&mut self.words),
            typing,
        }
    }

    /// Put a batch that failed to commit back in front of anything newer.
    pub fn restore(&mut self, batch: FlushBatch) {
        let mut events = batch.events;
        events.append(&mut self.events);
        self.events = events;

        let mut words = batch.words;
        words.append(&mut self.words);
        self.words = words;

        for increment in batch.typing {
            self.typing
                .entry(increment.bucket_start)
                .or_default()
                .add(&increment.totals);
        }
    }

    pub fn clear(&mut self) {
        self.events.clear();
        self.words.clear();
        self.typing.clear();
    }
}
