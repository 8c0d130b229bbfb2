//! Per-application typing sessions and active-time accounting.
//!
//! Active typing time is accumulated from inter-keystroke gaps under two idle
//! caps: a lenient "flow" cap that tolerates thinking pauses, and a strict
//! "skill" cap that only measures raw finger speed. Gaps are measured on the
//! monotonic clock and attributed to buckets by wall-clock position.

use crate::collector::types::KeyEvent;
use crate::core::buckets::{apportion, BucketCalendar, Granularity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Idle caps, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IdleCaps {
    pub flow: f64,
    pub skill: f64,
}

impl Default for IdleCaps {
    fn default() -> Self {
        Self {
            flow: 12.0,
            skill: 2.0,
        }
    }
}

/// Capped active time earned by one inter-keystroke gap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActiveInterval {
    pub wall_start: DateTime<Utc>,
    pub wall_end: DateTime<Utc>,
    pub flow_seconds: f64,
    pub skill_seconds: f64,
}

impl ActiveInterval {
    /// Split both deltas across buckets by the same wall-clock fractions.
    /// Per-bucket shares always sum back to the capped deltas.
    pub fn apportion(
        &self,
        calendar: &BucketCalendar,
        granularity: Granularity,
    ) -> Vec<(DateTime<Utc>, f64, f64)> {
        let parts = apportion(calendar, self.wall_start, self.wall_end, granularity);
        let last = parts.len().saturating_sub(1);
        let mut flow_left = self.flow_seconds;
        let mut skill_left = self.skill_seconds;

        parts
            .into_iter()
            .enumerate()
            .map(|(i, (bucket, fraction))| {
                if i == last {
                    (bucket, flow_left, skill_left)
                } else {
                    let flow = self.flow_seconds * fraction;
                    let skill = self.skill_seconds * fraction;
                    flow_left -= flow;
                    skill_left -= skill;
                    (bucket, flow, skill)
                }
            })
            .collect()
    }
}

/// Mutable state of one application's typing session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypingSession {
    pub app_bundle_id: String,
    pub app_name: Option<String>,
    pub start_time: DateTime<Utc>,
    /// Monotonic time of the latest event seen for this app
    pub last_monotonic_time: f64,
    /// Wall-clock time of the latest event seen for this app
    pub last_event_time: DateTime<Utc>,
    /// Monotonic time of the latest text-producing event
    pub last_text_event_time: Option<f64>,
    /// Wall-clock time of the latest text-producing event
    pub last_text_event_wall: Option<DateTime<Utc>>,
    pub active_seconds_flow: f64,
    pub active_seconds_skill: f64,
    pub typed_words: u64,
    pub pasted_words_est: u64,
    pub paste_events: u64,
    pub edit_events: u64,
}

impl TypingSession {
    pub fn start(event: &KeyEvent) -> Self {
        Self {
            app_bundle_id: event.app_key().to_string(),
            app_name: event.app_name.clone(),
            start_time: event.timestamp,
            last_monotonic_time: event.monotonic_time,
            last_event_time: event.timestamp,
            last_text_event_time: None,
            last_text_event_wall: None,
            active_seconds_flow: 0.0,
            active_seconds_skill: 0.0,
            typed_words: 0,
            pasted_words_est: 0,
            paste_events: 0,
            edit_events: 0,
        }
    }

    /// Whether an event at `monotonic_time` falls after the idle timeout.
    pub fn is_expired_at(&self, monotonic_time: f64, timeout_secs: f64) -> bool {
        monotonic_time - self.last_monotonic_time > timeout_secs
    }

    /// Advance the "last seen" cursors.
    pub fn touch(&mut self, event: &KeyEvent) {
        if event.monotonic_time > self.last_monotonic_time {
            self.last_monotonic_time = event.monotonic_time;
        }
        if event.timestamp > self.last_event_time {
            self.last_event_time = event.timestamp;
        }
        if event.app_name.is_some() {
            self.app_name = event.app_name.clone();
        }
    }

    /// Record a text-producing event, returning the active time it earned.
    ///
    /// No time accrues for the first text event of a session or when the
    /// monotonic gap is not positive; the cursors advance either way.
    pub fn accrue(&mut self, event: &KeyEvent, caps: IdleCaps) -> Option<ActiveInterval> {
        let previous = self.last_text_event_time.zip(self.last_text_event_wall);
        self.mark_text_event(event);

        let (prev_mono, prev_wall) = previous?;
        let dt = event.monotonic_time - prev_mono;
        if dt <= 0.0 {
            return None;
        }

        let flow = dt.min(caps.flow);
        let skill = dt.min(caps.skill);
        self.active_seconds_flow += flow;
        self.active_seconds_skill += skill;

        Some(ActiveInterval {
            wall_start: prev_wall,
            wall_end: event.timestamp,
            flow_seconds: flow,
            skill_seconds: skill,
        })
    }

    /// Reset the text-event timer without accruing time.
    pub fn mark_text_event(&mut self, event: &KeyEvent) {
        let mono = match self.last_text_event_time {
            Some(prev) if prev > event.monotonic_time => prev,
            _ => event.monotonic_time,
        };
        let wall = match self.last_text_event_wall {
            Some(prev) if prev > event.timestamp => prev,
            _ => event.timestamp,
        };
        self.last_text_event_time = Some(mono);
        self.last_text_event_wall = Some(wall);
    }
}
