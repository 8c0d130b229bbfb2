//! Overlay of pending deltas onto committed aggregates.
//!
//! Every view filters pending data exactly the way the store filters the
//! same data once committed, so a snapshot does not change when a flush
//! happens in between.

use super::pending::PendingBuffers;
use crate::collector::types::is_valid_key_code;
use crate::core::buckets::{BucketCalendar, Granularity};
use crate::core::WindowAggregates;

pub(crate) fn overlay(
    window: &mut WindowAggregates,
    pending: &PendingBuffers,
    calendar: &BucketCalendar,
) {
    overlay_events(window, pending, calendar);

    // Hour-resolution views: typing stats and per-app words.
    for (bucket, totals) in pending.typing() {
        if window.includes_bucket(calendar, *bucket) {
            window.add_typing(calendar, *bucket, totals);
        }
    }
    for word in pending.words() {
        let hour = calendar.align(word.timestamp, Granularity::Hourly);
        if window.includes_bucket(calendar, hour) {
            window.add_app_words(&word.app_bundle_id, word.app_name.as_deref(), 1);
        }
    }

    // All-time word totals come from the daily word tables, which the
    // pending word increments feed directly.
    if window.window_start.is_none() {
        for word in pending.words() {
            if window.includes_bucket(calendar, word.timestamp) {
                window.add_words(calendar, word.timestamp, 1);
            }
        }
    }
}

fn overlay_events(
    window: &mut WindowAggregates,
    pending: &PendingBuffers,
    calendar: &BucketCalendar,
) {
    let mut completions = Vec::new();
    let window_start = window.window_start;
    let now = window.now;

    for event in pending.events() {
        if !is_valid_key_code(event.key_code) {
            continue;
        }
        if event.word_role.is_keystroke() && window.contains(event.timestamp) {
            window.add_keystrokes(
                calendar,
                event.timestamp,
                event.key_code,
                event.device_class,
                1,
            );
        }

        // Continue the committed replay over pending events. Events before
        // the window only move word state forward.
        let (Some(start), Some(replay)) = (window_start, window.replay.as_mut()) else {
            continue;
        };
        if event.timestamp > now {
            continue;
        }
        if let Some(done) = replay.feed(event.timestamp, &event.app_bundle_id, event.word_role) {
            if done >= start {
                completions.push(done);
            }
        }
    }

    for done in completions {
        window.add_words(calendar, done, 1);
    }
}
