//! Shared helpers for integration tests.

#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use keytally::collector::types::{DeviceClass, KeyEvent, ModifierState};
use keytally::core::snapshot::StatsSnapshot;

/// Wall-clock origin of every synthetic typing run.
pub fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
}

/// Fixed "now" used as the engine clock and for snapshots.
pub fn clock() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 10, 30, 0).unwrap()
}

pub const SPACE: u16 = 49;

/// macOS virtual key code for a lowercase letter.
pub fn key_code(c: char) -> u16 {
    match c {
        'a' => 0,
        's' => 1,
        'd' => 2,
        'f' => 3,
        'h' => 4,
        'g' => 5,
        'z' => 6,
        'x' => 7,
        'c' => 8,
        'v' => 9,
        'b' => 11,
        'q' => 12,
        'w' => 13,
        'e' => 14,
        'r' => 15,
        'y' => 16,
        't' => 17,
        'o' => 31,
        'u' => 32,
        'i' => 34,
        'p' => 35,
        'l' => 37,
        'j' => 38,
        'k' => 40,
        'n' => 45,
        'm' => 46,
        ' ' => SPACE,
        other => panic!("no key code for {other:?}"),
    }
}

/// Produces key events for one application on a shared timeline.
pub struct Typist {
    pub app: Option<String>,
    pub app_name: Option<String>,
    pub device: DeviceClass,
    /// Seconds since `base()`, monotonic and wall clock alike
    pub mono: f64,
    pub step: f64,
}

impl Typist {
    pub fn new(app: &str) -> Self {
        Self {
            app: Some(app.to_string()),
            app_name: Some(app.rsplit('.').next().unwrap_or(app).to_string()),
            device: DeviceClass::BuiltIn,
            mono: 0.0,
            step: 0.25,
        }
    }

    pub fn at(mut self, mono: f64) -> Self {
        self.mono = mono;
        self
    }

    pub fn pause(&mut self, seconds: f64) {
        self.mono += seconds;
    }

    pub fn key(&mut self, key_code: u16, is_separator: bool) -> KeyEvent {
        let event = KeyEvent {
            timestamp: base() + Duration::milliseconds((self.mono * 1000.0).round() as i64),
            monotonic_time: self.mono,
            key_code,
            is_separator,
            is_text_producing: true,
            device_class: self.device,
            app_bundle_id: self.app.clone(),
            app_name: self.app_name.clone(),
            modifiers: ModifierState::default(),
        };
        self.mono += self.step;
        event
    }

    /// One event per character; spaces are separators.
    pub fn type_text(&mut self, text: &str) -> Vec<KeyEvent> {
        text.chars()
            .map(|c| self.key(key_code(c), c == ' '))
            .collect()
    }

    /// Command+V.
    pub fn paste(&mut self) -> KeyEvent {
        let mut event = self.key(key_code('v'), false);
        event.modifiers.command = true;
        event
    }
}

/// Integer views must match exactly; accumulated seconds to rounding.
pub fn assert_same_snapshot(a: &StatsSnapshot, b: &StatsSnapshot) {
    fn close(x: f64, y: f64) -> bool {
        (x - y).abs() < 1e-6
    }
    fn close_opt(x: Option<f64>, y: Option<f64>) -> bool {
        match (x, y) {
            (Some(x), Some(y)) => close(x, y),
            (None, None) => true,
            _ => false,
        }
    }

    let tf = a.timeframe;
    assert_eq!(a.timeframe, b.timeframe);
    assert_eq!(a.window_start, b.window_start, "{tf}: window_start");
    assert_eq!(a.total_keystrokes, b.total_keystrokes, "{tf}: keystrokes");
    assert_eq!(a.total_words, b.total_words, "{tf}: words");
    assert_eq!(a.typed_words, b.typed_words, "{tf}: typed words");
    assert_eq!(a.pasted_words_est, b.pasted_words_est, "{tf}: pasted words");
    assert_eq!(a.paste_events, b.paste_events, "{tf}: paste events");
    assert_eq!(a.edit_events, b.edit_events, "{tf}: edit events");
    assert!(close(a.active_seconds_flow, b.active_seconds_flow), "{tf}: flow");
    assert!(close(a.active_seconds_skill, b.active_seconds_skill), "{tf}: skill");
    assert!(close_opt(a.flow_wpm, b.flow_wpm), "{tf}: flow wpm");
    assert_eq!(a.device_breakdown, b.device_breakdown, "{tf}: devices");
    assert_eq!(a.top_keys, b.top_keys, "{tf}: top keys");
    assert_eq!(a.trend, b.trend, "{tf}: trend");
    assert_eq!(a.top_apps, b.top_apps, "{tf}: top apps");
    assert_eq!(a.speed_trend.len(), b.speed_trend.len(), "{tf}: speed trend");
    for (x, y) in a.speed_trend.iter().zip(&b.speed_trend) {
        assert_eq!(x.bucket_start, y.bucket_start);
        assert_eq!(x.typed_words, y.typed_words);
        assert!(close(x.active_seconds_flow, y.active_seconds_flow));
        assert!(close(x.active_seconds_skill, y.active_seconds_skill));
    }
}
