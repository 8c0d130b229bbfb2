//! Privacy-preserving key event types.
//!
//! A `KeyEvent` describes *that* a key was pressed and how the capture
//! provider classified it. It never carries the character produced.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Highest valid key code (macOS virtual key code space).
pub const MAX_KEY_CODE: u16 = 127;

/// Key code of the `V` key, used to recognise paste chords.
pub const KEY_V: u16 = 9;

/// Application key used when the capture provider could not resolve one.
pub const UNKNOWN_APP: &str = "unknown";

/// Keyboard hardware class reported by the capture provider.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    BuiltIn,
    External,
    #[default]
    Unknown,
}

impl DeviceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceClass::BuiltIn => "built_in",
            DeviceClass::External => "external",
            DeviceClass::Unknown => "unknown",
        }
    }

    /// Parse the stored representation. Unrecognised values map to `Unknown`.
    pub fn from_str_lossy(value: &str) -> Self {
        match value {
            "built_in" => DeviceClass::BuiltIn,
            "external" => DeviceClass::External,
            _ => DeviceClass::Unknown,
        }
    }
}

/// Modifier keys held while the event fired.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModifierState {
    pub command: bool,
    pub control: bool,
    pub option: bool,
    pub shift: bool,
}

/// A single physical key activation.
///
/// Privacy guarantee: only the key position and its classification are kept,
/// never the produced text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyEvent {
    /// Wall-clock time of the key press
    pub timestamp: DateTime<Utc>,
    /// Monotonic seconds; pauses across system sleep
    pub monotonic_time: f64,
    /// Virtual key code
    pub key_code: u16,
    /// Whether the key ends a word (space, return, tab, punctuation)
    pub is_separator: bool,
    /// Whether the key produces text in the focused application
    pub is_text_producing: bool,
    #[serde(default)]
    pub device_class: DeviceClass,
    #[serde(default)]
    pub app_bundle_id: Option<String>,
    #[serde(default)]
    pub app_name: Option<String>,
    #[serde(default)]
    pub modifiers: ModifierState,
}

impl KeyEvent {
    /// Key used to partition per-application state.
    pub fn app_key(&self) -> &str {
        self.app_bundle_id.as_deref().unwrap_or(UNKNOWN_APP)
    }

    /// Command/Control + V.
    pub fn is_paste_chord(&self) -> bool {
        self.key_code == KEY_V && (self.modifiers.command || self.modifiers.control)
    }

    pub fn has_valid_key_code(&self) -> bool {
        is_valid_key_code(self.key_code)
    }
}

pub fn is_valid_key_code(key_code: u16) -> bool {
    key_code <= MAX_KEY_CODE
}
