//! Word boundary detection.
//!
//! Words are inferred purely from key classes: a run of character keys
//! followed by a separator is one word. The characters themselves are never
//! seen. The same classification drives both the live detector and the
//! replay used to count words over stored events, so the two cannot drift.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const MODIFIER_KEYS: [u16; 10] = [54, 55, 56, 57, 58, 59, 60, 61, 62, 63];

const NAVIGATION_KEYS: [u16; 25] = [
    53, // escape
    96, 97, 98, 99, 100, 101, 103, 105, 106, 107, 109, 111, 113, 118, 120, 122, // F-keys
    115, 116, 119, 121, // home, page up, end, page down
    123, 124, 125, 126, // arrows
];

const EDIT_KEYS: [u16; 2] = [51, 117];

/// Coarse role of a key in word formation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyClass {
    Separator,
    Modifier,
    Navigation,
    Edit,
    Character,
}

impl KeyClass {
    /// Classify a key. The provider's separator flag takes precedence.
    pub fn classify(key_code: u16, is_separator: bool) -> Self {
        if is_separator {
            KeyClass::Separator
        } else if MODIFIER_KEYS.contains(&key_code) {
            KeyClass::Modifier
        } else if NAVIGATION_KEYS.contains(&key_code) {
            KeyClass::Navigation
        } else if EDIT_KEYS.contains(&key_code) {
            KeyClass::Edit
        } else {
            KeyClass::Character
        }
    }

    /// Keys that contribute characters to the word in progress. Deletes keep
    /// the word open.
    pub fn builds_word(&self) -> bool {
        matches!(self, KeyClass::Character | KeyClass::Edit)
    }
}

/// Persisted form of a key's effect on word state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WordRole {
    /// Excluded from word counting (suppressed source or invalid key).
    Ignored,
    Separator,
    WordChar,
    /// Modifier or navigation: advances timers only.
    Inert,
    /// Not a key. Written when the live engine closes a word because the
    /// session ended (timeout or stop); replay completes the word here.
    SessionBreak,
}

impl WordRole {
    pub fn from_class(class: KeyClass) -> Self {
        match class {
            KeyClass::Separator => WordRole::Separator,
            KeyClass::Character | KeyClass::Edit => WordRole::WordChar,
            KeyClass::Modifier | KeyClass::Navigation => WordRole::Inert,
        }
    }

    pub fn as_i64(&self) -> i64 {
        match self {
            WordRole::Ignored => 0,
            WordRole::Separator => 1,
            WordRole::WordChar => 2,
            WordRole::Inert => 3,
            WordRole::SessionBreak => 4,
        }
    }

    pub fn from_i64(value: i64) -> Self {
        match value {
            1 => WordRole::Separator,
            2 => WordRole::WordChar,
            3 => WordRole::Inert,
            4 => WordRole::SessionBreak,
            _ => WordRole::Ignored,
        }
    }

    /// Whether the row stands for a physical key press.
    pub fn is_keystroke(&self) -> bool {
        !matches!(self, WordRole::SessionBreak)
    }

    /// A class with the same effect on the detector.
    fn detector_class(&self) -> Option<KeyClass> {
        match self {
            WordRole::Ignored | WordRole::SessionBreak => None,
            WordRole::Separator => Some(KeyClass::Separator),
            WordRole::WordChar => Some(KeyClass::Character),
            WordRole::Inert => Some(KeyClass::Modifier),
        }
    }
}

/// Two-flag word state machine for one application.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WordBoundaryDetector {
    in_word: bool,
    word_has_chars: bool,
}

impl WordBoundaryDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the state; returns true iff this key completed a word.
    pub fn process(&mut self, class: KeyClass) -> bool {
        match class {
            KeyClass::Separator => {
                let completed = self.in_word && self.word_has_chars;
                self.in_word = false;
                self.word_has_chars = false;
                completed
            }
            KeyClass::Character | KeyClass::Edit => {
                self.in_word = true;
                self.word_has_chars = true;
                false
            }
            KeyClass::Modifier | KeyClass::Navigation => false,
        }
    }

    /// Close the word in progress, returning true if it should be counted.
    /// The detector is left in its initial state.
    pub fn flush_last_word(&mut self) -> bool {
        let pending = self.is_mid_word();
        self.reset();
        pending
    }

    pub fn reset(&mut self) {
        self.in_word = false;
        self.word_has_chars = false;
    }

    pub fn is_mid_word(&self) -> bool {
        self.in_word && self.word_has_chars
    }
}

/// Count separator-completed words in a sequence of key classes.
pub fn count_words<I>(classes: I) -> u64
where
    I: IntoIterator<Item = KeyClass>,
{
    let mut detector = WordBoundaryDetector::new();
    classes
        .into_iter()
        .filter(|class| detector.process(*class))
        .count() as u64
}

/// Per-application replay of stored key events.
///
/// Follows the live engine exactly: separators complete words through the
/// same detector, and session-break rows complete the word in progress the
/// way the engine did when the session ended.
#[derive(Debug, Clone, Default)]
pub struct WordReplay {
    detectors: HashMap<String, WordBoundaryDetector>,
}

impl WordReplay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one event; returns the completion time of a word finished by it.
    pub fn feed(
        &mut self,
        timestamp: DateTime<Utc>,
        app_key: &str,
        role: WordRole,
    ) -> Option<DateTime<Utc>> {
        let completed = match role {
            WordRole::Ignored => return None,
            WordRole::SessionBreak => self
                .detectors
                .get_mut(app_key)
                .map_or(false, |detector| detector.flush_last_word()),
            _ => {
                let class = role.detector_class()?;
                self.detectors
                    .entry(app_key.to_string())
                    .or_default()
                    .process(class)
            }
        };
        completed.then_some(timestamp)
    }

    /// Restore an application's state from the last state-setting event
    /// before a window. Nothing is counted.
    pub fn seed(&mut self, app_key: &str, role: WordRole) {
        let detector = self.detectors.entry(app_key.to_string()).or_default();
        detector.reset();
        if role == WordRole::WordChar {
            detector.process(KeyClass::Character);
        }
    }

    /// Whether `app_key` is currently inside a word.
    pub fn is_mid_word(&self, app_key: &str) -> bool {
        self.detectors
            .get(app_key)
            .map(|d| d.is_mid_word())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: u16 = 0;
    const SPACE: u16 = 49;
    const LEFT: u16 = 123;
    const SHIFT: u16 = 56;
    const DELETE: u16 = 51;

    fn class(code: u16) -> KeyClass {
        KeyClass::classify(code, code == SPACE)
    }

    fn word(len: usize) -> Vec<KeyClass> {
        vec![class(A); len]
    }

    #[test]
    fn test_classify() {
        assert_eq!(class(SPACE), KeyClass::Separator);
        assert_eq!(class(SHIFT), KeyClass::Modifier);
        assert_eq!(class(LEFT), KeyClass::Navigation);
        assert_eq!(class(DELETE), KeyClass::Edit);
        assert_eq!(class(A), KeyClass::Character);
        // The provider's separator flag wins.
        assert_eq!(KeyClass::classify(LEFT, true), KeyClass::Separator);
    }

    #[test]
    fn test_repeated_separators_count_once() {
        let mut seq = word(5);
        seq.extend([class(SPACE), class(SPACE), class(SPACE)]);
        seq.extend(word(5));
        seq.push(class(SPACE));
        assert_eq!(count_words(seq), 2);
    }

    #[test]
    fn test_navigation_between_separators_is_not_a_word() {
        let seq = vec![class(SPACE), class(LEFT), class(LEFT), class(SHIFT), class(SPACE)];
        assert_eq!(count_words(seq), 0);
    }

    #[test]
    fn test_delete_keeps_word_open() {
        let mut detector = WordBoundaryDetector::new();
        detector.process(class(A));
        detector.process(class(DELETE));
        assert!(detector.is_mid_word());
        assert!(detector.process(class(SPACE)));
    }

    #[test]
    fn test_flush_last_word() {
        let mut detector = WordBoundaryDetector::new();
        for c in word(3) {
            detector.process(c);
        }
        assert!(detector.flush_last_word());
        assert!(!detector.flush_last_word());
        assert!(!detector.process(class(SPACE)));
    }

    #[test]
    fn test_modifier_does_not_break_word() {
        let seq = vec![class(A), class(SHIFT), class(A), class(SPACE)];
        assert_eq!(count_words(seq), 1);
    }

    #[test]
    fn test_role_round_trip() {
        for role in [
            WordRole::Ignored,
            WordRole::Separator,
            WordRole::WordChar,
            WordRole::Inert,
            WordRole::SessionBreak,
        ] {
            assert_eq!(WordRole::from_i64(role.as_i64()), role);
        }
        assert_eq!(WordRole::from_class(KeyClass::Edit), WordRole::WordChar);
        assert_eq!(WordRole::from_class(KeyClass::Navigation), WordRole::Inert);
    }

    #[test]
    fn test_replay_is_per_app() {
        let t0 = Utc::now();
        let mut replay = WordReplay::new();
        replay.feed(t0, "editor", WordRole::WordChar);
        // A separator in another app does not close the editor's word.
        assert!(replay.feed(t0, "chat", WordRole::Separator).is_none());
        assert!(replay.is_mid_word("editor"));
        assert_eq!(
            replay.feed(t0 + chrono::Duration::seconds(1), "editor", WordRole::Separator),
            Some(t0 + chrono::Duration::seconds(1))
        );
    }

    #[test]
    fn test_replay_session_break_completes_word() {
        let t0 = Utc::now();
        let mut replay = WordReplay::new();
        replay.feed(t0, "editor", WordRole::WordChar);
        assert_eq!(replay.feed(t0, "editor", WordRole::SessionBreak), Some(t0));
        assert!(!replay.is_mid_word("editor"));
        // Nothing in progress: a break counts nothing.
        assert!(replay.feed(t0, "editor", WordRole::SessionBreak).is_none());
        assert!(replay.feed(t0, "chat", WordRole::SessionBreak).is_none());
    }

    #[test]
    fn test_replay_ignores_wall_clock_gaps() {
        let t0 = Utc::now();
        let mut replay = WordReplay::new();
        replay.feed(t0, "editor", WordRole::WordChar);
        let later = t0 + chrono::Duration::minutes(10);
        assert!(replay.feed(later, "editor", WordRole::WordChar).is_none());
        assert_eq!(replay.feed(later, "editor", WordRole::Separator), Some(later));
    }

    #[test]
    fn test_replay_seed_restores_state() {
        let t0 = Utc::now();
        let mut replay = WordReplay::new();
        replay.seed("editor", WordRole::WordChar);
        assert!(replay.is_mid_word("editor"));
        assert_eq!(replay.feed(t0, "editor", WordRole::Separator), Some(t0));

        replay.seed("chat", WordRole::SessionBreak);
        assert!(!replay.is_mid_word("chat"));
        assert!(replay.feed(t0, "chat", WordRole::Separator).is_none());
    }

    #[test]
    fn test_replay_ignores_ignored_roles() {
        let t0 = Utc::now();
        let mut replay = WordReplay::new();
        replay.feed(t0, "dictation", WordRole::Ignored);
        assert!(replay.feed(t0, "dictation", WordRole::Ignored).is_none());
        assert!(!replay.is_mid_word("dictation"));
    }
}
