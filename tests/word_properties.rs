//! Property tests for word counting.

mod common;

use common::{clock, Typist};
use keytally::core::words::count_words;
use keytally::core::{KeyClass, Timeframe, WordBoundaryDetector};
use keytally::engine::{Engine, EngineSettings};
use keytally::store::{Store, StoreSettings};
use keytally::transparency::NoopDiagnostics;
use proptest::prelude::*;
use std::sync::Arc;

/// (key code, separator flag): letter, space, delete, arrow, shift.
fn any_key() -> impl Strategy<Value = (u16, bool)> {
    prop_oneof![
        4 => Just((0u16, false)),
        2 => Just((49u16, true)),
        1 => Just((51u16, false)),
        1 => Just((126u16, false)),
        1 => Just((56u16, false)),
    ]
}

fn classes(keys: &[(u16, bool)]) -> Vec<KeyClass> {
    keys.iter()
        .map(|&(code, sep)| KeyClass::classify(code, sep))
        .collect()
}

fn engine() -> Engine {
    let store = Store::open_in_memory(StoreSettings::default()).unwrap();
    let settings = EngineSettings {
        clock,
        ..EngineSettings::default()
    };
    Engine::new(settings, Arc::new(store), Arc::new(NoopDiagnostics))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn live_and_replayed_counts_agree(keys in prop::collection::vec(any_key(), 0..60)) {
        let classes = classes(&keys);
        let expected = count_words(classes.iter().copied());
        let mut detector = WordBoundaryDetector::new();
        for class in &classes {
            detector.process(*class);
        }
        let trailing = u64::from(detector.is_mid_word());

        let engine = engine();
        let mut typist = Typist::new("com.example.editor");
        for &(code, sep) in &keys {
            engine.ingest(typist.key(code, sep));
        }

        let replayed = engine.snapshot(Timeframe::LastHour).unwrap();
        prop_assert_eq!(replayed.total_words, expected);

        engine.stop().unwrap();
        for timeframe in [Timeframe::LastHour, Timeframe::AllTime] {
            let committed = engine.snapshot(timeframe).unwrap();
            prop_assert_eq!(committed.total_words, expected + trailing);
            prop_assert_eq!(committed.typed_words, expected + trailing);
        }
    }

    #[test]
    fn words_never_exceed_separators(keys in prop::collection::vec(any_key(), 0..200)) {
        let classes = classes(&keys);
        let separators = classes.iter().filter(|c| **c == KeyClass::Separator).count() as u64;
        prop_assert!(count_words(classes) <= separators);
    }
}
