//! Integration tests for the ingestion engine.

mod common;

use common::{assert_same_snapshot, clock, Typist};
use keytally::collector::types::KeyEvent;
use keytally::config::SuppressionConfig;
use keytally::core::suppression::SuppressionRules;
use keytally::core::{Timeframe, WindowAggregates};
use keytally::engine::pending::FlushBatch;
use keytally::engine::{Engine, EngineSettings};
use keytally::store::{AggregateStore, FlushReport, Store, StoreError, StoreSettings};
use keytally::transparency::{NoopDiagnostics, TransparencyLog};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Records batches instead of persisting them; can be told to fail.
#[derive(Default)]
struct RecordingStore {
    batches: Mutex<Vec<FlushBatch>>,
    failing: AtomicBool,
}

impl RecordingStore {
    fn batches(&self) -> Vec<FlushBatch> {
        self.batches.lock().unwrap().clone()
    }
}

impl AggregateStore for RecordingStore {
    fn flush(&self, batch: &FlushBatch) -> Result<FlushReport, StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Step("disk I/O error".to_string()));
        }
        self.batches.lock().unwrap().push(batch.clone());
        Ok(FlushReport {
            events_written: batch.events.len() as u64,
            events_rejected: 0,
            words_written: batch.words.len() as u64,
        })
    }

    fn snapshot(
        &self,
        timeframe: Timeframe,
        now: DateTime<Utc>,
    ) -> Result<WindowAggregates, StoreError> {
        Ok(WindowAggregates::new(timeframe, now))
    }

    fn reset_all_data(&self) -> Result<(), StoreError> {
        self.batches.lock().unwrap().clear();
        Ok(())
    }
}

fn settings() -> EngineSettings {
    EngineSettings {
        clock,
        ..EngineSettings::default()
    }
}

fn sqlite_engine(settings: EngineSettings) -> Engine {
    let store = Store::open_in_memory(StoreSettings::default()).unwrap();
    Engine::new(settings, Arc::new(store), Arc::new(NoopDiagnostics))
}

fn ingest_all(engine: &Engine, events: Vec<KeyEvent>) {
    for event in events {
        engine.ingest(event);
    }
}

#[test]
fn test_threshold_triggers_exactly_one_flush() {
    let store = Arc::new(RecordingStore::default());
    let engine = Engine::new(settings(), store.clone(), Arc::new(NoopDiagnostics));
    let mut typist = Typist::new("com.example.editor");

    for _ in 0..199 {
        engine.ingest(typist.key(common::key_code('a'), false));
    }
    assert!(store.batches().is_empty());

    engine.ingest(typist.key(common::key_code('a'), false));
    let batches = store.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].events.len(), 200);
    assert_eq!(engine.diagnostics().pending_events, 0);
    assert_eq!(engine.diagnostics().total_flushed, 200);
}

#[test]
fn test_active_time_caps() {
    let engine = sqlite_engine(settings());
    let mut typist = Typist::new("com.example.editor");
    typist.step = 5.0;
    ingest_all(&engine, typist.type_text("ab"));

    let snapshot = engine.snapshot(Timeframe::LastHour).unwrap();
    assert_eq!(snapshot.active_seconds_flow, 5.0);
    assert_eq!(snapshot.active_seconds_skill, 2.0);

    engine.flush().unwrap();
    let snapshot = engine.snapshot(Timeframe::LastHour).unwrap();
    assert_eq!(snapshot.active_seconds_flow, 5.0);
    assert_eq!(snapshot.active_seconds_skill, 2.0);
}

#[test]
fn test_session_timeout_splits_sessions_and_flushes_words() {
    let store = Arc::new(RecordingStore::default());
    let engine = Engine::new(settings(), store.clone(), Arc::new(NoopDiagnostics));
    let mut typist = Typist::new("com.example.editor");
    typist.step = 1.0;

    ingest_all(&engine, typist.type_text("ab"));
    typist.pause(60.0);
    ingest_all(&engine, typist.type_text("cd"));
    assert_eq!(engine.diagnostics().open_sessions, 1);

    engine.stop().unwrap();
    let batches = store.batches();
    let words: usize = batches.iter().map(|b| b.words.len()).sum();
    assert_eq!(words, 2);

    // The first word is stamped at its own last key, not after the gap.
    let first = &batches[0].words[0];
    assert_eq!(first.timestamp, common::base() + chrono::Duration::seconds(1));

    let flow: f64 = batches
        .iter()
        .flat_map(|b| b.typing.iter())
        .map(|t| t.totals.active_seconds_flow)
        .sum();
    assert_eq!(flow, 2.0);
}

#[test]
fn test_repeated_separators_count_once() {
    let engine = sqlite_engine(settings());
    let mut typist = Typist::new("com.example.editor");
    ingest_all(&engine, typist.type_text("hello   world "));

    let snapshot = engine.snapshot(Timeframe::Last24Hours).unwrap();
    assert_eq!(snapshot.total_words, 2);
    assert_eq!(snapshot.typed_words, 2);
    assert_eq!(snapshot.total_keystrokes, 14);
}

#[test]
fn test_stop_counts_trailing_word() {
    let engine = sqlite_engine(settings());
    let mut typist = Typist::new("com.example.editor");
    ingest_all(&engine, typist.type_text("hello"));

    let before = engine.snapshot(Timeframe::AllTime).unwrap();
    assert_eq!(before.total_words, 0);

    engine.stop().unwrap();
    for timeframe in [Timeframe::LastHour, Timeframe::Last24Hours, Timeframe::AllTime] {
        let after = engine.snapshot(timeframe).unwrap();
        assert_eq!(after.total_words, 1, "{timeframe}");
        assert_eq!(after.typed_words, 1, "{timeframe}");
        assert_eq!(after.total_keystrokes, 5, "{timeframe}");
    }
    assert_eq!(engine.diagnostics().pending_events, 0);
    assert_eq!(engine.diagnostics().total_flushed, 5);
}

#[test]
fn test_timeout_word_counts_match_across_timeframes() {
    let engine = sqlite_engine(settings());
    let mut typist = Typist::new("com.example.editor");
    ingest_all(&engine, typist.type_text("one"));
    typist.pause(61.0);
    ingest_all(&engine, typist.type_text("two "));

    let pending = engine.snapshot(Timeframe::LastHour).unwrap();
    assert_eq!(pending.total_words, 2);
    assert_eq!(pending.typed_words, 2);

    engine.flush().unwrap();
    for timeframe in [Timeframe::LastHour, Timeframe::AllTime] {
        let committed = engine.snapshot(timeframe).unwrap();
        assert_eq!(committed.total_words, 2, "{timeframe}");
        assert_eq!(committed.total_keystrokes, 7, "{timeframe}");
    }
}

#[test]
fn test_wall_clock_jump_does_not_split_words() {
    // Machine asleep for ten minutes: wall time jumps, monotonic time does not.
    let engine = sqlite_engine(settings());
    let mut typist = Typist::new("com.example.editor");
    let mut events = typist.type_text("hel");
    let jump = chrono::Duration::minutes(10);
    events.extend(typist.type_text("lo ").into_iter().map(|mut event| {
        event.timestamp += jump;
        event
    }));
    ingest_all(&engine, events);

    let pending = engine.snapshot(Timeframe::LastHour).unwrap();
    assert_eq!(pending.total_words, 1);
    assert_eq!(pending.typed_words, 1);

    engine.stop().unwrap();
    let committed = engine.snapshot(Timeframe::LastHour).unwrap();
    assert_eq!(committed.total_words, 1);
    assert_eq!(committed.typed_words, 1);
}

#[test]
fn test_flush_timer_commits_pending_events() {
    let store = Arc::new(RecordingStore::default());
    let engine = Engine::new(
        EngineSettings {
            flush_interval: std::time::Duration::from_millis(50),
            ..settings()
        },
        store.clone(),
        Arc::new(NoopDiagnostics),
    );
    let mut typist = Typist::new("com.example.editor");

    ingest_all(&engine, typist.type_text("ab"));
    engine.start().unwrap();

    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    while store.batches().is_empty() && std::time::Instant::now() < deadline {
        std::thread::sleep(std::time::Duration::from_millis(20));
    }

    let batches = store.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].events.len(), 2);
    assert_eq!(engine.diagnostics().pending_events, 0);
    assert!(engine.is_running());

    engine.stop().unwrap();
    assert!(!engine.is_running());
}

#[test]
fn test_suppressed_app_counts_keystrokes_only() {
    let engine = sqlite_engine(EngineSettings {
        suppression: SuppressionRules::new(&SuppressionConfig {
            bundle_id_suffixes: vec![],
            bundle_id_fragments: vec!["wispr".to_string()],
            app_name_fragments: vec![],
        }),
        ..settings()
    });
    let mut typist = Typist::new("com.electron.WisprFlow");
    ingest_all(&engine, typist.type_text("hello world "));
    engine.stop().unwrap();

    for timeframe in [Timeframe::LastHour, Timeframe::AllTime] {
        let snapshot = engine.snapshot(timeframe).unwrap();
        assert_eq!(snapshot.total_keystrokes, 12);
        assert_eq!(snapshot.total_words, 0);
        assert_eq!(snapshot.typed_words, 0);
        assert_eq!(snapshot.active_seconds_flow, 0.0);
        assert!(snapshot.top_apps.is_empty());
    }
}

#[test]
fn test_paste_and_edit_tallies() {
    let engine = sqlite_engine(settings());
    let mut typist = Typist::new("com.example.editor");
    let mut events = vec![typist.paste()];
    events.extend(typist.type_text(" "));
    events.extend(typist.type_text("ab"));
    events.push(typist.key(51, false));
    events.extend(typist.type_text(" "));
    ingest_all(&engine, events);

    let snapshot = engine.snapshot(Timeframe::LastHour).unwrap();
    assert_eq!(snapshot.total_words, 2);
    assert_eq!(snapshot.typed_words, 1);
    assert_eq!(snapshot.pasted_words_est, 1);
    assert_eq!(snapshot.paste_events, 1);
    assert_eq!(snapshot.edit_events, 1);
}

fn mixed_timeline() -> Vec<KeyEvent> {
    let mut editor = Typist::new("com.example.editor");
    let mut events = editor.type_text("hello wor");
    editor.pause(90.0);
    events.extend(editor.type_text("ld again "));
    events.push(editor.paste());
    events.extend(editor.type_text(" tail"));

    let mut chat = Typist::new("com.example.chat").at(editor.mono + 3.0);
    chat.device = keytally::collector::types::DeviceClass::External;
    events.extend(chat.type_text("quick brown fox "));
    events.push(chat.key(51, false));
    events.push(chat.key(126, false));
    events.extend(chat.type_text("jumps"));

    let mut late = Typist::new("com.example.editor").at(chat.mono + 400.0);
    events.extend(late.type_text("later words here "));
    events
}

#[test]
fn test_snapshot_is_invariant_under_flush_timing() {
    let unflushed = sqlite_engine(EngineSettings {
        flush_threshold: 100_000,
        ..settings()
    });
    let chunked = sqlite_engine(EngineSettings {
        flush_threshold: 100_000,
        ..settings()
    });

    for (i, event) in mixed_timeline().into_iter().enumerate() {
        unflushed.ingest(event.clone());
        chunked.ingest(event);
        if i % 7 == 6 {
            chunked.flush().unwrap();
        }
    }

    for timeframe in Timeframe::ALL {
        let pending = unflushed.snapshot(timeframe).unwrap();
        let partial = chunked.snapshot(timeframe).unwrap();
        assert_same_snapshot(&pending, &partial);
    }

    unflushed.flush().unwrap();
    assert_eq!(unflushed.diagnostics().pending_events, 0);
    for timeframe in Timeframe::ALL {
        let committed = unflushed.snapshot(timeframe).unwrap();
        let partial = chunked.snapshot(timeframe).unwrap();
        assert_same_snapshot(&committed, &partial);
    }
}

#[test]
fn test_failed_flush_retains_pending_data() {
    let store = Arc::new(RecordingStore::default());
    let diagnostics = Arc::new(TransparencyLog::new());
    let engine = Engine::new(settings(), store.clone(), diagnostics.clone());
    let mut typist = Typist::new("com.example.editor");

    store.failing.store(true, Ordering::SeqCst);
    for _ in 0..200 {
        engine.ingest(typist.key(common::key_code('a'), false));
    }
    let state = engine.diagnostics();
    assert_eq!(state.pending_events, 200);
    assert_eq!(state.failed_flushes, 1);
    assert!(state.last_flush_error.unwrap().contains("disk I/O error"));
    assert_eq!(diagnostics.stats().failed_flushes, 1);

    // No retry on every keystroke while the store is down.
    engine.ingest(typist.key(common::key_code('a'), false));
    assert_eq!(engine.diagnostics().failed_flushes, 1);

    store.failing.store(false, Ordering::SeqCst);
    engine.flush().unwrap();
    let batches = store.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].events.len(), 201);

    let state = engine.diagnostics();
    assert_eq!(state.pending_events, 0);
    assert!(state.last_flush_error.is_none());
    assert_eq!(diagnostics.stats().keys_ingested, 201);
}

#[test]
fn test_invalid_key_codes_never_reach_views() {
    let engine = sqlite_engine(settings());
    let mut typist = Typist::new("com.example.editor");
    let mut events = typist.type_text("ab");
    events.push(typist.key(500, false));
    events.extend(typist.type_text(" "));
    ingest_all(&engine, events);

    let pending = engine.snapshot(Timeframe::LastHour).unwrap();
    assert_eq!(pending.total_keystrokes, 3);
    assert_eq!(pending.total_words, 1);

    engine.flush().unwrap();
    let committed = engine.snapshot(Timeframe::LastHour).unwrap();
    assert_same_snapshot(&pending, &committed);
}

#[test]
fn test_reset_all_data_clears_store_and_memory() {
    let engine = sqlite_engine(settings());
    let mut typist = Typist::new("com.example.editor");
    ingest_all(&engine, typist.type_text("one two "));
    engine.flush().unwrap();
    ingest_all(&engine, typist.type_text("three"));

    engine.reset_all_data().unwrap();
    let snapshot = engine.snapshot(Timeframe::AllTime).unwrap();
    assert_eq!(snapshot.total_keystrokes, 0);
    assert_eq!(snapshot.total_words, 0);

    engine.stop().unwrap();
    assert_eq!(engine.snapshot(Timeframe::AllTime).unwrap().total_words, 0);
}
