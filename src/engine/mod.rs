//! Ingestion and batching engine.
//!
//! The engine turns key events into word, session and active-time deltas,
//! buffers them, and hands them to an `AggregateStore` in batches. Every
//! public operation runs under one state lock, so per-app word and session
//! state is never observed half-updated and snapshots see a consistent
//! pending buffer.

mod compose;
pub mod pending;

use crate::collector::types::{DeviceClass, KeyEvent};
use crate::config::{Config, ConfigError};
use crate::core::buckets::{BucketCalendar, Granularity};
use crate::core::session::{IdleCaps, TypingSession};
use crate::core::suppression::SuppressionRules;
use crate::core::timeframe::Timeframe;
use crate::core::words::{KeyClass, WordBoundaryDetector, WordRole};
use crate::core::StatsSnapshot;
use crate::store::{AggregateStore, FlushReport, StoreError};
use crate::transparency::SharedDiagnostics;
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use pending::{PendingBuffers, RecordedKey, WordIncrement};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Engine behaviour knobs.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub flush_interval: Duration,
    pub flush_threshold: usize,
    /// Monotonic idle gap that ends a session
    pub session_timeout: Duration,
    pub idle_caps: IdleCaps,
    pub calendar: BucketCalendar,
    pub suppression: SuppressionRules,
    pub top_n: usize,
    /// Wall clock used for flush batches and snapshots
    pub clock: fn() -> DateTime<Utc>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(5),
            flush_threshold: 200,
            session_timeout: Duration::from_secs(60),
            idle_caps: IdleCaps::default(),
            calendar: BucketCalendar::utc(),
            suppression: SuppressionRules::none(),
            top_n: 10,
            clock: Utc::now,
        }
    }
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            flush_interval: config.flush_interval,
            flush_threshold: config.flush_threshold,
            session_timeout: config.session_timeout,
            idle_caps: config.idle_caps(),
            calendar: config.calendar()?,
            suppression: SuppressionRules::new(&config.suppression),
            top_n: config.top_n,
            clock: Utc::now,
        })
    }
}

/// Read-only operational counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EngineDiagnostics {
    pub total_ingested: u64,
    /// Key events handed to the store in successful flushes
    pub total_flushed: u64,
    pub flush_count: u64,
    pub failed_flushes: u64,
    pub last_flush_at: Option<DateTime<Utc>>,
    pub last_flush_error: Option<String>,
    pub pending_events: usize,
    pub open_sessions: usize,
    pub running: bool,
}

/// Word state for one application.
#[derive(Debug, Clone, Default)]
struct AppWordState {
    detector: WordBoundaryDetector,
    /// A paste chord occurred inside the word in progress
    paste_in_word: bool,
    last_monotonic_time: Option<f64>,
    last_event_time: Option<DateTime<Utc>>,
    device_class: DeviceClass,
    app_name: Option<String>,
}

struct EngineState {
    sessions: HashMap<String, TypingSession>,
    words: HashMap<String, AppWordState>,
    pending: PendingBuffers,
    /// Pending event count that triggers the next flush
    flush_mark: usize,
    counters: EngineDiagnostics,
}

impl EngineState {
    fn new(settings: &EngineSettings) -> Self {
        Self {
            sessions: HashMap::new(),
            words: HashMap::new(),
            pending: PendingBuffers::new(),
            flush_mark: settings.flush_threshold.max(1),
            counters: EngineDiagnostics::default(),
        }
    }

    fn ingest(&mut self, settings: &EngineSettings, event: KeyEvent) {
        self.counters.total_ingested += 1;

        let app = event.app_key().to_string();
        let suppressed = settings
            .suppression
            .matches(event.app_bundle_id.as_deref(), event.app_name.as_deref());
        let valid = event.has_valid_key_code();
        let class = KeyClass::classify(event.key_code, event.is_separator);
        let role = if suppressed || !valid {
            WordRole::Ignored
        } else {
            WordRole::from_class(class)
        };

        if suppressed {
            // Keep timers fresh so the gap before the next real keystroke
            // does not count as idle typing.
            if let Some(session) = self.sessions.get_mut(&app) {
                session.touch(&event);
                if event.is_text_producing {
                    session.mark_text_event(&event);
                }
            }
        } else {
            self.track(settings, &event, &app, class, valid);
        }

        self.pending.record_key(RecordedKey {
            timestamp: event.timestamp,
            key_code: event.key_code,
            device_class: event.device_class,
            app_bundle_id: app,
            word_role: role,
        });
    }

    fn track(
        &mut self,
        settings: &EngineSettings,
        event: &KeyEvent,
        app: &str,
        class: KeyClass,
        valid: bool,
    ) {
        let timeout = settings.session_timeout.as_secs_f64();

        if valid {
            let stale = self
                .words
                .get(app)
                .and_then(|w| w.last_monotonic_time)
                .map_or(false, |last| event.monotonic_time - last > timeout);
            if stale {
                self.flush_trailing_word(settings, app);
            }
        }

        let expired = self
            .sessions
            .get(app)
            .map_or(false, |s| s.is_expired_at(event.monotonic_time, timeout));
        if expired {
            self.end_session(settings, app);
        }
        if event.is_text_producing && !self.sessions.contains_key(app) {
            debug!(app, "typing session started");
            self.sessions
                .insert(app.to_string(), TypingSession::start(event));
        }
        if let Some(session) = self.sessions.get_mut(app) {
            session.touch(event);
        }

        let five_minutes = settings
            .calendar
            .align(event.timestamp, Granularity::FiveMinutes);

        if valid {
            let state = self.words.entry(app.to_string()).or_default();
            state.last_monotonic_time = Some(
                state
                    .last_monotonic_time
                    .map_or(event.monotonic_time, |m| m.max(event.monotonic_time)),
            );
            if state.last_event_time.map_or(true, |t| event.timestamp > t) {
                state.last_event_time = Some(event.timestamp);
            }
            state.device_class = event.device_class;
            if event.app_name.is_some() {
                state.app_name = event.app_name.clone();
            }

            if event.is_paste_chord() {
                state.paste_in_word = true;
                self.pending.add_paste(five_minutes);
                if let Some(session) = self.sessions.get_mut(app) {
                    session.paste_events += 1;
                }
            }
            if class == KeyClass::Edit {
                self.pending.add_edit(five_minutes);
                if let Some(session) = self.sessions.get_mut(app) {
                    session.edit_events += 1;
                }
            }

            if state.detector.process(class) {
                let pasted = std::mem::take(&mut state.paste_in_word);
                let word = WordIncrement {
                    timestamp: event.timestamp,
                    device_class: event.device_class,
                    app_bundle_id: app.to_string(),
                    app_name: state.app_name.clone(),
                };
                self.commit_word(settings, word, pasted);
            } else if class == KeyClass::Separator {
                state.paste_in_word = false;
            }
        }

        if event.is_text_producing {
            if let Some(session) = self.sessions.get_mut(app) {
                if let Some(interval) = session.accrue(event, settings.idle_caps) {
                    for (bucket, flow, skill) in
                        interval.apportion(&settings.calendar, Granularity::FiveMinutes)
                    {
                        self.pending.add_active(bucket, flow, skill);
                    }
                }
            }
        }
    }

    fn commit_word(&mut self, settings: &EngineSettings, word: WordIncrement, pasted: bool) {
        if let Some(session) = self.sessions.get_mut(&word.app_bundle_id) {
            if pasted {
                session.pasted_words_est += 1;
            } else {
                session.typed_words += 1;
            }
        }
        let bucket = settings
            .calendar
            .align(word.timestamp, Granularity::FiveMinutes);
        self.pending.record_word(word, bucket, pasted);
    }

    /// Count the word in progress for `app`, stamped at its last key.
    fn flush_trailing_word(&mut self, settings: &EngineSettings, app: &str) {
        let Some(state) = self.words.get_mut(app) else {
            return;
        };
        let pasted = std::mem::take(&mut state.paste_in_word);
        if !state.detector.flush_last_word() {
            return;
        }
        let Some(timestamp) = state.last_event_time else {
            return;
        };
        let word = WordIncrement {
            timestamp,
            device_class: state.device_class,
            app_bundle_id: app.to_string(),
            app_name: state.app_name.clone(),
        };
        // Replay over the raw log closes the word at the same point.
        self.pending
            .record_key(RecordedKey::session_break(timestamp, state.device_class, app));
        self.commit_word(settings, word, pasted);
    }

    fn end_session(&mut self, settings: &EngineSettings, app: &str) {
        self.flush_trailing_word(settings, app);
        if let Some(session) = self.sessions.remove(app) {
            debug!(
                app,
                typed_words = session.typed_words,
                pasted_words = session.pasted_words_est,
                active_flow = session.active_seconds_flow,
                "typing session ended"
            );
        }
    }

    fn end_all_sessions(&mut self, settings: &EngineSettings) {
        let apps: Vec<String> = self
            .sessions
            .keys()
            .chain(self.words.keys())
            .cloned()
            .collect();
        for app in apps {
            self.end_session(settings, &app);
        }
    }

    fn flush(
        &mut self,
        settings: &EngineSettings,
        store: &dyn AggregateStore,
        diagnostics: &SharedDiagnostics,
    ) -> Result<FlushReport, StoreError> {
        if self.pending.is_empty() {
            return Ok(FlushReport::default());
        }

        let now = (settings.clock)();
        let batch = self.pending.take_batch(now);
        let keystrokes = batch
            .events
            .iter()
            .filter(|e| e.word_role.is_keystroke())
            .count();
        match store.flush(&batch) {
            Ok(report) => {
                self.counters.total_flushed += keystrokes as u64;
                self.counters.flush_count += 1;
                self.counters.last_flush_at = Some(now);
                self.counters.last_flush_error = None;
                self.flush_mark = settings.flush_threshold.max(1);
                diagnostics.record_flush(report.events_written, report.words_written, now);
                debug!(
                    events = keystrokes,
                    words = batch.words.len(),
                    "pending aggregates flushed"
                );
                Ok(report)
            }
            Err(err) => {
                self.pending.restore(batch);
                self.counters.failed_flushes += 1;
                self.counters.last_flush_error = Some(err.to_string());
                // Retry after another threshold's worth of events, not on
                // every keystroke while the store is down.
                self.flush_mark = self.pending.event_count() + settings.flush_threshold.max(1);
                diagnostics.record_flush_failure(&err.to_string(), now);
                warn!(
                    error = %err,
                    pending = self.pending.event_count(),
                    "flush failed; pending data retained"
                );
                Err(err)
            }
        }
    }

    fn clear(&mut self, settings: &EngineSettings) {
        self.sessions.clear();
        self.words.clear();
        self.pending.clear();
        self.flush_mark = settings.flush_threshold.max(1);
    }
}

struct FlushTimer {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

struct EngineInner {
    settings: EngineSettings,
    store: Arc<dyn AggregateStore>,
    diagnostics: SharedDiagnostics,
    state: Mutex<EngineState>,
    timer: Mutex<Option<FlushTimer>>,
}

impl EngineInner {
    fn lock_state(&self) -> MutexGuard<'_, EngineState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_timer(&self) -> MutexGuard<'_, Option<FlushTimer>> {
        self.timer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn flush(&self) -> Result<FlushReport, StoreError> {
        let mut state = self.lock_state();
        state.flush(&self.settings, self.store.as_ref(), &self.diagnostics)
    }
}

/// Handle to the ingestion engine. Clones share the same engine.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    pub fn new(
        settings: EngineSettings,
        store: Arc<dyn AggregateStore>,
        diagnostics: SharedDiagnostics,
    ) -> Self {
        let state = EngineState::new(&settings);
        Self {
            inner: Arc::new(EngineInner {
                settings,
                store,
                diagnostics,
                state: Mutex::new(state),
                timer: Mutex::new(None),
            }),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.inner.settings
    }

    /// Start the periodic flush timer. Calling it again while running is a no-op.
    pub fn start(&self) -> std::io::Result<()> {
        let mut timer = self.inner.lock_timer();
        if timer.is_some() {
            return Ok(());
        }

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let weak: Weak<EngineInner> = Arc::downgrade(&self.inner);
        let interval = self.inner.settings.flush_interval;

        let handle = thread::Builder::new()
            .name("keytally-flush".into())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        let Some(inner) = weak.upgrade() else {
                            break;
                        };
                        // Failures are recorded in diagnostics and retried.
                        let _ = inner.flush();
                    }
                    _ => break,
                }
            })?;

        *timer = Some(FlushTimer {
            stop: stop_tx,
            handle,
        });
        self.inner.lock_state().counters.running = true;
        info!(interval_ms = interval.as_millis() as u64, "engine started");
        Ok(())
    }

    /// Stop the timer, close every session and run a final flush.
    pub fn stop(&self) -> Result<FlushReport, StoreError> {
        // The timer thread takes the state lock, so join it first.
        let timer = self.inner.lock_timer().take();
        if let Some(timer) = timer {
            let _ = timer.stop.send(());
            if timer.handle.join().is_err() {
                warn!("flush timer thread panicked");
            }
        }

        let inner = &self.inner;
        let mut state = inner.lock_state();
        state.end_all_sessions(&inner.settings);
        let result = state.flush(&inner.settings, inner.store.as_ref(), &inner.diagnostics);
        state.counters.running = false;
        info!(
            ingested = state.counters.total_ingested,
            flushed = state.counters.total_flushed,
            "engine stopped"
        );
        result
    }

    /// Accept one event. Never fails; flush problems are recorded and retried.
    pub fn ingest(&self, event: KeyEvent) {
        let inner = &self.inner;
        let mut state = inner.lock_state();
        state.ingest(&inner.settings, event);
        inner.diagnostics.record_ingested(1);

        if state.pending.event_count() >= state.flush_mark {
            let _ = state.flush(&inner.settings, inner.store.as_ref(), &inner.diagnostics);
        }
    }

    /// Flush pending data now.
    pub fn flush(&self) -> Result<FlushReport, StoreError> {
        self.inner.flush()
    }

    /// Statistics for `timeframe` at the engine clock's current time.
    pub fn snapshot(&self, timeframe: Timeframe) -> Result<StatsSnapshot, StoreError> {
        self.snapshot_at(timeframe, (self.inner.settings.clock)())
    }

    /// Committed data merged with pending deltas, as seen at `now`.
    pub fn snapshot_at(
        &self,
        timeframe: Timeframe,
        now: DateTime<Utc>,
    ) -> Result<StatsSnapshot, StoreError> {
        let inner = &self.inner;
        let state = inner.lock_state();
        let mut window = inner.store.snapshot(timeframe, now)?;
        compose::overlay(&mut window, &state.pending, &inner.settings.calendar);
        Ok(window.into_snapshot(&inner.settings.calendar, inner.settings.top_n))
    }

    /// Drop pending buffers and per-app state. The store is untouched.
    pub fn reset_in_memory_state(&self) {
        let inner = &self.inner;
        inner.lock_state().clear(&inner.settings);
        info!("in-memory engine state cleared");
    }

    /// Wipe persisted aggregates and in-memory state together.
    pub fn reset_all_data(&self) -> Result<(), StoreError> {
        let inner = &self.inner;
        let mut state = inner.lock_state();
        inner.store.reset_all_data()?;
        state.clear(&inner.settings);
        Ok(())
    }

    pub fn diagnostics(&self) -> EngineDiagnostics {
        let state = self.inner.lock_state();
        EngineDiagnostics {
            pending_events: state.pending.event_count(),
            open_sessions: state.sessions.len(),
            ..state.counters.clone()
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock_timer().is_some()
    }
}
