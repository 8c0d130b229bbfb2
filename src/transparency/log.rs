//! Privacy-preserving transparency log.
//!
//! Tracks how much the engine has processed and persisted, never what was
//! typed. The engine and store report into a `DiagnosticsSink`; the
//! `TransparencyLog` is the implementation the CLI persists and displays.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Receiver of operational counters.
pub trait DiagnosticsSink: Send + Sync {
    fn record_ingested(&self, count: u64);
    fn record_flush(&self, events: u64, words: u64, at: DateTime<Utc>);
    fn record_flush_failure(&self, error: &str, at: DateTime<Utc>);
    fn record_prune(&self, rows: u64, at: DateTime<Utc>);
}

/// Thread-safe shared diagnostics sink.
pub type SharedDiagnostics = Arc<dyn DiagnosticsSink>;

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDiagnostics;

impl DiagnosticsSink for NoopDiagnostics {
    fn record_ingested(&self, _count: u64) {}
    fn record_flush(&self, _events: u64, _words: u64, _at: DateTime<Utc>) {}
    fn record_flush_failure(&self, _error: &str, _at: DateTime<Utc>) {}
    fn record_prune(&self, _rows: u64, _at: DateTime<Utc>) {}
}

/// Transparency statistics for the current session.
#[derive(Debug)]
pub struct TransparencyLog {
    /// Key events accepted by the engine
    keys_ingested: AtomicU64,
    /// Key events committed to the store
    keys_persisted: AtomicU64,
    /// Completed words committed to the store
    words_persisted: AtomicU64,
    flushes: AtomicU64,
    failed_flushes: AtomicU64,
    rows_pruned: AtomicU64,
    last_flush: Mutex<Option<DateTime<Utc>>>,
    last_error: Mutex<Option<String>>,
    /// Session start time
    session_start: DateTime<Utc>,
    /// Path for persisting stats
    persist_path: Option<PathBuf>,
}

impl TransparencyLog {
    /// Create a new transparency log.
    pub fn new() -> Self {
        Self {
            keys_ingested: AtomicU64::new(0),
            keys_persisted: AtomicU64::new(0),
            words_persisted: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
            failed_flushes: AtomicU64::new(0),
            rows_pruned: AtomicU64::new(0),
            last_flush: Mutex::new(None),
            last_error: Mutex::new(None),
            session_start: Utc::now(),
            persist_path: None,
        }
    }

    /// Create a transparency log with persistence.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut log = Self::new();
        log.persist_path = Some(path);

        // Try to load existing stats
        if let Err(e) = log.load() {
            warn!("Could not load previous transparency stats: {e}");
        }

        log
    }

    /// Get the current statistics.
    pub fn stats(&self) -> TransparencyStats {
        TransparencyStats {
            keys_ingested: self.keys_ingested.load(Ordering::Relaxed),
            keys_persisted: self.keys_persisted.load(Ordering::Relaxed),
            words_persisted: self.words_persisted.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            failed_flushes: self.failed_flushes.load(Ordering::Relaxed),
            rows_pruned: self.rows_pruned.load(Ordering::Relaxed),
            last_flush: *lock(&self.last_flush),
            last_error: lock(&self.last_error).clone(),
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        let last_flush = stats
            .last_flush
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());
        format!(
            "Collection Statistics:\n\
             - Key events ingested: {}\n\
             - Key events persisted: {}\n\
             - Words persisted: {}\n\
             - Flushes: {} ({} failed)\n\
             - Rows pruned by retention: {}\n\
             - Last flush: {}\n\
             - Session duration: {} seconds\n\
             \n\
             Privacy Guarantee:\n\
             - No key content captured\n\
             - No typed text reconstructed or stored\n\
             - Only key codes, counts and timing aggregates retained",
            stats.keys_ingested,
            stats.keys_persisted,
            stats.words_persisted,
            stats.flushes,
            stats.failed_flushes,
            stats.rows_pruned,
            last_flush,
            stats.session_duration_secs
        )
    }

    /// Save stats to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            // Ensure parent directory exists
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let stats = self.stats();
            let persisted = PersistedStats {
                keys_ingested: stats.keys_ingested,
                keys_persisted: stats.keys_persisted,
                words_persisted: stats.words_persisted,
                flushes: stats.flushes,
                failed_flushes: stats.failed_flushes,
                rows_pruned: stats.rows_pruned,
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;

            std::fs::write(path, json)?;
        }
        Ok(())
    }

    /// Load stats from disk.
    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;

                self.keys_ingested
                    .store(persisted.keys_ingested, Ordering::Relaxed);
                self.keys_persisted
                    .store(persisted.keys_persisted, Ordering::Relaxed);
                self.words_persisted
                    .store(persisted.words_persisted, Ordering::Relaxed);
                self.flushes.store(persisted.flushes, Ordering::Relaxed);
                self.failed_flushes
                    .store(persisted.failed_flushes, Ordering::Relaxed);
                self.rows_pruned
                    .store(persisted.rows_pruned, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    /// Reset all counters.
    pub fn reset(&self) {
        self.keys_ingested.store(0, Ordering::Relaxed);
        self.keys_persisted.store(0, Ordering::Relaxed);
        self.words_persisted.store(0, Ordering::Relaxed);
        self.flushes.store(0, Ordering::Relaxed);
        self.failed_flushes.store(0, Ordering::Relaxed);
        self.rows_pruned.store(0, Ordering::Relaxed);
        *lock(&self.last_flush) = None;
        *lock(&self.last_error) = None;
    }
}

impl Default for TransparencyLog {
    fn default() -> Self {
        Self::new()
    }
}

impl DiagnosticsSink for TransparencyLog {
    fn record_ingested(&self, count: u64) {
        self.keys_ingested.fetch_add(count, Ordering::Relaxed);
    }

    fn record_flush(&self, events: u64, words: u64, at: DateTime<Utc>) {
        self.keys_persisted.fetch_add(events, Ordering::Relaxed);
        self.words_persisted.fetch_add(words, Ordering::Relaxed);
        self.flushes.fetch_add(1, Ordering::Relaxed);
        *lock(&self.last_flush) = Some(at);
    }

    fn record_flush_failure(&self, error: &str, _at: DateTime<Utc>) {
        self.failed_flushes.fetch_add(1, Ordering::Relaxed);
        *lock(&self.last_error) = Some(error.to_string());
    }

    fn record_prune(&self, rows: u64, _at: DateTime<Utc>) {
        self.rows_pruned.fetch_add(rows, Ordering::Relaxed);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Snapshot of transparency statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransparencyStats {
    pub keys_ingested: u64,
    pub keys_persisted: u64,
    pub words_persisted: u64,
    pub flushes: u64,
    pub failed_flushes: u64,
    pub rows_pruned: u64,
    pub last_flush: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

/// Stats format for persistence.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedStats {
    keys_ingested: u64,
    keys_persisted: u64,
    words_persisted: u64,
    flushes: u64,
    failed_flushes: u64,
    #[serde(default)]
    rows_pruned: u64,
    last_updated: DateTime<Utc>,
}

/// Thread-safe shared transparency log.
pub type SharedTransparencyLog = Arc<TransparencyLog>;

/// Create a new shared transparency log.
pub fn create_shared_log() -> SharedTransparencyLog {
    Arc::new(TransparencyLog::new())
}

/// Create a new shared transparency log with persistence.
pub fn create_shared_log_with_persistence(path: PathBuf) -> SharedTransparencyLog {
    Arc::new(TransparencyLog::with_persistence(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transparency_log_counting() {
        let log = TransparencyLog::new();
        let now = Utc::now();

        log.record_ingested(1);
        log.record_ingested(2);
        log.record_flush(3, 1, now);
        log.record_flush_failure("disk full", now);

        let stats = log.stats();
        assert_eq!(stats.keys_ingested, 3);
        assert_eq!(stats.keys_persisted, 3);
        assert_eq!(stats.words_persisted, 1);
        assert_eq!(stats.flushes, 1);
        assert_eq!(stats.failed_flushes, 1);
        assert_eq!(stats.last_flush, Some(now));
        assert_eq!(stats.last_error.as_deref(), Some("disk full"));
    }

    #[test]
    fn test_transparency_log_reset() {
        let log = TransparencyLog::new();

        log.record_ingested(100);
        log.record_prune(50, Utc::now());
        log.reset();

        let stats = log.stats();
        assert_eq!(stats.keys_ingested, 0);
        assert_eq!(stats.rows_pruned, 0);
        assert!(stats.last_flush.is_none());
    }

    #[test]
    fn test_summary_format() {
        let log = TransparencyLog::new();
        let summary = log.summary();

        assert!(summary.contains("Key events ingested"));
        assert!(summary.contains("Last flush: never"));
        assert!(summary.contains("Privacy Guarantee"));
        assert!(summary.contains("No key content captured"));
    }

    #[test]
    fn test_persistence_round_trip() {
        let path = std::env::temp_dir().join(format!(
            "keytally-transparency-{}.json",
            std::process::id()
        ));
        let log = TransparencyLog::with_persistence(path.clone());
        log.record_ingested(7);
        log.save().unwrap();

        let reloaded = TransparencyLog::with_persistence(path.clone());
        assert_eq!(reloaded.stats().keys_ingested, 7);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_shared_sink_is_object_safe() {
        let sink: SharedDiagnostics = Arc::new(NoopDiagnostics);
        sink.record_ingested(1);
    }
}
