//! Persistent aggregate store.
//!
//! A dedicated worker thread owns the SQLite connection. Callers submit
//! boxed tasks over a channel and block on a single-use reply channel, so
//! every operation is serialized and no statement ever runs concurrently.

pub mod error;
mod migrations;
mod query;
mod write;

use crate::config::{Config, ConfigError};
use crate::core::buckets::BucketCalendar;
use crate::core::timeframe::Timeframe;
use crate::core::WindowAggregates;
use crate::engine::pending::FlushBatch;
use crate::transparency::{NoopDiagnostics, SharedDiagnostics};
use chrono::{DateTime, Duration, TimeZone, Utc};
use crossbeam_channel::{bounded, unbounded, Sender};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

use error::SqlResultExt;
pub use error::StoreError;
pub use write::{FlushReport, PruneReport};

/// Persistence seam used by the engine.
pub trait AggregateStore: Send + Sync {
    /// Commit a batch atomically. An error means nothing was written.
    fn flush(&self, batch: &FlushBatch) -> Result<FlushReport, StoreError>;

    /// Committed aggregates for `timeframe` as seen at `now`.
    fn snapshot(
        &self,
        timeframe: Timeframe,
        now: DateTime<Utc>,
    ) -> Result<WindowAggregates, StoreError>;

    /// Delete all persisted data.
    fn reset_all_data(&self) -> Result<(), StoreError>;
}

/// Store behaviour knobs.
#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub calendar: BucketCalendar,
    pub retention_days: u32,
    /// Minimum spacing between retention passes
    pub prune_interval: Duration,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            calendar: BucketCalendar::utc(),
            retention_days: 90,
            prune_interval: Duration::hours(1),
        }
    }
}

impl StoreSettings {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self {
            calendar: config.calendar()?,
            retention_days: config.retention_days,
            ..Self::default()
        })
    }
}

type StoreTask = Box<dyn FnOnce(&mut StoreWorker) + Send + 'static>;

enum StoreCommand {
    Execute(StoreTask),
    Shutdown,
}

/// State owned by the worker thread.
struct StoreWorker {
    conn: Connection,
    settings: StoreSettings,
    last_prune: Option<DateTime<Utc>>,
    diagnostics: SharedDiagnostics,
}

impl StoreWorker {
    fn flush(&mut self, batch: &FlushBatch) -> Result<FlushReport, StoreError> {
        let report = write::write_batch(&mut self.conn, &self.settings, batch)?;

        // The batch is committed at this point; a failed prune must not
        // make the caller retry it.
        let now = batch.created_at();
        if let Err(err) = self.prune_if_due(now) {
            warn!(error = %err, "retention prune failed");
        }
        Ok(report)
    }

    fn prune_if_due(&mut self, now: DateTime<Utc>) -> Result<Option<PruneReport>, StoreError> {
        if let Some(last) = self.last_prune {
            if now - last < self.settings.prune_interval && now >= last {
                return Ok(None);
            }
        }
        self.prune(now).map(Some)
    }

    fn prune(&mut self, now: DateTime<Utc>) -> Result<PruneReport, StoreError> {
        let report = write::prune(&mut self.conn, &self.settings, now)?;
        self.last_prune = Some(now);
        if report.total() > 0 {
            info!(
                raw_events = report.raw_events,
                hourly_rows = report.hourly_rows,
                "pruned expired rows"
            );
        }
        self.diagnostics.record_prune(report.total(), now);
        Ok(report)
    }
}

struct StoreInner {
    sender: Sender<StoreCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if let Err(err) = self.sender.send(StoreCommand::Shutdown) {
                error!("Failed to send shutdown to store thread: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("Failed to join store thread: {join_err:?}");
            }
        }
    }
}

/// SQLite-backed aggregate store.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
    path: Option<Arc<PathBuf>>,
}

impl Store {
    /// Open (or create) the database at `path` and bring its schema up to date.
    pub fn open(
        path: impl AsRef<Path>,
        settings: StoreSettings,
        diagnostics: SharedDiagnostics,
    ) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Open(format!(
                    "failed to create database directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let path_for_thread = path.clone();
        let store = Self::spawn(
            move || Connection::open(&path_for_thread),
            settings,
            diagnostics,
            Some(path.clone()),
        )?;
        info!(path = %path.display(), "aggregate store opened");
        Ok(store)
    }

    /// Private in-memory database, mostly for tests.
    pub fn open_in_memory(settings: StoreSettings) -> Result<Self, StoreError> {
        Self::spawn(
            Connection::open_in_memory,
            settings,
            Arc::new(NoopDiagnostics),
            None,
        )
    }

    fn spawn<F>(
        opener: F,
        settings: StoreSettings,
        diagnostics: SharedDiagnostics,
        path: Option<PathBuf>,
    ) -> Result<Self, StoreError>
    where
        F: FnOnce() -> rusqlite::Result<Connection> + Send + 'static,
    {
        let (command_tx, command_rx) = unbounded::<StoreCommand>();
        let (ready_tx, ready_rx) = bounded::<Result<(), StoreError>>(1);

        let worker = thread::Builder::new()
            .name("keytally-store".into())
            .spawn(move || {
                let mut conn = match opener().or_open("failed to open database") {
                    Ok(conn) => conn,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };

                if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                    warn!("Failed to enable WAL mode: {err}");
                }
                if let Err(err) = conn.pragma_update(None, "synchronous", "NORMAL") {
                    warn!("Failed to relax synchronous mode: {err}");
                }

                let init = migrations::run_migrations(&mut conn)
                    .and_then(|_| migrations::purge_invalid_key_codes(&conn).map(|_| ()));
                let failed = init.is_err();
                if ready_tx.send(init).is_err() || failed {
                    return;
                }

                let mut worker = StoreWorker {
                    conn,
                    settings,
                    last_prune: None,
                    diagnostics,
                };
                while let Ok(command) = command_rx.recv() {
                    match command {
                        StoreCommand::Execute(task) => task(&mut worker),
                        StoreCommand::Shutdown => break,
                    }
                }

                debug!("Store thread shutting down");
            })
            .map_err(|e| StoreError::Open(format!("failed to spawn store thread: {e}")))?;

        let ready = ready_rx.recv().map_err(|_| {
            StoreError::WorkerUnavailable("store thread exited before signaling readiness".into())
        });
        if let Err(err) = ready.and_then(|init| init) {
            let _ = worker.join();
            return Err(err);
        }

        Ok(Self {
            inner: Arc::new(StoreInner {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
            }),
            path: path.map(Arc::new),
        })
    }

    /// Database file, if this store is file-backed.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref().map(PathBuf::as_path)
    }

    fn execute<F, T>(&self, task: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut StoreWorker) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = bounded(1);

        let command = StoreCommand::Execute(Box::new(move |worker| {
            let result = task(worker);
            if reply_tx.send(result).is_err() {
                error!("Store caller dropped before receiving result");
            }
        }));

        self.inner.sender.send(command).map_err(|err| {
            StoreError::WorkerUnavailable(format!("failed to send command to store thread: {err}"))
        })?;

        reply_rx.recv().map_err(|_| {
            StoreError::WorkerUnavailable("store thread terminated unexpectedly".into())
        })?
    }

    /// Run a retention pass now, regardless of when the last one ran.
    pub fn prune(&self, now: DateTime<Utc>) -> Result<PruneReport, StoreError> {
        self.execute(move |worker| worker.prune(now))
    }

    /// Row count per table.
    pub fn row_counts(&self) -> Result<Vec<(String, u64)>, StoreError> {
        self.execute(|worker| write::row_counts(&worker.conn))
    }
}

impl AggregateStore for Store {
    fn flush(&self, batch: &FlushBatch) -> Result<FlushReport, StoreError> {
        if batch.is_empty() {
            return Ok(FlushReport::default());
        }
        let batch = batch.clone();
        self.execute(move |worker| worker.flush(&batch))
    }

    fn snapshot(
        &self,
        timeframe: Timeframe,
        now: DateTime<Utc>,
    ) -> Result<WindowAggregates, StoreError> {
        self.execute(move |worker| query::load_window(&worker.conn, &worker.settings, timeframe, now))
    }

    fn reset_all_data(&self) -> Result<(), StoreError> {
        self.execute(|worker| {
            write::reset_all(&mut worker.conn)?;
            worker.last_prune = None;
            info!("all persisted data deleted");
            Ok(())
        })
    }
}

pub(crate) fn to_i64(value: u64) -> Result<i64, StoreError> {
    i64::try_from(value)
        .map_err(|_| StoreError::Bind(format!("value {value} exceeds SQLite INTEGER range")))
}

pub(crate) fn from_millis(value: i64) -> Result<DateTime<Utc>, StoreError> {
    Utc.timestamp_millis_opt(value)
        .single()
        .ok_or_else(|| StoreError::Step(format!("invalid timestamp_ms {value}")))
}

pub(crate) fn from_secs(value: i64) -> Result<DateTime<Utc>, StoreError> {
    Utc.timestamp_opt(value, 0)
        .single()
        .ok_or_else(|| StoreError::Step(format!("invalid bucket_start {value}")))
}
