//! Line-delimited JSON event source.
//!
//! Capture providers are platform specific and live outside this crate; they
//! hand events over as one JSON `KeyEvent` per line on a pipe (stdin, a FIFO
//! or a file). Malformed lines are logged and skipped.

use crate::collector::types::KeyEvent;
use crossbeam_channel::{bounded, Receiver, Sender};
use std::io::BufRead;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// Configuration for the pipe collector.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Events buffered between the reader thread and the consumer
    pub channel_capacity: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 10_000,
        }
    }
}

/// Errors that can occur during event collection.
#[derive(Debug)]
pub enum CollectorError {
    AlreadyRunning,
    /// The input was already consumed by an earlier run
    SourceConsumed,
    SpawnFailed(String),
}

impl std::fmt::Display for CollectorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollectorError::AlreadyRunning => write!(f, "Collector is already running"),
            CollectorError::SourceConsumed => write!(f, "Event source was already consumed"),
            CollectorError::SpawnFailed(e) => write!(f, "Failed to start reader thread: {e}"),
        }
    }
}

impl std::error::Error for CollectorError {}

/// Reads `KeyEvent`s from a line-oriented source on a background thread.
pub struct PipeCollector {
    source: Option<Box<dyn BufRead + Send>>,
    receiver: Receiver<KeyEvent>,
    sender: Option<Sender<KeyEvent>>,
    running: Arc<AtomicBool>,
    skipped: Arc<AtomicU64>,
    thread_handle: Option<JoinHandle<()>>,
}

impl PipeCollector {
    pub fn new<R>(source: R, config: CollectorConfig) -> Self
    where
        R: BufRead + Send + 'static,
    {
        // Use a bounded channel to prevent unbounded memory growth
        let (sender, receiver) = bounded(config.channel_capacity.max(1));

        Self {
            source: Some(Box::new(source)),
            receiver,
            sender: Some(sender),
            running: Arc::new(AtomicBool::new(false)),
            skipped: Arc::new(AtomicU64::new(0)),
            thread_handle: None,
        }
    }

    /// Collector over this process's standard input.
    pub fn stdin(config: CollectorConfig) -> Self {
        Self::new(std::io::BufReader::new(std::io::stdin()), config)
    }

    /// Start reading in a background thread.
    ///
    /// The receiver disconnects once the source reaches end of input.
    pub fn start(&mut self) -> Result<(), CollectorError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(CollectorError::AlreadyRunning);
        }
        let (Some(source), Some(sender)) = (self.source.take(), self.sender.take()) else {
            return Err(CollectorError::SourceConsumed);
        };

        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();
        let skipped = self.skipped.clone();

        let handle = thread::Builder::new()
            .name("keytally-reader".into())
            .spawn(move || {
                read_events(source, &sender, &running, &skipped);
                running.store(false, Ordering::SeqCst);
                debug!("event source closed");
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                CollectorError::SpawnFailed(e.to_string())
            })?;

        self.thread_handle = Some(handle);
        Ok(())
    }

    /// Stop forwarding events. A reader blocked on input exits after its
    /// next line.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            if handle.is_finished() {
                let _ = handle.join();
            }
        }
    }

    /// Check if the collector is currently running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Get the receiver for key events.
    pub fn receiver(&self) -> &Receiver<KeyEvent> {
        &self.receiver
    }

    /// Try to receive an event without blocking.
    pub fn try_recv(&self) -> Option<KeyEvent> {
        self.receiver.try_recv().ok()
    }

    /// Lines that could not be parsed.
    pub fn skipped_lines(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }
}

impl Drop for PipeCollector {
    fn drop(&mut self) {
        self.stop();
    }
}

fn read_events(
    source: Box<dyn BufRead + Send>,
    sender: &Sender<KeyEvent>,
    running: &AtomicBool,
    skipped: &AtomicU64,
) {
    for (index, line) in source.lines().enumerate() {
        if !running.load(Ordering::SeqCst) {
            break;
        }
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "event source read failed");
                break;
            }
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<KeyEvent>(trimmed) {
            Ok(event) => {
                if sender.send(event).is_err() {
                    break;
                }
            }
            Err(e) => {
                skipped.fetch_add(1, Ordering::Relaxed);
                warn!(line = index + 1, error = %e, "skipping malformed event");
            }
        }
    }
}
