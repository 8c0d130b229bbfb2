//! Event collection module for keytally.
//!
//! Platform capture providers classify key presses and emit privacy-preserving
//! `KeyEvent`s; this crate consumes them from a line-delimited JSON pipe.

pub mod pipe;
pub mod types;

// Re-export commonly used types
pub use pipe::{CollectorConfig, CollectorError, PipeCollector};
pub use types::{DeviceClass, KeyEvent, ModifierState};

/// Collector type used by the binary
pub type Collector = PipeCollector;
