//! Core aggregation logic for keytally.
//!
//! This module contains:
//! - Bucket alignment and interval apportioning
//! - Word boundary detection and replay
//! - Per-application typing sessions
//! - Timeframes and windowed snapshots

pub mod buckets;
pub mod session;
pub mod snapshot;
pub mod suppression;
pub mod timeframe;
pub mod words;

// Re-export commonly used types
pub use buckets::{BucketCalendar, Granularity};
pub use session::{ActiveInterval, IdleCaps, TypingSession};
pub use snapshot::{StatsSnapshot, TypingTotals, WindowAggregates};
pub use suppression::SuppressionRules;
pub use timeframe::Timeframe;
pub use words::{KeyClass, WordBoundaryDetector, WordReplay, WordRole};
