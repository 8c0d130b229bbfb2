//! keytally - Privacy-first keystroke metrics.
//!
//! This library turns a stream of classified key events into local typing
//! statistics: keystroke counts, word counts, typing speed and per-app usage,
//! without ever seeing the text that was typed.
//!
//! # Privacy Guarantees
//!
//! - **No text**: Events carry key codes and classifications, never characters
//! - **No reconstruction**: Words are counted from key classes, not assembled
//! - **Local only**: Everything is stored in a local SQLite file
//! - **Bounded raw history**: Raw key events are pruned after the retention window
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                           keytally                           │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────────┐     │
//! │  │  Collector  │──▶│   Engine    │──▶│  Store (SQLite) │     │
//! │  │ (JSON pipe) │   │ words/time  │   │ raw + hourly +  │     │
//! │  └─────────────┘   │  batching   │   │     daily       │     │
//! │                    └─────────────┘   └─────────────────┘     │
//! │                          │                    │              │
//! │                          ▼                    ▼              │
//! │                   ┌─────────────┐     ┌─────────────┐        │
//! │                   │Transparency │     │  Snapshot   │        │
//! │                   │    Log      │     │  (pending + │        │
//! │                   └─────────────┘     │  committed) │        │
//! │                                       └─────────────┘        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use keytally::{Engine, EngineSettings, Store, StoreSettings, Timeframe};
//!
//! let store = Store::open_in_memory(StoreSettings::default())?;
//! let engine = Engine::new(
//!     EngineSettings::default(),
//!     Arc::new(store),
//!     Arc::new(keytally::transparency::NoopDiagnostics),
//! );
//! engine.start()?;
//!
//! // engine.ingest(event) for every KeyEvent, then:
//! let snapshot = engine.snapshot(Timeframe::Last24Hours)?;
//! println!("{} words", snapshot.total_words);
//! engine.stop()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod collector;
pub mod config;
pub mod core;
pub mod engine;
pub mod store;
pub mod transparency;

// Re-export key types at crate root for convenience
pub use collector::{Collector, CollectorConfig, CollectorError, KeyEvent};
pub use config::{Config, ConfigError};
pub use core::{StatsSnapshot, Timeframe};
pub use engine::{Engine, EngineDiagnostics, EngineSettings};
pub use store::{AggregateStore, Store, StoreError, StoreSettings};
pub use transparency::{SharedTransparencyLog, TransparencyLog, TransparencyStats};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Privacy declaration that can be displayed to users.
pub const PRIVACY_DECLARATION: &str = r#"
╔══════════════════════════════════════════════════════════════════╗
║                 KEYTALLY - PRIVACY DECLARATION                   ║
╠══════════════════════════════════════════════════════════════════╣
║                                                                  ║
║  keytally keeps local statistics about how you type.             ║
║                                                                  ║
║  ✓ WHAT WE STORE:                                                ║
║    • Which physical key was pressed and when (key code only)     ║
║    • Whether a key ends a word (space, return, punctuation)      ║
║    • Which application was focused (bundle identifier)           ║
║    • Counts and active typing time per hour and per day          ║
║                                                                  ║
║  ✗ WHAT WE NEVER STORE:                                          ║
║    • The characters or text you type                             ║
║    • Words, passwords or messages in any form                    ║
║    • Any screen content                                          ║
║                                                                  ║
║  All data stays on this machine. Raw key events are deleted      ║
║  after the retention window (90 days by default).                ║
║                                                                  ║
║  You can view or wipe your statistics anytime with:              ║
║    keytally stats                                                ║
║    keytally reset                                                ║
║                                                                  ║
╚══════════════════════════════════════════════════════════════════╝
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_privacy_declaration_contents() {
        assert!(PRIVACY_DECLARATION.contains("PRIVACY"));
        assert!(PRIVACY_DECLARATION.contains("NEVER STORE"));
        assert!(PRIVACY_DECLARATION.contains("characters or text"));
    }
}
