//! Transparency module for keytally.
//!
//! This module provides tools for tracking and exposing what the engine
//! processes and persists, supporting user trust.

pub mod log;

// Re-export commonly used types
pub use log::{
    create_shared_log, create_shared_log_with_persistence, DiagnosticsSink, NoopDiagnostics,
    SharedDiagnostics, SharedTransparencyLog, TransparencyLog, TransparencyStats,
};
