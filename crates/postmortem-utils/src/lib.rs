//! # postmortem utilities
//!
//! Shared logging setup for the postmortem workspace.
//!
//! The library crate only emits `tracing` events; binaries call one of the
//! `init_logging*` functions here to decide where those events go.

pub mod logging;

// Re-export commonly used logging functions for convenience
pub use logging::{
    init_logging, init_logging_with, init_logging_with_level, LogFormat, LogLevel, LoggingError, LoggingGuard,
    LoggingOptions,
};
