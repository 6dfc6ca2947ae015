//! # mortem Utilities
//!
//! Shared helpers for the mortem workspace.
//!
//! Right now that is the `tracing` subscriber setup used by tests and by any
//! frontend that embeds `mortem-core`.

pub mod logging;

// Re-export commonly used logging functions for convenience
pub use logging::{
    init_logging, init_logging_to_file, init_logging_with_level, LogFormat, LogLevel, LoggingError, LoggingGuard,
};
pub use tracing::{debug, error, info, trace, warn};
