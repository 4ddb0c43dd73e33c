//! Logging infrastructure
//!
//! Structured logging with tracing:
//! - JSON or pretty console output on stderr
//! - Optional rolling JSON log files
//! - `RUST_LOG` overrides on top of the configured level

pub mod config;
pub mod logger;

pub use config::{LogConfig, LogFormat, RotationPolicy};
pub use logger::LoggerImpl;
