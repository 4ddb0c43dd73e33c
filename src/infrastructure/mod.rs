//! Infrastructure layer: configuration, logging and cryptography.

pub mod config;
pub mod crypto;
pub mod logging;
