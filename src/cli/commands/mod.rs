//! CLI command implementations.

pub mod evaluate;
pub mod job;
pub mod key;
pub mod secret;
pub mod serve;
