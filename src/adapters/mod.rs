//! Infrastructure adapters for external systems.

pub mod http;
pub mod model;
pub mod sqlite;
pub mod storage;
