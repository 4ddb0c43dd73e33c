//! Composition root shared by the HTTP server and the CLI.

pub mod context;

pub use context::{AppContext, Repositories};
