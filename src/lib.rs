//! Speakeval - speaking test evaluation service
//!
//! Evaluates recorded speaking-test answers with a generative model, drawing
//! API keys from a shared pool with per-category daily quota tracking and
//! running each evaluation as a background job.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): models, errors and port traits
//! - **Adapters** (`adapters`): SQLite, object storage, model API, HTTP
//! - **Service Layer** (`services`): pool, quota ledger, driver, jobs
//! - **Application Layer** (`application`): wiring of the above
//! - **Infrastructure Layer** (`infrastructure`): config, logging, crypto
//! - **CLI Layer** (`cli`): command-line interface

pub mod adapters;
pub mod application;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use application::{AppContext, Repositories};
pub use domain::errors::{DomainError, DomainResult};
pub use domain::models::{
    Config, Credential, EvaluationResult, FailureCode, Job, JobFailure, JobStatus, ModelCategory,
    Segment,
};
pub use domain::ports::{JobFilters, ModelClient};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{JobService, NewEvaluation, RunOutcome};
