pub mod config;
pub mod credential;
pub mod evaluation;
pub mod job;

pub use config::{
    Config, DatabaseConfig, JobsConfig, LoggingConfig, MaintenanceConfig, ModelApiConfig,
    ModelSpec, PoolConfig, RetryConfig, SecretsConfig, ServerConfig, StorageConfig,
};
pub use credential::{
    mask_secret, Candidate, CandidateSource, Credential, ModelCategory, QuotaBucket,
};
pub use evaluation::{
    round_band, EvaluationResult, PartKind, ScoreWeights, Transcript, MAX_BAND, MIN_BAND,
};
pub use job::{order_segments, FailureCode, Job, JobFailure, JobStatus, Segment};
