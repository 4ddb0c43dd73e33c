pub mod audio_loader;
pub mod candidate_queue;
pub mod credential_pool;
pub mod evaluation_driver;
pub mod evaluation_service;
pub mod failure_classifier;
pub mod job_runner;
pub mod job_service;
pub mod maintenance_daemon;
pub mod prompt_builder;
pub mod quota_ledger;
pub mod response_parser;
pub mod result_assembler;
pub mod retry_policy;

pub use audio_loader::AudioLoader;
pub use candidate_queue::{CallerSecretSource, CandidateQueueBuilder};
pub use credential_pool::CredentialPool;
pub use evaluation_driver::{DriverSettings, EvaluationDriver, EvaluationError};
pub use evaluation_service::{EvaluationOutcome, EvaluationService, GenerationSettings};
pub use failure_classifier::{classify, FailureKind};
pub use job_runner::{JobRunner, JobRunnerConfig, RunOutcome};
pub use job_service::{JobService, NewEvaluation};
pub use maintenance_daemon::{MaintenanceDaemon, MaintenanceDaemonConfig, MaintenanceReport};
pub use quota_ledger::QuotaLedger;
pub use result_assembler::ResultAssembler;
pub use retry_policy::RetryPolicy;
