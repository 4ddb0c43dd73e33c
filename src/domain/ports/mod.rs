//! Port trait definitions (Hexagonal Architecture)
//!
//! Async trait interfaces that infrastructure adapters implement:
//! - CredentialRepository: shared key pool with atomic checkout
//! - QuotaRepository: per (credential, category) quota buckets
//! - JobRepository: evaluation job records and conditional transitions
//! - ResultRepository: immutable evaluation results
//! - SecretStore: user-owned encrypted secrets
//! - ObjectStore: recorded audio
//! - ModelClient: generative model invocation

pub mod credential_repository;
pub mod job_repository;
pub mod model_client;
pub mod object_store;
pub mod quota_repository;
pub mod result_repository;
pub mod secret_store;

pub use credential_repository::CredentialRepository;
pub use job_repository::{JobFilters, JobRepository};
pub use model_client::{Attachment, GenerationRequest, ModelCallError, ModelClient};
pub use object_store::{public_url, ObjectStore};
pub use quota_repository::QuotaRepository;
pub use result_repository::ResultRepository;
pub use secret_store::SecretStore;
