use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Credential, ModelCategory};

/// Repository port for the shared credential pool.
#[async_trait]
pub trait CredentialRepository: Send + Sync {
    /// Insert a new credential
    async fn create(&self, credential: &Credential) -> DomainResult<()>;

    /// Get a credential by ID, quota buckets included
    async fn get(&self, id: Uuid) -> DomainResult<Option<Credential>>;

    /// List all credentials, oldest first
    async fn list(&self) -> DomainResult<Vec<Credential>>;

    /// Enable or disable a credential
    async fn set_active(&self, id: Uuid, active: bool) -> DomainResult<()>;

    /// Atomically select and lock one eligible credential for the evaluation run `run_token`.
    ///
    /// Eligible means active, unlocked (or lock expired at `now`) and not
    /// exhausted for `category` on `now`'s UTC date. Among eligible rows the
    /// least recently updated wins, ties broken by lowest error count.
    /// Returns `None` when nothing qualifies.
    async fn checkout(
        &self,
        run_token: Uuid,
        category: ModelCategory,
        lock_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> DomainResult<Option<Credential>>;

    /// Clear the lock on every credential held by `run_token`. Returns how many
    /// rows were released.
    async fn release(&self, run_token: Uuid) -> DomainResult<u64>;

    /// Touch last-used and reset the error counter
    async fn record_success(&self, id: Uuid) -> DomainResult<()>;

    /// Increment the error counter
    async fn record_failure(&self, id: Uuid) -> DomainResult<()>;
}
