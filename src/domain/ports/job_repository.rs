use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Job, JobFailure, JobStatus};

/// Filters for querying jobs
#[derive(Default, Debug, Clone)]
pub struct JobFilters {
    pub user_id: Option<String>,
    pub test_id: Option<String>,
    pub status: Option<JobStatus>,
    pub limit: Option<i64>,
}

/// Repository port for evaluation jobs.
///
/// Every transition into a terminal state is conditional on the row still
/// being non-terminal; the `bool` results report whether this call won.
/// Writes made on behalf of a run also require the row to still carry that
/// run's lock token, so a stale run can never touch a retried job. Any
/// transition that ends a run frees the pool credentials locked under its token.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Insert a `pending` job and fail every other active job of the same
    /// (user, test) with `reason`, in one transaction. Returns the ids that
    /// were cancelled.
    async fn create_replacing_active(&self, job: &Job, reason: &str) -> DomainResult<Vec<Uuid>>;

    /// Get a job by ID
    async fn get(&self, id: Uuid) -> DomainResult<Option<Job>>;

    /// List jobs, newest first
    async fn list(&self, filters: JobFilters) -> DomainResult<Vec<Job>>;

    /// Flip `pending -> processing`, stamping the job lock and bumping the
    /// attempt counter. `false` means another runner (or a cancel) got there first.
    async fn start_processing(
        &self,
        id: Uuid,
        lock_token: Uuid,
        lock_expires_at: DateTime<Utc>,
    ) -> DomainResult<bool>;

    /// Mark the job `completed` if `lock_token` still owns it.
    async fn complete(&self, id: Uuid, lock_token: Uuid, result_id: Option<Uuid>) -> DomainResult<bool>;

    /// Mark the job `failed` if `lock_token` still owns it.
    async fn fail_run(&self, id: Uuid, lock_token: Uuid, failure: &JobFailure) -> DomainResult<bool>;

    /// Mark an active job `failed` whichever run holds it, and clear its lock fields.
    async fn fail(&self, id: Uuid, failure: &JobFailure) -> DomainResult<bool>;

    /// Fail every active job of (user, test).
    async fn fail_active_for_test(
        &self,
        user_id: &str,
        test_id: &str,
        failure: &JobFailure,
    ) -> DomainResult<u64>;

    /// Fail every active job of a user.
    async fn fail_active_for_user(&self, user_id: &str, failure: &JobFailure) -> DomainResult<u64>;

    /// Send a `failed` job back to `pending`, keeping its id, and fail any
    /// other active job of the same (user, test) with `reason`.
    async fn reset_for_retry(&self, id: Uuid, reason: &str) -> DomainResult<bool>;

    /// Fail `processing` jobs whose job lock expired before `now`.
    async fn fail_expired_processing(
        &self,
        now: DateTime<Utc>,
        failure: &JobFailure,
    ) -> DomainResult<Vec<Uuid>>;
}
