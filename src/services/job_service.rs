//! Job lifecycle operations exposed to the API and CLI.

use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{EvaluationResult, Job, JobFailure, JobStatus, Segment};
use crate::domain::ports::{JobFilters, JobRepository, ResultRepository};
use crate::services::job_runner::JobRunner;

const REPLACED_REASON: &str = "Superseded by a newer evaluation request";
const RETRY_REASON: &str = "Superseded by a retry of another evaluation";

/// A new evaluation request.
#[derive(Debug, Clone)]
pub struct NewEvaluation {
    pub user_id: String,
    pub test_id: String,
    pub segments: Vec<Segment>,
    /// Caller's own API key, tried before the pool
    pub api_key: Option<String>,
}

impl NewEvaluation {
    fn validate(&self) -> DomainResult<()> {
        if self.user_id.trim().is_empty() {
            return Err(DomainError::ValidationFailed("user_id cannot be empty".into()));
        }
        if self.test_id.trim().is_empty() {
            return Err(DomainError::ValidationFailed("test_id cannot be empty".into()));
        }
        if self.segments.is_empty() {
            return Err(DomainError::ValidationFailed(
                "at least one recorded segment is required".into(),
            ));
        }
        if let Some(segment) = self
            .segments
            .iter()
            .find(|s| s.audio_path.trim().is_empty() || s.id.trim().is_empty())
        {
            return Err(DomainError::ValidationFailed(format!(
                "segment for part {} question {} needs an id and an audio path",
                segment.part, segment.question
            )));
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct JobService {
    jobs: Arc<dyn JobRepository>,
    results: Arc<dyn ResultRepository>,
    runner: JobRunner,
}

impl JobService {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        results: Arc<dyn ResultRepository>,
        runner: JobRunner,
    ) -> Self {
        Self {
            jobs,
            results,
            runner,
        }
    }

    pub fn runner(&self) -> &JobRunner {
        &self.runner
    }

    /// Insert a pending job, cancelling any active job of the same (user, test).
    pub async fn create(&self, request: &NewEvaluation) -> DomainResult<Job> {
        request.validate()?;
        let job = Job::new(
            request.user_id.trim(),
            request.test_id.trim(),
            request.segments.clone(),
        );
        let replaced = self.jobs.create_replacing_active(&job, REPLACED_REASON).await?;
        info!(
            job_id = %job.id,
            user_id = %job.user_id,
            test_id = %job.test_id,
            replaced = replaced.len(),
            "Evaluation job created"
        );
        Ok(job)
    }

    /// Create a job and start it in the background.
    pub async fn submit(&self, request: NewEvaluation) -> DomainResult<Job> {
        let job = self.create(&request).await?;
        self.runner.submit(job.id, request.api_key);
        Ok(job)
    }

    /// Fetch a job, hiding other users' jobs when `user_id` is given.
    pub async fn get(&self, job_id: Uuid, user_id: Option<&str>) -> DomainResult<Job> {
        let job = self
            .jobs
            .get(job_id)
            .await?
            .ok_or(DomainError::JobNotFound(job_id))?;
        match user_id {
            Some(user) if user != job.user_id => Err(DomainError::JobNotFound(job_id)),
            _ => Ok(job),
        }
    }

    pub async fn list(&self, filters: JobFilters) -> DomainResult<Vec<Job>> {
        self.jobs.list(filters).await
    }

    /// Cancel one job. Only non-terminal jobs can be cancelled.
    pub async fn cancel(&self, job_id: Uuid, user_id: Option<&str>, reason: &str) -> DomainResult<Job> {
        let job = self.get(job_id, user_id).await?;
        if job.status.is_terminal()
            || !self.jobs.fail(job_id, &JobFailure::cancelled(reason)).await?
        {
            let current = self.get(job_id, None).await.map_or(job.status, |j| j.status);
            return Err(DomainError::InvalidTransition {
                from: current,
                to: JobStatus::Failed,
            });
        }
        info!(job_id = %job_id, reason, "Job cancelled");
        self.get(job_id, None).await
    }

    /// Cancel every active job of (user, test).
    pub async fn cancel_for_test(&self, user_id: &str, test_id: &str, reason: &str) -> DomainResult<u64> {
        let cancelled = self
            .jobs
            .fail_active_for_test(user_id, test_id, &JobFailure::cancelled(reason))
            .await?;
        info!(user_id, test_id, cancelled, "Cancelled jobs for test");
        Ok(cancelled)
    }

    /// Cancel every active job of a user.
    pub async fn cancel_all(&self, user_id: &str, reason: &str) -> DomainResult<u64> {
        let cancelled = self
            .jobs
            .fail_active_for_user(user_id, &JobFailure::cancelled(reason))
            .await?;
        info!(user_id, cancelled, "Cancelled all jobs for user");
        Ok(cancelled)
    }

    /// Send a failed job back to pending under the same id and start it again.
    pub async fn retry(
        &self,
        job_id: Uuid,
        user_id: Option<&str>,
        api_key: Option<String>,
    ) -> DomainResult<Job> {
        let job = self.get(job_id, user_id).await?;
        if !job.status.can_transition_to(JobStatus::Pending)
            || !self.jobs.reset_for_retry(job_id, RETRY_REASON).await?
        {
            return Err(DomainError::InvalidTransition {
                from: job.status,
                to: JobStatus::Pending,
            });
        }
        info!(job_id = %job_id, "Job queued for retry");
        let job = self.get(job_id, None).await?;
        self.runner.submit(job_id, api_key);
        Ok(job)
    }

    /// Stored result, hidden from other users when `user_id` is given.
    pub async fn result(&self, result_id: Uuid, user_id: Option<&str>) -> DomainResult<EvaluationResult> {
        let result = self
            .results
            .get(result_id)
            .await?
            .ok_or(DomainError::ResultNotFound(result_id))?;
        match user_id {
            Some(user) if user != result.user_id => Err(DomainError::ResultNotFound(result_id)),
            _ => Ok(result),
        }
    }
}
