//! Background execution of evaluation jobs.
//!
//! A run claims the job (`pending -> processing`) under a fresh lock token,
//! arms an independent watchdog, and drives the evaluation on its own task.
//! Every terminal write is conditional on the job still carrying that token,
//! so whichever of {outcome, cancel, watchdog} lands first wins and nothing
//! from an earlier run can touch a retried job.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{FailureCode, JobFailure, JobsConfig};
use crate::domain::ports::JobRepository;
use crate::services::evaluation_driver::EvaluationError;
use crate::services::evaluation_service::{EvaluationOutcome, EvaluationService};

/// How a run ended, from the runner's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Another runner or a cancel got to the job first
    NotStarted,
    Completed { result_id: Option<Uuid> },
    Failed(JobFailure),
    /// The job reached a terminal state elsewhere while we worked
    Superseded,
}

#[derive(Debug, Clone)]
pub struct JobRunnerConfig {
    /// Hard ceiling on one run
    pub watchdog: Duration,
}

impl From<&JobsConfig> for JobRunnerConfig {
    fn from(config: &JobsConfig) -> Self {
        Self {
            watchdog: Duration::from_secs(config.watchdog_secs),
        }
    }
}

#[derive(Clone)]
pub struct JobRunner {
    jobs: Arc<dyn JobRepository>,
    evaluation: EvaluationService,
    config: JobRunnerConfig,
}

impl JobRunner {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        evaluation: EvaluationService,
        config: JobRunnerConfig,
    ) -> Self {
        Self {
            jobs,
            evaluation,
            config,
        }
    }

    /// Run `job_id` on a background task.
    pub fn submit(&self, job_id: Uuid, header_key: Option<String>) -> JoinHandle<DomainResult<RunOutcome>> {
        let runner = self.clone();
        tokio::spawn(async move {
            let outcome = runner.run(job_id, header_key).await;
            if let Err(e) = &outcome {
                error!(job_id = %job_id, error = %e, "Job run failed");
            }
            outcome
        })
    }

    /// Claim and run `job_id` to a terminal state.
    pub async fn run(&self, job_id: Uuid, header_key: Option<String>) -> DomainResult<RunOutcome> {
        let watchdog = self.config.watchdog;
        let lock_expires_at = Utc::now()
            + chrono::Duration::from_std(watchdog)
                .map_err(|e| DomainError::ValidationFailed(format!("watchdog out of range: {e}")))?;

        let run_token = Uuid::new_v4();
        if !self
            .jobs
            .start_processing(job_id, run_token, lock_expires_at)
            .await?
        {
            debug!(job_id = %job_id, "Job not pending, skipping run");
            return Ok(RunOutcome::NotStarted);
        }
        let job = self
            .jobs
            .get(job_id)
            .await?
            .ok_or(DomainError::JobNotFound(job_id))?;
        info!(job_id = %job_id, attempts = job.attempts, segments = job.segments.len(), "Job processing started");

        let watchdog_task = spawn_watchdog(self.jobs.clone(), job_id, run_token, watchdog);

        let evaluation = self.evaluation.clone();
        let work = tokio::spawn(async move {
            evaluation
                .evaluate(&job, run_token, header_key.as_deref())
                .await
        });
        let joined = work.await;
        watchdog_task.abort();

        self.finish(job_id, run_token, joined).await
    }

    async fn finish(
        &self,
        job_id: Uuid,
        run_token: Uuid,
        joined: Result<Result<EvaluationOutcome, EvaluationError>, tokio::task::JoinError>,
    ) -> DomainResult<RunOutcome> {
        match joined {
            Ok(Ok(outcome)) => {
                if self.jobs.complete(job_id, run_token, outcome.result_id).await? {
                    info!(job_id = %job_id, result_id = ?outcome.result_id, "Job completed");
                    Ok(RunOutcome::Completed {
                        result_id: outcome.result_id,
                    })
                } else {
                    warn!(job_id = %job_id, "Result arrived after the job became terminal, discarded");
                    Ok(RunOutcome::Superseded)
                }
            }
            Ok(Err(EvaluationError::Cancelled(_))) => Ok(RunOutcome::Superseded),
            Ok(Err(e)) => self.fail(job_id, run_token, e.to_failure()).await,
            Err(join_error) => {
                let message = if join_error.is_panic() {
                    "evaluation task panicked".to_string()
                } else {
                    format!("evaluation task aborted: {join_error}")
                };
                error!(job_id = %job_id, message, "Background evaluation crashed");
                self.fail(job_id, run_token, JobFailure::new(FailureCode::Internal, message))
                    .await
            }
        }
    }

    async fn fail(&self, job_id: Uuid, run_token: Uuid, failure: JobFailure) -> DomainResult<RunOutcome> {
        if self.jobs.fail_run(job_id, run_token, &failure).await? {
            warn!(job_id = %job_id, code = %failure.code, message = %failure.message, "Job failed");
            Ok(RunOutcome::Failed(failure))
        } else {
            Ok(RunOutcome::Superseded)
        }
    }
}

/// Fail `job_id` with a timeout once `deadline` elapses, unless the run
/// `run_token` already ended or the job moved on to another run.
fn spawn_watchdog(
    jobs: Arc<dyn JobRepository>,
    job_id: Uuid,
    run_token: Uuid,
    deadline: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(deadline).await;
        let failure = JobFailure::new(
            FailureCode::Timeout,
            format!("Evaluation exceeded the {}s time limit", deadline.as_secs_f64()),
        );
        match jobs.fail_run(job_id, run_token, &failure).await {
            Ok(true) => warn!(job_id = %job_id, "Watchdog timed out job"),
            Ok(false) => {}
            Err(e) => error!(job_id = %job_id, error = %e, "Watchdog failed to time out job"),
        }
    })
}
