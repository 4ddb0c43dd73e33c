//! Evaluation request driver.
//!
//! Walks candidates, then models, then attempts. Failures are classified once
//! at the model-call boundary:
//!
//! - transient: wait and retry the same model and key while attempts remain,
//!   then abandon the key without touching the ledger;
//! - permanent: mark the (key, category) pair exhausted for pool keys and move
//!   to the next model on the same key;
//! - other, or output without a scorable JSON report: move to the next model.
//!
//! Before every model call the job row is re-read; a job that became terminal
//! (cancelled, timed out) or was handed to a newer run stops the loop.

use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::errors::DomainError;
use crate::domain::models::{
    Candidate, FailureCode, JobFailure, JobStatus, ModelSpec, ScoreWeights, Segment,
};
use crate::domain::ports::{GenerationRequest, JobRepository, ModelClient};
use crate::services::credential_pool::CredentialPool;
use crate::services::failure_classifier::{classify, FailureKind};
use crate::services::quota_ledger::QuotaLedger;
use crate::services::response_parser::extract_json;
use crate::services::result_assembler::overall_score;
use crate::services::retry_policy::RetryPolicy;

/// Why an evaluation run produced no result.
#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error("No API key available for evaluation")]
    NoCredential,

    #[error("Rate limited on every available API key: {message}")]
    RateLimited {
        message: String,
        retry_after_secs: u64,
    },

    #[error("Every available API key has exhausted its daily quota: {message}")]
    AllKeysExhausted { message: String },

    #[error("Evaluation failed: {0}")]
    Failed(String),

    #[error("Recording unavailable: {0}")]
    AudioUnavailable(String),

    #[error("Job {0} is no longer active")]
    Cancelled(Uuid),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl EvaluationError {
    pub fn code(&self) -> FailureCode {
        match self {
            Self::NoCredential => FailureCode::NoCredential,
            Self::RateLimited { .. } => FailureCode::RateLimited,
            Self::AllKeysExhausted { .. } => FailureCode::AllKeysExhausted,
            Self::Failed(_) => FailureCode::EvaluationFailed,
            Self::AudioUnavailable(_) => FailureCode::AudioUnavailable,
            Self::Cancelled(_) => FailureCode::Cancelled,
            Self::Domain(_) => FailureCode::Internal,
        }
    }

    /// The failure recorded on the job row.
    pub fn to_failure(&self) -> JobFailure {
        match self {
            Self::RateLimited {
                retry_after_secs, ..
            } => JobFailure::rate_limited(self.to_string(), *retry_after_secs),
            _ => JobFailure::new(self.code(), self.to_string()),
        }
    }
}

/// A successful model call.
#[derive(Debug, Clone)]
pub struct DriverSuccess {
    pub report: Value,
    pub model: String,
    pub caller_provided_key: bool,
    pub credential_id: Option<Uuid>,
}

/// What went wrong along the way, used once the queue runs dry.
#[derive(Debug, Default)]
struct FailureTally {
    permanent: bool,
    transient: bool,
    last_error: Option<String>,
}

impl FailureTally {
    fn into_error(self, client_retry_after_secs: u64) -> EvaluationError {
        let message = self
            .last_error
            .unwrap_or_else(|| "no model produced a result".to_string());
        if self.permanent {
            EvaluationError::AllKeysExhausted { message }
        } else if self.transient {
            EvaluationError::RateLimited {
                message,
                retry_after_secs: client_retry_after_secs,
            }
        } else {
            EvaluationError::Failed(message)
        }
    }
}

#[derive(Debug, Clone)]
pub struct DriverSettings {
    /// Most capable first
    pub models: Vec<ModelSpec>,
    pub retry: RetryPolicy,
    pub client_retry_after_secs: u64,
    /// Used to reject reports that carry no usable score
    pub weights: ScoreWeights,
}

#[derive(Clone)]
pub struct EvaluationDriver {
    client: Arc<dyn ModelClient>,
    pool: CredentialPool,
    ledger: QuotaLedger,
    jobs: Arc<dyn JobRepository>,
    settings: DriverSettings,
}

impl EvaluationDriver {
    pub fn new(
        client: Arc<dyn ModelClient>,
        pool: CredentialPool,
        ledger: QuotaLedger,
        jobs: Arc<dyn JobRepository>,
        settings: DriverSettings,
    ) -> Self {
        Self {
            client,
            pool,
            ledger,
            jobs,
            settings,
        }
    }

    pub fn models(&self) -> &[ModelSpec] {
        &self.settings.models
    }

    /// Try every candidate until one model returns a usable report.
    pub async fn drive(
        &self,
        job_id: Uuid,
        run_token: Uuid,
        segments: &[Segment],
        candidates: &[Candidate],
        request: &GenerationRequest,
    ) -> Result<DriverSuccess, EvaluationError> {
        if candidates.is_empty() {
            return Err(EvaluationError::NoCredential);
        }

        let mut tally = FailureTally::default();
        for (index, candidate) in candidates.iter().enumerate() {
            debug!(
                job_id = %job_id,
                candidate = index,
                credential_id = ?candidate.credential_id(),
                caller_provided = candidate.is_caller_provided(),
                "Trying candidate"
            );
            if let Some(success) = self
                .try_candidate(job_id, run_token, segments, candidate, request, &mut tally)
                .await?
            {
                return Ok(success);
            }
        }

        let error = tally.into_error(self.settings.client_retry_after_secs);
        warn!(job_id = %job_id, code = %error.code(), error = %error, "Candidate queue exhausted");
        Err(error)
    }

    /// `Ok(None)` means move on to the next candidate.
    async fn try_candidate(
        &self,
        job_id: Uuid,
        run_token: Uuid,
        segments: &[Segment],
        candidate: &Candidate,
        request: &GenerationRequest,
        tally: &mut FailureTally,
    ) -> Result<Option<DriverSuccess>, EvaluationError> {
        let today = Utc::now().date_naive();
        let credential_id = candidate.credential_id();

        for model in &self.settings.models {
            if let Some(id) = credential_id {
                let exhausted = self
                    .ledger
                    .is_exhausted_on(id, model.category, today)
                    .await
                    .unwrap_or_else(|e| {
                        warn!(credential_id = %id, error = %e, "Quota lookup failed, trying anyway");
                        false
                    });
                if exhausted {
                    debug!(credential_id = %id, model = %model.name, category = %model.category, "Skipping exhausted category");
                    continue;
                }
            }

            let mut attempt = 0;
            loop {
                self.checkpoint(job_id, run_token).await?;

                let error = match self
                    .client
                    .generate(&candidate.api_key, &model.name, request)
                    .await
                {
                    Ok(text) => match extract_json(&text) {
                        Some(report)
                            if overall_score(&report, segments, &self.settings.weights).is_some() =>
                        {
                            if let Some(id) = credential_id {
                                self.pool.record_success(id).await;
                            }
                            info!(job_id = %job_id, model = %model.name, credential_id = ?credential_id, "Model returned a report");
                            return Ok(Some(DriverSuccess {
                                report,
                                model: model.name.clone(),
                                caller_provided_key: candidate.is_caller_provided(),
                                credential_id,
                            }));
                        }
                        Some(_) => {
                            warn!(job_id = %job_id, model = %model.name, "Model report carried no usable scores");
                            tally.last_error = Some(format!("model {} returned a report without scores", model.name));
                            break;
                        }
                        None => {
                            warn!(job_id = %job_id, model = %model.name, chars = text.len(), "Model output contained no JSON object");
                            tally.last_error = Some(format!("model {} returned unparseable output", model.name));
                            break;
                        }
                    },
                    Err(error) => error,
                };

                tally.last_error = Some(error.to_string());
                match classify(&error) {
                    FailureKind::Transient { retry_after } => {
                        tally.transient = true;
                        if !self.settings.retry.has_attempts_left(attempt) {
                            warn!(job_id = %job_id, model = %model.name, credential_id = ?credential_id, "Rate limited, abandoning key");
                            return Ok(None);
                        }
                        let delay = self.settings.retry.delay_for(attempt, retry_after);
                        debug!(job_id = %job_id, model = %model.name, attempt, delay_ms = duration_ms(delay), "Rate limited, backing off");
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    FailureKind::Permanent => {
                        tally.permanent = true;
                        if let Some(id) = credential_id {
                            self.ledger.mark_exhausted_on(id, model.category, today).await;
                            self.pool.record_failure(id).await;
                        }
                        warn!(job_id = %job_id, model = %model.name, category = %model.category, credential_id = ?credential_id, "Quota exhausted, trying next model");
                        break;
                    }
                    FailureKind::Other => {
                        warn!(job_id = %job_id, model = %model.name, error = %error, "Model call failed, trying next model");
                        break;
                    }
                }
            }
        }

        Ok(None)
    }

    /// Stop if the job was cancelled, timed out or retried behind our back.
    async fn checkpoint(&self, job_id: Uuid, run_token: Uuid) -> Result<(), EvaluationError> {
        match self.jobs.get(job_id).await {
            Ok(Some(job))
                if job.status == JobStatus::Processing && job.lock_token == Some(run_token) =>
            {
                Ok(())
            }
            Ok(_) => {
                info!(job_id = %job_id, "Job no longer active, stopping evaluation");
                Err(EvaluationError::Cancelled(job_id))
            }
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Checkpoint lookup failed, continuing");
                Ok(())
            }
        }
    }
}

fn duration_ms(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::model::{MockModelClient, MockReply};
    use crate::adapters::sqlite::{
        initialize_test_database, SqliteCredentialRepository, SqliteJobRepository,
        SqliteQuotaRepository,
    };
    use crate::domain::models::{Credential, Job, ModelCategory, PoolConfig};
    use crate::domain::ports::{Attachment, CredentialRepository};

    const REPORT: &str = r#"{"overall_score": 6.5}"#;

    struct Harness {
        driver: EvaluationDriver,
        mock: MockModelClient,
        ledger: QuotaLedger,
        credentials: Arc<SqliteCredentialRepository>,
        jobs: Arc<SqliteJobRepository>,
        job: Job,
        run: Uuid,
    }

    fn models() -> Vec<ModelSpec> {
        vec![
            ModelSpec::new("pro", ModelCategory::Reasoning),
            ModelSpec::new("flash", ModelCategory::Speech),
            ModelSpec::new("lite", ModelCategory::Lightweight),
        ]
    }

    async fn harness(models: Vec<ModelSpec>, default_reply: MockReply) -> Harness {
        let db = initialize_test_database().await.unwrap();
        let credentials = Arc::new(SqliteCredentialRepository::new(db.clone()));
        let jobs = Arc::new(SqliteJobRepository::new(db.clone()));
        let ledger = QuotaLedger::new(Arc::new(SqliteQuotaRepository::new(db)));
        let mock = MockModelClient::new(default_reply);

        let job = Job::new("user-1", "test-1", vec![]);
        jobs.create_replacing_active(&job, "replaced").await.unwrap();
        let run = Uuid::new_v4();
        jobs.start_processing(job.id, run, Utc::now() + chrono::Duration::minutes(10))
            .await
            .unwrap();

        let driver = EvaluationDriver::new(
            Arc::new(mock.clone()),
            CredentialPool::new(credentials.clone(), &PoolConfig::default()),
            ledger.clone(),
            jobs.clone(),
            DriverSettings {
                models,
                retry: RetryPolicy::new(3, 1, 5),
                client_retry_after_secs: 60,
                weights: ScoreWeights::default(),
            },
        );
        Harness {
            driver,
            mock,
            ledger,
            credentials,
            jobs,
            job,
            run,
        }
    }

    async fn pool_candidate(h: &Harness, secret: &str) -> (Candidate, Uuid) {
        let credential = Credential::new(secret, secret);
        h.credentials.create(&credential).await.unwrap();
        (Candidate::pool(&credential), credential.id)
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            attachments: vec![Attachment {
                segment_id: "s1".to_string(),
                mime_type: "audio/webm".to_string(),
                data: vec![1, 2, 3],
            }],
            instruction: "evaluate".to_string(),
            temperature: 0.2,
            max_output_tokens: 1024,
        }
    }

    fn tried(calls: &[crate::adapters::model::RecordedCall]) -> Vec<(String, String)> {
        calls
            .iter()
            .map(|c| (c.api_key.clone(), c.model.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_first_success_wins() {
        let h = harness(models(), MockReply::text(REPORT)).await;
        let out = h
            .driver
            .drive(h.job.id, h.run, &[], &[Candidate::caller("mine")], &request())
            .await
            .unwrap();
        assert_eq!(out.model, "pro");
        assert!(out.caller_provided_key);
        assert_eq!(out.report["overall_score"], 6.5);
        assert_eq!(h.mock.calls().await.len(), 1);
    }

    #[tokio::test]
    async fn test_permanent_failure_tries_next_model_on_same_key() {
        let h = harness(models(), MockReply::text(REPORT)).await;
        let (a, a_id) = pool_candidate(&h, "key-a").await;
        let (b, _) = pool_candidate(&h, "key-b").await;
        h.mock
            .script("key-a", "pro", vec![MockReply::quota_exhausted()])
            .await;

        let out = h.driver.drive(h.job.id, h.run, &[], &[a, b], &request()).await.unwrap();
        assert_eq!(out.model, "flash");
        assert_eq!(out.credential_id, Some(a_id));
        assert_eq!(
            tried(&h.mock.calls().await),
            vec![
                ("key-a".to_string(), "pro".to_string()),
                ("key-a".to_string(), "flash".to_string())
            ]
        );

        // Only the failing category is exhausted.
        assert!(h.ledger.is_exhausted(a_id, ModelCategory::Reasoning).await.unwrap());
        assert!(!h.ledger.is_exhausted(a_id, ModelCategory::Speech).await.unwrap());
    }

    #[tokio::test]
    async fn test_exhausted_category_is_skipped_for_pool_keys() {
        let h = harness(
            vec![
                ModelSpec::new("pro", ModelCategory::Reasoning),
                ModelSpec::new("pro-2", ModelCategory::Reasoning),
                ModelSpec::new("flash", ModelCategory::Speech),
            ],
            MockReply::text(REPORT),
        )
        .await;
        let (a, _) = pool_candidate(&h, "key-a").await;
        h.mock
            .script("key-a", "pro", vec![MockReply::quota_exhausted()])
            .await;

        let out = h.driver.drive(h.job.id, h.run, &[], &[a], &request()).await.unwrap();
        assert_eq!(out.model, "flash");
        let models: Vec<_> = h.mock.calls().await.into_iter().map(|c| c.model).collect();
        assert_eq!(models, vec!["pro", "flash"]);
    }

    #[tokio::test]
    async fn test_caller_key_never_written_to_ledger() {
        let h = harness(models(), MockReply::quota_exhausted()).await;
        let err = h
            .driver
            .drive(h.job.id, h.run, &[], &[Candidate::caller("mine")], &request())
            .await
            .unwrap_err();
        assert!(matches!(err, EvaluationError::AllKeysExhausted { .. }));
        // Every model was tried, since nothing marks a caller key exhausted.
        assert_eq!(h.mock.calls().await.len(), 3);
    }

    #[tokio::test]
    async fn test_transient_retries_then_succeeds() {
        let h = harness(models(), MockReply::text(REPORT)).await;
        h.mock
            .script(
                "mine",
                "pro",
                vec![
                    MockReply::rate_limited(Duration::from_millis(1)),
                    MockReply::error(Some(429), "Rate limit exceeded"),
                ],
            )
            .await;

        let out = h
            .driver
            .drive(h.job.id, h.run, &[], &[Candidate::caller("mine")], &request())
            .await
            .unwrap();
        assert_eq!(out.model, "pro");
        assert_eq!(h.mock.calls().await.len(), 3);
    }

    #[tokio::test]
    async fn test_transient_exhaustion_abandons_key_without_ledger_write() {
        let h = harness(models(), MockReply::text(REPORT)).await;
        let (a, a_id) = pool_candidate(&h, "key-a").await;
        let (b, b_id) = pool_candidate(&h, "key-b").await;
        h.mock
            .script(
                "key-a",
                "pro",
                vec![MockReply::rate_limited(Duration::from_millis(1)); 3],
            )
            .await;

        let out = h.driver.drive(h.job.id, h.run, &[], &[a, b], &request()).await.unwrap();
        assert_eq!(out.credential_id, Some(b_id));
        assert_eq!(out.model, "pro");
        for category in ModelCategory::ALL {
            assert!(!h.ledger.is_exhausted(a_id, category).await.unwrap());
        }
        let calls = tried(&h.mock.calls().await);
        assert_eq!(calls.len(), 4);
        assert!(calls[..3].iter().all(|(k, m)| k == "key-a" && m == "pro"));
    }

    #[tokio::test]
    async fn test_all_transient_reports_rate_limited() {
        let h = harness(models(), MockReply::rate_limited(Duration::from_millis(1))).await;
        let err = h
            .driver
            .drive(h.job.id, h.run, &[], &[Candidate::caller("mine")], &request())
            .await
            .unwrap_err();
        match &err {
            EvaluationError::RateLimited {
                retry_after_secs, ..
            } => assert_eq!(*retry_after_secs, 60),
            other => panic!("unexpected error: {other:?}"),
        }
        let failure = err.to_failure();
        assert_eq!(failure.code, FailureCode::RateLimited);
        assert_eq!(failure.retry_after_secs, Some(60));
    }

    #[tokio::test]
    async fn test_permanent_outranks_transient() {
        let h = harness(models(), MockReply::text(REPORT)).await;
        let (a, _) = pool_candidate(&h, "key-a").await;
        for model in ["pro", "flash", "lite"] {
            h.mock
                .script("key-a", model, vec![MockReply::quota_exhausted()])
                .await;
        }
        h.mock
            .script(
                "mine",
                "pro",
                vec![MockReply::rate_limited(Duration::from_millis(1)); 3],
            )
            .await;

        let err = h
            .driver
            .drive(h.job.id, h.run, &[], &[Candidate::caller("mine"), a], &request())
            .await
            .unwrap_err();
        assert!(matches!(err, EvaluationError::AllKeysExhausted { .. }));
    }

    #[tokio::test]
    async fn test_unparseable_and_other_errors_fall_through() {
        let h = harness(models(), MockReply::text("I cannot help with that.")).await;
        h.mock
            .script("mine", "pro", vec![MockReply::error(Some(400), "Invalid argument")])
            .await;

        let err = h
            .driver
            .drive(h.job.id, h.run, &[], &[Candidate::caller("mine")], &request())
            .await
            .unwrap_err();
        assert!(matches!(err, EvaluationError::Failed(ref m) if m.contains("lite")));
        assert_eq!(h.mock.calls().await.len(), 3);
    }

    #[tokio::test]
    async fn test_empty_queue_is_no_credential() {
        let h = harness(models(), MockReply::text(REPORT)).await;
        let err = h.driver.drive(h.job.id, h.run, &[], &[], &request()).await.unwrap_err();
        assert!(matches!(err, EvaluationError::NoCredential));
        assert_eq!(err.to_failure().code, FailureCode::NoCredential);
    }

    #[tokio::test]
    async fn test_terminal_job_stops_before_model_call() {
        let h = harness(models(), MockReply::text(REPORT)).await;
        h.jobs
            .fail(h.job.id, &JobFailure::cancelled("user cancelled"))
            .await
            .unwrap();

        let err = h
            .driver
            .drive(h.job.id, h.run, &[], &[Candidate::caller("mine")], &request())
            .await
            .unwrap_err();
        assert!(matches!(err, EvaluationError::Cancelled(id) if id == h.job.id));
        assert!(h.mock.calls().await.is_empty());
        let job = h.jobs.get(h.job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_report_without_scores_falls_through_to_next_model() {
        let h = harness(models(), MockReply::text(REPORT)).await;
        h.mock
            .script(
                "mine",
                "pro",
                vec![MockReply::text(r#"{"error": "audio could not be processed"}"#)],
            )
            .await;

        let out = h
            .driver
            .drive(h.job.id, h.run, &[], &[Candidate::caller("mine")], &request())
            .await
            .unwrap();
        assert_eq!(out.model, "flash");
        assert_eq!(h.mock.calls().await.len(), 2);
    }

    #[tokio::test]
    async fn test_only_unscorable_reports_fail_the_evaluation() {
        let h = harness(models(), MockReply::text(r#"{"feedback": "no scores here"}"#)).await;
        let err = h
            .driver
            .drive(h.job.id, h.run, &[], &[Candidate::caller("mine")], &request())
            .await
            .unwrap_err();
        assert!(matches!(err, EvaluationError::Failed(ref m) if m.contains("without scores")));
        assert_eq!(err.to_failure().code, FailureCode::EvaluationFailed);
    }

    #[tokio::test]
    async fn test_superseded_run_stops_before_model_call() {
        let h = harness(models(), MockReply::text(REPORT)).await;
        h.jobs
            .fail(h.job.id, &JobFailure::cancelled("user cancelled"))
            .await
            .unwrap();
        h.jobs.reset_for_retry(h.job.id, "retry").await.unwrap();
        let newer_run = Uuid::new_v4();
        h.jobs
            .start_processing(h.job.id, newer_run, Utc::now() + chrono::Duration::minutes(10))
            .await
            .unwrap();

        let err = h
            .driver
            .drive(h.job.id, h.run, &[], &[Candidate::caller("mine")], &request())
            .await
            .unwrap_err();
        assert!(matches!(err, EvaluationError::Cancelled(_)));
        assert!(h.mock.calls().await.is_empty());

        let out = h
            .driver
            .drive(h.job.id, newer_run, &[], &[Candidate::caller("mine")], &request())
            .await
            .unwrap();
        assert_eq!(out.model, "pro");
    }
}
