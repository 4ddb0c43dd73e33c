//! Evaluation job domain model.
//!
//! A job is one asynchronous evaluation of a user's recorded answers for one
//! test. Jobs move `pending -> processing -> {completed, failed}`; a failed job
//! may be sent back to `pending` by an explicit retry, keeping its identifier.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Status of a job in the evaluation pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created, waiting for a runner
    #[default]
    Pending,
    /// A runner owns the job and is driving the evaluation
    Processing,
    /// Result produced
    Completed,
    /// Unrecoverable failure, cancellation or watchdog timeout
    Failed,
}

impl JobStatus {
    pub const ACTIVE: [JobStatus; 2] = [Self::Pending, Self::Processing];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" | "complete" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Valid transitions from this status.
    pub fn valid_transitions(&self) -> &'static [JobStatus] {
        match self {
            Self::Pending => &[Self::Processing, Self::Failed],
            Self::Processing => &[Self::Completed, Self::Failed],
            Self::Completed => &[],
            Self::Failed => &[Self::Pending], // explicit retry
        }
    }

    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Machine-readable reason attached to a failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureCode {
    /// Queue empty: no caller key and nothing checked out of the pool
    NoCredential,
    /// Every failure along the way was a transient rate limit
    RateLimited,
    /// At least one candidate hit a permanent quota/billing block
    AllKeysExhausted,
    /// Models failed for reasons other than quota
    EvaluationFailed,
    /// Recorded audio could not be fetched
    AudioUnavailable,
    Cancelled,
    Timeout,
    Internal,
}

impl FailureCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoCredential => "NO_CREDENTIAL",
            Self::RateLimited => "RATE_LIMITED",
            Self::AllKeysExhausted => "ALL_KEYS_EXHAUSTED",
            Self::EvaluationFailed => "EVALUATION_FAILED",
            Self::AudioUnavailable => "AUDIO_UNAVAILABLE",
            Self::Cancelled => "CANCELLED",
            Self::Timeout => "TIMEOUT",
            Self::Internal => "INTERNAL",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "NO_CREDENTIAL" => Some(Self::NoCredential),
            "RATE_LIMITED" => Some(Self::RateLimited),
            "ALL_KEYS_EXHAUSTED" => Some(Self::AllKeysExhausted),
            "EVALUATION_FAILED" => Some(Self::EvaluationFailed),
            "AUDIO_UNAVAILABLE" => Some(Self::AudioUnavailable),
            "CANCELLED" => Some(Self::Cancelled),
            "TIMEOUT" => Some(Self::Timeout),
            "INTERNAL" => Some(Self::Internal),
            _ => None,
        }
    }
}

impl fmt::Display for FailureCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a job ended up `failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub code: FailureCode,
    pub message: String,
    /// Suggested client wait before retrying (rate limited only)
    pub retry_after_secs: Option<u64>,
}

impl JobFailure {
    pub fn new(code: FailureCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retry_after_secs: None,
        }
    }

    pub fn rate_limited(message: impl Into<String>, retry_after_secs: u64) -> Self {
        Self {
            code: FailureCode::RateLimited,
            message: message.into(),
            retry_after_secs: Some(retry_after_secs),
        }
    }

    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::new(FailureCode::Cancelled, reason)
    }
}

/// One recorded answer to one test question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub id: String,
    pub part: u8,
    pub question: u32,
    #[serde(default)]
    pub question_text: String,
    /// Object storage path of the recording
    pub audio_path: String,
    #[serde(default = "default_mime_type")]
    pub mime_type: String,
}

fn default_mime_type() -> String {
    "audio/webm".to_string()
}

/// Sort segments into submission order: part ascending, then question ascending.
///
/// The evaluation model matches recordings to questions by position, so the
/// same order must be used for downloading, prompting and attaching.
pub fn order_segments(segments: &mut [Segment]) {
    segments.sort_by(|a, b| (a.part, a.question, &a.id).cmp(&(b.part, b.question, &b.id)));
}

/// A unit of asynchronous evaluation work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub user_id: String,
    pub test_id: String,
    pub status: JobStatus,
    /// Input segments, stored in submission order
    pub segments: Vec<Segment>,
    pub result_id: Option<Uuid>,
    pub error: Option<String>,
    pub error_code: Option<FailureCode>,
    pub retry_after_secs: Option<u64>,
    /// Job-level guard owned by the runner currently processing the job
    pub lock_token: Option<Uuid>,
    pub lock_expires_at: Option<DateTime<Utc>>,
    /// Number of times processing has started
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(user_id: impl Into<String>, test_id: impl Into<String>, mut segments: Vec<Segment>) -> Self {
        order_segments(&mut segments);
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            test_id: test_id.into(),
            status: JobStatus::Pending,
            segments,
            result_id: None,
            error: None,
            error_code: None,
            retry_after_secs: None,
            lock_token: None,
            lock_expires_at: None,
            attempts: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn failure(&self) -> Option<JobFailure> {
        self.error_code.map(|code| JobFailure {
            code,
            message: self.error.clone().unwrap_or_default(),
            retry_after_secs: self.retry_after_secs,
        })
    }
}
