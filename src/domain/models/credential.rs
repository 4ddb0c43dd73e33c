//! Credential domain model.
//!
//! A credential is one shared third-party API key. Quota exhaustion is tracked
//! per model category so that one feature burning its daily quota does not
//! block unrelated features sharing the same pool.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Partition of quota tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelCategory {
    /// Audio-capable models used for speech evaluation
    Speech,
    /// Deep-reasoning models
    Reasoning,
    /// Fast, cheap models
    Lightweight,
}

impl ModelCategory {
    pub const ALL: [ModelCategory; 3] = [Self::Speech, Self::Reasoning, Self::Lightweight];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Speech => "speech",
            Self::Reasoning => "reasoning",
            Self::Lightweight => "lightweight",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "speech" => Some(Self::Speech),
            "reasoning" => Some(Self::Reasoning),
            "lightweight" => Some(Self::Lightweight),
            _ => None,
        }
    }
}

impl fmt::Display for ModelCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Daily quota state of one (credential, category) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaBucket {
    pub exhausted: bool,
    pub exhausted_date: Option<NaiveDate>,
}

impl QuotaBucket {
    pub fn exhausted_on(date: NaiveDate) -> Self {
        Self {
            exhausted: true,
            exhausted_date: Some(date),
        }
    }

    /// Exhaustion only counts on the day it was recorded.
    pub fn is_exhausted_on(&self, today: NaiveDate) -> bool {
        self.exhausted && self.exhausted_date == Some(today)
    }

    /// A bucket recorded on an earlier day may be physically cleared.
    pub fn is_stale_on(&self, today: NaiveDate) -> bool {
        self.exhausted_date.is_some_and(|d| d < today)
    }
}

/// A shared API key in the pool.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub id: Uuid,
    /// Human readable label for operators
    pub label: String,
    /// The raw API key
    pub secret: String,
    pub active: bool,
    pub error_count: u32,
    pub last_used_at: Option<DateTime<Utc>>,
    /// Job currently holding the lock
    pub locked_by: Option<Uuid>,
    pub lock_expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub quota: HashMap<ModelCategory, QuotaBucket>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Credential {
    pub fn new(label: impl Into<String>, secret: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            label: label.into(),
            secret: secret.into(),
            active: true,
            error_count: 0,
            last_used_at: None,
            locked_by: None,
            lock_expires_at: None,
            quota: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// A lock counts only while its holder is set and the expiry is in the future.
    pub fn is_locked_at(&self, now: DateTime<Utc>) -> bool {
        match (self.locked_by, self.lock_expires_at) {
            (Some(_), Some(expires)) => expires > now,
            _ => false,
        }
    }

    pub fn is_exhausted_on(&self, category: ModelCategory, today: NaiveDate) -> bool {
        self.quota
            .get(&category)
            .is_some_and(|bucket| bucket.is_exhausted_on(today))
    }

    /// Secret with everything but the last four characters hidden.
    pub fn masked_secret(&self) -> String {
        mask_secret(&self.secret)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("secret", &self.masked_secret())
            .field("active", &self.active)
            .field("error_count", &self.error_count)
            .field("locked_by", &self.locked_by)
            .field("lock_expires_at", &self.lock_expires_at)
            .field("quota", &self.quota)
            .finish_non_exhaustive()
    }
}

pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{}", "*".repeat(chars.len().min(12) - 4), tail)
}

/// Where a candidate API key came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateSource {
    /// Supplied by the caller (request header or the user's stored secret).
    /// Never written to the quota ledger.
    CallerProvided,
    /// Checked out of the shared pool.
    Pool(Uuid),
}

/// One entry in the ordered list of keys the driver will try.
#[derive(Clone)]
pub struct Candidate {
    pub api_key: String,
    pub source: CandidateSource,
}

impl Candidate {
    pub fn caller(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            source: CandidateSource::CallerProvided,
        }
    }

    pub fn pool(credential: &Credential) -> Self {
        Self {
            api_key: credential.secret.clone(),
            source: CandidateSource::Pool(credential.id),
        }
    }

    pub fn credential_id(&self) -> Option<Uuid> {
        match self.source {
            CandidateSource::Pool(id) => Some(id),
            CandidateSource::CallerProvided => None,
        }
    }

    pub fn is_caller_provided(&self) -> bool {
        matches!(self.source, CandidateSource::CallerProvided)
    }
}

impl fmt::Debug for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Candidate")
            .field("api_key", &mask_secret(&self.api_key))
            .field("source", &self.source)
            .finish()
    }
}
