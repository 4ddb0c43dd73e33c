//! Daily quota ledger.
//!
//! Tracks which (credential, model category) pairs hit a permanent quota block
//! today. Exhaustion is lazy: a bucket dated before today reads as available
//! whether or not it was physically cleared.

use chrono::{NaiveDate, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{ModelCategory, QuotaBucket};
use crate::domain::ports::QuotaRepository;

#[derive(Clone)]
pub struct QuotaLedger {
    repository: Arc<dyn QuotaRepository>,
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

impl QuotaLedger {
    pub fn new(repository: Arc<dyn QuotaRepository>) -> Self {
        Self { repository }
    }

    pub async fn is_exhausted(
        &self,
        credential_id: Uuid,
        category: ModelCategory,
    ) -> DomainResult<bool> {
        self.is_exhausted_on(credential_id, category, today()).await
    }

    pub async fn is_exhausted_on(
        &self,
        credential_id: Uuid,
        category: ModelCategory,
        today: NaiveDate,
    ) -> DomainResult<bool> {
        Ok(self
            .repository
            .get_bucket(credential_id, category)
            .await?
            .is_some_and(|bucket| bucket.is_exhausted_on(today)))
    }

    /// Record today's exhaustion. Errors are logged, never returned.
    pub async fn mark_exhausted(&self, credential_id: Uuid, category: ModelCategory) {
        self.mark_exhausted_on(credential_id, category, today()).await;
    }

    pub async fn mark_exhausted_on(
        &self,
        credential_id: Uuid,
        category: ModelCategory,
        today: NaiveDate,
    ) {
        match self
            .repository
            .put_bucket(credential_id, category, QuotaBucket::exhausted_on(today))
            .await
        {
            Ok(()) => info!(
                credential_id = %credential_id,
                category = %category,
                "Credential quota exhausted for today"
            ),
            Err(e) => warn!(
                credential_id = %credential_id,
                category = %category,
                error = %e,
                "Failed to record quota exhaustion"
            ),
        }
    }

    /// Clear buckets dated before today, for one credential or all of them.
    pub async fn reset_stale(&self, credential_id: Option<Uuid>) -> DomainResult<u64> {
        self.reset_stale_on(credential_id, today()).await
    }

    pub async fn reset_stale_on(
        &self,
        credential_id: Option<Uuid>,
        today: NaiveDate,
    ) -> DomainResult<u64> {
        let cleared = self.repository.reset_stale(credential_id, today).await?;
        if cleared > 0 {
            debug!(cleared, "Cleared stale quota buckets");
        }
        Ok(cleared)
    }

    /// Administrative reset regardless of date.
    pub async fn reset_all(&self, credential_id: Option<Uuid>) -> DomainResult<u64> {
        let cleared = self.repository.reset_all(credential_id).await?;
        info!(cleared, credential_id = ?credential_id, "Quota buckets reset");
        Ok(cleared)
    }
}
