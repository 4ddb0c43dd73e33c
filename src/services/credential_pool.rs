//! Credential pool service.
//!
//! Thin policy layer over the credential repository: lock duration, admin
//! operations and outcome bookkeeping. Mutual exclusion lives in storage.

use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Credential, ModelCategory, PoolConfig};
use crate::domain::ports::CredentialRepository;

#[derive(Clone)]
pub struct CredentialPool {
    repository: Arc<dyn CredentialRepository>,
    lock_minutes: i64,
}

impl CredentialPool {
    pub fn new(repository: Arc<dyn CredentialRepository>, config: &PoolConfig) -> Self {
        Self {
            repository,
            lock_minutes: config.lock_minutes,
        }
    }

    /// Register a new pool key.
    pub async fn add(&self, label: &str, secret: &str) -> DomainResult<Credential> {
        let secret = secret.trim();
        if secret.is_empty() {
            return Err(DomainError::ValidationFailed(
                "API key cannot be empty".to_string(),
            ));
        }
        let credential = Credential::new(label.trim(), secret);
        self.repository.create(&credential).await?;
        info!(
            credential_id = %credential.id,
            label = %credential.label,
            secret = %credential.masked_secret(),
            "Credential added to pool"
        );
        Ok(credential)
    }

    pub async fn list(&self) -> DomainResult<Vec<Credential>> {
        self.repository.list().await
    }

    pub async fn get(&self, id: Uuid) -> DomainResult<Credential> {
        self.repository
            .get(id)
            .await?
            .ok_or(DomainError::CredentialNotFound(id))
    }

    pub async fn set_active(&self, id: Uuid, active: bool) -> DomainResult<()> {
        self.repository.set_active(id, active).await?;
        info!(credential_id = %id, active, "Credential availability changed");
        Ok(())
    }

    /// Lock one eligible credential to `run_token` for the configured duration.
    ///
    /// `None` means nothing is available right now.
    pub async fn checkout(
        &self,
        run_token: Uuid,
        category: ModelCategory,
    ) -> DomainResult<Option<Credential>> {
        let now = Utc::now();
        let lock_until = now + Duration::minutes(self.lock_minutes);
        let credential = self
            .repository
            .checkout(run_token, category, lock_until, now)
            .await?;
        if credential.is_none() {
            debug!(run_token = %run_token, category = %category, "No pool credential available");
        }
        Ok(credential)
    }

    /// Release every lock held by `run_token`. Failures are logged; locks expire anyway.
    pub async fn release(&self, run_token: Uuid) {
        match self.repository.release(run_token).await {
            Ok(released) if released > 0 => {
                debug!(run_token = %run_token, released, "Released pool credentials");
            }
            Ok(_) => {}
            Err(e) => warn!(run_token = %run_token, error = %e, "Failed to release pool credentials"),
        }
    }

    pub async fn record_success(&self, id: Uuid) {
        if let Err(e) = self.repository.record_success(id).await {
            warn!(credential_id = %id, error = %e, "Failed to record credential success");
        }
    }

    pub async fn record_failure(&self, id: Uuid) {
        if let Err(e) = self.repository.record_failure(id).await {
            warn!(credential_id = %id, error = %e, "Failed to record credential failure");
        }
    }
}
