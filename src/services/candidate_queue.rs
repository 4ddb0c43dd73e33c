//! Builds the ordered list of API keys one evaluation run will try.

use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Candidate, ModelCategory, ModelSpec};
use crate::domain::ports::SecretStore;
use crate::infrastructure::crypto::SecretCipher;
use crate::services::credential_pool::CredentialPool;
use crate::services::quota_ledger::QuotaLedger;

/// Where to find the caller's own stored key.
#[derive(Clone)]
pub struct CallerSecretSource {
    pub store: Arc<dyn SecretStore>,
    /// `None` when no application encryption key is configured
    pub cipher: Option<SecretCipher>,
    pub secret_name: String,
}

#[derive(Clone)]
pub struct CandidateQueueBuilder {
    pool: CredentialPool,
    ledger: QuotaLedger,
    secrets: CallerSecretSource,
    max_candidates: usize,
}

/// Distinct categories in model priority order.
pub fn categories_in_priority_order(models: &[ModelSpec]) -> Vec<ModelCategory> {
    let mut categories = Vec::new();
    for model in models {
        if !categories.contains(&model.category) {
            categories.push(model.category);
        }
    }
    categories
}

impl CandidateQueueBuilder {
    pub fn new(
        pool: CredentialPool,
        ledger: QuotaLedger,
        secrets: CallerSecretSource,
        max_candidates: usize,
    ) -> Self {
        Self {
            pool,
            ledger,
            secrets,
            max_candidates,
        }
    }

    /// Build a fresh queue for the evaluation run `run_token`.
    ///
    /// The caller's key, if any, comes first and is never locked. Pool keys
    /// follow, each locked to the run. An empty result is a valid outcome.
    pub async fn build(
        &self,
        run_token: Uuid,
        user_id: &str,
        header_key: Option<&str>,
        models: &[ModelSpec],
    ) -> DomainResult<Vec<Candidate>> {
        if let Err(e) = self.ledger.reset_stale(None).await {
            warn!(error = %e, "Failed to reset stale quota buckets");
        }

        let mut queue = Vec::new();
        if let Some(key) = self.caller_key(user_id, header_key).await {
            queue.push(Candidate::caller(key));
        }

        'categories: for category in categories_in_priority_order(models) {
            loop {
                if queue.iter().filter(|c| !c.is_caller_provided()).count()
                    >= self.max_candidates
                {
                    break 'categories;
                }
                match self.pool.checkout(run_token, category).await? {
                    Some(credential) => queue.push(Candidate::pool(&credential)),
                    None => break,
                }
            }
        }

        debug!(
            run_token = %run_token,
            candidates = queue.len(),
            caller_provided = queue.first().is_some_and(Candidate::is_caller_provided),
            "Candidate queue built"
        );
        Ok(queue)
    }

    /// Request header first, then the user's stored secret. Lookup and decrypt
    /// failures are logged and treated as "no caller key".
    async fn caller_key(&self, user_id: &str, header_key: Option<&str>) -> Option<String> {
        if let Some(key) = header_key.map(str::trim).filter(|k| !k.is_empty()) {
            return Some(key.to_string());
        }

        let encrypted = match self
            .secrets
            .store
            .encrypted_secret(user_id, &self.secrets.secret_name)
            .await
        {
            Ok(Some(encrypted)) => encrypted,
            Ok(None) => return None,
            Err(e) => {
                warn!(user_id, error = %e, "Failed to look up stored API key");
                return None;
            }
        };

        let Some(cipher) = &self.secrets.cipher else {
            warn!(user_id, "Stored API key present but no encryption key configured");
            return None;
        };

        match cipher.decrypt(&encrypted) {
            Ok(key) if !key.trim().is_empty() => Some(key.trim().to_string()),
            Ok(_) => None,
            Err(e) => {
                warn!(user_id, error = %e, "Failed to decrypt stored API key");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{
        initialize_test_database, SqliteCredentialRepository, SqliteQuotaRepository,
        SqliteSecretRepository,
    };
    use crate::domain::models::{CandidateSource, Credential, PoolConfig};
    use crate::domain::ports::CredentialRepository;
    use sqlx::SqlitePool;

    const PASSPHRASE: &str = "test-application-key";

    fn models() -> Vec<ModelSpec> {
        vec![
            ModelSpec::new("pro", ModelCategory::Reasoning),
            ModelSpec::new("flash", ModelCategory::Speech),
            ModelSpec::new("pro-2", ModelCategory::Reasoning),
        ]
    }

    async fn builder(db: &SqlitePool, max_candidates: usize) -> CandidateQueueBuilder {
        let credentials = Arc::new(SqliteCredentialRepository::new(db.clone()));
        let quota = Arc::new(SqliteQuotaRepository::new(db.clone()));
        CandidateQueueBuilder::new(
            CredentialPool::new(credentials, &PoolConfig::default()),
            QuotaLedger::new(quota),
            CallerSecretSource {
                store: Arc::new(SqliteSecretRepository::new(db.clone())),
                cipher: Some(SecretCipher::from_passphrase(PASSPHRASE).unwrap()),
                secret_name: "model_api_key".to_string(),
            },
            max_candidates,
        )
    }

    async fn seed(db: &SqlitePool, n: usize) -> Vec<Uuid> {
        let repo = SqliteCredentialRepository::new(db.clone());
        let mut ids = Vec::new();
        for i in 0..n {
            let credential = Credential::new(format!("k{i}"), format!("pool-key-{i:04}"));
            repo.create(&credential).await.unwrap();
            ids.push(credential.id);
        }
        ids
    }

    #[test]
    fn test_categories_dedup_in_priority_order() {
        assert_eq!(
            categories_in_priority_order(&models()),
            vec![ModelCategory::Reasoning, ModelCategory::Speech]
        );
    }

    #[tokio::test]
    async fn test_header_key_first_then_pool() {
        let db = initialize_test_database().await.unwrap();
        seed(&db, 2).await;
        let queue = builder(&db, 5)
            .await
            .build(Uuid::new_v4(), "user-1", Some(" caller-key "), &models())
            .await
            .unwrap();

        assert_eq!(queue.len(), 3);
        assert_eq!(queue[0].api_key, "caller-key");
        assert_eq!(queue[0].source, CandidateSource::CallerProvided);
        assert!(queue[1..].iter().all(|c| c.credential_id().is_some()));
    }

    #[tokio::test]
    async fn test_stored_secret_used_when_no_header() {
        let db = initialize_test_database().await.unwrap();
        let cipher = SecretCipher::from_passphrase(PASSPHRASE).unwrap();
        SqliteSecretRepository::new(db.clone())
            .put_encrypted_secret("user-1", "model_api_key", &cipher.encrypt("stored-key").unwrap())
            .await
            .unwrap();

        let queue = builder(&db, 5)
            .await
            .build(Uuid::new_v4(), "user-1", None, &models())
            .await
            .unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].api_key, "stored-key");
        assert!(queue[0].is_caller_provided());
    }

    #[tokio::test]
    async fn test_undecryptable_secret_is_skipped() {
        let db = initialize_test_database().await.unwrap();
        let other = SecretCipher::from_passphrase("some-other-key").unwrap();
        SqliteSecretRepository::new(db.clone())
            .put_encrypted_secret("user-1", "model_api_key", &other.encrypt("stored-key").unwrap())
            .await
            .unwrap();
        seed(&db, 1).await;

        let queue = builder(&db, 5)
            .await
            .build(Uuid::new_v4(), "user-1", None, &models())
            .await
            .unwrap();
        assert_eq!(queue.len(), 1);
        assert!(!queue[0].is_caller_provided());
    }

    #[tokio::test]
    async fn test_pool_cap_and_locking() {
        let db = initialize_test_database().await.unwrap();
        seed(&db, 4).await;
        let job = Uuid::new_v4();
        let queue = builder(&db, 3)
            .await
            .build(job, "user-1", None, &models())
            .await
            .unwrap();
        assert_eq!(queue.len(), 3);

        let locked = SqliteCredentialRepository::new(db.clone())
            .list()
            .await
            .unwrap()
            .into_iter()
            .filter(|c| c.locked_by == Some(job))
            .count();
        assert_eq!(locked, 3);
    }

    #[tokio::test]
    async fn test_empty_queue() {
        let db = initialize_test_database().await.unwrap();
        let queue = builder(&db, 5)
            .await
            .build(Uuid::new_v4(), "user-1", None, &models())
            .await
            .unwrap();
        assert!(queue.is_empty());
    }
}
