//! Wiring of repositories, adapters and services from configuration.

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{info, warn};

use crate::adapters::model::{GenerativeApiClient, GenerativeApiConfig};
use crate::adapters::sqlite::{
    initialize_database, PoolConfig as SqlitePoolConfig, SqliteCredentialRepository,
    SqliteJobRepository, SqliteQuotaRepository, SqliteResultRepository, SqliteSecretRepository,
};
use crate::adapters::storage::FsObjectStore;
use crate::domain::models::Config;
use crate::domain::ports::{
    CredentialRepository, JobRepository, ModelClient, ObjectStore, QuotaRepository,
    ResultRepository, SecretStore,
};
use crate::infrastructure::crypto::SecretCipher;
use crate::services::{
    AudioLoader, CallerSecretSource, CandidateQueueBuilder, CredentialPool, DriverSettings,
    EvaluationDriver, EvaluationService, GenerationSettings, JobRunner, JobRunnerConfig,
    JobService, MaintenanceDaemon, MaintenanceDaemonConfig, QuotaLedger, ResultAssembler,
    RetryPolicy,
};

/// Storage-facing dependencies. Tests swap individual entries.
#[derive(Clone)]
pub struct Repositories {
    pub credentials: Arc<dyn CredentialRepository>,
    pub quota: Arc<dyn QuotaRepository>,
    pub jobs: Arc<dyn JobRepository>,
    pub results: Arc<dyn ResultRepository>,
    pub secrets: Arc<dyn SecretStore>,
    pub objects: Arc<dyn ObjectStore>,
}

impl Repositories {
    pub fn sqlite(pool: &SqlitePool, objects: Arc<dyn ObjectStore>) -> Self {
        Self {
            credentials: Arc::new(SqliteCredentialRepository::new(pool.clone())),
            quota: Arc::new(SqliteQuotaRepository::new(pool.clone())),
            jobs: Arc::new(SqliteJobRepository::new(pool.clone())),
            results: Arc::new(SqliteResultRepository::new(pool.clone())),
            secrets: Arc::new(SqliteSecretRepository::new(pool.clone())),
            objects,
        }
    }
}

/// Every service the API, CLI and daemon need.
#[derive(Clone)]
pub struct AppContext {
    pub config: Config,
    pub repositories: Repositories,
    pub pool: CredentialPool,
    pub ledger: QuotaLedger,
    pub cipher: Option<SecretCipher>,
    pub evaluation: EvaluationService,
    pub jobs: JobService,
}

impl AppContext {
    /// Build from already constructed dependencies.
    pub fn new(
        config: Config,
        repositories: Repositories,
        model_client: Arc<dyn ModelClient>,
    ) -> Result<Self> {
        let cipher = match config.secrets.encryption_key.as_deref() {
            Some(key) if !key.is_empty() => Some(
                SecretCipher::from_passphrase(key).context("Invalid secrets.encryption_key")?,
            ),
            _ => {
                warn!("No secrets.encryption_key configured; stored user API keys are ignored");
                None
            }
        };

        let pool = CredentialPool::new(repositories.credentials.clone(), &config.pool);
        let ledger = QuotaLedger::new(repositories.quota.clone());

        let queue = CandidateQueueBuilder::new(
            pool.clone(),
            ledger.clone(),
            CallerSecretSource {
                store: repositories.secrets.clone(),
                cipher: cipher.clone(),
                secret_name: config.secrets.secret_name.clone(),
            },
            config.pool.max_candidates,
        );
        let driver = EvaluationDriver::new(
            model_client,
            pool.clone(),
            ledger.clone(),
            repositories.jobs.clone(),
            DriverSettings {
                models: config.model_api.models.clone(),
                retry: RetryPolicy::from(&config.retry),
                client_retry_after_secs: config.retry.client_retry_after_secs,
                weights: config.scoring,
            },
        );
        let evaluation = EvaluationService::new(
            AudioLoader::new(
                repositories.objects.clone(),
                config.storage.public_base_url.clone(),
            ),
            queue,
            pool.clone(),
            driver,
            ResultAssembler::new(repositories.results.clone(), config.scoring),
            GenerationSettings {
                temperature: config.model_api.temperature,
                max_output_tokens: config.model_api.max_output_tokens,
            },
        );
        let runner = JobRunner::new(
            repositories.jobs.clone(),
            evaluation.clone(),
            JobRunnerConfig::from(&config.jobs),
        );
        let jobs = JobService::new(repositories.jobs.clone(), repositories.results.clone(), runner);

        Ok(Self {
            config,
            repositories,
            pool,
            ledger,
            cipher,
            evaluation,
            jobs,
        })
    }

    /// Open the configured database and object store and talk to the real model API.
    pub async fn from_config(config: Config) -> Result<Self> {
        let db = initialize_database(
            &config.database.url(),
            Some(SqlitePoolConfig::from(&config.database)),
        )
        .await
        .context("Failed to initialize database")?;
        info!(path = %config.database.path, "Database ready");

        let objects: Arc<dyn ObjectStore> = Arc::new(FsObjectStore::new(config.storage.root.clone()));
        let client = GenerativeApiClient::new(GenerativeApiConfig::from(&config.model_api))
            .context("Failed to build model API client")?;

        let repositories = Repositories::sqlite(&db, objects);
        Self::new(config, repositories, Arc::new(client))
    }

    pub fn maintenance_daemon(&self) -> MaintenanceDaemon {
        MaintenanceDaemon::new(
            self.ledger.clone(),
            self.repositories.jobs.clone(),
            MaintenanceDaemonConfig::from(&self.config.maintenance),
        )
    }
}
