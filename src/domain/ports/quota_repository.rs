use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{ModelCategory, QuotaBucket};

/// Storage for per (credential, category) quota buckets.
#[async_trait]
pub trait QuotaRepository: Send + Sync {
    /// Read one bucket. Missing rows read as `None`.
    async fn get_bucket(
        &self,
        credential_id: Uuid,
        category: ModelCategory,
    ) -> DomainResult<Option<QuotaBucket>>;

    /// All buckets of one credential.
    async fn buckets_for(
        &self,
        credential_id: Uuid,
    ) -> DomainResult<HashMap<ModelCategory, QuotaBucket>>;

    /// Insert or overwrite one bucket.
    async fn put_bucket(
        &self,
        credential_id: Uuid,
        category: ModelCategory,
        bucket: QuotaBucket,
    ) -> DomainResult<()>;

    /// Clear buckets dated before `today`, for one credential or all.
    async fn reset_stale(&self, credential_id: Option<Uuid>, today: NaiveDate) -> DomainResult<u64>;

    /// Clear every bucket regardless of date, for one credential or all.
    async fn reset_all(&self, credential_id: Option<Uuid>) -> DomainResult<u64>;
}
