use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::EvaluationResult;

/// Write-once storage for evaluation results.
#[async_trait]
pub trait ResultRepository: Send + Sync {
    async fn create(&self, result: &EvaluationResult) -> DomainResult<()>;

    async fn get(&self, id: Uuid) -> DomainResult<Option<EvaluationResult>>;

    async fn get_by_job(&self, job_id: Uuid) -> DomainResult<Option<EvaluationResult>>;
}
