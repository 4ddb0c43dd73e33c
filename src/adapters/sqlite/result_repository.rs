//! SQLite implementation of the ResultRepository.

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{format_datetime, parse_datetime, parse_json_or_default, parse_uuid};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::EvaluationResult;
use crate::domain::ports::ResultRepository;

#[derive(Clone)]
pub struct SqliteResultRepository {
    pool: SqlitePool,
}

impl SqliteResultRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResultRepository for SqliteResultRepository {
    async fn create(&self, result: &EvaluationResult) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO evaluation_results (id, job_id, user_id, test_id, overall_score, criteria,
               report, transcripts, audio_urls, model, caller_provided_key, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(result.id.to_string())
        .bind(result.job_id.to_string())
        .bind(&result.user_id)
        .bind(&result.test_id)
        .bind(result.overall_score)
        .bind(serde_json::to_string(&result.criteria)?)
        .bind(serde_json::to_string(&result.report)?)
        .bind(serde_json::to_string(&result.transcripts)?)
        .bind(serde_json::to_string(&result.audio_urls)?)
        .bind(&result.model)
        .bind(result.caller_provided_key)
        .bind(format_datetime(result.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<EvaluationResult>> {
        let row: Option<ResultRow> = sqlx::query_as("SELECT * FROM evaluation_results WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn get_by_job(&self, job_id: Uuid) -> DomainResult<Option<EvaluationResult>> {
        let row: Option<ResultRow> = sqlx::query_as(
            "SELECT * FROM evaluation_results WHERE job_id = ? ORDER BY created_at DESC LIMIT 1",
        )
        .bind(job_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }
}

#[derive(sqlx::FromRow)]
struct ResultRow {
    id: String,
    job_id: String,
    user_id: String,
    test_id: String,
    overall_score: f64,
    criteria: Option<String>,
    report: Option<String>,
    transcripts: Option<String>,
    audio_urls: Option<String>,
    model: String,
    caller_provided_key: bool,
    created_at: String,
}

impl TryFrom<ResultRow> for EvaluationResult {
    type Error = DomainError;

    fn try_from(row: ResultRow) -> Result<Self, Self::Error> {
        let report = match row.report {
            Some(text) => serde_json::from_str(&text)?,
            None => serde_json::Value::Null,
        };

        Ok(EvaluationResult {
            id: parse_uuid(&row.id)?,
            job_id: parse_uuid(&row.job_id)?,
            user_id: row.user_id,
            test_id: row.test_id,
            overall_score: row.overall_score,
            criteria: parse_json_or_default(row.criteria)?,
            report,
            transcripts: parse_json_or_default(row.transcripts)?,
            audio_urls: parse_json_or_default(row.audio_urls)?,
            model: row.model,
            caller_provided_key: row.caller_provided_key,
            created_at: parse_datetime(&row.created_at)?,
        })
    }
}
