//! SQLite implementation of the QuotaRepository.

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::SqlitePool;
use std::collections::HashMap;
use uuid::Uuid;

use super::{format_date, parse_optional_date};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ModelCategory, QuotaBucket};
use crate::domain::ports::QuotaRepository;

#[derive(Clone)]
pub struct SqliteQuotaRepository {
    pool: SqlitePool,
}

impl SqliteQuotaRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct QuotaRow {
    category: String,
    exhausted: bool,
    exhausted_date: Option<String>,
}

impl QuotaRow {
    fn into_entry(self) -> DomainResult<(ModelCategory, QuotaBucket)> {
        let category = ModelCategory::from_str(&self.category).ok_or_else(|| {
            DomainError::SerializationError(format!("Invalid category: {}", self.category))
        })?;
        let bucket = QuotaBucket {
            exhausted: self.exhausted,
            exhausted_date: parse_optional_date(self.exhausted_date)?,
        };
        Ok((category, bucket))
    }
}

/// Load every bucket of one credential. Shared with the credential repository.
pub(crate) async fn load_buckets(
    pool: &SqlitePool,
    credential_id: Uuid,
) -> DomainResult<HashMap<ModelCategory, QuotaBucket>> {
    let rows: Vec<QuotaRow> = sqlx::query_as(
        "SELECT category, exhausted, exhausted_date FROM credential_quota WHERE credential_id = ?",
    )
    .bind(credential_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(QuotaRow::into_entry).collect()
}

#[async_trait]
impl QuotaRepository for SqliteQuotaRepository {
    async fn get_bucket(
        &self,
        credential_id: Uuid,
        category: ModelCategory,
    ) -> DomainResult<Option<QuotaBucket>> {
        let row: Option<QuotaRow> = sqlx::query_as(
            r#"SELECT category, exhausted, exhausted_date FROM credential_quota
               WHERE credential_id = ? AND category = ?"#,
        )
        .bind(credential_id.to_string())
        .bind(category.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.into_entry().map(|(_, bucket)| bucket))
            .transpose()
    }

    async fn buckets_for(
        &self,
        credential_id: Uuid,
    ) -> DomainResult<HashMap<ModelCategory, QuotaBucket>> {
        load_buckets(&self.pool, credential_id).await
    }

    async fn put_bucket(
        &self,
        credential_id: Uuid,
        category: ModelCategory,
        bucket: QuotaBucket,
    ) -> DomainResult<()> {
        let result = sqlx::query(
            r#"INSERT INTO credential_quota (credential_id, category, exhausted, exhausted_date)
               VALUES (?, ?, ?, ?)
               ON CONFLICT (credential_id, category)
               DO UPDATE SET exhausted = excluded.exhausted, exhausted_date = excluded.exhausted_date"#,
        )
        .bind(credential_id.to_string())
        .bind(category.as_str())
        .bind(bucket.exhausted)
        .bind(bucket.exhausted_date.map(format_date))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_foreign_key_violation() => {
                Err(DomainError::CredentialNotFound(credential_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn reset_stale(&self, credential_id: Option<Uuid>, today: NaiveDate) -> DomainResult<u64> {
        let result = sqlx::query(
            r#"UPDATE credential_quota SET exhausted = 0, exhausted_date = NULL
               WHERE exhausted_date IS NOT NULL AND exhausted_date < ?
                 AND (? IS NULL OR credential_id = ?)"#,
        )
        .bind(format_date(today))
        .bind(credential_id.map(|id| id.to_string()))
        .bind(credential_id.map(|id| id.to_string()))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn reset_all(&self, credential_id: Option<Uuid>) -> DomainResult<u64> {
        let result = sqlx::query(
            r#"UPDATE credential_quota SET exhausted = 0, exhausted_date = NULL
               WHERE (exhausted = 1 OR exhausted_date IS NOT NULL)
                 AND (? IS NULL OR credential_id = ?)"#,
        )
        .bind(credential_id.map(|id| id.to_string()))
        .bind(credential_id.map(|id| id.to_string()))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
