//! SQLite implementation of the SecretStore.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use super::format_datetime;
use crate::domain::errors::DomainResult;
use crate::domain::ports::SecretStore;

#[derive(Clone)]
pub struct SqliteSecretRepository {
    pool: SqlitePool,
}

impl SqliteSecretRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SecretStore for SqliteSecretRepository {
    async fn encrypted_secret(&self, user_id: &str, name: &str) -> DomainResult<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT ciphertext FROM user_secrets WHERE user_id = ? AND name = ?")
                .bind(user_id)
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(ciphertext,)| ciphertext))
    }

    async fn put_encrypted_secret(
        &self,
        user_id: &str,
        name: &str,
        ciphertext: &str,
    ) -> DomainResult<()> {
        let now = format_datetime(Utc::now());
        sqlx::query(
            r#"INSERT INTO user_secrets (user_id, name, ciphertext, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?)
               ON CONFLICT (user_id, name)
               DO UPDATE SET ciphertext = excluded.ciphertext, updated_at = excluded.updated_at"#,
        )
        .bind(user_id)
        .bind(name)
        .bind(ciphertext)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_secret(&self, user_id: &str, name: &str) -> DomainResult<bool> {
        let result = sqlx::query("DELETE FROM user_secrets WHERE user_id = ? AND name = ?")
            .bind(user_id)
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
