//! SQLite implementation of the CredentialRepository.
//!
//! Checkout runs as one `BEGIN IMMEDIATE` transaction around a conditional
//! `UPDATE … RETURNING`, so the write lock is taken before the eligibility
//! read and two checkouts (from any process sharing the file) can never
//! claim the same row.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::{Sqlite, SqlitePool};
use uuid::Uuid;

use super::quota_repository::load_buckets;
use super::{
    format_date, format_datetime, parse_datetime, parse_optional_datetime, parse_optional_uuid,
    parse_uuid,
};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Credential, ModelCategory};
use crate::domain::ports::CredentialRepository;

const CREDENTIAL_COLUMNS: &str = "id, label, secret, active, error_count, last_used_at, \
     locked_by, lock_expires_at, created_at, updated_at";

#[derive(Clone)]
pub struct SqliteCredentialRepository {
    pool: SqlitePool,
}

impl SqliteCredentialRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn with_quota(&self, row: CredentialRow) -> DomainResult<Credential> {
        let mut credential: Credential = row.try_into()?;
        credential.quota = load_buckets(&self.pool, credential.id).await?;
        Ok(credential)
    }

    async fn claim(
        conn: &mut PoolConnection<Sqlite>,
        run_token: Uuid,
        category: ModelCategory,
        lock_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<CredentialRow>, sqlx::Error> {
        let now_text = format_datetime(now);
        let query = format!(
            r#"UPDATE credentials
               SET locked_by = ?, lock_expires_at = ?, updated_at = ?
               WHERE id = (
                   SELECT c.id FROM credentials c
                   WHERE c.active = 1
                     AND (c.locked_by IS NULL OR c.lock_expires_at IS NULL OR c.lock_expires_at <= ?)
                     AND NOT EXISTS (
                         SELECT 1 FROM credential_quota q
                         WHERE q.credential_id = c.id AND q.category = ?
                           AND q.exhausted = 1 AND q.exhausted_date = ?
                     )
                   ORDER BY c.updated_at ASC, c.error_count ASC
                   LIMIT 1
               )
               RETURNING {CREDENTIAL_COLUMNS}"#
        );

        sqlx::query_as::<_, CredentialRow>(&query)
            .bind(run_token.to_string())
            .bind(format_datetime(lock_until))
            .bind(&now_text)
            .bind(&now_text)
            .bind(category.as_str())
            .bind(format_date(now.date_naive()))
            .fetch_optional(&mut **conn)
            .await
    }
}

/// `COMMIT` a manually opened transaction. sqlx does not track raw `BEGIN`,
/// so a failed commit must roll back here or the connection goes back to
/// the pool mid-transaction.
async fn commit_or_rollback(conn: &mut PoolConnection<Sqlite>) -> Result<(), sqlx::Error> {
    if let Err(e) = sqlx::query("COMMIT").execute(&mut **conn).await {
        if let Err(rollback) = sqlx::query("ROLLBACK").execute(&mut **conn).await {
            tracing::warn!(error = %rollback, "rollback after failed commit failed");
        }
        return Err(e);
    }
    Ok(())
}

#[async_trait]
impl CredentialRepository for SqliteCredentialRepository {
    async fn create(&self, credential: &Credential) -> DomainResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"INSERT INTO credentials (id, label, secret, active, error_count, last_used_at,
               locked_by, lock_expires_at, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(credential.id.to_string())
        .bind(&credential.label)
        .bind(&credential.secret)
        .bind(credential.active)
        .bind(i64::from(credential.error_count))
        .bind(credential.last_used_at.map(format_datetime))
        .bind(credential.locked_by.map(|id| id.to_string()))
        .bind(credential.lock_expires_at.map(format_datetime))
        .bind(format_datetime(credential.created_at))
        .bind(format_datetime(credential.updated_at))
        .execute(&mut *tx)
        .await?;

        for (category, bucket) in &credential.quota {
            sqlx::query(
                r#"INSERT INTO credential_quota (credential_id, category, exhausted, exhausted_date)
                   VALUES (?, ?, ?, ?)"#,
            )
            .bind(credential.id.to_string())
            .bind(category.as_str())
            .bind(bucket.exhausted)
            .bind(bucket.exhausted_date.map(format_date))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<Credential>> {
        let query = format!("SELECT {CREDENTIAL_COLUMNS} FROM credentials WHERE id = ?");
        let row: Option<CredentialRow> = sqlx::query_as(&query)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(self.with_quota(row).await?)),
            None => Ok(None),
        }
    }

    async fn list(&self) -> DomainResult<Vec<Credential>> {
        let query = format!("SELECT {CREDENTIAL_COLUMNS} FROM credentials ORDER BY created_at ASC");
        let rows: Vec<CredentialRow> = sqlx::query_as(&query).fetch_all(&self.pool).await?;

        let mut credentials = Vec::with_capacity(rows.len());
        for row in rows {
            credentials.push(self.with_quota(row).await?);
        }
        Ok(credentials)
    }

    async fn set_active(&self, id: Uuid, active: bool) -> DomainResult<()> {
        let result = sqlx::query("UPDATE credentials SET active = ?, updated_at = ? WHERE id = ?")
            .bind(active)
            .bind(format_datetime(Utc::now()))
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::CredentialNotFound(id));
        }
        Ok(())
    }

    async fn checkout(
        &self,
        run_token: Uuid,
        category: ModelCategory,
        lock_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> DomainResult<Option<Credential>> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        let claimed = match Self::claim(&mut conn, run_token, category, lock_until, now).await {
            Ok(row) => row,
            Err(e) => {
                if let Err(rollback) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
                    tracing::warn!(error = %rollback, "rollback after failed checkout failed");
                }
                return Err(e.into());
            }
        };
        commit_or_rollback(&mut conn).await?;
        drop(conn);

        match claimed {
            Some(row) => {
                let credential = self.with_quota(row).await?;
                tracing::debug!(
                    run_token = %run_token,
                    credential_id = %credential.id,
                    category = %category,
                    "credential checked out"
                );
                Ok(Some(credential))
            }
            None => Ok(None),
        }
    }

    async fn release(&self, run_token: Uuid) -> DomainResult<u64> {
        let result = sqlx::query(
            "UPDATE credentials SET locked_by = NULL, lock_expires_at = NULL WHERE locked_by = ?",
        )
        .bind(run_token.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn record_success(&self, id: Uuid) -> DomainResult<()> {
        let now = format_datetime(Utc::now());
        sqlx::query(
            "UPDATE credentials SET error_count = 0, last_used_at = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&now)
        .bind(&now)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_failure(&self, id: Uuid) -> DomainResult<()> {
        sqlx::query(
            "UPDATE credentials SET error_count = error_count + 1, updated_at = ? WHERE id = ?",
        )
        .bind(format_datetime(Utc::now()))
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct CredentialRow {
    id: String,
    label: String,
    secret: String,
    active: bool,
    error_count: i64,
    last_used_at: Option<String>,
    locked_by: Option<String>,
    lock_expires_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<CredentialRow> for Credential {
    type Error = DomainError;

    fn try_from(row: CredentialRow) -> Result<Self, Self::Error> {
        Ok(Credential {
            id: parse_uuid(&row.id)?,
            label: row.label,
            secret: row.secret,
            active: row.active,
            error_count: u32::try_from(row.error_count).unwrap_or(u32::MAX),
            last_used_at: parse_optional_datetime(row.last_used_at)?,
            locked_by: parse_optional_uuid(row.locked_by)?,
            lock_expires_at: parse_optional_datetime(row.lock_expires_at)?,
            quota: Default::default(),
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{initialize_test_database, SqliteQuotaRepository};
    use crate::domain::models::QuotaBucket;
    use crate::domain::ports::QuotaRepository;
    use chrono::Duration;

    async fn setup() -> (SqliteCredentialRepository, SqliteQuotaRepository) {
        let pool = initialize_test_database().await.unwrap();
        (
            SqliteCredentialRepository::new(pool.clone()),
            SqliteQuotaRepository::new(pool),
        )
    }

    fn credential_updated_at(label: &str, updated_at: DateTime<Utc>) -> Credential {
        let mut credential = Credential::new(label, format!("key-{label}-secret"));
        credential.updated_at = updated_at;
        credential
    }

    #[tokio::test]
    async fn test_create_get_list() {
        let (repo, _) = setup().await;
        let credential = Credential::new("primary", "AIza-primary-0001");
        repo.create(&credential).await.unwrap();

        let fetched = repo.get(credential.id).await.unwrap().unwrap();
        assert_eq!(fetched.label, "primary");
        assert_eq!(fetched.secret, "AIza-primary-0001");
        assert!(fetched.active);
        assert_eq!(repo.list().await.unwrap().len(), 1);
        assert!(repo.get(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_checkout_prefers_least_recently_updated() {
        let (repo, _) = setup().await;
        let now = Utc::now();
        let newer = credential_updated_at("newer", now - Duration::minutes(1));
        let older = credential_updated_at("older", now - Duration::hours(1));
        repo.create(&newer).await.unwrap();
        repo.create(&older).await.unwrap();

        let job = Uuid::new_v4();
        let first = repo
            .checkout(job, ModelCategory::Speech, now + Duration::minutes(5), now)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.id, older.id);
        assert_eq!(first.locked_by, Some(job));

        let second = repo
            .checkout(job, ModelCategory::Speech, now + Duration::minutes(5), now)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.id, newer.id);

        let third = repo
            .checkout(job, ModelCategory::Speech, now + Duration::minutes(5), now)
            .await
            .unwrap();
        assert!(third.is_none());
    }

    #[tokio::test]
    async fn test_checkout_tie_breaks_on_error_count() {
        let (repo, _) = setup().await;
        let now = Utc::now();
        let stamp = now - Duration::hours(1);
        let mut flaky = credential_updated_at("flaky", stamp);
        flaky.error_count = 4;
        let steady = credential_updated_at("steady", stamp);
        repo.create(&flaky).await.unwrap();
        repo.create(&steady).await.unwrap();

        let picked = repo
            .checkout(Uuid::new_v4(), ModelCategory::Speech, now + Duration::minutes(5), now)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(picked.id, steady.id);
    }

    #[tokio::test]
    async fn test_checkout_skips_inactive_and_exhausted() {
        let (repo, quota) = setup().await;
        let now = Utc::now();
        let disabled = credential_updated_at("disabled", now - Duration::hours(3));
        let exhausted = credential_updated_at("exhausted", now - Duration::hours(2));
        let usable = credential_updated_at("usable", now - Duration::hours(1));
        repo.create(&disabled).await.unwrap();
        repo.create(&exhausted).await.unwrap();
        repo.create(&usable).await.unwrap();
        repo.set_active(disabled.id, false).await.unwrap();
        quota
            .put_bucket(
                exhausted.id,
                ModelCategory::Speech,
                QuotaBucket::exhausted_on(now.date_naive()),
            )
            .await
            .unwrap();

        let picked = repo
            .checkout(Uuid::new_v4(), ModelCategory::Speech, now + Duration::minutes(5), now)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(picked.id, usable.id);

        // Exhaustion is category scoped
        let other = repo
            .checkout(Uuid::new_v4(), ModelCategory::Reasoning, now + Duration::minutes(5), now)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(other.id, exhausted.id);
    }

    #[tokio::test]
    async fn test_checkout_ignores_yesterdays_exhaustion() {
        let (repo, quota) = setup().await;
        let now = Utc::now();
        let credential = Credential::new("primary", "key-primary");
        repo.create(&credential).await.unwrap();
        let yesterday = now.date_naive().pred_opt().unwrap();
        quota
            .put_bucket(credential.id, ModelCategory::Speech, QuotaBucket::exhausted_on(yesterday))
            .await
            .unwrap();

        let picked = repo
            .checkout(Uuid::new_v4(), ModelCategory::Speech, now + Duration::minutes(5), now)
            .await
            .unwrap();
        assert!(picked.is_some());
    }

    #[tokio::test]
    async fn test_expired_lock_is_reclaimable() {
        let (repo, _) = setup().await;
        let now = Utc::now();
        let credential = Credential::new("primary", "key-primary");
        repo.create(&credential).await.unwrap();

        let crashed_job = Uuid::new_v4();
        repo.checkout(crashed_job, ModelCategory::Speech, now + Duration::minutes(5), now)
            .await
            .unwrap()
            .unwrap();

        let later = now + Duration::minutes(6);
        let reclaimed = repo
            .checkout(Uuid::new_v4(), ModelCategory::Speech, later + Duration::minutes(5), later)
            .await
            .unwrap();
        assert!(reclaimed.is_some());
    }

    #[tokio::test]
    async fn test_release_is_idempotent_and_scoped() {
        let (repo, _) = setup().await;
        let now = Utc::now();
        let a = credential_updated_at("a", now - Duration::hours(2));
        let b = credential_updated_at("b", now - Duration::hours(1));
        repo.create(&a).await.unwrap();
        repo.create(&b).await.unwrap();

        let job_a = Uuid::new_v4();
        let job_b = Uuid::new_v4();
        repo.checkout(job_a, ModelCategory::Speech, now + Duration::minutes(5), now)
            .await
            .unwrap()
            .unwrap();
        repo.checkout(job_b, ModelCategory::Speech, now + Duration::minutes(5), now)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(repo.release(job_a).await.unwrap(), 1);
        assert_eq!(repo.release(job_a).await.unwrap(), 0);

        let a_after = repo.get(a.id).await.unwrap().unwrap();
        let b_after = repo.get(b.id).await.unwrap().unwrap();
        assert!(a_after.locked_by.is_none());
        assert_eq!(b_after.locked_by, Some(job_b));
    }

    #[tokio::test]
    async fn test_error_counter() {
        let (repo, _) = setup().await;
        let credential = Credential::new("primary", "key-primary");
        repo.create(&credential).await.unwrap();

        repo.record_failure(credential.id).await.unwrap();
        repo.record_failure(credential.id).await.unwrap();
        assert_eq!(repo.get(credential.id).await.unwrap().unwrap().error_count, 2);

        repo.record_success(credential.id).await.unwrap();
        let after = repo.get(credential.id).await.unwrap().unwrap();
        assert_eq!(after.error_count, 0);
        assert!(after.last_used_at.is_some());
    }

    #[tokio::test]
    async fn test_set_active_unknown_credential() {
        let (repo, _) = setup().await;
        let err = repo.set_active(Uuid::new_v4(), false).await.unwrap_err();
        assert!(matches!(err, DomainError::CredentialNotFound(_)));
    }

    #[tokio::test]
    async fn test_failed_commit_leaves_no_open_transaction() {
        let pool = crate::adapters::sqlite::create_test_pool().await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        sqlx::query("CREATE TEMP TABLE parent (id INTEGER PRIMARY KEY)")
            .execute(&mut *conn)
            .await
            .unwrap();
        sqlx::query(
            "CREATE TEMP TABLE child (parent_id INTEGER REFERENCES parent(id) DEFERRABLE INITIALLY DEFERRED)",
        )
        .execute(&mut *conn)
        .await
        .unwrap();

        // The deferred foreign key only fails at COMMIT.
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await.unwrap();
        sqlx::query("INSERT INTO child (parent_id) VALUES (42)")
            .execute(&mut *conn)
            .await
            .unwrap();
        assert!(commit_or_rollback(&mut conn).await.is_err());

        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await.unwrap();
        sqlx::query("ROLLBACK").execute(&mut *conn).await.unwrap();
        let (rows,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM child")
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert_eq!(rows, 0);
    }
}
