//! SQLite implementation of the JobRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{
    format_datetime, parse_datetime, parse_json_or_default, parse_optional_datetime,
    parse_optional_uuid, parse_uuid,
};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{FailureCode, Job, JobFailure, JobStatus};
use crate::domain::ports::{JobFilters, JobRepository};

#[derive(Clone)]
pub struct SqliteJobRepository {
    pool: SqlitePool,
}

impl SqliteJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobRepository for SqliteJobRepository {
    async fn create_replacing_active(&self, job: &Job, reason: &str) -> DomainResult<Vec<Uuid>> {
        let segments_json = serde_json::to_string(&job.segments)?;
        let now = format_datetime(Utc::now());
        let mut tx = self.pool.begin().await?;

        sqlx::query(&release_run_locks_sql("user_id = ? AND test_id = ?"))
            .bind(&job.user_id)
            .bind(&job.test_id)
            .execute(&mut *tx)
            .await?;

        let cancelled: Vec<(String,)> = sqlx::query_as(
            r#"UPDATE jobs
               SET status = 'failed', error = ?, error_code = ?, retry_after_secs = NULL,
                   lock_token = NULL, lock_expires_at = NULL, updated_at = ?, completed_at = ?
               WHERE user_id = ? AND test_id = ? AND status IN ('pending', 'processing')
               RETURNING id"#,
        )
        .bind(reason)
        .bind(FailureCode::Cancelled.as_str())
        .bind(&now)
        .bind(&now)
        .bind(&job.user_id)
        .bind(&job.test_id)
        .fetch_all(&mut *tx)
        .await?;

        sqlx::query(
            r#"INSERT INTO jobs (id, user_id, test_id, status, segments, result_id, error, error_code,
               retry_after_secs, lock_token, lock_expires_at, attempts, created_at, updated_at, completed_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(job.id.to_string())
        .bind(&job.user_id)
        .bind(&job.test_id)
        .bind(job.status.as_str())
        .bind(&segments_json)
        .bind(job.result_id.map(|id| id.to_string()))
        .bind(&job.error)
        .bind(job.error_code.map(|c| c.as_str()))
        .bind(job.retry_after_secs.map(|s| i64::try_from(s).unwrap_or(i64::MAX)))
        .bind(job.lock_token.map(|id| id.to_string()))
        .bind(job.lock_expires_at.map(format_datetime))
        .bind(i64::from(job.attempts))
        .bind(format_datetime(job.created_at))
        .bind(format_datetime(job.updated_at))
        .bind(job.completed_at.map(format_datetime))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        cancelled.into_iter().map(|(id,)| parse_uuid(&id)).collect()
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<Job>> {
        let row: Option<JobRow> = sqlx::query_as("SELECT * FROM jobs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn list(&self, filters: JobFilters) -> DomainResult<Vec<Job>> {
        let mut query = String::from("SELECT * FROM jobs WHERE 1=1");
        let mut bindings: Vec<String> = Vec::new();

        if let Some(user_id) = &filters.user_id {
            query.push_str(" AND user_id = ?");
            bindings.push(user_id.clone());
        }
        if let Some(test_id) = &filters.test_id {
            query.push_str(" AND test_id = ?");
            bindings.push(test_id.clone());
        }
        if let Some(status) = &filters.status {
            query.push_str(" AND status = ?");
            bindings.push(status.as_str().to_string());
        }

        query.push_str(" ORDER BY created_at DESC");
        if let Some(limit) = filters.limit {
            query.push_str(&format!(" LIMIT {}", limit.max(0)));
        }

        let mut q = sqlx::query_as::<_, JobRow>(&query);
        for binding in &bindings {
            q = q.bind(binding);
        }

        let rows: Vec<JobRow> = q.fetch_all(&self.pool).await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn start_processing(
        &self,
        id: Uuid,
        lock_token: Uuid,
        lock_expires_at: DateTime<Utc>,
    ) -> DomainResult<bool> {
        let result = sqlx::query(
            r#"UPDATE jobs
               SET status = 'processing', lock_token = ?, lock_expires_at = ?,
                   attempts = attempts + 1, updated_at = ?
               WHERE id = ? AND status = 'pending'"#,
        )
        .bind(lock_token.to_string())
        .bind(format_datetime(lock_expires_at))
        .bind(format_datetime(Utc::now()))
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn complete(&self, id: Uuid, lock_token: Uuid, result_id: Option<Uuid>) -> DomainResult<bool> {
        let now = format_datetime(Utc::now());
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"UPDATE jobs
               SET status = 'completed', result_id = ?, error = NULL, error_code = NULL,
                   retry_after_secs = NULL, lock_token = NULL, lock_expires_at = NULL,
                   updated_at = ?, completed_at = ?
               WHERE id = ? AND status = 'processing' AND lock_token = ?"#,
        )
        .bind(result_id.map(|id| id.to_string()))
        .bind(&now)
        .bind(&now)
        .bind(id.to_string())
        .bind(lock_token.to_string())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 1 {
            release_token_locks(&mut *tx, lock_token).await?;
        }
        tx.commit().await?;
        Ok(result.rows_affected() == 1)
    }

    async fn fail_run(&self, id: Uuid, lock_token: Uuid, failure: &JobFailure) -> DomainResult<bool> {
        let now = format_datetime(Utc::now());
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"UPDATE jobs
               SET status = 'failed', error = ?, error_code = ?, retry_after_secs = ?,
                   lock_token = NULL, lock_expires_at = NULL, updated_at = ?, completed_at = ?
               WHERE id = ? AND status = 'processing' AND lock_token = ?"#,
        )
        .bind(&failure.message)
        .bind(failure.code.as_str())
        .bind(retry_after_column(failure))
        .bind(&now)
        .bind(&now)
        .bind(id.to_string())
        .bind(lock_token.to_string())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 1 {
            release_token_locks(&mut *tx, lock_token).await?;
        }
        tx.commit().await?;
        Ok(result.rows_affected() == 1)
    }

    async fn fail(&self, id: Uuid, failure: &JobFailure) -> DomainResult<bool> {
        let now = format_datetime(Utc::now());
        let mut tx = self.pool.begin().await?;

        sqlx::query(&release_run_locks_sql("id = ?"))
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query(
            r#"UPDATE jobs
               SET status = 'failed', error = ?, error_code = ?, retry_after_secs = ?,
                   lock_token = NULL, lock_expires_at = NULL, updated_at = ?, completed_at = ?
               WHERE id = ? AND status IN ('pending', 'processing')"#,
        )
        .bind(&failure.message)
        .bind(failure.code.as_str())
        .bind(retry_after_column(failure))
        .bind(&now)
        .bind(&now)
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(result.rows_affected() == 1)
    }

    async fn fail_active_for_test(
        &self,
        user_id: &str,
        test_id: &str,
        failure: &JobFailure,
    ) -> DomainResult<u64> {
        let now = format_datetime(Utc::now());
        let mut tx = self.pool.begin().await?;

        sqlx::query(&release_run_locks_sql("user_id = ? AND test_id = ?"))
            .bind(user_id)
            .bind(test_id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query(
            r#"UPDATE jobs
               SET status = 'failed', error = ?, error_code = ?, retry_after_secs = ?,
                   lock_token = NULL, lock_expires_at = NULL, updated_at = ?, completed_at = ?
               WHERE user_id = ? AND test_id = ? AND status IN ('pending', 'processing')"#,
        )
        .bind(&failure.message)
        .bind(failure.code.as_str())
        .bind(retry_after_column(failure))
        .bind(&now)
        .bind(&now)
        .bind(user_id)
        .bind(test_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(result.rows_affected())
    }

    async fn fail_active_for_user(&self, user_id: &str, failure: &JobFailure) -> DomainResult<u64> {
        let now = format_datetime(Utc::now());
        let mut tx = self.pool.begin().await?;

        sqlx::query(&release_run_locks_sql("user_id = ?"))
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query(
            r#"UPDATE jobs
               SET status = 'failed', error = ?, error_code = ?, retry_after_secs = ?,
                   lock_token = NULL, lock_expires_at = NULL, updated_at = ?, completed_at = ?
               WHERE user_id = ? AND status IN ('pending', 'processing')"#,
        )
        .bind(&failure.message)
        .bind(failure.code.as_str())
        .bind(retry_after_column(failure))
        .bind(&now)
        .bind(&now)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(result.rows_affected())
    }

    async fn reset_for_retry(&self, id: Uuid, reason: &str) -> DomainResult<bool> {
        let now = format_datetime(Utc::now());
        let mut tx = self.pool.begin().await?;

        let reset: Option<(String, String)> = sqlx::query_as(
            r#"UPDATE jobs
               SET status = 'pending', result_id = NULL, error = NULL, error_code = NULL,
                   retry_after_secs = NULL, lock_token = NULL, lock_expires_at = NULL,
                   updated_at = ?, completed_at = NULL
               WHERE id = ? AND status = 'failed'
               RETURNING user_id, test_id"#,
        )
        .bind(&now)
        .bind(id.to_string())
        .fetch_optional(&mut *tx)
        .await?;

        let Some((user_id, test_id)) = reset else {
            tx.rollback().await?;
            return Ok(false);
        };

        sqlx::query(&release_run_locks_sql("user_id = ? AND test_id = ? AND id != ?"))
            .bind(&user_id)
            .bind(&test_id)
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"UPDATE jobs
               SET status = 'failed', error = ?, error_code = ?, retry_after_secs = NULL,
                   lock_token = NULL, lock_expires_at = NULL, updated_at = ?, completed_at = ?
               WHERE user_id = ? AND test_id = ? AND id != ? AND status IN ('pending', 'processing')"#,
        )
        .bind(reason)
        .bind(FailureCode::Cancelled.as_str())
        .bind(&now)
        .bind(&now)
        .bind(&user_id)
        .bind(&test_id)
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn fail_expired_processing(
        &self,
        now: DateTime<Utc>,
        failure: &JobFailure,
    ) -> DomainResult<Vec<Uuid>> {
        let now_text = format_datetime(now);
        let mut tx = self.pool.begin().await?;

        sqlx::query(&release_run_locks_sql(
            "status = 'processing' AND lock_expires_at IS NOT NULL AND lock_expires_at < ?",
        ))
        .bind(&now_text)
        .execute(&mut *tx)
        .await?;

        let rows: Vec<(String,)> = sqlx::query_as(
            r#"UPDATE jobs
               SET status = 'failed', error = ?, error_code = ?, retry_after_secs = NULL,
                   lock_token = NULL, lock_expires_at = NULL, updated_at = ?, completed_at = ?
               WHERE status = 'processing' AND lock_expires_at IS NOT NULL AND lock_expires_at < ?
               RETURNING id"#,
        )
        .bind(&failure.message)
        .bind(failure.code.as_str())
        .bind(&now_text)
        .bind(&now_text)
        .bind(&now_text)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;
        rows.into_iter().map(|(id,)| parse_uuid(&id)).collect()
    }
}

/// Frees the credentials locked by the current run of every active job
/// matching `scope`, a `WHERE` fragment over `jobs`. Must run before the
/// jobs themselves drop their lock tokens.
fn release_run_locks_sql(scope: &str) -> String {
    format!(
        "UPDATE credentials SET locked_by = NULL, lock_expires_at = NULL \
         WHERE locked_by IN (SELECT lock_token FROM jobs \
         WHERE lock_token IS NOT NULL AND status IN ('pending', 'processing') AND {scope})"
    )
}

async fn release_token_locks(
    conn: &mut sqlx::SqliteConnection,
    lock_token: Uuid,
) -> DomainResult<u64> {
    let result = sqlx::query(
        "UPDATE credentials SET locked_by = NULL, lock_expires_at = NULL WHERE locked_by = ?",
    )
    .bind(lock_token.to_string())
    .execute(conn)
    .await?;
    Ok(result.rows_affected())
}

fn retry_after_column(failure: &JobFailure) -> Option<i64> {
    failure
        .retry_after_secs
        .map(|s| i64::try_from(s).unwrap_or(i64::MAX))
}

#[derive(sqlx::FromRow)]
struct JobRow {
    id: String,
    user_id: String,
    test_id: String,
    status: String,
    segments: Option<String>,
    result_id: Option<String>,
    error: Option<String>,
    error_code: Option<String>,
    retry_after_secs: Option<i64>,
    lock_token: Option<String>,
    lock_expires_at: Option<String>,
    attempts: i64,
    created_at: String,
    updated_at: String,
    completed_at: Option<String>,
}

impl TryFrom<JobRow> for Job {
    type Error = DomainError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status = JobStatus::from_str(&row.status).ok_or_else(|| {
            DomainError::SerializationError(format!("Invalid status: {}", row.status))
        })?;

        let error_code = row
            .error_code
            .map(|code| {
                FailureCode::from_str(&code).ok_or_else(|| {
                    DomainError::SerializationError(format!("Invalid error code: {code}"))
                })
            })
            .transpose()?;

        Ok(Job {
            id: parse_uuid(&row.id)?,
            user_id: row.user_id,
            test_id: row.test_id,
            status,
            segments: parse_json_or_default(row.segments)?,
            result_id: parse_optional_uuid(row.result_id)?,
            error: row.error,
            error_code,
            retry_after_secs: row.retry_after_secs.and_then(|s| u64::try_from(s).ok()),
            lock_token: parse_optional_uuid(row.lock_token)?,
            lock_expires_at: parse_optional_datetime(row.lock_expires_at)?,
            attempts: u32::try_from(row.attempts).unwrap_or(u32::MAX),
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
            completed_at: parse_optional_datetime(row.completed_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::initialize_test_database;
    use crate::domain::models::Segment;
    use chrono::Duration;

    async fn setup() -> SqliteJobRepository {
        SqliteJobRepository::new(initialize_test_database().await.unwrap())
    }

    fn segment(part: u8, question: u32) -> Segment {
        Segment {
            id: format!("p{part}q{question}"),
            part,
            question,
            question_text: format!("Question {question}"),
            audio_path: format!("u1/t1/p{part}q{question}.webm"),
            mime_type: "audio/webm".to_string(),
        }
    }

    async fn active_count(repo: &SqliteJobRepository, user: &str, test: &str) -> usize {
        repo.list(JobFilters {
            user_id: Some(user.to_string()),
            test_id: Some(test.to_string()),
            ..Default::default()
        })
        .await
        .unwrap()
        .into_iter()
        .filter(|j| j.status.is_active())
        .count()
    }

    #[tokio::test]
    async fn test_create_round_trips_segments() {
        let repo = setup().await;
        let job = Job::new("u1", "t1", vec![segment(2, 1), segment(1, 1)]);
        repo.create_replacing_active(&job, "superseded").await.unwrap();

        let fetched = repo.get(job.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, JobStatus::Pending);
        assert_eq!(fetched.segments, job.segments);
        assert_eq!(fetched.segments[0].part, 1);
    }

    #[tokio::test]
    async fn test_create_cancels_prior_active_job() {
        let repo = setup().await;
        let first = Job::new("u1", "t1", vec![segment(1, 1)]);
        repo.create_replacing_active(&first, "superseded").await.unwrap();
        repo.start_processing(first.id, Uuid::new_v4(), Utc::now() + Duration::minutes(10))
            .await
            .unwrap();

        let other_test = Job::new("u1", "t2", vec![segment(1, 1)]);
        repo.create_replacing_active(&other_test, "superseded").await.unwrap();

        let second = Job::new("u1", "t1", vec![segment(1, 1)]);
        let cancelled = repo.create_replacing_active(&second, "superseded").await.unwrap();
        assert_eq!(cancelled, vec![first.id]);

        let first_after = repo.get(first.id).await.unwrap().unwrap();
        assert_eq!(first_after.status, JobStatus::Failed);
        assert_eq!(first_after.error_code, Some(FailureCode::Cancelled));
        assert_eq!(first_after.error.as_deref(), Some("superseded"));
        assert!(first_after.lock_token.is_none());

        assert_eq!(active_count(&repo, "u1", "t1").await, 1);
        assert_eq!(active_count(&repo, "u1", "t2").await, 1);
    }

    #[tokio::test]
    async fn test_start_processing_only_once() {
        let repo = setup().await;
        let job = Job::new("u1", "t1", vec![]);
        repo.create_replacing_active(&job, "superseded").await.unwrap();

        let expires = Utc::now() + Duration::minutes(10);
        assert!(repo.start_processing(job.id, Uuid::new_v4(), expires).await.unwrap());
        assert!(!repo.start_processing(job.id, Uuid::new_v4(), expires).await.unwrap());

        let fetched = repo.get(job.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, JobStatus::Processing);
        assert_eq!(fetched.attempts, 1);
        assert!(fetched.lock_token.is_some());
    }

    #[tokio::test]
    async fn test_terminal_transitions_are_conditional() {
        let repo = setup().await;
        let job = Job::new("u1", "t1", vec![]);
        repo.create_replacing_active(&job, "superseded").await.unwrap();
        let run = Uuid::new_v4();
        repo.start_processing(job.id, run, Utc::now() + Duration::minutes(10))
            .await
            .unwrap();

        assert!(repo.fail(job.id, &JobFailure::cancelled("user cancelled")).await.unwrap());
        // A late success must not overwrite the cancellation
        assert!(!repo.complete(job.id, run, Some(Uuid::new_v4())).await.unwrap());
        assert!(!repo
            .fail_run(job.id, run, &JobFailure::new(FailureCode::Timeout, "late"))
            .await
            .unwrap());
        assert!(!repo
            .fail(job.id, &JobFailure::new(FailureCode::Timeout, "late"))
            .await
            .unwrap());

        let fetched = repo.get(job.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, JobStatus::Failed);
        assert_eq!(fetched.error_code, Some(FailureCode::Cancelled));
        assert!(fetched.result_id.is_none());
        assert!(fetched.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_stale_run_cannot_touch_retried_job() {
        let repo = setup().await;
        let job = Job::new("u1", "t1", vec![]);
        repo.create_replacing_active(&job, "superseded").await.unwrap();
        let expires = Utc::now() + Duration::minutes(10);

        let first_run = Uuid::new_v4();
        repo.start_processing(job.id, first_run, expires).await.unwrap();
        repo.fail(job.id, &JobFailure::cancelled("user cancelled")).await.unwrap();
        assert!(repo.reset_for_retry(job.id, "superseded by retry").await.unwrap());
        let second_run = Uuid::new_v4();
        assert!(repo.start_processing(job.id, second_run, expires).await.unwrap());

        assert!(!repo.complete(job.id, first_run, None).await.unwrap());
        assert!(!repo
            .fail_run(job.id, first_run, &JobFailure::new(FailureCode::Timeout, "old watchdog"))
            .await
            .unwrap());
        let current = repo.get(job.id).await.unwrap().unwrap();
        assert_eq!(current.status, JobStatus::Processing);
        assert_eq!(current.lock_token, Some(second_run));

        let result_id = Uuid::new_v4();
        assert!(repo.complete(job.id, second_run, Some(result_id)).await.unwrap());
        let done = repo.get(job.id).await.unwrap().unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.result_id, Some(result_id));
    }

    #[tokio::test]
    async fn test_ending_a_run_frees_its_credentials() {
        use crate::adapters::sqlite::SqliteCredentialRepository;
        use crate::domain::models::{Credential, ModelCategory};
        use crate::domain::ports::CredentialRepository;

        let db = initialize_test_database().await.unwrap();
        let repo = SqliteJobRepository::new(db.clone());
        let credentials = SqliteCredentialRepository::new(db);
        let credential = Credential::new("only", "pool-key-0001");
        credentials.create(&credential).await.unwrap();

        let now = Utc::now();
        let job = Job::new("u1", "t1", vec![]);
        repo.create_replacing_active(&job, "superseded").await.unwrap();
        let run = Uuid::new_v4();
        repo.start_processing(job.id, run, now + Duration::minutes(10)).await.unwrap();
        assert!(credentials
            .checkout(run, ModelCategory::Speech, now + Duration::minutes(5), now)
            .await
            .unwrap()
            .is_some());

        repo.fail(job.id, &JobFailure::cancelled("user cancelled")).await.unwrap();

        let freed = credentials.get(credential.id).await.unwrap().unwrap();
        assert!(freed.locked_by.is_none());
        assert!(credentials
            .checkout(Uuid::new_v4(), ModelCategory::Speech, now + Duration::minutes(5), now)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_rate_limited_failure_keeps_retry_after() {
        let repo = setup().await;
        let job = Job::new("u1", "t1", vec![]);
        repo.create_replacing_active(&job, "superseded").await.unwrap();

        repo.fail(job.id, &JobFailure::rate_limited("slow down", 60)).await.unwrap();
        let failure = repo.get(job.id).await.unwrap().unwrap().failure().unwrap();
        assert_eq!(failure.code, FailureCode::RateLimited);
        assert_eq!(failure.retry_after_secs, Some(60));
    }

    #[tokio::test]
    async fn test_retry_reuses_id_and_cancels_others() {
        let repo = setup().await;
        let old = Job::new("u1", "t1", vec![segment(1, 1)]);
        repo.create_replacing_active(&old, "superseded").await.unwrap();
        repo.fail(old.id, &JobFailure::new(FailureCode::EvaluationFailed, "bad output"))
            .await
            .unwrap();

        let newer = Job::new("u1", "t1", vec![segment(1, 1)]);
        repo.create_replacing_active(&newer, "superseded").await.unwrap();

        assert!(repo.reset_for_retry(old.id, "superseded by retry").await.unwrap());
        let retried = repo.get(old.id).await.unwrap().unwrap();
        assert_eq!(retried.status, JobStatus::Pending);
        assert!(retried.error.is_none());
        assert!(retried.completed_at.is_none());

        let newer_after = repo.get(newer.id).await.unwrap().unwrap();
        assert_eq!(newer_after.status, JobStatus::Failed);
        assert_eq!(active_count(&repo, "u1", "t1").await, 1);

        // Only failed jobs can be retried
        assert!(!repo.reset_for_retry(old.id, "again").await.unwrap());
    }

    #[tokio::test]
    async fn test_bulk_cancellation() {
        let repo = setup().await;
        for test in ["t1", "t2", "t3"] {
            let job = Job::new("u1", test, vec![]);
            repo.create_replacing_active(&job, "superseded").await.unwrap();
        }
        let other_user = Job::new("u2", "t1", vec![]);
        repo.create_replacing_active(&other_user, "superseded").await.unwrap();

        let failure = JobFailure::cancelled("cancelled by user");
        assert_eq!(repo.fail_active_for_test("u1", "t1", &failure).await.unwrap(), 1);
        assert_eq!(repo.fail_active_for_user("u1", &failure).await.unwrap(), 2);
        assert_eq!(repo.fail_active_for_user("u1", &failure).await.unwrap(), 0);
        assert_eq!(active_count(&repo, "u2", "t1").await, 1);
    }

    #[tokio::test]
    async fn test_fail_expired_processing() {
        let repo = setup().await;
        let now = Utc::now();
        let stale = Job::new("u1", "t1", vec![]);
        let fresh = Job::new("u1", "t2", vec![]);
        repo.create_replacing_active(&stale, "superseded").await.unwrap();
        repo.create_replacing_active(&fresh, "superseded").await.unwrap();
        repo.start_processing(stale.id, Uuid::new_v4(), now - Duration::seconds(1))
            .await
            .unwrap();
        repo.start_processing(fresh.id, Uuid::new_v4(), now + Duration::minutes(10))
            .await
            .unwrap();

        let failure = JobFailure::new(FailureCode::Timeout, "lock expired");
        let failed = repo.fail_expired_processing(now, &failure).await.unwrap();
        assert_eq!(failed, vec![stale.id]);
        assert_eq!(
            repo.get(fresh.id).await.unwrap().unwrap().status,
            JobStatus::Processing
        );
    }
}
