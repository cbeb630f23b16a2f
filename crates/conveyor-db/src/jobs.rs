//! Durable job store implementation.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres, Row};
use tracing::info;
use uuid::Uuid;

use conveyor_core::{DurableStore, Error, Job, JobPriority, JobState, Result};

use crate::pool::create_pool;

/// PostgreSQL implementation of [`DurableStore`].
///
/// Maintains two tables: `conveyor_jobs`, a live mirror of every job record
/// keyed by id, and `conveyor_dead_letters`, the append-style audit archive
/// of jobs that exhausted their retries.
pub struct PgJobStore {
    pool: Pool<Postgres>,
}

impl PgJobStore {
    /// Create a new store from an existing connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Connect to the given URL with default pool configuration.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }

    /// Create the store's tables and indexes if they don't exist.
    ///
    /// For deployments that manage DDL externally this is a no-op as long as
    /// the schema matches.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS conveyor_jobs (
                 id UUID PRIMARY KEY,
                 job_type TEXT NOT NULL,
                 payload JSONB NOT NULL,
                 priority TEXT NOT NULL,
                 state TEXT NOT NULL,
                 attempt_count INT NOT NULL DEFAULT 0,
                 max_attempts INT NOT NULL,
                 timeout_ms BIGINT NOT NULL,
                 created_at TIMESTAMPTZ NOT NULL,
                 started_at TIMESTAMPTZ,
                 completed_at TIMESTAMPTZ,
                 result JSONB,
                 error TEXT
             )",
        )
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS conveyor_jobs_state_idx
             ON conveyor_jobs (state, created_at)",
        )
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS conveyor_dead_letters (
                 id UUID PRIMARY KEY,
                 job_type TEXT NOT NULL,
                 payload JSONB NOT NULL,
                 priority TEXT NOT NULL,
                 attempt_count INT NOT NULL,
                 max_attempts INT NOT NULL,
                 timeout_ms BIGINT NOT NULL,
                 created_at TIMESTAMPTZ NOT NULL,
                 started_at TIMESTAMPTZ,
                 completed_at TIMESTAMPTZ,
                 error TEXT,
                 archived_at TIMESTAMPTZ NOT NULL
             )",
        )
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        info!(
            subsystem = "db",
            component = "store",
            op = "ensure_schema",
            "Job store schema ready"
        );
        Ok(())
    }

    /// Convert JobState to string for the database.
    fn state_to_str(state: JobState) -> &'static str {
        state.as_str()
    }

    /// Convert string from the database to JobState.
    fn str_to_state(s: &str) -> JobState {
        JobState::parse(s).unwrap_or(JobState::Pending) // fallback
    }

    /// Convert JobPriority to string for the database.
    fn priority_to_str(priority: JobPriority) -> &'static str {
        priority.as_str()
    }

    /// Convert string from the database to JobPriority.
    fn str_to_priority(s: &str) -> JobPriority {
        JobPriority::parse(s).unwrap_or(JobPriority::Normal) // fallback
    }

    /// Parse a job row into a Job struct.
    fn parse_job_row(row: sqlx::postgres::PgRow) -> Job {
        Job {
            id: row.get("id"),
            job_type: row.get("job_type"),
            payload: row.get("payload"),
            priority: Self::str_to_priority(row.get("priority")),
            state: Self::str_to_state(row.get("state")),
            attempt_count: row.get("attempt_count"),
            max_attempts: row.get("max_attempts"),
            timeout_ms: row.get::<i64, _>("timeout_ms") as u64,
            created_at: row.get("created_at"),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
            result: row.get("result"),
            error: row.get("error"),
        }
    }

    /// Parse a dead-letter row (no `result` column) into a Job struct.
    fn parse_dead_letter_row(row: sqlx::postgres::PgRow) -> Job {
        Job {
            id: row.get("id"),
            job_type: row.get("job_type"),
            payload: row.get("payload"),
            priority: Self::str_to_priority(row.get("priority")),
            state: JobState::DeadLettered,
            attempt_count: row.get("attempt_count"),
            max_attempts: row.get("max_attempts"),
            timeout_ms: row.get::<i64, _>("timeout_ms") as u64,
            created_at: row.get("created_at"),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
            result: None,
            error: row.get("error"),
        }
    }

    /// Fetch a mirrored record by id.
    pub async fn get(&self, job_id: Uuid) -> Result<Option<Job>> {
        let row = sqlx::query(
            "SELECT id, job_type, payload, priority, state, attempt_count, max_attempts,
                    timeout_ms, created_at, started_at, completed_at, result, error
             FROM conveyor_jobs WHERE id = $1",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(Self::parse_job_row))
    }

    /// Delete mirrored records in terminal states older than `keep_count`
    /// most recent ones. Dead-letter archive rows are never touched.
    pub async fn cleanup(&self, keep_count: i64) -> Result<i64> {
        let result = sqlx::query(
            "DELETE FROM conveyor_jobs
             WHERE state IN ('completed', 'dead_lettered', 'cancelled')
               AND id NOT IN (
                 SELECT id FROM conveyor_jobs
                 WHERE state IN ('completed', 'dead_lettered', 'cancelled')
                 ORDER BY completed_at DESC NULLS LAST
                 LIMIT $1
             )",
        )
        .bind(keep_count)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected() as i64)
    }
}

#[async_trait]
impl DurableStore for PgJobStore {
    async fn persist(&self, job: &Job) -> Result<()> {
        sqlx::query(
            "INSERT INTO conveyor_jobs
                 (id, job_type, payload, priority, state, attempt_count, max_attempts,
                  timeout_ms, created_at, started_at, completed_at, result, error)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
             ON CONFLICT (id) DO UPDATE SET
                 state = EXCLUDED.state,
                 attempt_count = EXCLUDED.attempt_count,
                 started_at = EXCLUDED.started_at,
                 completed_at = EXCLUDED.completed_at,
                 result = EXCLUDED.result,
                 error = EXCLUDED.error",
        )
        .bind(job.id)
        .bind(&job.job_type)
        .bind(&job.payload)
        .bind(Self::priority_to_str(job.priority))
        .bind(Self::state_to_str(job.state))
        .bind(job.attempt_count)
        .bind(job.max_attempts)
        .bind(job.timeout_ms as i64)
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(&job.result)
        .bind(&job.error)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(())
    }

    async fn archive_dead_letter(&self, job: &Job) -> Result<()> {
        let now = Utc::now();

        // Mirror update and archive insert commit together so a crash
        // between them can't leave a dead-lettered job without its audit row.
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        sqlx::query(
            "INSERT INTO conveyor_jobs
                 (id, job_type, payload, priority, state, attempt_count, max_attempts,
                  timeout_ms, created_at, started_at, completed_at, result, error)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
             ON CONFLICT (id) DO UPDATE SET
                 state = EXCLUDED.state,
                 attempt_count = EXCLUDED.attempt_count,
                 started_at = EXCLUDED.started_at,
                 completed_at = EXCLUDED.completed_at,
                 result = EXCLUDED.result,
                 error = EXCLUDED.error",
        )
        .bind(job.id)
        .bind(&job.job_type)
        .bind(&job.payload)
        .bind(Self::priority_to_str(job.priority))
        .bind(Self::state_to_str(job.state))
        .bind(job.attempt_count)
        .bind(job.max_attempts)
        .bind(job.timeout_ms as i64)
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(&job.result)
        .bind(&job.error)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        sqlx::query(
            "INSERT INTO conveyor_dead_letters
                 (id, job_type, payload, priority, attempt_count, max_attempts,
                  timeout_ms, created_at, started_at, completed_at, error, archived_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(job.id)
        .bind(&job.job_type)
        .bind(&job.payload)
        .bind(Self::priority_to_str(job.priority))
        .bind(job.attempt_count)
        .bind(job.max_attempts)
        .bind(job.timeout_ms as i64)
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(&job.error)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }

    async fn load_recoverable(&self) -> Result<Vec<Job>> {
        let rows = sqlx::query(
            "SELECT id, job_type, payload, priority, state, attempt_count, max_attempts,
                    timeout_ms, created_at, started_at, completed_at, result, error
             FROM conveyor_jobs
             WHERE state IN ('pending', 'running', 'retrying')
             ORDER BY created_at ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.into_iter().map(Self::parse_job_row).collect())
    }

    async fn list_dead_letters(&self, limit: i64) -> Result<Vec<Job>> {
        let rows = sqlx::query(
            "SELECT id, job_type, payload, priority, attempt_count, max_attempts,
                    timeout_ms, created_at, started_at, completed_at, error, archived_at
             FROM conveyor_dead_letters
             ORDER BY archived_at DESC
             LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.into_iter().map(Self::parse_dead_letter_row).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_to_str_all_variants() {
        assert_eq!(PgJobStore::state_to_str(JobState::Pending), "pending");
        assert_eq!(PgJobStore::state_to_str(JobState::Running), "running");
        assert_eq!(PgJobStore::state_to_str(JobState::Completed), "completed");
        assert_eq!(PgJobStore::state_to_str(JobState::Failed), "failed");
        assert_eq!(PgJobStore::state_to_str(JobState::Retrying), "retrying");
        assert_eq!(
            PgJobStore::state_to_str(JobState::DeadLettered),
            "dead_lettered"
        );
        assert_eq!(PgJobStore::state_to_str(JobState::Cancelled), "cancelled");
    }

    #[test]
    fn test_str_to_state_round_trip() {
        for state in [
            JobState::Pending,
            JobState::Running,
            JobState::Completed,
            JobState::Failed,
            JobState::Retrying,
            JobState::DeadLettered,
            JobState::Cancelled,
        ] {
            assert_eq!(
                PgJobStore::str_to_state(PgJobStore::state_to_str(state)),
                state
            );
        }
    }

    #[test]
    fn test_str_to_state_unknown_falls_back_to_pending() {
        assert_eq!(PgJobStore::str_to_state("bogus"), JobState::Pending);
    }

    #[test]
    fn test_priority_str_round_trip() {
        for priority in JobPriority::ALL {
            assert_eq!(
                PgJobStore::str_to_priority(PgJobStore::priority_to_str(priority)),
                priority
            );
        }
    }

    #[test]
    fn test_str_to_priority_unknown_falls_back_to_normal() {
        assert_eq!(PgJobStore::str_to_priority("urgent"), JobPriority::Normal);
    }
}
