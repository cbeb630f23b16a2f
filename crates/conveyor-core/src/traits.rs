//! Trait seams consumed by the engine as black boxes.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::{Job, JobState};
use crate::Result;

// =============================================================================
// DURABLE STORE
// =============================================================================

/// Keyed external store for job-record durability.
///
/// The engine treats the store as at-least-once durable: it mirrors every
/// state transition with `persist`, archives dead-lettered records with
/// `archive_dead_letter`, and on startup reloads whatever a previous process
/// left in flight via `load_recoverable`. No read-after-write guarantee
/// stronger than the backend's own is assumed.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Upsert the current job record keyed by `job.id`.
    async fn persist(&self, job: &Job) -> Result<()>;

    /// Archive a dead-lettered job for offline inspection.
    ///
    /// The record also remains in the live mirror; the archive is the
    /// audit copy that survives retention cleanup.
    async fn archive_dead_letter(&self, job: &Job) -> Result<()>;

    /// Load records a previous process left unfinished
    /// (pending, running, or retrying), oldest first.
    async fn load_recoverable(&self) -> Result<Vec<Job>>;

    /// List archived dead-lettered jobs, newest first.
    async fn list_dead_letters(&self, limit: i64) -> Result<Vec<Job>>;
}

// =============================================================================
// TERMINAL CALLBACK
// =============================================================================

/// Notification invoked exactly once when a job reaches a terminal state
/// (completed, dead-lettered, or cancelled).
///
/// Callbacks run outside the tracker lock, after the transition has been
/// recorded, so they may themselves call back into the engine.
#[async_trait]
pub trait JobCallback: Send + Sync {
    /// Called with the terminal job snapshot.
    async fn on_terminal(&self, job: &Job);
}

/// No-op callback for when notifications aren't needed.
pub struct NoOpCallback;

#[async_trait]
impl JobCallback for NoOpCallback {
    async fn on_terminal(&self, _job: &Job) {}
}

// =============================================================================
// IN-MEMORY STORE
// =============================================================================

/// In-process [`DurableStore`] backed by a map.
///
/// Durable only for the lifetime of the process that holds the `Arc`; meant
/// for tests and single-process deployments where the Postgres store is
/// overkill. Sharing one instance across engine restarts (in tests)
/// exercises the recovery path without a database.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    jobs: HashMap<Uuid, Job>,
    dead_letters: Vec<Job>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store wrapped for sharing.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Number of live records in the mirror.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.jobs.len()
    }

    /// Whether the mirror holds no records.
    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.jobs.is_empty()
    }

    /// Fetch a mirrored record by id.
    pub async fn get(&self, id: Uuid) -> Option<Job> {
        self.inner.lock().await.jobs.get(&id).cloned()
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn persist(&self, job: &Job) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn archive_dead_letter(&self, job: &Job) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.jobs.insert(job.id, job.clone());
        inner.dead_letters.push(job.clone());
        Ok(())
    }

    async fn load_recoverable(&self) -> Result<Vec<Job>> {
        let inner = self.inner.lock().await;
        let mut jobs: Vec<Job> = inner
            .jobs
            .values()
            .filter(|j| {
                matches!(
                    j.state,
                    JobState::Pending | JobState::Running | JobState::Retrying
                )
            })
            .cloned()
            .collect();
        // UUIDv7 ids sort by creation time
        jobs.sort_by_key(|j| j.id);
        Ok(jobs)
    }

    async fn list_dead_letters(&self, limit: i64) -> Result<Vec<Job>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .dead_letters
            .iter()
            .rev()
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobPriority;
    use chrono::Utc;
    use serde_json::json;

    fn make_job(state: JobState) -> Job {
        Job {
            id: crate::uuid_utils::new_v7(),
            job_type: "echo".to_string(),
            payload: json!({}),
            priority: JobPriority::Normal,
            state,
            attempt_count: 0,
            max_attempts: 3,
            timeout_ms: 300_000,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
        }
    }

    #[tokio::test]
    async fn persist_upserts_by_id() {
        let store = MemoryStore::new();
        let mut job = make_job(JobState::Pending);

        store.persist(&job).await.unwrap();
        assert_eq!(store.len().await, 1);

        job.state = JobState::Running;
        store.persist(&job).await.unwrap();
        assert_eq!(store.len().await, 1);
        assert_eq!(store.get(job.id).await.unwrap().state, JobState::Running);
    }

    #[tokio::test]
    async fn load_recoverable_filters_terminal_states() {
        let store = MemoryStore::new();
        let pending = make_job(JobState::Pending);
        let running = make_job(JobState::Running);
        let retrying = make_job(JobState::Retrying);
        let completed = make_job(JobState::Completed);
        let dead = make_job(JobState::DeadLettered);

        for job in [&pending, &running, &retrying, &completed, &dead] {
            store.persist(job).await.unwrap();
        }

        let recoverable = store.load_recoverable().await.unwrap();
        assert_eq!(recoverable.len(), 3);
        assert!(recoverable.iter().all(|j| !j.state.is_terminal()));
    }

    #[tokio::test]
    async fn load_recoverable_orders_by_id() {
        let store = MemoryStore::new();
        let first = make_job(JobState::Pending);
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = make_job(JobState::Pending);

        // Insert newest first; recovery must still come back oldest first
        store.persist(&second).await.unwrap();
        store.persist(&first).await.unwrap();

        let recoverable = store.load_recoverable().await.unwrap();
        assert_eq!(recoverable[0].id, first.id);
        assert_eq!(recoverable[1].id, second.id);
    }

    #[tokio::test]
    async fn dead_letters_listed_newest_first() {
        let store = MemoryStore::new();
        let first = make_job(JobState::DeadLettered);
        let second = make_job(JobState::DeadLettered);

        store.archive_dead_letter(&first).await.unwrap();
        store.archive_dead_letter(&second).await.unwrap();

        let listed = store.list_dead_letters(10).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, second.id);

        let limited = store.list_dead_letters(1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn noop_callback_does_nothing() {
        let cb = NoOpCallback;
        cb.on_terminal(&make_job(JobState::Completed)).await;
    }
}
