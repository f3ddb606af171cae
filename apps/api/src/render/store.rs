//! Job store: the single source of truth for render job state.
//!
//! All mutation after creation goes through `transition` (or `claim_next`, which
//! is a FIFO-ordered `Claim`). Both backends apply `RenderJob::apply`, so the
//! state machine lives in one place.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::render::job::{InvalidTransition, JobStatus, RenderInput, RenderJob, Transition};

#[derive(Debug, Error)]
pub enum JobStoreError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("job {0} not found")]
    NotFound(Uuid),

    #[error("job {job_id} is not owned by {requester_id}")]
    Forbidden { job_id: Uuid, requester_id: Uuid },

    #[error("invalid transition for job {id}: {attempted} from {from}")]
    InvalidTransition {
        id: Uuid,
        from: JobStatus,
        attempted: &'static str,
    },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl JobStoreError {
    /// Rejects inputs missing a resume or template reference.
    pub(crate) fn check_input(owner_id: Uuid, input: &RenderInput) -> Result<(), Self> {
        if owner_id.is_nil() || input.resume_id.is_nil() || input.template_id.is_nil() {
            return Err(JobStoreError::InvalidInput(
                "owner, resume and template ids are required".to_string(),
            ));
        }
        Ok(())
    }

    pub(crate) fn rejected(id: Uuid, e: InvalidTransition) -> Self {
        JobStoreError::InvalidTransition {
            id,
            from: e.from,
            attempted: e.attempted,
        }
    }
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, owner_id: Uuid, input: RenderInput)
        -> Result<RenderJob, JobStoreError>;

    /// `NotFound` and `Forbidden` must be treated identically by callers facing clients.
    async fn get(&self, id: Uuid, requester_id: Uuid) -> Result<RenderJob, JobStoreError>;

    async fn transition(
        &self,
        id: Uuid,
        transition: Transition,
    ) -> Result<RenderJob, JobStoreError>;

    /// Claims the oldest pending job, if any.
    async fn claim_next(&self) -> Result<Option<RenderJob>, JobStoreError>;

    /// Looks up the job whose result carries `file_name`. No ownership check.
    async fn find_by_file_name(&self, file_name: &str)
        -> Result<Option<RenderJob>, JobStoreError>;

    async fn count_by_status(&self, status: JobStatus) -> Result<usize, JobStoreError>;

    /// Removes terminal jobs last updated before `updated_before` and returns them.
    async fn expire(&self, updated_before: DateTime<Utc>)
        -> Result<Vec<RenderJob>, JobStoreError>;
}

// ────────────────────────────────────────────────────────────────────────────
// In-memory backend
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Inner {
    jobs: HashMap<Uuid, RenderJob>,
    pending: VecDeque<Uuid>,
}

/// Map + single lock. Every operation holds the lock for its whole duration,
/// so transitions are atomic and readers only see whole jobs.
#[derive(Default)]
pub struct InMemoryJobStore {
    inner: Mutex<Inner>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(
        &self,
        owner_id: Uuid,
        input: RenderInput,
    ) -> Result<RenderJob, JobStoreError> {
        JobStoreError::check_input(owner_id, &input)?;
        let job = RenderJob::new(owner_id, input, Utc::now());
        let mut inner = self.inner.lock().await;
        inner.pending.push_back(job.id);
        inner.jobs.insert(job.id, job.clone());
        debug!(job_id = %job.id, owner_id = %owner_id, "Render job created");
        Ok(job)
    }

    async fn get(&self, id: Uuid, requester_id: Uuid) -> Result<RenderJob, JobStoreError> {
        let inner = self.inner.lock().await;
        let job = inner.jobs.get(&id).ok_or(JobStoreError::NotFound(id))?;
        if !job.is_owned_by(requester_id) {
            return Err(JobStoreError::Forbidden {
                job_id: id,
                requester_id,
            });
        }
        Ok(job.clone())
    }

    async fn transition(
        &self,
        id: Uuid,
        transition: Transition,
    ) -> Result<RenderJob, JobStoreError> {
        let mut inner = self.inner.lock().await;
        let is_claim = transition == Transition::Claim;
        let job = inner.jobs.get_mut(&id).ok_or(JobStoreError::NotFound(id))?;
        job.apply(transition, Utc::now())
            .map_err(|e| JobStoreError::rejected(id, e))?;
        let job = job.clone();
        if is_claim {
            inner.pending.retain(|pending_id| *pending_id != id);
        }
        Ok(job)
    }

    async fn claim_next(&self) -> Result<Option<RenderJob>, JobStoreError> {
        let mut inner = self.inner.lock().await;
        while let Some(id) = inner.pending.pop_front() {
            // Entries whose job was claimed directly or expired are skipped.
            if let Some(job) = inner.jobs.get_mut(&id) {
                if job.apply(Transition::Claim, Utc::now()).is_ok() {
                    return Ok(Some(job.clone()));
                }
            }
        }
        Ok(None)
    }

    async fn find_by_file_name(
        &self,
        file_name: &str,
    ) -> Result<Option<RenderJob>, JobStoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .jobs
            .values()
            .find(|job| {
                job.result
                    .as_ref()
                    .is_some_and(|r| r.file_name == file_name)
            })
            .cloned())
    }

    async fn count_by_status(&self, status: JobStatus) -> Result<usize, JobStoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.jobs.values().filter(|j| j.status == status).count())
    }

    async fn expire(
        &self,
        updated_before: DateTime<Utc>,
    ) -> Result<Vec<RenderJob>, JobStoreError> {
        let mut inner = self.inner.lock().await;
        let expired_ids: Vec<Uuid> = inner
            .jobs
            .values()
            .filter(|j| j.status.is_terminal() && j.updated_at < updated_before)
            .map(|j| j.id)
            .collect();

        Ok(expired_ids
            .into_iter()
            .filter_map(|id| inner.jobs.remove(&id))
            .collect())
    }
}
