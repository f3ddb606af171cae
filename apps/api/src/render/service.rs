//! Submission, status and file operations behind the render endpoints.
//!
//! Every operation here is short and non-blocking; rendering happens in the
//! worker pool. Submission only validates, records and wakes a worker.

use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::errors::AppError;
use crate::render::artifacts::{ArtifactError, ArtifactStore};
use crate::render::job::{JobStatus, RenderInput, RenderJob};
use crate::render::source::{ResumeSource, SourceError};
use crate::render::store::{JobStore, JobStoreError};

pub const JOB_NOT_FOUND: &str = "Render job not found";
pub const FILE_NOT_FOUND: &str = "File not found";
pub const INPUT_NOT_ACCESSIBLE: &str = "Resume or template not found or not accessible";

#[derive(Debug)]
pub struct Artifact {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct QueueDepth {
    pub pending: usize,
    pub processing: usize,
}

#[derive(Clone)]
pub struct RenderService {
    jobs: Arc<dyn JobStore>,
    resumes: Arc<dyn ResumeSource>,
    artifacts: Arc<dyn ArtifactStore>,
    wakeup: Arc<Notify>,
}

impl RenderService {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        resumes: Arc<dyn ResumeSource>,
        artifacts: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            jobs,
            resumes,
            artifacts,
            wakeup: Arc::new(Notify::new()),
        }
    }

    /// Signalled once per submission; idle workers wait on it.
    pub fn wakeup(&self) -> Arc<Notify> {
        self.wakeup.clone()
    }

    /// Records a pending job and returns without waiting for the render.
    /// Duplicate submissions for the same resume create independent jobs.
    pub async fn submit(
        &self,
        owner_id: Uuid,
        resume_id: Uuid,
        template_id: Uuid,
    ) -> Result<RenderJob, AppError> {
        match self.resumes.resolve(resume_id, template_id, owner_id).await {
            Ok(_) => {}
            Err(SourceError::Database(e)) => return Err(AppError::Database(e)),
            Err(e) => {
                debug!(%owner_id, error = %e, "Rejected render submission");
                return Err(AppError::UnprocessableEntity(
                    INPUT_NOT_ACCESSIBLE.to_string(),
                ));
            }
        }

        let job = self
            .jobs
            .create(
                owner_id,
                RenderInput {
                    resume_id,
                    template_id,
                },
            )
            .await?;
        self.wakeup.notify_one();

        info!(job_id = %job.id, %owner_id, %resume_id, %template_id, "Render job submitted");
        Ok(job)
    }

    pub async fn status(&self, job_id: Uuid, requester_id: Uuid) -> Result<RenderJob, AppError> {
        Ok(self.jobs.get(job_id, requester_id).await?)
    }

    /// Returns the stored PDF for `file_name` if `requester_id` owns the job
    /// that produced it. Never triggers a re-render.
    pub async fn fetch_artifact(
        &self,
        file_name: &str,
        requester_id: Uuid,
    ) -> Result<Artifact, AppError> {
        let not_found = || AppError::NotFound(FILE_NOT_FOUND.to_string());

        let job = self.jobs.find_by_file_name(file_name).await?.ok_or_else(|| {
            debug!(file_name, "No completed job produced this artifact");
            not_found()
        })?;

        if !job.is_owned_by(requester_id) {
            debug!(file_name, job_id = %job.id, %requester_id, "Artifact requested by non-owner");
            return Err(not_found());
        }

        let result = match (&job.status, job.result) {
            (JobStatus::Completed, Some(result)) => result,
            _ => return Err(not_found()),
        };

        let bytes = self
            .artifacts
            .fetch(&result.file_name)
            .await
            .map_err(|e| match e {
                ArtifactError::NotFound(_) | ArtifactError::InvalidName(_) => {
                    debug!(file_name, error = %e, "Artifact missing from storage");
                    not_found()
                }
                other => {
                    error!(file_name, error = %other, "Artifact storage failure");
                    AppError::Storage(other.to_string())
                }
            })?;

        Ok(Artifact {
            file_name: result.file_name,
            content_type: result.content_type,
            bytes,
        })
    }

    pub async fn queue_depth(&self) -> Result<QueueDepth, AppError> {
        Ok(QueueDepth {
            pending: self.jobs.count_by_status(JobStatus::Pending).await?,
            processing: self.jobs.count_by_status(JobStatus::Processing).await?,
        })
    }
}

impl From<JobStoreError> for AppError {
    fn from(e: JobStoreError) -> Self {
        match e {
            JobStoreError::NotFound(_) | JobStoreError::Forbidden { .. } => {
                // Same response either way so job ids cannot be probed across accounts.
                debug!(error = %e, "Render job not accessible");
                AppError::NotFound(JOB_NOT_FOUND.to_string())
            }
            JobStoreError::InvalidInput(msg) => AppError::UnprocessableEntity(msg),
            JobStoreError::InvalidTransition { .. } => {
                error!(error = %e, "Render job state machine violated");
                AppError::Internal(anyhow::Error::new(e))
            }
            JobStoreError::Database(e) => AppError::Database(e),
        }
    }
}
