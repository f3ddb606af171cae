//! Render job data model and the state machine every store backend shares.
//!
//! ```text
//! pending ──claim──▶ processing ──complete──▶ completed
//!                         │
//!                         └──────fail───────▶ failed
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const PDF_CONTENT_TYPE: &str = "application/pdf";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(format!("Invalid job status: {s}")),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to render, by reference. Content is resolved when a worker claims the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderInput {
    pub resume_id: Uuid,
    pub template_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub file_name: String,
    pub content_type: String,
}

impl JobResult {
    /// Artifact reference for a finished job. One artifact per job, named after it.
    pub fn pdf_for(job_id: Uuid) -> Self {
        Self {
            file_name: artifact_file_name(job_id),
            content_type: PDF_CONTENT_TYPE.to_string(),
        }
    }
}

pub fn artifact_file_name(job_id: Uuid) -> String {
    format!("{job_id}.pdf")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Claim,
    Progress(u8),
    Complete(JobResult),
    Fail(String),
}

impl Transition {
    pub fn name(&self) -> &'static str {
        match self {
            Transition::Claim => "claim",
            Transition::Progress(_) => "progress",
            Transition::Complete(_) => "complete",
            Transition::Fail(_) => "fail",
        }
    }
}

/// Rejected state machine edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: JobStatus,
    pub attempted: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderJob {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub status: JobStatus,
    pub progress: u8,
    pub input: RenderInput,
    pub result: Option<JobResult>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RenderJob {
    pub fn new(owner_id: Uuid, input: RenderInput, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id,
            status: JobStatus::Pending,
            progress: 0,
            input,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_owned_by(&self, account_id: Uuid) -> bool {
        self.owner_id == account_id
    }

    /// Applies `transition` in place. On rejection the job is left untouched.
    pub fn apply(
        &mut self,
        transition: Transition,
        now: DateTime<Utc>,
    ) -> Result<(), InvalidTransition> {
        let rejected = InvalidTransition {
            from: self.status,
            attempted: transition.name(),
        };

        match (self.status, transition) {
            (JobStatus::Pending, Transition::Claim) => {
                self.status = JobStatus::Processing;
                self.progress = 0;
            }
            (JobStatus::Processing, Transition::Progress(pct)) => {
                // Monotonic: a stale lower report is accepted but ignored.
                self.progress = self.progress.max(pct.min(100));
            }
            (JobStatus::Processing, Transition::Complete(result)) => {
                self.status = JobStatus::Completed;
                self.progress = 100;
                self.result = Some(result);
            }
            (JobStatus::Processing, Transition::Fail(reason)) => {
                self.status = JobStatus::Failed;
                self.error = Some(reason);
            }
            _ => return Err(rejected),
        }

        self.updated_at = now;
        Ok(())
    }
}
