use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::render::job::{JobResult, RenderInput, RenderJob};

/// Column list for `render_jobs`, in `RenderJobRow` order. `seq` is ordering-only.
pub const RENDER_JOB_COLUMNS: &str = "id, owner_id, resume_id, template_id, status, progress, \
     result_file_name, result_content_type, error_message, created_at, updated_at";

#[derive(Debug, Clone, FromRow)]
pub struct RenderJobRow {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub resume_id: Uuid,
    pub template_id: Uuid,
    pub status: String,
    pub progress: i16,
    pub result_file_name: Option<String>,
    pub result_content_type: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<RenderJobRow> for RenderJob {
    type Error = sqlx::Error;

    fn try_from(row: RenderJobRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse()
            .map_err(|e: String| sqlx::Error::Decode(e.into()))?;
        let result = match (row.result_file_name, row.result_content_type) {
            (Some(file_name), Some(content_type)) => Some(JobResult {
                file_name,
                content_type,
            }),
            _ => None,
        };

        Ok(RenderJob {
            id: row.id,
            owner_id: row.owner_id,
            status,
            progress: row.progress.clamp(0, 100) as u8,
            input: RenderInput {
                resume_id: row.resume_id,
                template_id: row.template_id,
            },
            result,
            error: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::job::JobStatus;

    fn row(status: &str) -> RenderJobRow {
        let now = Utc::now();
        RenderJobRow {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            resume_id: Uuid::new_v4(),
            template_id: Uuid::new_v4(),
            status: status.to_string(),
            progress: 0,
            result_file_name: None,
            result_content_type: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_completed_row_maps_result() {
        let mut r = row("completed");
        r.progress = 100;
        r.result_file_name = Some(format!("{}.pdf", r.id));
        r.result_content_type = Some("application/pdf".to_string());

        let job = RenderJob::try_from(r.clone()).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert_eq!(job.result.unwrap().file_name, r.result_file_name.unwrap());
    }

    #[test]
    fn test_unknown_status_is_decode_error() {
        let err = RenderJob::try_from(row("exploded")).unwrap_err();
        assert!(matches!(err, sqlx::Error::Decode(_)));
    }
}
