//! Axum route handlers for the Render API.

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::render::job::{JobStatus, RenderJob};
use crate::render::service::JOB_NOT_FOUND;
use crate::state::AppState;

// ────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRenderRequest {
    pub resume_id: Uuid,
    pub template_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRenderResponse {
    pub job_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultRef {
    pub file_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderStatusResponse {
    pub status: JobStatus,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ResultRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<RenderJob> for RenderStatusResponse {
    fn from(job: RenderJob) -> Self {
        Self {
            status: job.status,
            progress: job.progress,
            result: job.result.map(|r| ResultRef {
                file_name: r.file_name,
            }),
            error: job.error,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/render
///
/// Queues a render of one resume with one template and returns the job id
/// right away. Poll the status endpoint for progress.
pub async fn handle_submit(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<SubmitRenderRequest>,
) -> Result<(StatusCode, Json<SubmitRenderResponse>), AppError> {
    if request.resume_id.is_nil() || request.template_id.is_nil() {
        return Err(AppError::Validation(
            "resumeId and templateId are required".to_string(),
        ));
    }

    let job = state
        .render
        .submit(user.account_id, request.resume_id, request.template_id)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitRenderResponse { job_id: job.id }),
    ))
}

/// GET /api/v1/render/:job_id/status
///
/// Idempotent; safe to poll on a fixed interval.
pub async fn handle_status(
    State(state): State<AppState>,
    user: AuthUser,
    Path(job_id): Path<String>,
) -> Result<Json<RenderStatusResponse>, AppError> {
    // A malformed id gets the same answer as an unknown one.
    let job_id = Uuid::parse_str(&job_id)
        .map_err(|_| AppError::NotFound(JOB_NOT_FOUND.to_string()))?;

    let job = state.render.status(job_id, user.account_id).await?;
    Ok(Json(job.into()))
}

/// GET /api/v1/render/files/:file_name
///
/// Serves a finished PDF inline to the account that rendered it.
pub async fn handle_file(
    State(state): State<AppState>,
    user: AuthUser,
    Path(file_name): Path<String>,
) -> Result<Response, AppError> {
    let artifact = state
        .render
        .fetch_artifact(&file_name, user.account_id)
        .await?;

    let disposition = format!("inline; filename=\"{}\"", artifact.file_name);
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, artifact.content_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from(artifact.bytes),
    )
        .into_response())
}
