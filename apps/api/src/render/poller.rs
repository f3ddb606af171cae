//! Client side of the render API: submit, poll on a fixed interval, then
//! download the finished PDF once.
//!
//! Transient failures on a single poll (transport errors, 5xx, unreadable
//! bodies) are logged and retried on the next tick. They never end the wait.
#![allow(dead_code)]

use std::time::Duration;

use bytes::Bytes;
use reqwest::{header, Client, Response};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::render::handlers::{RenderStatusResponse, SubmitRenderRequest, SubmitRenderResponse};
use crate::render::job::{JobStatus, PDF_CONTENT_TYPE};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
const DEFAULT_MAX_POLLS: u32 = 150;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum PollError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("request rejected (status {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("job still running after {polls} polls")]
    GaveUp { polls: u32 },

    #[error("completed job carried no result")]
    MissingResult,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfDownload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Completed(PdfDownload),
    /// The job failed; carries the error recorded by the worker.
    Failed(String),
}

pub struct RenderPoller {
    http: Client,
    base_url: String,
    token: String,
    interval: Duration,
    max_polls: u32,
}

impl RenderPoller {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self, PollError> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            interval: DEFAULT_POLL_INTERVAL,
            max_polls: DEFAULT_MAX_POLLS,
        })
    }

    pub fn with_schedule(mut self, interval: Duration, max_polls: u32) -> Self {
        self.interval = interval;
        self.max_polls = max_polls.max(1);
        self
    }

    pub async fn submit(&self, resume_id: Uuid, template_id: Uuid) -> Result<Uuid, PollError> {
        let response = self
            .http
            .post(format!("{}/api/v1/render", self.base_url))
            .bearer_auth(&self.token)
            .json(&SubmitRenderRequest {
                resume_id,
                template_id,
            })
            .send()
            .await?;

        let accepted: SubmitRenderResponse = expect_success(response).await?.json().await?;
        info!(job_id = %accepted.job_id, "Render job accepted");
        Ok(accepted.job_id)
    }

    /// Polls immediately, then every interval, until the job is terminal.
    pub async fn wait_for_pdf(&self, job_id: Uuid) -> Result<PollOutcome, PollError> {
        for poll in 1..=self.max_polls {
            if poll > 1 {
                tokio::time::sleep(self.interval).await;
            }

            let Some(status) = self.poll_once(job_id).await? else {
                continue;
            };

            match status.status {
                JobStatus::Pending | JobStatus::Processing => {
                    debug!(%job_id, poll, progress = status.progress, "Render still running");
                }
                JobStatus::Completed => {
                    let result = status.result.ok_or(PollError::MissingResult)?;
                    let pdf = self.download(&result.file_name).await?;
                    return Ok(PollOutcome::Completed(pdf));
                }
                JobStatus::Failed => {
                    let error = status.error.unwrap_or_default();
                    info!(%job_id, %error, "Render job failed");
                    return Ok(PollOutcome::Failed(error));
                }
            }
        }

        Err(PollError::GaveUp {
            polls: self.max_polls,
        })
    }

    /// `Ok(None)` means this tick failed transiently.
    async fn poll_once(&self, job_id: Uuid) -> Result<Option<RenderStatusResponse>, PollError> {
        let url = format!("{}/api/v1/render/{job_id}/status", self.base_url);
        let response = match self.http.get(url).bearer_auth(&self.token).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(%job_id, error = %e, "Status poll failed; retrying next tick");
                return Ok(None);
            }
        };

        if response.status().is_server_error() {
            warn!(%job_id, status = response.status().as_u16(), "Status poll failed; retrying next tick");
            return Ok(None);
        }

        let response = expect_success(response).await?;
        match response.json::<RenderStatusResponse>().await {
            Ok(status) => Ok(Some(status)),
            Err(e) => {
                warn!(%job_id, error = %e, "Unreadable status response; retrying next tick");
                Ok(None)
            }
        }
    }

    async fn download(&self, file_name: &str) -> Result<PdfDownload, PollError> {
        let response = self
            .http
            .get(format!("{}/api/v1/render/files/{file_name}", self.base_url))
            .bearer_auth(&self.token)
            .send()
            .await?;
        let response = expect_success(response).await?;

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(PDF_CONTENT_TYPE)
            .to_string();
        let bytes = response.bytes().await?;

        Ok(PdfDownload {
            file_name: file_name.to_string(),
            content_type,
            bytes,
        })
    }
}

async fn expect_success(response: Response) -> Result<Response, PollError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(PollError::Rejected {
        status: status.as_u16(),
        body,
    })
}
