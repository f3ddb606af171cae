//! Render worker pool.
//!
//! A fixed number of worker tasks share one FIFO queue (the job store). A
//! worker claims a job, renders it off the request path under a timeout, and
//! records exactly one terminal transition. There are no automatic retries.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::render::artifacts::ArtifactStore;
use crate::render::job::{JobResult, RenderJob, Transition};
use crate::render::renderer::{ProgressReporter, RenderError, Renderer};
use crate::render::source::ResumeSource;
use crate::render::store::{JobStore, JobStoreError};

pub const RENDER_TIMEOUT_MESSAGE: &str = "render timeout";
const STORE_ERROR_BACKOFF: Duration = Duration::from_secs(1);
const DEFAULT_ABANDON_GRACE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Upper bound on simultaneously processing jobs.
    pub workers: usize,
    pub render_timeout: Duration,
    /// Re-check the queue this often even without a wakeup, for jobs
    /// submitted through another instance sharing the database.
    pub idle_poll: Duration,
}

/// Executes a single claimed job. Shared by every worker task.
pub struct RenderWorker {
    jobs: Arc<dyn JobStore>,
    resumes: Arc<dyn ResumeSource>,
    renderer: Arc<dyn Renderer>,
    artifacts: Arc<dyn ArtifactStore>,
    render_timeout: Duration,
    abandon_grace: Duration,
    store_retry: Duration,
}

impl RenderWorker {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        resumes: Arc<dyn ResumeSource>,
        renderer: Arc<dyn Renderer>,
        artifacts: Arc<dyn ArtifactStore>,
        render_timeout: Duration,
    ) -> Self {
        Self {
            jobs,
            resumes,
            renderer,
            artifacts,
            render_timeout,
            abandon_grace: DEFAULT_ABANDON_GRACE,
            store_retry: STORE_ERROR_BACKOFF,
        }
    }

    /// How long a timed-out render may keep running before it is aborted.
    pub fn with_abandon_grace(mut self, grace: Duration) -> Self {
        self.abandon_grace = grace;
        self
    }

    /// Delay between attempts to record a job's outcome after a store error.
    pub fn with_store_retry(mut self, delay: Duration) -> Self {
        self.store_retry = delay;
        self
    }

    pub fn jobs(&self) -> &Arc<dyn JobStore> {
        &self.jobs
    }

    /// Drives a job the caller has already claimed to a terminal state.
    pub async fn process(&self, job: RenderJob) -> Result<RenderJob, JobStoreError> {
        let span = info_span!("render_job", job_id = %job.id, owner_id = %job.owner_id);

        async move {
            info!("Render started");
            let outcome = self.execute(&job).await;
            self.record(job.id, outcome).await
        }
        .instrument(span)
        .await
    }

    /// Writes the terminal transition, retrying store failures until the job
    /// leaves `processing` or the write can never succeed.
    async fn record(&self, job_id: Uuid, outcome: Transition) -> Result<RenderJob, JobStoreError> {
        let mut attempt = 1u32;
        loop {
            match self.jobs.transition(job_id, outcome.clone()).await {
                Ok(done) => {
                    info!(status = %done.status, error = ?done.error, "Render finished");
                    return Ok(done);
                }
                Err(e @ JobStoreError::InvalidTransition { .. }) => {
                    error!(error = %e, "Render outcome rejected by state machine");
                    return Err(e);
                }
                Err(e @ JobStoreError::NotFound(_)) => {
                    error!(error = %e, "Render job vanished before its outcome was recorded");
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        attempt,
                        error = %e,
                        "Failed to record render outcome; retrying"
                    );
                    attempt += 1;
                    tokio::time::sleep(self.store_retry).await;
                }
            }
        }
    }

    /// Produces the terminal transition for a claimed job.
    async fn execute(&self, job: &RenderJob) -> Transition {
        let input = match self
            .resumes
            .resolve(job.input.resume_id, job.input.template_id, job.owner_id)
            .await
        {
            Ok(input) => input,
            Err(e) => {
                warn!(error = %e, "Render input no longer resolves");
                return Transition::Fail(format!("render input unavailable: {e}"));
            }
        };

        let renderer = self.renderer.clone();
        let progress = ProgressReporter::new(self.jobs.clone(), job.id);
        let mut render = tokio::spawn(async move { renderer.render(&input, progress).await });

        let joined = match tokio::time::timeout(self.render_timeout, &mut render).await {
            Ok(joined) => joined,
            Err(_) => {
                warn!(
                    timeout_ms = self.render_timeout.as_millis() as u64,
                    "Render timed out; abandoning renderer"
                );
                supervise_abandoned(job.id, render, self.abandon_grace);
                return Transition::Fail(RENDER_TIMEOUT_MESSAGE.to_string());
            }
        };

        match joined {
            Ok(Ok(pdf)) => {
                let result = JobResult::pdf_for(job.id);
                match self.artifacts.put(&result.file_name, pdf).await {
                    Ok(()) => Transition::Complete(result),
                    Err(e) => {
                        error!(error = %e, "Failed to store render artifact");
                        Transition::Fail(format!("artifact upload failed: {e}"))
                    }
                }
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Renderer reported failure");
                Transition::Fail(e.to_string())
            }
            Err(e) => {
                error!(error = %e, "Render task crashed");
                Transition::Fail("renderer crashed".to_string())
            }
        }
    }
}

/// A timed-out render keeps running detached for up to `grace`, then is
/// aborted. Aborting drops the render future, which kills any child process
/// spawned with `kill_on_drop`. The job is already failed either way.
fn supervise_abandoned(
    job_id: Uuid,
    mut render: JoinHandle<Result<bytes::Bytes, RenderError>>,
    grace: Duration,
) {
    tokio::spawn(async move {
        match tokio::time::timeout(grace, &mut render).await {
            Ok(Ok(Ok(_))) => warn!(%job_id, "Abandoned render finished after timeout; output discarded"),
            Ok(Ok(Err(e))) => warn!(%job_id, error = %e, "Abandoned render failed after timeout"),
            Ok(Err(e)) => warn!(%job_id, error = %e, "Abandoned render task crashed"),
            Err(_) => {
                render.abort();
                let _ = render.await;
                warn!(
                    %job_id,
                    grace_ms = grace.as_millis() as u64,
                    "Abandoned render outlived its grace period; aborted"
                );
            }
        }
    });
}

// ────────────────────────────────────────────────────────────────────────────
// Pool
// ────────────────────────────────────────────────────────────────────────────

pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Starts `config.workers` tasks. They stop claiming once `shutdown` flips to true.
    pub fn spawn(
        worker: Arc<RenderWorker>,
        wakeup: Arc<Notify>,
        config: &WorkerConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let handles = (1..=config.workers.max(1))
            .map(|worker_id| {
                let task = run_worker(
                    worker_id,
                    worker.clone(),
                    wakeup.clone(),
                    config.idle_poll,
                    shutdown.clone(),
                );
                info!("Spawned render worker {worker_id}");
                tokio::spawn(task)
            })
            .collect();

        Self { handles }
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Waits for every worker to finish its current job and exit.
    /// Abandoned (timed-out) renders are not waited for.
    pub async fn join(self) {
        let total = self.handles.len();
        for (i, handle) in self.handles.into_iter().enumerate() {
            match handle.await {
                Ok(()) => info!("Render worker {} stopped ({}/{})", i + 1, i + 1, total),
                Err(e) => error!("Render worker {} failed to stop: {:?}", i + 1, e),
            }
        }
    }
}

async fn run_worker(
    worker_id: usize,
    worker: Arc<RenderWorker>,
    wakeup: Arc<Notify>,
    idle_poll: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(worker_id, "Render worker started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        let wait = match worker.jobs().claim_next().await {
            Ok(Some(job)) => {
                // Failures are logged inside `process`; keep serving the queue.
                let _ = worker.process(job).await;
                continue;
            }
            Ok(None) => idle_poll,
            Err(e) => {
                error!(worker_id, error = %e, "Failed to claim render job");
                STORE_ERROR_BACKOFF
            }
        };

        tokio::select! {
            _ = wakeup.notified() => {}
            _ = tokio::time::sleep(wait) => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    info!(worker_id, "Render worker stopping");
}
