//! In-memory collaborators for exercising the render pipeline end to end.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tempfile::TempDir;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::models::resume::{ResumeSourceRow, ResumeTemplateRow};
use crate::render::artifacts::LocalArtifactStore;
use crate::render::renderer::{ProgressReporter, RenderError, Renderer};
use crate::render::service::RenderService;
use crate::render::source::{assemble, RenderableInput, ResumeSource, SourceError};
use crate::render::store::InMemoryJobStore;
use crate::render::worker::RenderWorker;

pub const FAKE_PDF: &[u8] = b"%PDF-1.4\n% templar test document\n%%EOF\n";

#[derive(Default)]
pub struct StaticResumeSource {
    resumes: Mutex<HashMap<Uuid, ResumeSourceRow>>,
    templates: Mutex<HashMap<Uuid, ResumeTemplateRow>>,
}

impl StaticResumeSource {
    pub fn add_resume(&self, owner: Uuid) -> Uuid {
        let id = Uuid::new_v4();
        self.resumes.lock().unwrap().insert(
            id,
            ResumeSourceRow {
                id,
                user_id: owner,
                latex_source: Some("Jane Doe \\\\ Senior Rust Engineer".to_string()),
            },
        );
        id
    }

    pub fn add_template(&self, owner: Option<Uuid>) -> Uuid {
        let id = Uuid::new_v4();
        self.templates.lock().unwrap().insert(
            id,
            ResumeTemplateRow {
                id,
                owner_id: owner,
                name: "classic".to_string(),
                preamble: "\\documentclass{article}".to_string(),
            },
        );
        id
    }

    pub fn remove_resume(&self, id: Uuid) {
        self.resumes.lock().unwrap().remove(&id);
    }
}

#[async_trait]
impl ResumeSource for StaticResumeSource {
    async fn resolve(
        &self,
        resume_id: Uuid,
        template_id: Uuid,
        owner_id: Uuid,
    ) -> Result<RenderableInput, SourceError> {
        let resume = self
            .resumes
            .lock()
            .unwrap()
            .get(&resume_id)
            .cloned()
            .ok_or(SourceError::NotFound {
                kind: "resume",
                id: resume_id,
            })?;
        let template = self
            .templates
            .lock()
            .unwrap()
            .get(&template_id)
            .cloned()
            .ok_or(SourceError::NotFound {
                kind: "template",
                id: template_id,
            })?;
        assemble(resume, template, owner_id)
    }
}

pub enum Script {
    Pdf,
    Fail(String),
    /// Returns a PDF, but only after the given delay.
    Slow(Duration),
    /// Blocks until a permit is available on the semaphore.
    Gated(Arc<Semaphore>),
    Panic,
}

/// Renderer with scripted behaviour that records concurrency and start order.
pub struct ScriptedRenderer {
    script: Script,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    finished: AtomicUsize,
    started: Mutex<Vec<Uuid>>,
}

impl ScriptedRenderer {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
            started: Mutex::new(Vec::new()),
        }
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Renders currently running, including abandoned ones not yet aborted.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> Vec<Uuid> {
        self.started.lock().unwrap().clone()
    }
}

/// Counts a render as running until it returns or its future is dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize, max: &AtomicUsize) -> Self {
        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
        max.fetch_max(now, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Renderer for ScriptedRenderer {
    async fn render(
        &self,
        _input: &RenderableInput,
        progress: ProgressReporter,
    ) -> Result<Bytes, RenderError> {
        self.started.lock().unwrap().push(progress.job_id());
        let _guard = InFlight::enter(&self.in_flight, &self.max_in_flight);

        for pct in [25, 50, 75] {
            progress.report(pct).await;
        }

        let outcome = match &self.script {
            Script::Pdf => Ok(Bytes::from_static(FAKE_PDF)),
            Script::Fail(msg) => Err(RenderError::Failed(msg.clone())),
            Script::Slow(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(Bytes::from_static(FAKE_PDF))
            }
            Script::Gated(gate) => {
                let permit = gate.acquire().await.expect("gate closed");
                permit.forget();
                Ok(Bytes::from_static(FAKE_PDF))
            }
            Script::Panic => panic!("renderer blew up"),
        };

        self.finished.fetch_add(1, Ordering::SeqCst);
        outcome
    }
}

/// A full render pipeline wired to in-memory collaborators.
pub struct TestStack {
    pub jobs: Arc<InMemoryJobStore>,
    pub resumes: Arc<StaticResumeSource>,
    pub artifacts: Arc<LocalArtifactStore>,
    pub renderer: Arc<ScriptedRenderer>,
    pub service: RenderService,
    pub worker: Arc<RenderWorker>,
    _dir: TempDir,
}

impl TestStack {
    pub async fn new(script: Script) -> Self {
        Self::with_timeout(script, Duration::from_secs(5)).await
    }

    pub async fn with_timeout(script: Script, render_timeout: Duration) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let jobs = Arc::new(InMemoryJobStore::new());
        let resumes = Arc::new(StaticResumeSource::default());
        let artifacts = Arc::new(LocalArtifactStore::new(dir.path()).await.unwrap());
        let renderer = Arc::new(ScriptedRenderer::new(script));

        let service = RenderService::new(jobs.clone(), resumes.clone(), artifacts.clone());
        let worker = Arc::new(RenderWorker::new(
            jobs.clone(),
            resumes.clone(),
            renderer.clone(),
            artifacts.clone(),
            render_timeout,
        ));

        Self {
            jobs,
            resumes,
            artifacts,
            renderer,
            service,
            worker,
            _dir: dir,
        }
    }

    /// Registers a renderable resume and a shared template for `owner`.
    pub fn seed(&self, owner: Uuid) -> (Uuid, Uuid) {
        (self.resumes.add_resume(owner), self.resumes.add_template(None))
    }
}
