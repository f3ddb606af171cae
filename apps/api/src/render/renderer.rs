//! Turns a resolved resume + template into PDF bytes.
//!
//! Renders may be slow and are not cancellable once started. The worker owns
//! the timeout; implementations only report progress and return a result.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};
use uuid::Uuid;

use crate::render::job::Transition;
use crate::render::source::RenderableInput;
use crate::render::store::JobStore;

const PDF_MAGIC: &[u8] = b"%PDF-";
/// Only the tail of the compiler log is kept in the job's error message.
const MAX_STDERR_CHARS: usize = 2000;

#[derive(Debug, Error)]
pub enum RenderError {
    /// Renderer-reported failure; the message is surfaced to the user verbatim.
    #[error("{0}")]
    Failed(String),

    #[error("renderer I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("renderer exited with status {code:?}: {stderr}")]
    ExitStatus { code: Option<i32>, stderr: String },

    #[error("renderer produced corrupt output: {0}")]
    CorruptOutput(String),
}

/// Handle a renderer uses to publish progress for the job it is working on.
#[derive(Clone)]
pub struct ProgressReporter {
    jobs: Arc<dyn JobStore>,
    job_id: Uuid,
}

impl ProgressReporter {
    pub fn new(jobs: Arc<dyn JobStore>, job_id: Uuid) -> Self {
        Self { jobs, job_id }
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Best effort. Rejections are expected after a timeout has already
    /// failed the job, so they are logged and dropped.
    pub async fn report(&self, percent: u8) {
        if let Err(e) = self
            .jobs
            .transition(self.job_id, Transition::Progress(percent))
            .await
        {
            debug!(job_id = %self.job_id, error = %e, "Progress update ignored");
        }
    }
}

#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(
        &self,
        input: &RenderableInput,
        progress: ProgressReporter,
    ) -> Result<Bytes, RenderError>;
}

// ────────────────────────────────────────────────────────────────────────────
// LaTeX renderer
// ────────────────────────────────────────────────────────────────────────────

/// Compiles `main.tex` with an external LaTeX engine in a scratch directory.
///
/// The engine is invoked as `<program> <args…> main.tex` and must leave
/// `main.pdf` next to it (tectonic, pdflatex, latexmk -pdf all do).
pub struct LatexRenderer {
    program: String,
    args: Vec<String>,
}

impl LatexRenderer {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Splits a configured command line such as `pdflatex -halt-on-error` on whitespace.
    pub fn from_command_line(command: &str) -> Option<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

pub(crate) fn build_document(input: &RenderableInput) -> String {
    format!(
        "{}\n\\begin{{document}}\n{}\n\\end{{document}}\n",
        input.preamble.trim_end(),
        input.body.trim()
    )
}

fn validate_pdf(bytes: &[u8]) -> Result<(), RenderError> {
    if bytes.is_empty() {
        return Err(RenderError::CorruptOutput("empty PDF".to_string()));
    }
    if !bytes.starts_with(PDF_MAGIC) {
        return Err(RenderError::CorruptOutput(
            "missing %PDF- header".to_string(),
        ));
    }
    Ok(())
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    let skip = text.chars().count().saturating_sub(MAX_STDERR_CHARS);
    text.chars().skip(skip).collect()
}

#[async_trait]
impl Renderer for LatexRenderer {
    async fn render(
        &self,
        input: &RenderableInput,
        progress: ProgressReporter,
    ) -> Result<Bytes, RenderError> {
        let workdir = tempfile::tempdir()?;
        tokio::fs::write(workdir.path().join("main.tex"), build_document(input)).await?;
        progress.report(10).await;

        info!(
            job_id = %progress.job_id(),
            template = %input.template_name,
            program = %self.program,
            "Compiling resume"
        );

        let output = Command::new(&self.program)
            .args(&self.args)
            .arg("main.tex")
            .current_dir(workdir.path())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Err(RenderError::ExitStatus {
                code: output.status.code(),
                stderr: stderr_tail(&output.stderr),
            });
        }
        progress.report(90).await;

        let pdf = tokio::fs::read(workdir.path().join("main.pdf"))
            .await
            .map_err(|e| RenderError::CorruptOutput(format!("main.pdf not produced: {e}")))?;
        validate_pdf(&pdf)?;

        Ok(Bytes::from(pdf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::job::{JobStatus, RenderInput};
    use crate::render::store::InMemoryJobStore;

    fn input() -> RenderableInput {
        RenderableInput {
            resume_id: Uuid::new_v4(),
            template_id: Uuid::new_v4(),
            template_name: "classic".to_string(),
            preamble: "\\documentclass{article}\n".to_string(),
            body: "  Jane Doe \\\\ Rust engineer  ".to_string(),
        }
    }

    async fn claimed_reporter() -> (Arc<InMemoryJobStore>, ProgressReporter, Uuid) {
        let store = Arc::new(InMemoryJobStore::new());
        let owner = Uuid::new_v4();
        let job = store
            .create(
                owner,
                RenderInput {
                    resume_id: Uuid::new_v4(),
                    template_id: Uuid::new_v4(),
                },
            )
            .await
            .unwrap();
        store.claim_next().await.unwrap();
        let reporter = ProgressReporter::new(store.clone(), job.id);
        (store, reporter, owner)
    }

    fn sh(script: &str) -> LatexRenderer {
        LatexRenderer::new(
            "sh",
            vec!["-c".to_string(), script.to_string(), "latex".to_string()],
        )
    }

    #[test]
    fn test_build_document_wraps_body() {
        let doc = build_document(&input());
        assert_eq!(
            doc,
            "\\documentclass{article}\n\\begin{document}\nJane Doe \\\\ Rust engineer\n\\end{document}\n"
        );
    }

    #[test]
    fn test_from_command_line_splits_args() {
        let r = LatexRenderer::from_command_line("pdflatex -halt-on-error  -interaction=nonstopmode")
            .unwrap();
        assert_eq!(r.program(), "pdflatex");
        assert_eq!(r.args, vec!["-halt-on-error", "-interaction=nonstopmode"]);
        assert!(LatexRenderer::from_command_line("   ").is_none());
    }

    #[test]
    fn test_validate_pdf() {
        assert!(validate_pdf(b"%PDF-1.7\n...").is_ok());
        assert!(matches!(validate_pdf(b""), Err(RenderError::CorruptOutput(_))));
        assert!(matches!(validate_pdf(b"<html>"), Err(RenderError::CorruptOutput(_))));
    }

    #[test]
    fn test_stderr_tail_keeps_end() {
        let long = "x".repeat(MAX_STDERR_CHARS + 10) + "fatal";
        let tail = stderr_tail(long.as_bytes());
        assert_eq!(tail.chars().count(), MAX_STDERR_CHARS);
        assert!(tail.ends_with("fatal"));
    }

    #[test]
    fn test_failed_error_displays_verbatim() {
        assert_eq!(
            RenderError::Failed("template corrupt".to_string()).to_string(),
            "template corrupt"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_successful_compile_returns_pdf_and_reports_progress() {
        let (store, reporter, owner) = claimed_reporter().await;
        let job_id = reporter.job_id();
        let renderer = sh("test -f \"$1\" && printf '%%PDF-1.4 fake' > main.pdf");

        let pdf = renderer.render(&input(), reporter).await.unwrap();
        assert!(pdf.starts_with(PDF_MAGIC));

        let job = store.get(job_id, owner).await.unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.progress, 90);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit_is_reported_with_stderr() {
        let (_store, reporter, _) = claimed_reporter().await;
        let renderer = sh("echo 'Undefined control sequence' >&2; exit 3");

        let err = renderer.render(&input(), reporter).await.unwrap_err();
        match err {
            RenderError::ExitStatus { code, stderr } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "Undefined control sequence");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_pdf_output_is_corrupt() {
        let (_store, reporter, _) = claimed_reporter().await;
        let renderer = sh("printf 'not a pdf' > main.pdf");

        let err = renderer.render(&input(), reporter).await.unwrap_err();
        assert!(matches!(err, RenderError::CorruptOutput(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_output_is_corrupt() {
        let (_store, reporter, _) = claimed_reporter().await;
        let err = sh("true").render(&input(), reporter).await.unwrap_err();
        assert!(matches!(err, RenderError::CorruptOutput(_)));
    }

    #[tokio::test]
    async fn test_missing_program_is_io_error() {
        let (_store, reporter, _) = claimed_reporter().await;
        let renderer = LatexRenderer::new("definitely-not-a-latex-engine-xyz", vec![]);
        let err = renderer.render(&input(), reporter).await.unwrap_err();
        assert!(matches!(err, RenderError::Io(_)));
    }

    #[tokio::test]
    async fn test_progress_after_terminal_is_ignored() {
        let (store, reporter, owner) = claimed_reporter().await;
        store
            .transition(reporter.job_id(), Transition::Fail("render timeout".into()))
            .await
            .unwrap();

        reporter.report(50).await;
        let job = store.get(reporter.job_id(), owner).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.progress, 0);
    }
}
