//! Retention sweeps for finished render jobs.
//!
//! Terminal jobs live for `ttl` after their last transition. Each sweep drops
//! the expired records and then the PDFs of the completed ones, so a file is
//! never served without the job that owns it.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::render::artifacts::{ArtifactError, ArtifactStore};
use crate::render::store::{JobStore, JobStoreError};

pub struct Janitor {
    jobs: Arc<dyn JobStore>,
    artifacts: Arc<dyn ArtifactStore>,
    ttl: Duration,
}

impl Janitor {
    pub fn new(jobs: Arc<dyn JobStore>, artifacts: Arc<dyn ArtifactStore>, ttl: Duration) -> Self {
        Self {
            jobs,
            artifacts,
            ttl,
        }
    }

    /// Expires terminal jobs older than the retention window as of `now`.
    /// Returns how many job records were removed.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<usize, JobStoreError> {
        let cutoff = chrono::Duration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| now.checked_sub_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let expired = self.jobs.expire(cutoff).await?;
        for job in &expired {
            let Some(result) = &job.result else { continue };
            match self.artifacts.delete(&result.file_name).await {
                Ok(()) | Err(ArtifactError::NotFound(_)) => {}
                Err(e) => {
                    // The record is gone, so the file is unreachable either way.
                    warn!(job_id = %job.id, file_name = %result.file_name, error = %e,
                        "Failed to delete expired artifact");
                }
            }
        }

        if !expired.is_empty() {
            info!(expired = expired.len(), %cutoff, "Expired render jobs");
        }
        Ok(expired.len())
    }

    /// Sweeps every `interval` until `shutdown` flips to true.
    pub fn spawn(self, interval: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep(Utc::now()).await {
                            error!(error = %e, "Render retention sweep failed");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Render janitor stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::job::{JobStatus, Transition};
    use crate::render::testing::{Script, TestStack, FAKE_PDF};

    const DAY: Duration = Duration::from_secs(86_400);

    async fn completed_job(stack: &TestStack, owner: uuid::Uuid) -> (uuid::Uuid, String) {
        let (resume, template) = stack.seed(owner);
        let job = stack.service.submit(owner, resume, template).await.unwrap();
        let claimed = stack.jobs.claim_next().await.unwrap().unwrap();
        let done = stack.worker.process(claimed).await.unwrap();
        (job.id, done.result.unwrap().file_name)
    }

    #[tokio::test]
    async fn test_sweep_keeps_jobs_inside_ttl() {
        let stack = TestStack::new(Script::Pdf).await;
        let owner = uuid::Uuid::new_v4();
        let (job_id, file_name) = completed_job(&stack, owner).await;

        let janitor = Janitor::new(stack.jobs.clone(), stack.artifacts.clone(), DAY);
        assert_eq!(janitor.sweep(Utc::now()).await.unwrap(), 0);

        assert_eq!(stack.jobs.get(job_id, owner).await.unwrap().status, JobStatus::Completed);
        assert_eq!(stack.artifacts.fetch(&file_name).await.unwrap(), FAKE_PDF);
    }

    #[tokio::test]
    async fn test_sweep_evicts_job_and_artifact_after_ttl() {
        let stack = TestStack::new(Script::Pdf).await;
        let owner = uuid::Uuid::new_v4();
        let (job_id, file_name) = completed_job(&stack, owner).await;

        let janitor = Janitor::new(stack.jobs.clone(), stack.artifacts.clone(), DAY);
        let later = Utc::now() + chrono::Duration::days(2);
        assert_eq!(janitor.sweep(later).await.unwrap(), 1);

        assert!(stack.jobs.get(job_id, owner).await.is_err());
        assert!(matches!(
            stack.artifacts.fetch(&file_name).await,
            Err(ArtifactError::NotFound(_))
        ));
        assert!(stack.service.fetch_artifact(&file_name, owner).await.is_err());
    }

    #[tokio::test]
    async fn test_sweep_never_touches_live_jobs() {
        let stack = TestStack::new(Script::Pdf).await;
        let owner = uuid::Uuid::new_v4();
        let (resume, template) = stack.seed(owner);
        let pending = stack.service.submit(owner, resume, template).await.unwrap();
        let running = stack.service.submit(owner, resume, template).await.unwrap();
        stack.jobs.transition(running.id, Transition::Claim).await.unwrap();

        let janitor = Janitor::new(stack.jobs.clone(), stack.artifacts.clone(), Duration::ZERO);
        let later = Utc::now() + chrono::Duration::days(30);
        assert_eq!(janitor.sweep(later).await.unwrap(), 0);

        assert_eq!(stack.jobs.get(pending.id, owner).await.unwrap().status, JobStatus::Pending);
        assert_eq!(
            stack.jobs.get(running.id, owner).await.unwrap().status,
            JobStatus::Processing
        );
    }

    #[tokio::test]
    async fn test_failed_jobs_expire_without_artifacts() {
        let stack = TestStack::new(Script::Fail("template corrupt".into())).await;
        let owner = uuid::Uuid::new_v4();
        let (resume, template) = stack.seed(owner);
        let job = stack.service.submit(owner, resume, template).await.unwrap();
        let claimed = stack.jobs.claim_next().await.unwrap().unwrap();
        stack.worker.process(claimed).await.unwrap();

        let janitor = Janitor::new(stack.jobs.clone(), stack.artifacts.clone(), DAY);
        let later = Utc::now() + chrono::Duration::days(2);
        assert_eq!(janitor.sweep(later).await.unwrap(), 1);
        assert!(stack.jobs.get(job.id, owner).await.is_err());
    }

    #[tokio::test]
    async fn test_spawned_janitor_stops_on_shutdown() {
        let stack = TestStack::new(Script::Pdf).await;
        let janitor = Janitor::new(stack.jobs.clone(), stack.artifacts.clone(), DAY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = janitor.spawn(Duration::from_millis(10), shutdown_rx);

        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("janitor did not stop")
            .unwrap();
    }
}
