//! Durable, at-least-once job queue over the job repository.
//!
//! A job stays `RUNNING` until a worker settles it, and the worker keeps
//! its claim fresh with [`JobQueue::heartbeat`] while the handler runs.
//! If the worker dies first, [`JobQueue::requeue_stale`] hands the job
//! out again, so every handler must tolerate running twice.
//!
//! Every payload with a [`JobPayload::dedupe_key`] is enqueued under it,
//! so repeated deliveries of the same request share one open job.

use chrono::Utc;
use podfleet_core::models::job::{CreateJob, IssueTlsPayload, Job, JobPayload};
use podfleet_core::repository::{JobRepository, StaleSweep, Store};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::ProvisionConfig;
use crate::error::ProvisionResult;

pub fn issue_tls_payload(tenant_id: Uuid, pod_id: Uuid, domain: &str) -> JobPayload {
    JobPayload::IssueTls(IssueTlsPayload {
        tenant_id,
        pod_id,
        domain: domain.to_string(),
    })
}

#[derive(Clone)]
pub struct JobQueue<S: Store> {
    store: S,
    config: ProvisionConfig,
}

impl<S: Store> JobQueue<S> {
    pub fn new(store: S, config: ProvisionConfig) -> Self {
        Self { store, config }
    }

    /// Enqueue `payload`, or return the open job already queued under its
    /// dedupe key.
    pub async fn enqueue(&self, payload: JobPayload) -> ProvisionResult<Job> {
        let dedupe_key = payload.dedupe_key();
        let job = self
            .store
            .jobs()
            .enqueue(CreateJob {
                payload,
                dedupe_key,
                run_after: None,
            })
            .await?;
        debug!(job_id = %job.id, job_type = job.job_type.as_str(), status = job.status.as_str(), "Job enqueued");
        Ok(job)
    }

    /// Claim the next runnable job for `worker_id`.
    pub async fn dequeue(&self, worker_id: &str) -> ProvisionResult<Option<Job>> {
        Ok(self.store.jobs().claim_next(Utc::now(), worker_id).await?)
    }

    pub async fn mark_completed(&self, job_id: Uuid) -> ProvisionResult<Job> {
        Ok(self.store.jobs().mark_completed(job_id).await?)
    }

    pub async fn mark_failed(&self, job_id: Uuid, reason: &str) -> ProvisionResult<Job> {
        Ok(self.store.jobs().mark_failed(job_id, reason).await?)
    }

    /// Return `job` to `PENDING` after its back-off delay.
    pub async fn retry(&self, job: &Job, reason: &str) -> ProvisionResult<Job> {
        let run_after = Utc::now() + self.config.retry_backoff(job.retry_count);
        Ok(self.store.jobs().retry(job.id, reason, run_after).await?)
    }

    /// Whether a failed run of `job` may be retried under the attempt cap.
    pub fn has_attempts_left(&self, job: &Job) -> bool {
        job.retry_count + 1 < self.config.job_max_attempts
    }

    pub fn claim_heartbeat(&self) -> std::time::Duration {
        self.config.claim_heartbeat()
    }

    /// Refresh `worker_id`'s claim on `job`. `false` means the claim was
    /// lost to the stale sweep.
    pub async fn heartbeat(&self, job: &Job, worker_id: &str) -> ProvisionResult<bool> {
        Ok(self.store.jobs().heartbeat(job.id, worker_id, Utc::now()).await?)
    }

    /// Return jobs whose claim outlived the stale timeout to `PENDING`,
    /// failing those that were on their last attempt.
    pub async fn requeue_stale(&self) -> ProvisionResult<StaleSweep> {
        let cutoff = Utc::now() - self.config.stale_claim();
        let sweep = self
            .store
            .jobs()
            .requeue_stale(cutoff, self.config.job_max_attempts)
            .await?;
        if sweep.requeued > 0 || sweep.failed > 0 {
            info!(requeued = sweep.requeued, failed = sweep.failed, "Swept stale jobs");
        }
        Ok(sweep)
    }
}
