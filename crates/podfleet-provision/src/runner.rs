//! Job dispatcher: claims jobs, runs the matching handler and settles
//! the job from the handler's error class.

use std::time::Duration;

use chrono::{DateTime, Utc};
use podfleet_core::models::job::{Job, JobPayload};
use podfleet_core::repository::{StaleSweep, Store};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::audit::AuditScope;
use crate::dns::DnsProvider;
use crate::error::{ErrorClass, ProvisionError, ProvisionResult};
use crate::queue::JobQueue;
use crate::tls::{CertificateManager, DnsResolver, RenewalReport};
use crate::transport::CommandTransport;
use crate::worker::PodProvisioner;

/// How a claimed job was settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    /// Back in `PENDING`, claimable from `run_after`.
    Retried { run_after: DateTime<Utc> },
    Failed { class: ErrorClass },
}

pub struct JobRunner<S: Store, T: CommandTransport, P: DnsProvider, R: DnsResolver> {
    queue: JobQueue<S>,
    provisioner: PodProvisioner<S, T, P>,
    certificates: CertificateManager<S, T, R>,
}

impl<S, T, P, R> JobRunner<S, T, P, R>
where
    S: Store,
    T: CommandTransport,
    P: DnsProvider,
    R: DnsResolver,
{
    pub fn new(
        queue: JobQueue<S>,
        provisioner: PodProvisioner<S, T, P>,
        certificates: CertificateManager<S, T, R>,
    ) -> Self {
        Self {
            queue,
            provisioner,
            certificates,
        }
    }

    pub fn queue(&self) -> &JobQueue<S> {
        &self.queue
    }

    /// Claim and process at most one job. `None` when the queue had
    /// nothing runnable.
    pub async fn run_once(&self, worker_id: &str) -> ProvisionResult<Option<(Job, JobOutcome)>> {
        let Some(job) = self.queue.dequeue(worker_id).await? else {
            return Ok(None);
        };
        info!(
            job_id = %job.id,
            tenant_id = %job.tenant_id,
            job_type = job.job_type.as_str(),
            retry_count = job.retry_count,
            worker_id,
            "Job claimed"
        );

        let result = self.dispatch_holding_claim(&job, worker_id).await;
        let outcome = self.settle(&job, result).await?;
        Ok(Some((job, outcome)))
    }

    /// Run the handler for `payload`.
    pub async fn dispatch(&self, payload: &JobPayload) -> ProvisionResult<()> {
        match payload {
            JobPayload::CreatePod(p) => self.provisioner.create_pod(p).await.map(drop),
            JobPayload::IssueTls(p) => self
                .certificates
                .issue(&AuditScope::system(p.tenant_id), p.pod_id, &p.domain)
                .await
                .map(drop),
            JobPayload::DestroyPod(p) => self.provisioner.destroy_pod(p).await.map(drop),
            JobPayload::StartPod(p) => self.provisioner.start_pod(p).await.map(drop),
            JobPayload::StopPod(p) => self.provisioner.stop_pod(p).await.map(drop),
        }
    }

    /// Dispatch `job` while refreshing the worker's claim, so a handler
    /// that outlives the stale timeout is not handed to a second worker.
    async fn dispatch_holding_claim(&self, job: &Job, worker_id: &str) -> ProvisionResult<()> {
        let work = self.dispatch(&job.payload);
        tokio::pin!(work);

        let mut heartbeat = tokio::time::interval(self.queue.claim_heartbeat());
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately.
        heartbeat.tick().await;

        loop {
            tokio::select! {
                result = &mut work => return result,
                _ = heartbeat.tick() => match self.queue.heartbeat(job, worker_id).await {
                    Ok(true) => debug!(job_id = %job.id, worker_id, "Job claim refreshed"),
                    Ok(false) => warn!(job_id = %job.id, worker_id, "Job claim lost while running"),
                    Err(e) => warn!(job_id = %job.id, worker_id, error = %e, "Could not refresh job claim"),
                },
            }
        }
    }

    async fn settle(&self, job: &Job, result: ProvisionResult<()>) -> ProvisionResult<JobOutcome> {
        let e = match result {
            Ok(()) => {
                self.queue.mark_completed(job.id).await?;
                info!(job_id = %job.id, job_type = job.job_type.as_str(), "Job completed");
                return Ok(JobOutcome::Completed);
            }
            Err(e) => e,
        };

        let class = e.class();
        let reason = e.to_string();
        if class.is_retryable() && self.queue.has_attempts_left(job) {
            let retried = self.queue.retry(job, &reason).await?;
            warn!(
                job_id = %job.id,
                job_type = job.job_type.as_str(),
                ?class,
                retry_count = retried.retry_count,
                run_after = %retried.run_after,
                error = %reason,
                "Job failed, will retry"
            );
            return Ok(JobOutcome::Retried {
                run_after: retried.run_after,
            });
        }

        self.queue.mark_failed(job.id, &reason).await?;
        error!(
            job_id = %job.id,
            tenant_id = %job.tenant_id,
            job_type = job.job_type.as_str(),
            ?class,
            retry_count = job.retry_count,
            error = %reason,
            "Job failed permanently"
        );
        Ok(JobOutcome::Failed { class })
    }

    /// Worker loop: drain the queue, then poll every `poll_interval`
    /// until `shutdown` flips to `true`. A job in flight is finished
    /// before the loop exits.
    pub async fn run(
        &self,
        worker_id: &str,
        poll_interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(worker_id, "Worker started");
        while !*shutdown.borrow() {
            let idle = match self.run_once(worker_id).await {
                Ok(Some(_)) => false,
                Ok(None) => true,
                Err(e) => {
                    warn!(worker_id, error = %e, "Queue access failed");
                    true
                }
            };
            if idle {
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }
        info!(worker_id, "Worker stopped");
    }

    pub async fn sweep_stale(&self) -> ProvisionResult<StaleSweep> {
        self.queue.requeue_stale().await
    }

    pub async fn sweep_renewals(&self) -> ProvisionResult<RenewalReport> {
        self.certificates.renew_expiring_certificates(Utc::now()).await
    }
}

/// Run `sweep` every `every` until shutdown. Errors are logged.
pub async fn periodically<F, Fut, V>(
    name: &'static str,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut sweep: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<V, ProvisionError>>,
{
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = sweep().await {
                    warn!(sweep = name, error = %e, "Sweep failed");
                }
            }
            _ = shutdown.changed() => break,
        }
        if *shutdown.borrow() {
            break;
        }
    }
}
