//! Pod provisioning worker: the pod lifecycle state machine.
//!
//! `PROVISIONING → STARTING → RUNNING`, with `FAILED` reachable from any
//! step and `DESTROYED` only through an explicit destroy. Every handler
//! is safe to run again for the same job: a retried create resumes the
//! pod it already made instead of ordering a second one.

use podfleet_core::error::PodfleetError;
use podfleet_core::models::audit::AuditAction;
use podfleet_core::models::job::{CreatePodPayload, DestroyPodPayload, PodRefPayload};
use podfleet_core::models::pod::{CreatePod, Pod, PodStatus, ResourceProfile, UpdatePod};
use podfleet_core::models::server::Server;
use podfleet_core::repository::{CertificateRepository, PodRepository, ServerRepository, Store};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::audit::{AuditRecorder, AuditScope};
use crate::config::ProvisionConfig;
use crate::dns::{DnsProvider, DnsReconciler};
use crate::error::{ProvisionError, ProvisionResult};
use crate::executor::{ArgKind, CommandExecutor, Invocation, Script};
use crate::queue::{JobQueue, issue_tls_payload};
use crate::selector::ServerSelector;
use crate::transport::CommandTransport;
use crate::validation::{self, Validated};

/// Drives pods through their lifecycle on the fleet's hosts.
///
/// Generic over the store and every external system so the pipeline has
/// no dependency on the database crate or on a real hypervisor.
pub struct PodProvisioner<S: Store, T: CommandTransport, P: DnsProvider> {
    store: S,
    executor: CommandExecutor<T, S>,
    reconciler: DnsReconciler<S, P>,
    selector: ServerSelector<S>,
    queue: JobQueue<S>,
    audit: AuditRecorder<S>,
    config: ProvisionConfig,
}

impl<S: Store, T: CommandTransport, P: DnsProvider> PodProvisioner<S, T, P> {
    pub fn new(
        store: S,
        executor: CommandExecutor<T, S>,
        reconciler: DnsReconciler<S, P>,
        audit: AuditRecorder<S>,
        config: ProvisionConfig,
    ) -> Self {
        Self {
            selector: ServerSelector::new(store.clone()),
            queue: JobQueue::new(store.clone(), config.clone()),
            store,
            executor,
            reconciler,
            audit,
            config,
        }
    }

    /// Provision the pod ordered under `payload.subscription_id`, or
    /// resume the one a previous attempt left behind.
    pub async fn create_pod(&self, payload: &CreatePodPayload) -> ProvisionResult<Pod> {
        let scope =
            AuditScope::system(payload.tenant_id).with_actor(payload.triggered_by_user_id);

        // 1. Validate tenant-supplied values before anything else.
        let plan_code = self
            .checked(&scope, validation::plan_code(&payload.plan_code))
            .await?;
        let domain = match payload.requested_domain.as_deref() {
            Some(name) => Some(self.checked(&scope, validation::domain(name)).await?),
            None => None,
        };

        // 2. Resume an earlier attempt for the same subscription.
        let existing = self
            .store
            .pods()
            .get_by_subscription(payload.tenant_id, payload.subscription_id)
            .await?;
        let pod = match existing {
            Some(pod) if matches!(pod.status, PodStatus::Running | PodStatus::Stopped) => {
                debug!(pod_id = %pod.id, status = pod.status.as_str(), "Pod already provisioned");
                return Ok(pod);
            }
            Some(pod) => {
                info!(
                    tenant_id = %pod.tenant_id,
                    pod_id = %pod.id,
                    status = pod.status.as_str(),
                    container_created = pod.container_created,
                    "Resuming pod provisioning"
                );
                pod
            }
            None => {
                // 3. Place a new pod.
                let profile = self.plan_profile(&plan_code)?;
                match self.place(&scope, payload, &plan_code, profile, domain).await {
                    Ok(pod) => pod,
                    Err(e @ ProvisionError::NotSettled { .. }) => return Err(e),
                    Err(e) => {
                        self.audit
                            .failure(&scope, AuditAction::PodFailed, &e.to_string())
                            .await;
                        return Err(e);
                    }
                }
            }
        };

        // 4. Build, boot and publish it.
        let scope = scope.with_pod(pod.id);
        match self.bring_up(&scope, pod).await {
            Ok(pod) => Ok(pod),
            Err(e) => {
                self.fail_pod(&scope, &e).await;
                Err(e)
            }
        }
    }

    fn plan_profile(&self, plan_code: &str) -> ProvisionResult<ResourceProfile> {
        let profile = self
            .config
            .plans
            .resolve(plan_code)
            .ok_or(ProvisionError::EmptyPlanCatalog)?;
        if self.config.plans.get(plan_code).is_none() {
            warn!(plan_code, "Unknown plan code, using smallest profile");
        }
        Ok(profile)
    }

    async fn checked<V>(&self, scope: &AuditScope, result: Validated<V>) -> ProvisionResult<V> {
        match result {
            Ok(value) => Ok(value),
            Err(rejection) => {
                self.audit
                    .input_rejected(scope, &rejection, "CREATE_POD")
                    .await;
                Err(rejection.into())
            }
        }
    }

    /// Pick a host and insert the pod row with the next free instance id.
    ///
    /// The id is derived from the highest id ever used on the host; a
    /// concurrent worker taking the same id trips the unique index and we
    /// read the maximum again. A subscription holds at most one live pod,
    /// so losing the insert to another delivery of the same order yields
    /// `NotSettled` and leaves the pod to that delivery.
    async fn place(
        &self,
        scope: &AuditScope,
        payload: &CreatePodPayload,
        plan_code: &str,
        profile: ResourceProfile,
        domain: Option<String>,
    ) -> ProvisionResult<Pod> {
        let server = self
            .selector
            .select_server_for_pod(
                profile.memory_mb,
                profile.disk_gb,
                payload.preferred_region.as_deref(),
            )
            .await?
            .ok_or(ProvisionError::NoCapacity {
                memory_mb: profile.memory_mb,
                disk_gb: profile.disk_gb,
            })?;

        let pods = self.store.pods();
        for attempt in 1..=self.config.allocation_attempts {
            let instance_id = match pods.max_instance_id(server.id).await? {
                Some(max) => max.saturating_add(1).max(self.config.instance_id_floor),
                None => self.config.instance_id_floor,
            };
            if instance_id > self.config.instance_id_max {
                return Err(ProvisionError::InstanceIdsExhausted {
                    server_id: server.id,
                });
            }

            let created = pods
                .create(CreatePod {
                    tenant_id: payload.tenant_id,
                    subscription_id: payload.subscription_id,
                    server_id: server.id,
                    instance_id,
                    hostname: domain.clone().unwrap_or_else(|| format!("pod-{instance_id}")),
                    primary_domain: domain.clone(),
                    plan_code: plan_code.to_string(),
                    resources: profile,
                    created_by: payload.triggered_by_user_id,
                })
                .await;

            match created {
                Ok(pod) => {
                    info!(
                        tenant_id = %pod.tenant_id,
                        pod_id = %pod.id,
                        server_id = %server.id,
                        instance_id,
                        plan_code,
                        "Pod placed"
                    );
                    self.audit
                        .transition(
                            &scope.with_pod(pod.id),
                            AuditAction::PodProvisioning,
                            json!({
                                "server_id": server.id,
                                "instance_id": instance_id,
                                "plan_code": plan_code,
                                "domain": pod.primary_domain,
                            }),
                        )
                        .await;
                    return Ok(pod);
                }
                Err(PodfleetError::AlreadyExists { .. }) => {
                    if let Some(pod) = pods
                        .get_by_subscription(payload.tenant_id, payload.subscription_id)
                        .await?
                    {
                        info!(pod_id = %pod.id, status = pod.status.as_str(), "Subscription placed concurrently");
                        return Err(ProvisionError::NotSettled {
                            pod_id: pod.id,
                            status: pod.status.as_str().to_string(),
                        });
                    }
                    debug!(server_id = %server.id, instance_id, attempt, "Instance id taken, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(ProvisionError::Store(PodfleetError::Conflict {
            message: format!(
                "lost instance id allocation on server {} {} times",
                server.id, self.config.allocation_attempts
            ),
        }))
    }

    async fn bring_up(&self, scope: &AuditScope, mut pod: Pod) -> ProvisionResult<Pod> {
        let server = self.store.servers().get_by_id(pod.server_id).await?;

        if !pod.container_created {
            self.executor
                .run(scope, &server.address, create_invocation(&pod, &server))
                .await?;
            pod = self
                .update(
                    &pod,
                    UpdatePod {
                        container_created: Some(true),
                        ..Default::default()
                    },
                )
                .await?;
        }

        if pod.status != PodStatus::Starting {
            pod = self.update(&pod, UpdatePod::status(PodStatus::Starting)).await?;
            self.audit
                .transition(scope, AuditAction::PodStarting, json!({ "server_id": server.id }))
                .await;
        }

        self.executor
            .run(scope, &server.address, instance(Script::PodStart, &pod))
            .await?;
        let ip = self.wait_for_ipv4(scope, &server, &pod).await?;
        pod = self
            .update(
                &pod,
                UpdatePod {
                    ipv4: Some(Some(ip.clone())),
                    ..Default::default()
                },
            )
            .await?;

        if let Some(domain) = pod.primary_domain.clone() {
            self.reconciler
                .apply_template(scope, pod.id, &domain, &ip, self.config.dns.include_email)
                .await?;
        }

        pod = self.update(&pod, UpdatePod::status(PodStatus::Running)).await?;
        info!(tenant_id = %pod.tenant_id, pod_id = %pod.id, ipv4 = %ip, "Pod running");
        self.audit
            .transition(
                scope,
                AuditAction::PodRunning,
                json!({
                    "ipv4": ip,
                    "server_id": server.id,
                    "instance_id": pod.instance_id,
                }),
            )
            .await;

        if let Some(domain) = pod.primary_domain.as_deref() {
            let payload = issue_tls_payload(pod.tenant_id, pod.id, domain);
            if let Err(e) = self.queue.enqueue(payload).await {
                warn!(pod_id = %pod.id, %domain, error = %e, "Could not queue certificate issuance");
            }
        }
        Ok(pod)
    }

    /// Poll `pod-status` until the container reports an address.
    async fn wait_for_ipv4(
        &self,
        scope: &AuditScope,
        server: &Server,
        pod: &Pod,
    ) -> ProvisionResult<String> {
        let attempts = self.config.ip_poll_attempts;
        for attempt in 1..=attempts {
            match self
                .executor
                .run(scope, &server.address, instance(Script::PodStatus, pod))
                .await
            {
                Ok(block) => {
                    if let Some(ip) = block.ipv4.as_deref().filter(|ip| !ip.is_empty()) {
                        let ip = self
                            .checked(scope, validation::ipv4(ip))
                            .await?
                            .to_string();
                        debug!(pod_id = %pod.id, attempt, ipv4 = %ip, "Container has an address");
                        return Ok(ip);
                    }
                }
                Err(e @ ProvisionError::InputRejected { .. }) => return Err(e),
                Err(e) => {
                    debug!(pod_id = %pod.id, attempt, error = %e, "Status poll failed");
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.config.ip_poll_interval()).await;
            }
        }
        Err(ProvisionError::IpAcquisitionTimeout { attempts })
    }

    async fn update(&self, pod: &Pod, input: UpdatePod) -> ProvisionResult<Pod> {
        Ok(self
            .store
            .pods()
            .update(pod.tenant_id, pod.id, input)
            .await?)
    }

    /// Move the pod to `FAILED` and audit why. Never fails itself.
    async fn fail_pod(&self, scope: &AuditScope, error: &ProvisionError) {
        let Some(pod_id) = scope.pod_id else {
            return;
        };
        let reason = error.to_string();
        warn!(tenant_id = %scope.tenant_id, %pod_id, error = %reason, "Pod provisioning failed");
        if let Err(e) = self
            .store
            .pods()
            .update(scope.tenant_id, pod_id, UpdatePod::failed(reason.clone()))
            .await
        {
            warn!(%pod_id, error = %e, "Could not mark pod failed");
        }
        self.audit
            .failure(scope, AuditAction::PodFailed, &reason)
            .await;
    }

    /// Tear a pod down and release its address. Destroying a destroyed
    /// pod is a no-op.
    pub async fn destroy_pod(&self, payload: &DestroyPodPayload) -> ProvisionResult<Pod> {
        let scope = AuditScope::system(payload.tenant_id).with_pod(payload.pod_id);
        let mut pod = self
            .store
            .pods()
            .get_by_id(payload.tenant_id, payload.pod_id)
            .await?;

        match pod.status {
            PodStatus::Destroyed => return Ok(pod),
            PodStatus::Provisioning | PodStatus::Starting => {
                return Err(ProvisionError::NotSettled {
                    pod_id: pod.id,
                    status: pod.status.as_str().to_string(),
                });
            }
            PodStatus::Running | PodStatus::Stopped | PodStatus::Failed => {}
        }

        let server = self.store.servers().get_by_id(pod.server_id).await?;
        if pod.container_created {
            if payload.backup {
                self.executor
                    .run(&scope, &server.address, instance(Script::PodBackup, &pod))
                    .await?;
            }
            self.executor
                .run(&scope, &server.address, instance(Script::PodDestroy, &pod))
                .await?;
            pod = self
                .update(
                    &pod,
                    UpdatePod {
                        container_created: Some(false),
                        ..Default::default()
                    },
                )
                .await?;
        }

        let dns = self.reconciler.delete_records_for_pod(&scope, pod.id).await;
        if let Err(e) = self
            .store
            .certificates()
            .delete_for_pod(pod.tenant_id, pod.id)
            .await
        {
            warn!(pod_id = %pod.id, error = %e, "Could not remove pod certificates");
        }

        let released = pod.ipv4.clone();
        pod = self
            .update(
                &pod,
                UpdatePod {
                    status: Some(PodStatus::Destroyed),
                    status_reason: Some(None),
                    ipv4: Some(None),
                    container_created: None,
                },
            )
            .await?;

        info!(tenant_id = %pod.tenant_id, pod_id = %pod.id, "Pod destroyed");
        self.audit
            .transition(
                &scope,
                AuditAction::PodDestroyed,
                json!({
                    "backup": payload.backup,
                    "released_ipv4": released,
                    "dns_deleted": dns.deleted,
                    "dns_failed": dns.failed,
                }),
            )
            .await;
        Ok(pod)
    }

    pub async fn start_pod(&self, payload: &PodRefPayload) -> ProvisionResult<Pod> {
        let scope = AuditScope::system(payload.tenant_id).with_pod(payload.pod_id);
        let pod = self
            .store
            .pods()
            .get_by_id(payload.tenant_id, payload.pod_id)
            .await?;
        match pod.status {
            PodStatus::Running => return Ok(pod),
            PodStatus::Stopped => {}
            other => return Err(invalid_state(&pod, other, "start")),
        }

        let server = self.store.servers().get_by_id(pod.server_id).await?;
        self.executor
            .run(&scope, &server.address, instance(Script::PodStart, &pod))
            .await?;
        let pod = self.update(&pod, UpdatePod::status(PodStatus::Running)).await?;
        self.audit
            .transition(&scope, AuditAction::PodRunning, json!({ "server_id": server.id }))
            .await;
        Ok(pod)
    }

    pub async fn stop_pod(&self, payload: &PodRefPayload) -> ProvisionResult<Pod> {
        let scope = AuditScope::system(payload.tenant_id).with_pod(payload.pod_id);
        let pod = self
            .store
            .pods()
            .get_by_id(payload.tenant_id, payload.pod_id)
            .await?;
        match pod.status {
            PodStatus::Stopped => return Ok(pod),
            PodStatus::Running => {}
            other => return Err(invalid_state(&pod, other, "stop")),
        }

        let server = self.store.servers().get_by_id(pod.server_id).await?;
        self.executor
            .run(&scope, &server.address, instance(Script::PodStop, &pod))
            .await?;
        let pod = self.update(&pod, UpdatePod::status(PodStatus::Stopped)).await?;
        self.audit
            .transition(&scope, AuditAction::PodStopped, json!({ "server_id": server.id }))
            .await;
        Ok(pod)
    }
}

fn invalid_state(pod: &Pod, status: PodStatus, action: &'static str) -> ProvisionError {
    ProvisionError::InvalidState {
        pod_id: pod.id,
        status: status.as_str().to_string(),
        action,
    }
}

/// A lifecycle script that takes only the instance id.
fn instance(script: Script, pod: &Pod) -> Invocation {
    Invocation::of(script).arg(ArgKind::InstanceId, pod.instance_id)
}

fn create_invocation(pod: &Pod, server: &Server) -> Invocation {
    let r = &pod.resources;
    instance(Script::PodCreate, pod)
        .option("--hostname", ArgKind::Hostname, &pod.hostname)
        .option("--memory", ArgKind::Number, r.memory_mb)
        .option("--swap", ArgKind::Number, r.swap_mb)
        .option("--cores", ArgKind::Number, r.cores)
        .option("--disk", ArgKind::Number, r.disk_gb)
        .option("--bandwidth", ArgKind::Number, r.bandwidth_mbps)
        .option("--storage", ArgKind::StorageTarget, &server.storage_target)
        .option("--tenant", ArgKind::TenantId, pod.tenant_id)
}
