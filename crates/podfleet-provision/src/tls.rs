//! Certificate lifecycle: DNS-gated issuance and the renewal sweep.
//!
//! Issuance is idempotent. A certificate that stays valid past the
//! renewal window is returned untouched. Otherwise the domain must belong
//! to the pod's tenant and already resolve to the pod's IPv4; if it does
//! not resolve yet, the row is parked in `PendingDns` and the job is
//! retried once DNS has propagated.

use std::collections::HashSet;
use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use podfleet_core::models::audit::{AuditAction, AuditOutcome};
use podfleet_core::models::certificate::{CertificateStatus, TlsCertificate, UpsertCertificate};
use podfleet_core::models::pod::Pod;
use podfleet_core::repository::{
    CertificateRepository, DnsRepository, PodRepository, ServerRepository, Store,
};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audit::{AuditRecorder, AuditScope};
use crate::config::ProvisionConfig;
use crate::error::{ProvisionError, ProvisionResult};
use crate::executor::{ArgKind, CommandExecutor, Invocation, ResultBlock, Script};
use crate::queue::{JobQueue, issue_tls_payload};
use crate::transport::CommandTransport;
use crate::validation;

/// Public DNS lookups used to check propagation before issuance.
pub trait DnsResolver: Send + Sync {
    /// IPv4 addresses `name` currently resolves to. A name that does not
    /// resolve yields an empty list.
    fn resolve_ipv4(
        &self,
        name: &str,
    ) -> impl Future<Output = ProvisionResult<Vec<Ipv4Addr>>> + Send;
}

/// Resolver backed by the operating system's stub resolver.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl DnsResolver for SystemResolver {
    async fn resolve_ipv4(&self, name: &str) -> ProvisionResult<Vec<Ipv4Addr>> {
        match tokio::net::lookup_host((name, 0)).await {
            Ok(addrs) => {
                let mut seen = HashSet::new();
                Ok(addrs
                    .filter_map(|addr| match addr.ip() {
                        std::net::IpAddr::V4(ip) => Some(ip),
                        std::net::IpAddr::V6(_) => None,
                    })
                    .filter(|ip| seen.insert(*ip))
                    .collect())
            }
            Err(e) => {
                debug!(domain = name, error = %e, "Lookup failed");
                Ok(Vec::new())
            }
        }
    }
}

/// What [`CertificateManager::issue`] did.
#[derive(Debug, Clone)]
pub enum Issuance {
    /// A certificate valid beyond the renewal window already existed.
    AlreadyValid(TlsCertificate),
    Issued(TlsCertificate),
}

impl Issuance {
    pub fn certificate(&self) -> &TlsCertificate {
        match self {
            Issuance::AlreadyValid(cert) | Issuance::Issued(cert) => cert,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenewalReport {
    /// Certificates moved from `Active` to `Expired` by this sweep.
    pub expired: u64,
    pub queued: usize,
    pub failed: usize,
}

pub struct CertificateManager<S: Store, T: CommandTransport, R: DnsResolver> {
    store: S,
    executor: CommandExecutor<T, S>,
    resolver: R,
    queue: JobQueue<S>,
    audit: AuditRecorder<S>,
    config: ProvisionConfig,
}

impl<S: Store, T: CommandTransport, R: DnsResolver> CertificateManager<S, T, R> {
    pub fn new(
        store: S,
        executor: CommandExecutor<T, S>,
        resolver: R,
        audit: AuditRecorder<S>,
        config: ProvisionConfig,
    ) -> Self {
        let queue = JobQueue::new(store.clone(), config.clone());
        Self {
            store,
            executor,
            resolver,
            queue,
            audit,
            config,
        }
    }

    /// Obtain a certificate for `domain` fronting `pod_id`.
    ///
    /// Fails with `DomainOwnership` (terminal) unless the domain is the
    /// pod's primary domain, a tenant-registered domain, or a name under
    /// either. Fails with `DnsNotPropagated` while the domain does not
    /// resolve to the pod, and with `Acme` when both issuance paths fail.
    /// Both are transient.
    pub async fn issue(
        &self,
        scope: &AuditScope,
        pod_id: Uuid,
        domain: &str,
    ) -> ProvisionResult<Issuance> {
        let scope = scope.with_pod(pod_id);
        let domain = match validation::domain(domain) {
            Ok(domain) => domain,
            Err(rejection) => {
                self.audit
                    .input_rejected(&scope, &rejection, "issue_certificate")
                    .await;
                return Err(rejection.into());
            }
        };

        let now = Utc::now();
        let existing = self
            .store
            .certificates()
            .get(scope.tenant_id, &domain, &domain)
            .await?;
        if let Some(cert) = &existing {
            if cert.is_valid_beyond(now + self.config.renewal_window()) {
                debug!(%domain, not_after = ?cert.not_after, "Certificate still valid");
                return Ok(Issuance::AlreadyValid(cert.clone()));
            }
        }

        let pod = self.store.pods().get_by_id(scope.tenant_id, pod_id).await?;
        let Some(ip) = pod.ipv4.clone() else {
            return Err(ProvisionError::InvalidState {
                pod_id,
                status: pod.status.as_str().to_string(),
                action: "issue a certificate for a pod without an address",
            });
        };

        if !self.owns(&pod, &domain).await? {
            warn!(tenant_id = %scope.tenant_id, %pod_id, %domain, "Certificate requested for a foreign domain");
            self.audit
                .record(
                    scope
                        .event(AuditAction::CertificateFailed, AuditOutcome::Denied)
                        .metadata(json!({ "domain": domain, "reason": "domain_not_owned" })),
                )
                .await;
            return Err(ProvisionError::DomainOwnership { domain });
        }

        let resolved = self.resolver.resolve_ipv4(&domain).await?;
        if !resolved.iter().any(|addr| addr.to_string() == ip) {
            info!(%domain, expected = %ip, ?resolved, "Domain not pointing at pod yet");
            let message = format!("{domain} resolves to {resolved:?}, expected {ip}");
            self.park(&pod, &domain, existing.as_ref(), CertificateStatus::PendingDns, &message, now)
                .await?;
            self.audit
                .transition(
                    &scope,
                    AuditAction::CertificatePendingDns,
                    json!({ "domain": domain, "expected": ip }),
                )
                .await;
            return Err(ProvisionError::DnsNotPropagated {
                domain,
                expected: ip,
            });
        }

        let host = self.store.servers().get_by_id(pod.server_id).await?.address;
        let (block, method) = match self.request(&scope, &host, &pod, &domain).await {
            Ok(issued) => issued,
            Err(e @ ProvisionError::InputRejected { .. }) => return Err(e),
            Err(e) => {
                let message = e.to_string();
                self.park(&pod, &domain, existing.as_ref(), CertificateStatus::Failed, &message, now)
                    .await?;
                self.audit
                    .failure(&scope, AuditAction::CertificateFailed, &message)
                    .await;
                return Err(ProvisionError::Acme { domain, message });
            }
        };

        let not_after = now + self.config.certificate_validity();
        let cert = self
            .store
            .certificates()
            .upsert(UpsertCertificate {
                tenant_id: scope.tenant_id,
                pod_id,
                domain: domain.clone(),
                common_name: domain.clone(),
                issuer: block.issuer,
                not_before: Some(now),
                not_after: Some(not_after),
                auto_renew: existing.as_ref().is_none_or(|c| c.auto_renew),
                status: CertificateStatus::Active,
                last_error: None,
            })
            .await?;

        info!(tenant_id = %scope.tenant_id, %pod_id, %domain, method, %not_after, "Certificate issued");
        self.audit
            .transition(
                &scope,
                AuditAction::CertificateIssued,
                json!({
                    "domain": domain,
                    "method": method,
                    "issuer": cert.issuer,
                    "not_after": not_after,
                }),
            )
            .await;
        Ok(Issuance::Issued(cert))
    }

    /// Whether `domain`, or a parent of it, is the pod's primary domain or
    /// registered to the pod's tenant.
    async fn owns(&self, pod: &Pod, domain: &str) -> ProvisionResult<bool> {
        let dns = self.store.dns();
        let mut name = domain;
        loop {
            if pod.primary_domain.as_deref() == Some(name)
                || dns.get_domain_by_name(pod.tenant_id, name).await?.is_some()
            {
                return Ok(true);
            }
            match name.split_once('.') {
                // Stop before the bare TLD.
                Some((_, parent)) if parent.contains('.') => name = parent,
                _ => return Ok(false),
            }
        }
    }

    /// Proxy-integrated ACME first, the standalone client as fallback.
    async fn request(
        &self,
        scope: &AuditScope,
        host: &str,
        pod: &Pod,
        domain: &str,
    ) -> ProvisionResult<(ResultBlock, &'static str)> {
        let proxy = Invocation::of(Script::TlsIssueProxy)
            .arg(ArgKind::InstanceId, pod.instance_id)
            .option("--domain", ArgKind::Domain, domain)
            .option("--upstream-port", ArgKind::Number, self.config.upstream_port);

        match self.executor.run(scope, host, proxy).await {
            Ok(block) => Ok((block, "proxy")),
            Err(e @ ProvisionError::InputRejected { .. }) => Err(e),
            Err(e) => {
                warn!(%domain, error = %e, "Proxy issuance failed, trying standalone client");
                let standalone = Invocation::of(Script::TlsIssueStandalone)
                    .arg(ArgKind::InstanceId, pod.instance_id)
                    .option("--domain", ArgKind::Domain, domain);
                let block = self.executor.run(scope, host, standalone).await?;
                Ok((block, "standalone"))
            }
        }
    }

    /// Record a non-active outcome. A certificate that has not expired yet
    /// keeps serving, so only its error is updated.
    async fn park(
        &self,
        pod: &Pod,
        domain: &str,
        existing: Option<&TlsCertificate>,
        status: CertificateStatus,
        message: &str,
        now: DateTime<Utc>,
    ) -> ProvisionResult<()> {
        let still_serving = existing.is_some_and(|c| c.is_valid_beyond(now));
        let input = match existing {
            Some(cert) => UpsertCertificate {
                tenant_id: cert.tenant_id,
                pod_id: pod.id,
                domain: cert.domain.clone(),
                common_name: cert.common_name.clone(),
                issuer: cert.issuer.clone(),
                not_before: cert.not_before,
                not_after: cert.not_after,
                auto_renew: cert.auto_renew,
                status: if still_serving { cert.status } else { status },
                last_error: Some(message.to_string()),
            },
            None => UpsertCertificate {
                tenant_id: pod.tenant_id,
                pod_id: pod.id,
                domain: domain.to_string(),
                common_name: domain.to_string(),
                issuer: None,
                not_before: None,
                not_after: None,
                auto_renew: true,
                status,
                last_error: Some(message.to_string()),
            },
        };
        self.store.certificates().upsert(input).await?;
        Ok(())
    }

    /// Mark lapsed certificates expired, then queue one issuance job per
    /// auto-renewing certificate inside the renewal window.
    pub async fn renew_expiring_certificates(
        &self,
        now: DateTime<Utc>,
    ) -> ProvisionResult<RenewalReport> {
        let certificates = self.store.certificates();
        let expired = certificates.mark_expired(now).await?;
        let candidates = certificates
            .list_renewal_candidates(now + self.config.renewal_window())
            .await?;

        let mut report = RenewalReport {
            expired,
            ..Default::default()
        };
        for cert in candidates {
            let scope = AuditScope::system(cert.tenant_id).with_pod(cert.pod_id);
            let payload = issue_tls_payload(cert.tenant_id, cert.pod_id, &cert.domain);
            match self.queue.enqueue(payload).await {
                Ok(job) => {
                    report.queued += 1;
                    self.audit
                        .transition(
                            &scope,
                            AuditAction::CertificateRenewalQueued,
                            json!({
                                "domain": cert.domain,
                                "job_id": job.id,
                                "not_after": cert.not_after,
                            }),
                        )
                        .await;
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(tenant_id = %cert.tenant_id, domain = %cert.domain, error = %e, "Could not queue renewal");
                }
            }
        }

        if report.expired > 0 || report.queued > 0 || report.failed > 0 {
            info!(
                expired = report.expired,
                queued = report.queued,
                failed = report.failed,
                "Renewal sweep finished"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn system_resolver_answers_for_localhost() {
        let addrs = SystemResolver.resolve_ipv4("localhost").await.unwrap();
        assert!(addrs.iter().all(|ip| ip.is_loopback()));
    }

    #[tokio::test]
    async fn unresolvable_name_is_empty_not_an_error() {
        let addrs = SystemResolver
            .resolve_ipv4("does-not-exist.invalid")
            .await
            .unwrap();
        assert!(addrs.is_empty());
    }
}
