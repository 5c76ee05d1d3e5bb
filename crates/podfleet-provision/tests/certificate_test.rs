//! Certificate issuance and renewal against a running pod.

mod common;

use chrono::{Duration, Utc};
use common::{Harness, POD_IP};
use podfleet_core::models::audit::{AuditAction, AuditOutcome};
use podfleet_core::models::certificate::{CertificateStatus, UpsertCertificate};
use podfleet_core::models::job::{CreatePodPayload, JobPayload, JobStatus, JobType};
use podfleet_core::models::pod::Pod;
use podfleet_core::repository::{
    CertificateRepository, JobFilter, JobRepository, Pagination, Store,
};
use podfleet_provision::{AuditScope, ErrorClass, Issuance, JobOutcome, ProvisionError};
use uuid::Uuid;

async fn running_pod(h: &Harness, domain: &str) -> Pod {
    h.add_server("hv-1", 65_536, 2_000).await;
    h.provisioner()
        .create_pod(&CreatePodPayload {
            tenant_id: Uuid::new_v4(),
            subscription_id: Uuid::new_v4(),
            plan_code: "pod-basic".into(),
            requested_domain: Some(domain.to_string()),
            triggered_by_user_id: None,
            preferred_region: None,
        })
        .await
        .unwrap()
}

#[tokio::test]
async fn pending_dns_then_active_for_ninety_days() {
    let h = Harness::new().await;
    let pod = running_pod(&h, "example.test").await;
    let runner = h.runner();

    // The create queued the issuance job; DNS has not propagated yet.
    let (job, outcome) = runner.run_once("worker-1").await.unwrap().unwrap();
    assert_eq!(job.job_type, JobType::IssueTls);
    assert!(matches!(outcome, JobOutcome::Retried { .. }));

    let pending = h
        .store
        .certificates()
        .get(pod.tenant_id, "example.test", "example.test")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pending.status, CertificateStatus::PendingDns);
    assert!(pending.not_after.is_none());
    assert_eq!(
        h.audit_events(pod.tenant_id, AuditAction::CertificatePendingDns).await.len(),
        1
    );
    assert_eq!(h.transport.count("tls-issue-proxy"), 0);

    h.resolver.point("example.test", POD_IP);
    let (retried, outcome) = runner.run_once("worker-1").await.unwrap().unwrap();
    assert_eq!(retried.id, job.id);
    assert_eq!(outcome, JobOutcome::Completed);

    let active = h
        .store
        .certificates()
        .get(pod.tenant_id, "example.test", "example.test")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(active.status, CertificateStatus::Active);
    assert_eq!(active.issuer.as_deref(), Some("Test CA"));
    let validity = active.not_after.unwrap() - active.not_before.unwrap();
    assert_eq!(validity.num_days(), 90);
    assert!(active.last_error.is_none());

    let job = h.store.jobs().get_by_id(job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
}

#[tokio::test]
async fn valid_certificate_short_circuits() {
    let h = Harness::new().await;
    let pod = running_pod(&h, "example.test").await;
    h.resolver.point("example.test", POD_IP);
    let manager = h.certificates();
    let scope = AuditScope::system(pod.tenant_id);

    let first = manager.issue(&scope, pod.id, "example.test").await.unwrap();
    assert!(matches!(first, Issuance::Issued(_)));
    let calls = h.transport.calls().len();

    let second = manager.issue(&scope, pod.id, "example.test").await.unwrap();
    assert!(matches!(second, Issuance::AlreadyValid(_)));
    assert_eq!(second.certificate().id, first.certificate().id);
    assert_eq!(h.transport.calls().len(), calls);
}

#[tokio::test]
async fn standalone_client_is_the_fallback() {
    let h = Harness::new().await;
    let pod = running_pod(&h, "example.test").await;
    h.resolver.point("example.test", POD_IP);
    h.transport.fail("tls-issue-proxy");

    let issued = h
        .certificates()
        .issue(&AuditScope::system(pod.tenant_id), pod.id, "example.test")
        .await
        .unwrap();
    assert_eq!(issued.certificate().status, CertificateStatus::Active);
    assert_eq!(h.transport.count("tls-issue-proxy"), 1);
    assert_eq!(h.transport.count("tls-issue-standalone"), 1);

    let proxy = h
        .transport
        .calls()
        .into_iter()
        .find(|c| c.script == "tls-issue-proxy")
        .unwrap();
    assert_eq!(
        proxy.args,
        vec![
            pod.instance_id.to_string(),
            "--domain".into(),
            "example.test".into(),
            "--upstream-port".into(),
            "80".into(),
        ]
    );

    let events = h.audit_events(pod.tenant_id, AuditAction::CertificateIssued).await;
    assert_eq!(events[0].metadata["method"], "standalone");
}

#[tokio::test]
async fn both_paths_failing_is_transient() {
    let h = Harness::new().await;
    let pod = running_pod(&h, "example.test").await;
    h.resolver.point("example.test", POD_IP);
    h.transport.fail("tls-issue-proxy");
    h.transport.fail("tls-issue-standalone");

    let err = h
        .certificates()
        .issue(&AuditScope::system(pod.tenant_id), pod.id, "example.test")
        .await
        .unwrap_err();
    assert!(matches!(err, ProvisionError::Acme { .. }));
    assert_eq!(err.class(), ErrorClass::Transient);

    let cert = h
        .store
        .certificates()
        .get(pod.tenant_id, "example.test", "example.test")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cert.status, CertificateStatus::Failed);
    assert!(cert.last_error.is_some());
    assert_eq!(
        h.audit_events(pod.tenant_id, AuditAction::CertificateFailed).await.len(),
        1
    );
}

#[tokio::test]
async fn renewal_sweep_expires_and_queues_once() {
    let h = Harness::new().await;
    let pod = running_pod(&h, "example.test").await;
    let now = Utc::now();
    let certificates = h.store.certificates();

    // Drain the issuance job queued by the create.
    let queued = h.queue().dequeue("worker-1").await.unwrap().unwrap();
    h.queue().mark_completed(queued.id).await.unwrap();

    let cert = |domain: &str, not_after| UpsertCertificate {
        tenant_id: pod.tenant_id,
        pod_id: pod.id,
        domain: domain.to_string(),
        common_name: domain.to_string(),
        issuer: Some("Test CA".into()),
        not_before: Some(now - Duration::days(80)),
        not_after: Some(not_after),
        auto_renew: true,
        status: CertificateStatus::Active,
        last_error: None,
    };
    certificates
        .upsert(cert("example.test", now + Duration::days(5)))
        .await
        .unwrap();
    certificates
        .upsert(cert("lapsed.test", now - Duration::days(1)))
        .await
        .unwrap();
    certificates
        .upsert(cert("fresh.test", now + Duration::days(60)))
        .await
        .unwrap();

    let manager = h.certificates();
    let report = manager.renew_expiring_certificates(now).await.unwrap();
    assert_eq!(report.expired, 1);
    assert_eq!(report.queued, 2);
    assert_eq!(report.failed, 0);

    let lapsed = certificates
        .get(pod.tenant_id, "lapsed.test", "lapsed.test")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(lapsed.status, CertificateStatus::Expired);

    // A second sweep finds the same jobs still open.
    manager.renew_expiring_certificates(now).await.unwrap();
    let pending = h
        .store
        .jobs()
        .list(
            pod.tenant_id,
            JobFilter {
                job_type: Some(JobType::IssueTls),
                status: Some(JobStatus::Pending),
            },
            Pagination::default(),
        )
        .await
        .unwrap();
    assert_eq!(pending.total, 2);
    let mut domains: Vec<String> = pending
        .items
        .iter()
        .filter_map(|job| match &job.payload {
            JobPayload::IssueTls(p) => Some(p.domain.clone()),
            _ => None,
        })
        .collect();
    domains.sort();
    assert_eq!(domains, ["example.test", "lapsed.test"]);
    assert_eq!(
        h.audit_events(pod.tenant_id, AuditAction::CertificateRenewalQueued).await.len(),
        4
    );
}

#[tokio::test]
async fn lapsed_certificate_is_requeued_after_a_failed_renewal() {
    let h = Harness::new().await;
    let pod = running_pod(&h, "example.test").await;
    let certificates = h.store.certificates();
    let queue = h.queue();

    let queued = queue.dequeue("worker-1").await.unwrap().unwrap();
    queue.mark_completed(queued.id).await.unwrap();

    let now = Utc::now();
    certificates
        .upsert(UpsertCertificate {
            tenant_id: pod.tenant_id,
            pod_id: pod.id,
            domain: "example.test".into(),
            common_name: "example.test".into(),
            issuer: Some("Test CA".into()),
            not_before: Some(now - Duration::days(91)),
            not_after: Some(now - Duration::days(1)),
            auto_renew: true,
            status: CertificateStatus::Active,
            last_error: None,
        })
        .await
        .unwrap();

    let manager = h.certificates();
    let first = manager.renew_expiring_certificates(now).await.unwrap();
    assert_eq!(first.expired, 1);
    assert_eq!(first.queued, 1);

    // The renewal runs while DNS points elsewhere and exhausts its attempts.
    let renewal = queue.dequeue("worker-1").await.unwrap().unwrap();
    let err = manager
        .issue(&AuditScope::system(pod.tenant_id), pod.id, "example.test")
        .await
        .unwrap_err();
    assert!(matches!(err, ProvisionError::DnsNotPropagated { .. }));
    queue.mark_failed(renewal.id, &err.to_string()).await.unwrap();

    let parked = certificates
        .get(pod.tenant_id, "example.test", "example.test")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(parked.status, CertificateStatus::PendingDns);
    assert!(parked.auto_renew);

    let second = manager.renew_expiring_certificates(Utc::now()).await.unwrap();
    assert_eq!(second.expired, 0);
    assert_eq!(second.queued, 1);

    let requeued = queue.dequeue("worker-1").await.unwrap().unwrap();
    assert_ne!(requeued.id, renewal.id);
    assert_eq!(requeued.job_type, JobType::IssueTls);
}

#[tokio::test]
async fn certificates_are_only_issued_for_the_tenants_domains() {
    let h = Harness::new().await;
    let pod = running_pod(&h, "example.test").await;
    let manager = h.certificates();
    let scope = AuditScope::system(pod.tenant_id);

    // Registered to someone else, and pointed at our pod.
    h.reconciler()
        .ensure_domain(&AuditScope::system(Uuid::new_v4()), "victim.test", false)
        .await
        .unwrap();
    h.resolver.point("victim.test", POD_IP);

    let err = manager.issue(&scope, pod.id, "victim.test").await.unwrap_err();
    assert!(matches!(err, ProvisionError::DomainOwnership { .. }));
    assert_eq!(err.class(), ErrorClass::Terminal);
    assert_eq!(h.transport.count("tls-issue-proxy"), 0);
    assert!(h
        .store
        .certificates()
        .get(pod.tenant_id, "victim.test", "victim.test")
        .await
        .unwrap()
        .is_none());
    let denied = h.audit_events(pod.tenant_id, AuditAction::CertificateFailed).await;
    assert_eq!(denied.len(), 1);
    assert_eq!(denied[0].outcome, AuditOutcome::Denied);
    assert_eq!(denied[0].metadata["domain"], "victim.test");

    // Names under the primary domain, or under a domain the tenant
    // registered, are theirs.
    h.resolver.point("www.example.test", POD_IP);
    let www = manager.issue(&scope, pod.id, "www.example.test").await.unwrap();
    assert!(matches!(www, Issuance::Issued(_)));

    h.reconciler().ensure_domain(&scope, "shop.test", false).await.unwrap();
    h.resolver.point("shop.test", POD_IP);
    let shop = manager.issue(&scope, pod.id, "shop.test").await.unwrap();
    assert!(matches!(shop, Issuance::Issued(_)));
}
