//! DNS reconciler against an in-memory provider and SurrealDB.

mod common;

use common::{Harness, POD_IP};
use podfleet_core::models::audit::AuditAction;
use podfleet_core::models::dns::DnsRecordType;
use podfleet_core::repository::{DnsRepository, Store};
use podfleet_provision::{AuditScope, ProvisionError};
use uuid::Uuid;

#[tokio::test]
async fn domain_names_belong_to_one_tenant() {
    let h = Harness::new().await;
    let reconciler = h.reconciler();
    let t1 = AuditScope::system(Uuid::new_v4());
    let t2 = AuditScope::system(Uuid::new_v4());

    let (first, created) = reconciler.ensure_domain(&t1, "Example.TEST", false).await.unwrap();
    assert!(created);
    assert_eq!(first.name, "example.test");

    let (again, created) = reconciler.ensure_domain(&t1, "example.test", false).await.unwrap();
    assert!(!created);
    assert_eq!(again.id, first.id);

    let err = reconciler.ensure_domain(&t2, "example.test", false).await.unwrap_err();
    assert!(matches!(err, ProvisionError::DomainOwnership { .. }));

    assert_eq!(h.audit_events(t1.tenant_id, AuditAction::DomainCreated).await.len(), 1);
}

#[tokio::test]
async fn second_apply_writes_nothing() {
    let h = Harness::new().await;
    let reconciler = h.reconciler();
    let scope = AuditScope::system(Uuid::new_v4());
    let pod_id = Uuid::new_v4();

    let first = reconciler
        .apply_template(&scope, pod_id, "example.test", POD_IP, false)
        .await
        .unwrap();
    assert_eq!(first.created, 2);
    assert_eq!(first.provider_writes, 2);
    assert!(h.provider.has_zone("example.test"));
    let writes_after_first = h.provider.writes();

    let second = reconciler
        .apply_template(&scope, pod_id, "example.test", POD_IP, false)
        .await
        .unwrap();
    assert_eq!(second.provider_writes, 0);
    assert_eq!(second.created, 0);
    assert_eq!(second.unchanged, 2);
    assert_eq!(h.provider.writes(), writes_after_first);

    let local = h
        .store
        .dns()
        .list_records_for_pod(scope.tenant_id, pod_id)
        .await
        .unwrap();
    assert_eq!(local.len(), 2);
}

#[tokio::test]
async fn changed_address_updates_in_place() {
    let h = Harness::new().await;
    let reconciler = h.reconciler();
    let scope = AuditScope::system(Uuid::new_v4());
    let pod_id = Uuid::new_v4();

    reconciler
        .apply_template(&scope, pod_id, "example.test", POD_IP, false)
        .await
        .unwrap();
    let moved = reconciler
        .apply_template(&scope, pod_id, "example.test", "10.20.0.9", false)
        .await
        .unwrap();
    assert_eq!(moved.updated, 2);
    assert_eq!(moved.created, 0);

    let www = h.provider.record("www.example.test", DnsRecordType::A).unwrap();
    assert_eq!(www.content, "10.20.0.9");
    assert_eq!(h.provider.record_count(), 2);

    let local = h
        .store
        .dns()
        .list_records_for_pod(scope.tenant_id, pod_id)
        .await
        .unwrap();
    assert_eq!(local.len(), 2);
    assert!(local.iter().all(|r| r.content == "10.20.0.9"));
}

#[tokio::test]
async fn lost_local_rows_are_repaired_without_provider_writes() {
    let h = Harness::new().await;
    let reconciler = h.reconciler();
    let scope = AuditScope::system(Uuid::new_v4());
    let pod_id = Uuid::new_v4();

    reconciler
        .apply_template(&scope, pod_id, "example.test", POD_IP, false)
        .await
        .unwrap();
    let dns = h.store.dns();
    for record in dns.list_records_for_pod(scope.tenant_id, pod_id).await.unwrap() {
        dns.delete_record(scope.tenant_id, record.id).await.unwrap();
    }

    let repaired = reconciler
        .apply_template(&scope, pod_id, "example.test", POD_IP, false)
        .await
        .unwrap();
    assert_eq!(repaired.created, 2);
    assert_eq!(repaired.provider_writes, 0);
    assert_eq!(h.provider.record_count(), 2);
}

#[tokio::test]
async fn mail_records_follow_the_toggle() {
    let h = Harness::new().await;
    let scope = AuditScope::system(Uuid::new_v4());

    let report = h
        .reconciler()
        .apply_template(&scope, Uuid::new_v4(), "mail.test", POD_IP, true)
        .await
        .unwrap();
    assert_eq!(report.created, 5);

    let mx = h.provider.record("mail.test", DnsRecordType::Mx).unwrap();
    assert_eq!(mx.priority, Some(10));
    let dmarc = h.provider.record("_dmarc.mail.test", DnsRecordType::Txt).unwrap();
    assert!(dmarc.content.contains("DMARC1"));
}

#[tokio::test]
async fn unsafe_address_is_rejected_and_audited() {
    let h = Harness::new().await;
    let scope = AuditScope::system(Uuid::new_v4());

    let err = h
        .reconciler()
        .apply_template(&scope, Uuid::new_v4(), "example.test", "10.0.0.1;reboot", false)
        .await
        .unwrap_err();
    assert!(matches!(err, ProvisionError::InputRejected { .. }));
    assert_eq!(h.provider.writes(), 0);

    let events = h.audit_events(scope.tenant_id, AuditAction::InputRejected).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].metadata["reason"], "unsafe_characters");
}

#[tokio::test]
async fn cleanup_never_fails() {
    let h = Harness::new().await;
    let reconciler = h.reconciler();
    let scope = AuditScope::system(Uuid::new_v4());
    let pod_id = Uuid::new_v4();

    reconciler
        .apply_template(&scope, pod_id, "example.test", POD_IP, false)
        .await
        .unwrap();

    h.provider.set_unreachable(true);
    let failed = reconciler.delete_records_for_pod(&scope, pod_id).await;
    assert_eq!(failed.deleted, 0);
    assert_eq!(failed.failed, 2);

    h.provider.set_unreachable(false);
    let cleaned = reconciler.delete_records_for_pod(&scope, pod_id).await;
    assert_eq!(cleaned.deleted, 2);
    assert_eq!(h.provider.record_count(), 0);

    let nothing_left = reconciler.delete_records_for_pod(&scope, pod_id).await;
    assert_eq!(nothing_left.deleted, 0);
    assert_eq!(nothing_left.failed, 0);
}

#[tokio::test]
async fn cleanup_drops_local_rows_when_the_zone_is_gone_at_the_provider() {
    let h = Harness::new().await;
    let reconciler = h.reconciler();
    let scope = AuditScope::system(Uuid::new_v4());
    let pod_id = Uuid::new_v4();

    reconciler
        .apply_template(&scope, pod_id, "example.test", POD_IP, true)
        .await
        .unwrap();
    h.provider.drop_zone("example.test");
    assert_eq!(h.provider.record_count(), 0);

    let report = reconciler.delete_records_for_pod(&scope, pod_id).await;
    assert_eq!(report.deleted, 5);
    assert_eq!(report.failed, 0);

    let local = h
        .store
        .dns()
        .list_records_for_pod(scope.tenant_id, pod_id)
        .await
        .unwrap();
    assert!(local.is_empty());
}
