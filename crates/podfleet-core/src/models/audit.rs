//! Audit event domain model.
//!
//! Audit events are append-only. The admin UI reads them per tenant;
//! nothing in the pipeline updates or deletes one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AuditAction {
    PodProvisioning,
    PodStarting,
    PodRunning,
    PodStopped,
    PodFailed,
    PodDestroyed,
    DomainCreated,
    DnsZoneCreated,
    DnsRecordsApplied,
    DnsRecordsDeleted,
    CertificatePendingDns,
    CertificateIssued,
    CertificateFailed,
    CertificateRenewalQueued,
    InputRejected,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::PodProvisioning => "pod.provisioning",
            AuditAction::PodStarting => "pod.starting",
            AuditAction::PodRunning => "pod.running",
            AuditAction::PodStopped => "pod.stopped",
            AuditAction::PodFailed => "pod.failed",
            AuditAction::PodDestroyed => "pod.destroyed",
            AuditAction::DomainCreated => "domain.created",
            AuditAction::DnsZoneCreated => "dns.zone_created",
            AuditAction::DnsRecordsApplied => "dns.records_applied",
            AuditAction::DnsRecordsDeleted => "dns.records_deleted",
            AuditAction::CertificatePendingDns => "tls.pending_dns",
            AuditAction::CertificateIssued => "tls.issued",
            AuditAction::CertificateFailed => "tls.failed",
            AuditAction::CertificateRenewalQueued => "tls.renewal_queued",
            AuditAction::InputRejected => "security.input_rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        const ALL: [AuditAction; 15] = [
            AuditAction::PodProvisioning,
            AuditAction::PodStarting,
            AuditAction::PodRunning,
            AuditAction::PodStopped,
            AuditAction::PodFailed,
            AuditAction::PodDestroyed,
            AuditAction::DomainCreated,
            AuditAction::DnsZoneCreated,
            AuditAction::DnsRecordsApplied,
            AuditAction::DnsRecordsDeleted,
            AuditAction::CertificatePendingDns,
            AuditAction::CertificateIssued,
            AuditAction::CertificateFailed,
            AuditAction::CertificateRenewalQueued,
            AuditAction::InputRejected,
        ];
        ALL.into_iter().find(|action| action.as_str() == s)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AuditOutcome {
    Success,
    Failure,
    Denied,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOutcome::Success => "Success",
            AuditOutcome::Failure => "Failure",
            AuditOutcome::Denied => "Denied",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Success" => Some(AuditOutcome::Success),
            "Failure" => Some(AuditOutcome::Failure),
            "Denied" => Some(AuditOutcome::Denied),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub tenant_id: Uuid,
    /// `None` for system-initiated actions.
    pub actor_user_id: Option<Uuid>,
    pub action: AuditAction,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub outcome: AuditOutcome,
    pub metadata: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAuditEvent {
    pub tenant_id: Uuid,
    pub actor_user_id: Option<Uuid>,
    pub action: AuditAction,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub outcome: AuditOutcome,
    pub metadata: serde_json::Value,
}

impl CreateAuditEvent {
    pub fn new(tenant_id: Uuid, action: AuditAction, outcome: AuditOutcome) -> Self {
        Self {
            tenant_id,
            actor_user_id: None,
            action,
            resource_type: None,
            resource_id: None,
            outcome,
            metadata: serde_json::Value::Object(Default::default()),
        }
    }

    pub fn actor(mut self, actor_user_id: Option<Uuid>) -> Self {
        self.actor_user_id = actor_user_id;
        self
    }

    pub fn resource(mut self, resource_type: &str, resource_id: impl ToString) -> Self {
        self.resource_type = Some(resource_type.to_string());
        self.resource_id = Some(resource_id.to_string());
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}
