//! TLS certificate model.
//!
//! Certificates are keyed by `(tenant, domain, common name)`. Only the
//! metadata of an issued certificate is tracked here; key material stays
//! on the host that terminates TLS for the pod.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a certificate in its lifecycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CertificateStatus {
    /// Waiting for the domain to resolve to the pod's address.
    PendingDns,
    Active,
    Expired,
    Failed,
}

impl CertificateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CertificateStatus::PendingDns => "PendingDns",
            CertificateStatus::Active => "Active",
            CertificateStatus::Expired => "Expired",
            CertificateStatus::Failed => "Failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PendingDns" => Some(CertificateStatus::PendingDns),
            "Active" => Some(CertificateStatus::Active),
            "Expired" => Some(CertificateStatus::Expired),
            "Failed" => Some(CertificateStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsCertificate {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub pod_id: Uuid,
    pub domain: String,
    pub common_name: String,
    /// Issuing CA as reported by the ACME client (e.g., `Let's Encrypt`).
    pub issuer: Option<String>,
    pub not_before: Option<DateTime<Utc>>,
    pub not_after: Option<DateTime<Utc>>,
    pub auto_renew: bool,
    pub status: CertificateStatus,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TlsCertificate {
    /// Active and valid beyond `horizon`.
    pub fn is_valid_beyond(&self, horizon: DateTime<Utc>) -> bool {
        self.status == CertificateStatus::Active
            && self.not_after.is_some_and(|not_after| not_after > horizon)
    }
}

/// Insert-or-replace input keyed by `(tenant_id, domain, common_name)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertCertificate {
    pub tenant_id: Uuid,
    pub pod_id: Uuid,
    pub domain: String,
    pub common_name: String,
    pub issuer: Option<String>,
    pub not_before: Option<DateTime<Utc>>,
    pub not_after: Option<DateTime<Utc>>,
    pub auto_renew: bool,
    pub status: CertificateStatus,
    pub last_error: Option<String>,
}
