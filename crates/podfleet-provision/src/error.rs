//! Provisioning error types and their retry classification.

use podfleet_core::error::PodfleetError;
use thiserror::Error;

use crate::validation::RejectionReason;

/// How the job dispatcher treats a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Validation or whitelist failure. Never retried.
    InputRejected,
    /// No eligible host. Retried later as capacity changes.
    CapacityExhausted,
    /// Timeouts, DNS propagation, ACME hiccups. Retried with back-off.
    Transient,
    /// Needs an operator. Never retried.
    Terminal,
}

impl ErrorClass {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorClass::CapacityExhausted | ErrorClass::Transient)
    }
}

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("rejected {field}: {reason}")]
    InputRejected {
        field: String,
        reason: RejectionReason,
    },

    #[error("no host has {memory_mb} MB memory and {disk_gb} GB disk free")]
    NoCapacity { memory_mb: u32, disk_gb: u32 },

    #[error("no free instance id on server {server_id}")]
    InstanceIdsExhausted { server_id: uuid::Uuid },

    #[error("plan catalog is empty")]
    EmptyPlanCatalog,

    #[error("{script} failed: {message}")]
    RemoteCommand { script: String, message: String },

    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },

    #[error("could not run {script}: {message}")]
    Spawn { script: String, message: String },

    #[error("container reported no IPv4 after {attempts} polls")]
    IpAcquisitionTimeout { attempts: u32 },

    #[error("DNS provider error: {0}")]
    DnsProvider(String),

    #[error("{domain} does not resolve to {expected} yet")]
    DnsNotPropagated { domain: String, expected: String },

    #[error("domain {domain} belongs to another tenant")]
    DomainOwnership { domain: String },

    #[error("certificate issuance for {domain} failed: {message}")]
    Acme { domain: String, message: String },

    #[error("pod {pod_id} is {status}, cannot {action}")]
    InvalidState {
        pod_id: uuid::Uuid,
        status: String,
        action: &'static str,
    },

    #[error("pod {pod_id} is still {status}")]
    NotSettled { pod_id: uuid::Uuid, status: String },

    #[error(transparent)]
    Store(#[from] PodfleetError),
}

impl ProvisionError {
    pub fn rejected(field: impl Into<String>, reason: RejectionReason) -> Self {
        Self::InputRejected {
            field: field.into(),
            reason,
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            ProvisionError::InputRejected { .. } => ErrorClass::InputRejected,
            ProvisionError::NoCapacity { .. } | ProvisionError::InstanceIdsExhausted { .. } => {
                ErrorClass::CapacityExhausted
            }
            ProvisionError::RemoteCommand { .. }
            | ProvisionError::Timeout { .. }
            | ProvisionError::Spawn { .. }
            | ProvisionError::DnsProvider(_)
            | ProvisionError::DnsNotPropagated { .. }
            | ProvisionError::Acme { .. }
            | ProvisionError::NotSettled { .. } => ErrorClass::Transient,
            ProvisionError::IpAcquisitionTimeout { .. }
            | ProvisionError::DomainOwnership { .. }
            | ProvisionError::InvalidState { .. }
            | ProvisionError::EmptyPlanCatalog => ErrorClass::Terminal,
            ProvisionError::Store(err) => match err {
                PodfleetError::Validation { .. } => ErrorClass::InputRejected,
                PodfleetError::NotFound { .. } => ErrorClass::Terminal,
                PodfleetError::AlreadyExists { .. }
                | PodfleetError::Conflict { .. }
                | PodfleetError::Database(_)
                | PodfleetError::Internal(_) => ErrorClass::Transient,
            },
        }
    }
}

impl From<ProvisionError> for PodfleetError {
    fn from(err: ProvisionError) -> Self {
        match err {
            ProvisionError::Store(inner) => inner,
            ProvisionError::InputRejected { .. } => PodfleetError::Validation {
                message: err.to_string(),
            },
            ProvisionError::InvalidState { .. } | ProvisionError::DomainOwnership { .. } => {
                PodfleetError::Conflict {
                    message: err.to_string(),
                }
            }
            other => PodfleetError::Internal(other.to_string()),
        }
    }
}

pub type ProvisionResult<T> = Result<T, ProvisionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_decides_retry() {
        let rejected = ProvisionError::rejected("hostname", RejectionReason::UnsafeCharacters);
        assert_eq!(rejected.class(), ErrorClass::InputRejected);
        assert!(!rejected.class().is_retryable());

        let capacity = ProvisionError::NoCapacity {
            memory_mb: 4096,
            disk_gb: 10,
        };
        assert!(capacity.class().is_retryable());

        let dns = ProvisionError::DnsNotPropagated {
            domain: "example.test".into(),
            expected: "10.0.0.5".into(),
        };
        assert_eq!(dns.class(), ErrorClass::Transient);

        let ip = ProvisionError::IpAcquisitionTimeout { attempts: 60 };
        assert_eq!(ip.class(), ErrorClass::Terminal);
    }

    #[test]
    fn store_errors_keep_their_meaning() {
        let missing: ProvisionError = PodfleetError::not_found("pod", "x").into();
        assert_eq!(missing.class(), ErrorClass::Terminal);

        let flaky: ProvisionError = PodfleetError::Database("connection reset".into()).into();
        assert_eq!(flaky.class(), ErrorClass::Transient);

        let back: PodfleetError = flaky.into();
        assert!(matches!(back, PodfleetError::Database(_)));
    }
}
