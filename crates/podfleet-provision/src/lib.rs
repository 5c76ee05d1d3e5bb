//! Podfleet provisioning pipeline: job queue and dispatcher, pod
//! lifecycle worker, DNS reconciliation, certificate lifecycle, host
//! selection and the validated command executor.

pub mod audit;
pub mod config;
pub mod dns;
pub mod error;
pub mod executor;
pub mod queue;
pub mod runner;
pub mod selector;
pub mod tls;
pub mod transport;
pub mod validation;
pub mod worker;

pub use audit::{AuditRecorder, AuditScope};
pub use config::{DnsTemplateConfig, PlanCatalog, ProvisionConfig};
pub use dns::{DnsProvider, DnsReconciler, PowerDnsConfig, PowerDnsProvider};
pub use error::{ErrorClass, ProvisionError, ProvisionResult};
pub use executor::{CommandExecutor, Invocation, Script};
pub use queue::JobQueue;
pub use runner::{JobOutcome, JobRunner};
pub use selector::ServerSelector;
pub use tls::{CertificateManager, DnsResolver, Issuance, SystemResolver};
pub use transport::{CommandTransport, LocalTransport, SshConfig, SshTransport};
pub use worker::PodProvisioner;
