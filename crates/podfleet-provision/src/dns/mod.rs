//! DNS: the authoritative provider client and the template reconciler.

mod provider;
mod reconciler;

pub use provider::{DnsProvider, PowerDnsConfig, PowerDnsProvider, ProviderRecord};
pub use reconciler::{ApplyReport, CleanupReport, DnsReconciler, TemplateRecord, template_records};
