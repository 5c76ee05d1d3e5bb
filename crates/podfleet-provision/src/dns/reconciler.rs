//! Domain, zone and template-record reconciliation.
//!
//! The local store and the provider are compared record by record; only
//! differences are written. A record missing locally is looked up at the
//! provider first, so a previous pass that wrote the provider but failed
//! to persist locally is repaired without a second provider write.

use podfleet_core::error::PodfleetError;
use podfleet_core::models::audit::AuditAction;
use podfleet_core::models::dns::{
    CreateDnsRecord, CreateDnsZone, DnsRecord, DnsRecordType, DnsZone, UpdateDnsRecord,
};
use podfleet_core::models::domain::{CreateDomain, Domain};
use podfleet_core::repository::{DnsRepository, Store};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::provider::{DnsProvider, ProviderRecord};
use crate::audit::{AuditRecorder, AuditScope};
use crate::config::DnsTemplateConfig;
use crate::error::{ProvisionError, ProvisionResult};
use crate::validation;

/// One record the template wants to exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateRecord {
    pub name: String,
    pub record_type: DnsRecordType,
    pub content: String,
    pub ttl: u32,
    pub priority: Option<u32>,
}

impl TemplateRecord {
    fn matches(&self, content: &str, ttl: u32, priority: Option<u32>) -> bool {
        self.content == content && self.ttl == ttl && self.priority == priority
    }

    fn to_provider(&self) -> ProviderRecord {
        ProviderRecord {
            name: self.name.clone(),
            record_type: self.record_type,
            content: self.content.clone(),
            ttl: self.ttl,
            priority: self.priority,
        }
    }
}

/// Records for a pod serving `domain` at `ip`: root A and `www` A, plus
/// MX, SPF and DMARC when mail is included.
pub fn template_records(
    domain: &str,
    ip: &str,
    include_email: bool,
    config: &DnsTemplateConfig,
) -> Vec<TemplateRecord> {
    let record = |name: String, record_type, content: String, priority| TemplateRecord {
        name,
        record_type,
        content,
        ttl: config.ttl,
        priority,
    };

    let mut records = vec![
        record(domain.to_string(), DnsRecordType::A, ip.to_string(), None),
        record(format!("www.{domain}"), DnsRecordType::A, ip.to_string(), None),
    ];
    if include_email {
        records.push(record(
            domain.to_string(),
            DnsRecordType::Mx,
            domain.to_string(),
            Some(config.mx_priority),
        ));
        records.push(record(
            domain.to_string(),
            DnsRecordType::Txt,
            config.spf.clone(),
            None,
        ));
        records.push(record(
            format!("_dmarc.{domain}"),
            DnsRecordType::Txt,
            config.dmarc.clone(),
            None,
        ));
    }
    records
}

#[derive(Debug, Clone, Default)]
pub struct ApplyReport {
    pub domain_id: Option<Uuid>,
    pub zone_id: Option<Uuid>,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Provider writes issued by this pass.
    pub provider_writes: usize,
    /// Set when the domain opts out of managed DNS.
    pub skipped: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CleanupReport {
    pub deleted: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

enum Outcome {
    Created,
    Updated,
    Unchanged,
}

pub struct DnsReconciler<S: Store, P: DnsProvider> {
    store: S,
    provider: P,
    audit: AuditRecorder<S>,
    template: DnsTemplateConfig,
}

impl<S: Store, P: DnsProvider> DnsReconciler<S, P> {
    pub fn new(store: S, provider: P, audit: AuditRecorder<S>, template: DnsTemplateConfig) -> Self {
        Self {
            store,
            provider,
            audit,
            template,
        }
    }

    /// Find or register `name` for `scope.tenant_id`. Returns the domain
    /// and whether this call created it. A name owned by another tenant
    /// is a `DomainOwnership` error.
    pub async fn ensure_domain(
        &self,
        scope: &AuditScope,
        name: &str,
        manage_mail: bool,
    ) -> ProvisionResult<(Domain, bool)> {
        let name = match validation::domain(name) {
            Ok(name) => name,
            Err(rejection) => {
                self.audit
                    .input_rejected(scope, &rejection, "ensure_domain")
                    .await;
                return Err(rejection.into());
            }
        };
        let dns = self.store.dns();

        if let Some(domain) = dns.get_domain_by_name(scope.tenant_id, &name).await? {
            return Ok((domain, false));
        }

        match dns
            .create_domain(CreateDomain {
                tenant_id: scope.tenant_id,
                name: name.clone(),
                manage_dns: true,
                manage_mail,
            })
            .await
        {
            Ok(domain) => {
                info!(tenant_id = %scope.tenant_id, domain = %name, "Domain registered");
                self.audit
                    .transition(scope, AuditAction::DomainCreated, json!({ "domain": name }))
                    .await;
                Ok((domain, true))
            }
            Err(PodfleetError::AlreadyExists { .. }) => {
                // Either a concurrent worker for this tenant won the race,
                // or the name is someone else's.
                match dns.get_domain_by_name(scope.tenant_id, &name).await? {
                    Some(domain) => Ok((domain, false)),
                    None => {
                        warn!(tenant_id = %scope.tenant_id, domain = %name, "Domain owned by another tenant");
                        Err(ProvisionError::DomainOwnership { domain: name })
                    }
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn ensure_zone(&self, scope: &AuditScope, domain: &Domain) -> ProvisionResult<DnsZone> {
        let dns = self.store.dns();
        if let Some(zone) = dns.get_zone_for_domain(domain.tenant_id, domain.id).await? {
            return Ok(zone);
        }

        let provider_zone_id = match self.provider.find_zone(&domain.name).await? {
            Some(id) => {
                debug!(domain = %domain.name, "Adopting existing provider zone");
                id
            }
            None => self.provider.create_zone(&domain.name).await?,
        };

        match dns
            .create_zone(CreateDnsZone {
                tenant_id: domain.tenant_id,
                domain_id: domain.id,
                zone_name: domain.name.clone(),
                provider_zone_id: provider_zone_id.clone(),
            })
            .await
        {
            Ok(zone) => {
                self.audit
                    .transition(
                        scope,
                        AuditAction::DnsZoneCreated,
                        json!({ "domain": domain.name, "provider_zone_id": provider_zone_id }),
                    )
                    .await;
                Ok(zone)
            }
            Err(PodfleetError::AlreadyExists { .. }) => dns
                .get_zone_for_domain(domain.tenant_id, domain.id)
                .await?
                .ok_or_else(|| {
                    ProvisionError::Store(PodfleetError::Conflict {
                        message: format!("zone for {} vanished", domain.name),
                    })
                }),
            Err(e) => Err(e.into()),
        }
    }

    /// Make the pod's DNS records for `domain` match the template.
    pub async fn apply_template(
        &self,
        scope: &AuditScope,
        pod_id: Uuid,
        domain: &str,
        ip: &str,
        include_email: bool,
    ) -> ProvisionResult<ApplyReport> {
        let ip = match validation::ipv4(ip) {
            Ok(ip) => ip.to_string(),
            Err(rejection) => {
                self.audit
                    .input_rejected(scope, &rejection, "apply_template")
                    .await;
                return Err(rejection.into());
            }
        };
        let (domain, _) = self.ensure_domain(scope, domain, include_email).await?;
        let mut report = ApplyReport {
            domain_id: Some(domain.id),
            ..Default::default()
        };
        if !domain.manage_dns {
            debug!(domain = %domain.name, "DNS not managed, skipping template");
            report.skipped = true;
            return Ok(report);
        }

        let zone = self.ensure_zone(scope, &domain).await?;
        report.zone_id = Some(zone.id);

        for desired in template_records(&domain.name, &ip, include_email, &self.template) {
            match self.apply_record(&zone, pod_id, &desired, &mut report).await? {
                Outcome::Created => report.created += 1,
                Outcome::Updated => report.updated += 1,
                Outcome::Unchanged => report.unchanged += 1,
            }
        }

        self.store
            .dns()
            .mark_zone_synced(zone.tenant_id, zone.id)
            .await?;

        info!(
            tenant_id = %scope.tenant_id,
            %pod_id,
            domain = %domain.name,
            created = report.created,
            updated = report.updated,
            unchanged = report.unchanged,
            "DNS template applied"
        );
        self.audit
            .transition(
                scope,
                AuditAction::DnsRecordsApplied,
                json!({
                    "domain": domain.name,
                    "ipv4": ip,
                    "created": report.created,
                    "updated": report.updated,
                    "unchanged": report.unchanged,
                }),
            )
            .await;
        Ok(report)
    }

    async fn apply_record(
        &self,
        zone: &DnsZone,
        pod_id: Uuid,
        desired: &TemplateRecord,
        report: &mut ApplyReport,
    ) -> ProvisionResult<Outcome> {
        let dns = self.store.dns();
        let local = dns
            .find_record(zone.tenant_id, zone.id, &desired.name, desired.record_type)
            .await?;

        if let Some(existing) = local {
            if desired.matches(&existing.content, existing.ttl, existing.priority) {
                if existing.pod_id != Some(pod_id) {
                    self.update_local(&existing, desired, pod_id).await?;
                }
                return Ok(Outcome::Unchanged);
            }
            self.provider
                .upsert_record(&zone.provider_zone_id, &desired.to_provider())
                .await?;
            report.provider_writes += 1;
            self.update_local(&existing, desired, pod_id).await?;
            return Ok(Outcome::Updated);
        }

        let remote = self
            .provider
            .get_record(&zone.provider_zone_id, &desired.name, desired.record_type)
            .await?;
        let in_sync = remote
            .as_ref()
            .is_some_and(|r| desired.matches(&r.content, r.ttl, r.priority));
        if in_sync {
            debug!(name = %desired.name, record_type = %desired.record_type, "Repairing missing local record");
        } else {
            self.provider
                .upsert_record(&zone.provider_zone_id, &desired.to_provider())
                .await?;
            report.provider_writes += 1;
        }

        match dns
            .create_record(CreateDnsRecord {
                tenant_id: zone.tenant_id,
                zone_id: zone.id,
                pod_id: Some(pod_id),
                name: desired.name.clone(),
                record_type: desired.record_type,
                content: desired.content.clone(),
                ttl: desired.ttl,
                priority: desired.priority,
            })
            .await
        {
            Ok(_) => Ok(Outcome::Created),
            Err(PodfleetError::AlreadyExists { .. }) => {
                // Lost a race with another reconciler; converge on its row.
                if let Some(existing) = dns
                    .find_record(zone.tenant_id, zone.id, &desired.name, desired.record_type)
                    .await?
                {
                    self.update_local(&existing, desired, pod_id).await?;
                }
                Ok(Outcome::Updated)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn update_local(
        &self,
        existing: &DnsRecord,
        desired: &TemplateRecord,
        pod_id: Uuid,
    ) -> ProvisionResult<()> {
        self.store
            .dns()
            .update_record(
                existing.tenant_id,
                existing.id,
                UpdateDnsRecord {
                    content: desired.content.clone(),
                    ttl: desired.ttl,
                    priority: desired.priority,
                    pod_id: Some(pod_id),
                },
            )
            .await?;
        Ok(())
    }

    /// Remove every record the pod's template created, at the provider
    /// and locally. Never fails; problems are logged and counted.
    pub async fn delete_records_for_pod(&self, scope: &AuditScope, pod_id: Uuid) -> CleanupReport {
        let mut report = CleanupReport::default();
        let dns = self.store.dns();

        let records = match dns.list_records_for_pod(scope.tenant_id, pod_id).await {
            Ok(records) => records,
            Err(e) => {
                warn!(tenant_id = %scope.tenant_id, %pod_id, error = %e, "Could not list DNS records for cleanup");
                report.failed += 1;
                report.errors.push(e.to_string());
                return report;
            }
        };

        for record in records {
            match self.delete_one(&record).await {
                Ok(()) => report.deleted += 1,
                Err(e) => {
                    warn!(
                        tenant_id = %scope.tenant_id,
                        %pod_id,
                        name = %record.name,
                        record_type = %record.record_type,
                        error = %e,
                        "DNS record cleanup failed"
                    );
                    report.failed += 1;
                    report.errors.push(e.to_string());
                }
            }
        }

        if report.deleted > 0 || report.failed > 0 {
            self.audit
                .transition(
                    scope,
                    AuditAction::DnsRecordsDeleted,
                    json!({ "deleted": report.deleted, "failed": report.failed }),
                )
                .await;
        }
        report
    }

    async fn delete_one(&self, record: &DnsRecord) -> ProvisionResult<()> {
        let dns = self.store.dns();
        match dns.get_zone_by_id(record.tenant_id, record.zone_id).await {
            Ok(zone) => {
                if let Err(e) = self
                    .provider
                    .delete_record(&zone.provider_zone_id, &record.name, record.record_type)
                    .await
                {
                    // A zone removed at the provider took its records along.
                    if !matches!(self.provider.find_zone(&zone.zone_name).await, Ok(None)) {
                        return Err(e);
                    }
                    debug!(zone = %zone.zone_name, name = %record.name, "Zone gone at provider, dropping local record");
                }
            }
            // Zone already gone: nothing left at the provider to remove.
            Err(PodfleetError::NotFound { .. }) => {}
            Err(e) => return Err(e.into()),
        }
        dns.delete_record(record.tenant_id, record.id).await?;
        Ok(())
    }
}
