//! Repository trait definitions for data access abstraction.
//!
//! All repository operations are async. Tenant-scoped repositories
//! require a `tenant_id` parameter to enforce data isolation; the only
//! unscoped operations are the fleet-level ones (host capacity, instance
//! id allocation, job dispatch, renewal sweeps) that never return
//! another tenant's data to a caller acting for a tenant.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::PodfleetResult;
use crate::models::{
    audit::{AuditAction, AuditEvent, CreateAuditEvent},
    certificate::{TlsCertificate, UpsertCertificate},
    dns::{CreateDnsRecord, CreateDnsZone, DnsRecord, DnsRecordType, DnsZone, UpdateDnsRecord},
    domain::{CreateDomain, Domain},
    job::{CreateJob, Job, JobStatus, JobType},
    pod::{CreatePod, Pod, UpdatePod},
    server::{CreateServer, Server, ServerUsage},
};

/// Pagination parameters for list queries.
#[derive(Debug, Clone)]
pub struct Pagination {
    pub offset: u64,
    pub limit: u64,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 50,
        }
    }
}

/// A paginated result set.
#[derive(Debug, Clone)]
pub struct PaginatedResult<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub offset: u64,
    pub limit: u64,
}

// ---------------------------------------------------------------------------
// Fleet (global scope)
// ---------------------------------------------------------------------------

pub trait ServerRepository: Send + Sync {
    fn create(&self, input: CreateServer) -> impl Future<Output = PodfleetResult<Server>> + Send;
    fn get_by_id(&self, id: Uuid) -> impl Future<Output = PodfleetResult<Server>> + Send;
    /// Active, non-draining hosts.
    fn list_schedulable(&self) -> impl Future<Output = PodfleetResult<Vec<Server>>> + Send;
    fn set_draining(
        &self,
        id: Uuid,
        draining: bool,
    ) -> impl Future<Output = PodfleetResult<Server>> + Send;
}

// ---------------------------------------------------------------------------
// Pods (tenant scope, with host-level accounting)
// ---------------------------------------------------------------------------

pub trait PodRepository: Send + Sync {
    /// Fails with `AlreadyExists` if `(server_id, instance_id)` is taken.
    fn create(&self, input: CreatePod) -> impl Future<Output = PodfleetResult<Pod>> + Send;
    fn get_by_id(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> impl Future<Output = PodfleetResult<Pod>> + Send;
    /// The non-destroyed pod ordered under a subscription, if any.
    fn get_by_subscription(
        &self,
        tenant_id: Uuid,
        subscription_id: Uuid,
    ) -> impl Future<Output = PodfleetResult<Option<Pod>>> + Send;
    fn update(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        input: UpdatePod,
    ) -> impl Future<Output = PodfleetResult<Pod>> + Send;
    fn list(
        &self,
        tenant_id: Uuid,
        pagination: Pagination,
    ) -> impl Future<Output = PodfleetResult<PaginatedResult<Pod>>> + Send;

    /// Resources held by every non-destroyed pod on a host, read from the
    /// current rows.
    fn usage_on_server(
        &self,
        server_id: Uuid,
    ) -> impl Future<Output = PodfleetResult<ServerUsage>> + Send;
    /// Highest instance id ever assigned on a host, destroyed pods included.
    fn max_instance_id(
        &self,
        server_id: Uuid,
    ) -> impl Future<Output = PodfleetResult<Option<u32>>> + Send;
}

// ---------------------------------------------------------------------------
// Domains, zones and records (tenant scope)
// ---------------------------------------------------------------------------

pub trait DnsRepository: Send + Sync {
    /// Fails with `AlreadyExists` if the name is registered by any tenant.
    fn create_domain(
        &self,
        input: CreateDomain,
    ) -> impl Future<Output = PodfleetResult<Domain>> + Send;
    fn get_domain_by_name(
        &self,
        tenant_id: Uuid,
        name: &str,
    ) -> impl Future<Output = PodfleetResult<Option<Domain>>> + Send;

    fn create_zone(&self, input: CreateDnsZone)
    -> impl Future<Output = PodfleetResult<DnsZone>> + Send;
    fn get_zone_for_domain(
        &self,
        tenant_id: Uuid,
        domain_id: Uuid,
    ) -> impl Future<Output = PodfleetResult<Option<DnsZone>>> + Send;
    fn get_zone_by_id(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> impl Future<Output = PodfleetResult<DnsZone>> + Send;
    fn mark_zone_synced(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> impl Future<Output = PodfleetResult<()>> + Send;

    fn find_record(
        &self,
        tenant_id: Uuid,
        zone_id: Uuid,
        name: &str,
        record_type: DnsRecordType,
    ) -> impl Future<Output = PodfleetResult<Option<DnsRecord>>> + Send;
    fn create_record(
        &self,
        input: CreateDnsRecord,
    ) -> impl Future<Output = PodfleetResult<DnsRecord>> + Send;
    fn update_record(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        input: UpdateDnsRecord,
    ) -> impl Future<Output = PodfleetResult<DnsRecord>> + Send;
    fn list_records_for_pod(
        &self,
        tenant_id: Uuid,
        pod_id: Uuid,
    ) -> impl Future<Output = PodfleetResult<Vec<DnsRecord>>> + Send;
    fn list_records_for_zone(
        &self,
        tenant_id: Uuid,
        zone_id: Uuid,
    ) -> impl Future<Output = PodfleetResult<Vec<DnsRecord>>> + Send;
    fn delete_record(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> impl Future<Output = PodfleetResult<()>> + Send;
}

// ---------------------------------------------------------------------------
// TLS certificates (tenant scope, with a fleet-wide renewal sweep)
// ---------------------------------------------------------------------------

pub trait CertificateRepository: Send + Sync {
    fn get(
        &self,
        tenant_id: Uuid,
        domain: &str,
        common_name: &str,
    ) -> impl Future<Output = PodfleetResult<Option<TlsCertificate>>> + Send;
    /// Insert or replace the row keyed by `(tenant_id, domain, common_name)`.
    fn upsert(
        &self,
        input: UpsertCertificate,
    ) -> impl Future<Output = PodfleetResult<TlsCertificate>> + Send;
    fn list_for_pod(
        &self,
        tenant_id: Uuid,
        pod_id: Uuid,
    ) -> impl Future<Output = PodfleetResult<Vec<TlsCertificate>>> + Send;
    fn delete_for_pod(
        &self,
        tenant_id: Uuid,
        pod_id: Uuid,
    ) -> impl Future<Output = PodfleetResult<()>> + Send;

    /// Marks active certificates whose validity ended before `now` as
    /// expired and returns how many changed.
    fn mark_expired(&self, now: DateTime<Utc>) -> impl Future<Output = PodfleetResult<u64>> + Send;
    /// Auto-renewing certificates with `not_after` before `horizon`,
    /// whatever their status. Rows that never held a certificate are
    /// left out.
    fn list_renewal_candidates(
        &self,
        horizon: DateTime<Utc>,
    ) -> impl Future<Output = PodfleetResult<Vec<TlsCertificate>>> + Send;
}

// ---------------------------------------------------------------------------
// Jobs (tenant-scoped rows, dispatched fleet-wide)
// ---------------------------------------------------------------------------

/// Query filters for job listings.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub job_type: Option<JobType>,
    pub status: Option<JobStatus>,
}

/// What a stale-claim sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StaleSweep {
    /// Jobs handed back to `PENDING`.
    pub requeued: u64,
    /// Jobs whose lost run used up their last attempt.
    pub failed: u64,
}

pub trait JobRepository: Send + Sync {
    /// Insert a `PENDING` job. When `dedupe_key` is set and an open job
    /// with the same tenant and key exists, that job is returned instead.
    /// At most one open job holds a key, even under concurrent inserts.
    fn enqueue(&self, input: CreateJob) -> impl Future<Output = PodfleetResult<Job>> + Send;
    fn get_by_id(&self, id: Uuid) -> impl Future<Output = PodfleetResult<Job>> + Send;
    /// Atomically move the oldest claimable `PENDING` job to `RUNNING`,
    /// recording `worker_id` as the claim owner.
    fn claim_next(
        &self,
        now: DateTime<Utc>,
        worker_id: &str,
    ) -> impl Future<Output = PodfleetResult<Option<Job>>> + Send;
    fn mark_completed(&self, id: Uuid) -> impl Future<Output = PodfleetResult<Job>> + Send;
    fn mark_failed(
        &self,
        id: Uuid,
        reason: &str,
    ) -> impl Future<Output = PodfleetResult<Job>> + Send;
    /// Increment the retry count and return the job to `PENDING`.
    fn retry(
        &self,
        id: Uuid,
        reason: &str,
        run_after: DateTime<Utc>,
    ) -> impl Future<Output = PodfleetResult<Job>> + Send;
    /// Refresh the claim on a `RUNNING` job held by `worker_id`. Returns
    /// `false` when the claim is no longer theirs.
    fn heartbeat(
        &self,
        id: Uuid,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> impl Future<Output = PodfleetResult<bool>> + Send;
    /// Return `RUNNING` jobs claimed before `claimed_before` to `PENDING`,
    /// counting the lost run as an attempt. Jobs with no attempts left
    /// under `max_attempts` are failed instead.
    fn requeue_stale(
        &self,
        claimed_before: DateTime<Utc>,
        max_attempts: u32,
    ) -> impl Future<Output = PodfleetResult<StaleSweep>> + Send;
    fn list(
        &self,
        tenant_id: Uuid,
        filter: JobFilter,
        pagination: Pagination,
    ) -> impl Future<Output = PodfleetResult<PaginatedResult<Job>>> + Send;
}

// ---------------------------------------------------------------------------
// Audit (append-only, tenant-scoped)
// ---------------------------------------------------------------------------

/// Query filters for audit events.
#[derive(Debug, Clone, Default)]
pub struct AuditEventFilter {
    pub action: Option<AuditAction>,
    pub resource_id: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

pub trait AuditRepository: Send + Sync {
    /// Append a new audit event. No update or delete operations exist.
    fn append(
        &self,
        input: CreateAuditEvent,
    ) -> impl Future<Output = PodfleetResult<AuditEvent>> + Send;
    fn list(
        &self,
        tenant_id: Uuid,
        filter: AuditEventFilter,
        pagination: Pagination,
    ) -> impl Future<Output = PodfleetResult<PaginatedResult<AuditEvent>>> + Send;
}

// ---------------------------------------------------------------------------
// Store bundle
// ---------------------------------------------------------------------------

/// One handle onto every repository of a storage backend.
///
/// Services take a `Store` rather than one type parameter per
/// repository. Clones share the same underlying connection.
pub trait Store: Clone + Send + Sync + 'static {
    type Servers: ServerRepository;
    type Pods: PodRepository;
    type Dns: DnsRepository;
    type Certificates: CertificateRepository;
    type Jobs: JobRepository;
    type Audit: AuditRepository;

    fn servers(&self) -> &Self::Servers;
    fn pods(&self) -> &Self::Pods;
    fn dns(&self) -> &Self::Dns;
    fn certificates(&self) -> &Self::Certificates;
    fn jobs(&self) -> &Self::Jobs;
    fn audit(&self) -> &Self::Audit;
}
