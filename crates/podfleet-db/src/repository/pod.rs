//! SurrealDB implementation of [`PodRepository`].
//!
//! The resource profile is stored as flat columns so that host usage can
//! be summed straight from the pod rows.

use chrono::{DateTime, Utc};
use podfleet_core::error::PodfleetResult;
use podfleet_core::models::pod::{CreatePod, Pod, PodStatus, ResourceProfile, UpdatePod};
use podfleet_core::models::server::ServerUsage;
use podfleet_core::repository::{PaginatedResult, Pagination, PodRepository};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use uuid::Uuid;

use super::{CountRow, first_row, parse_opt_uuid, parse_uuid};
use crate::error::DbError;

const ENTITY: &str = "pod";

/// DB-side row struct for queries where the UUID is already known.
#[derive(Debug, SurrealValue)]
struct PodRow {
    tenant_id: String,
    subscription_id: String,
    server_id: String,
    instance_id: u32,
    hostname: String,
    primary_domain: Option<String>,
    ipv4: Option<String>,
    plan_code: String,
    memory_mb: u32,
    swap_mb: u32,
    cores: u32,
    disk_gb: u32,
    bandwidth_mbps: u32,
    status: String,
    status_reason: Option<String>,
    container_created: bool,
    created_by: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// DB-side row struct that includes the record ID via `meta::id(id)`.
#[derive(Debug, SurrealValue)]
struct PodRowWithId {
    record_id: String,
    tenant_id: String,
    subscription_id: String,
    server_id: String,
    instance_id: u32,
    hostname: String,
    primary_domain: Option<String>,
    ipv4: Option<String>,
    plan_code: String,
    memory_mb: u32,
    swap_mb: u32,
    cores: u32,
    disk_gb: u32,
    bandwidth_mbps: u32,
    status: String,
    status_reason: Option<String>,
    container_created: bool,
    created_by: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, SurrealValue)]
struct UsageRow {
    memory_mb: u64,
    disk_gb: u64,
}

#[derive(Debug, SurrealValue)]
struct InstanceIdRow {
    instance_id: u32,
}

fn parse_status(s: &str) -> Result<PodStatus, DbError> {
    PodStatus::parse(s).ok_or_else(|| DbError::decode(ENTITY, format!("unknown pod status: {s}")))
}

impl PodRow {
    fn into_pod(self, id: Uuid) -> Result<Pod, DbError> {
        Ok(Pod {
            id,
            tenant_id: parse_uuid(ENTITY, "tenant", &self.tenant_id)?,
            subscription_id: parse_uuid(ENTITY, "subscription", &self.subscription_id)?,
            server_id: parse_uuid(ENTITY, "server", &self.server_id)?,
            instance_id: self.instance_id,
            hostname: self.hostname,
            primary_domain: self.primary_domain,
            ipv4: self.ipv4,
            plan_code: self.plan_code,
            resources: ResourceProfile {
                memory_mb: self.memory_mb,
                swap_mb: self.swap_mb,
                cores: self.cores,
                disk_gb: self.disk_gb,
                bandwidth_mbps: self.bandwidth_mbps,
            },
            status: parse_status(&self.status)?,
            status_reason: self.status_reason,
            container_created: self.container_created,
            created_by: parse_opt_uuid(ENTITY, "creator", self.created_by.as_deref())?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl PodRowWithId {
    fn try_into_pod(self) -> Result<Pod, DbError> {
        let id = parse_uuid(ENTITY, "record", &self.record_id)?;
        PodRow {
            tenant_id: self.tenant_id,
            subscription_id: self.subscription_id,
            server_id: self.server_id,
            instance_id: self.instance_id,
            hostname: self.hostname,
            primary_domain: self.primary_domain,
            ipv4: self.ipv4,
            plan_code: self.plan_code,
            memory_mb: self.memory_mb,
            swap_mb: self.swap_mb,
            cores: self.cores,
            disk_gb: self.disk_gb,
            bandwidth_mbps: self.bandwidth_mbps,
            status: self.status,
            status_reason: self.status_reason,
            container_created: self.container_created,
            created_by: self.created_by,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
        .into_pod(id)
    }
}

/// SurrealDB implementation of the Pod repository.
pub struct SurrealPodRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealPodRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }
}

impl<C: Connection> PodRepository for SurrealPodRepository<C> {
    async fn create(&self, input: CreatePod) -> PodfleetResult<Pod> {
        let id = Uuid::new_v4();
        let id_str = id.to_string();
        let profile = input.resources;

        let result = self
            .db
            .query(
                "CREATE type::record('pod', $id) SET \
                 tenant_id = $tenant_id, \
                 subscription_id = $subscription_id, \
                 server_id = $server_id, \
                 instance_id = $instance_id, \
                 hostname = $hostname, \
                 primary_domain = $primary_domain, \
                 ipv4 = NONE, \
                 plan_code = $plan_code, \
                 memory_mb = $memory_mb, swap_mb = $swap_mb, \
                 cores = $cores, disk_gb = $disk_gb, \
                 bandwidth_mbps = $bandwidth_mbps, \
                 status = 'Provisioning', \
                 status_reason = NONE, \
                 container_created = false, \
                 created_by = $created_by, \
                 subscription_slot = $subscription_slot",
            )
            .bind(("id", id_str.clone()))
            .bind(("tenant_id", input.tenant_id.to_string()))
            .bind(("subscription_id", input.subscription_id.to_string()))
            .bind(("server_id", input.server_id.to_string()))
            .bind(("instance_id", input.instance_id))
            .bind(("hostname", input.hostname))
            .bind(("primary_domain", input.primary_domain))
            .bind(("plan_code", input.plan_code))
            .bind(("memory_mb", profile.memory_mb))
            .bind(("swap_mb", profile.swap_mb))
            .bind(("cores", profile.cores))
            .bind(("disk_gb", profile.disk_gb))
            .bind(("bandwidth_mbps", profile.bandwidth_mbps))
            .bind(("created_by", input.created_by.map(|u| u.to_string())))
            .bind((
                "subscription_slot",
                format!("{}:{}", input.tenant_id, input.subscription_id),
            ))
            .await
            .map_err(DbError::from)?;

        // A unique-index hit means another worker took the same instance
        // id on this host, or already placed a live pod for the
        // subscription.
        let mut result = result
            .check()
            .map_err(|e| DbError::from_statement(ENTITY, e))?;

        let rows: Vec<PodRow> = result.take(0).map_err(DbError::from)?;
        Ok(first_row(rows, ENTITY, &id_str)?.into_pod(id)?)
    }

    async fn get_by_id(&self, tenant_id: Uuid, id: Uuid) -> PodfleetResult<Pod> {
        let id_str = id.to_string();

        let mut result = self
            .db
            .query(
                "SELECT * FROM type::record('pod', $id) \
                 WHERE tenant_id = $tenant_id",
            )
            .bind(("id", id_str.clone()))
            .bind(("tenant_id", tenant_id.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<PodRow> = result.take(0).map_err(DbError::from)?;
        Ok(first_row(rows, ENTITY, &id_str)?.into_pod(id)?)
    }

    async fn get_by_subscription(
        &self,
        tenant_id: Uuid,
        subscription_id: Uuid,
    ) -> PodfleetResult<Option<Pod>> {
        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM pod \
                 WHERE tenant_id = $tenant_id \
                 AND subscription_id = $subscription_id \
                 AND status != 'Destroyed' \
                 ORDER BY created_at DESC LIMIT 1",
            )
            .bind(("tenant_id", tenant_id.to_string()))
            .bind(("subscription_id", subscription_id.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<PodRowWithId> = result.take(0).map_err(DbError::from)?;
        let pod = rows
            .into_iter()
            .next()
            .map(PodRowWithId::try_into_pod)
            .transpose()?;
        Ok(pod)
    }

    async fn update(&self, tenant_id: Uuid, id: Uuid, input: UpdatePod) -> PodfleetResult<Pod> {
        let id_str = id.to_string();

        let mut sets = Vec::new();
        if input.status.is_some() {
            sets.push("status = $status");
        }
        // Frees the subscription for a new pod.
        if input.status == Some(PodStatus::Destroyed) {
            sets.push("subscription_slot = $destroyed_slot");
        }
        if input.status_reason.is_some() {
            sets.push("status_reason = $status_reason");
        }
        if input.ipv4.is_some() {
            sets.push("ipv4 = $ipv4");
        }
        if input.container_created.is_some() {
            sets.push("container_created = $container_created");
        }
        sets.push("updated_at = time::now()");

        let query = format!(
            "UPDATE type::record('pod', $id) SET {} \
             WHERE tenant_id = $tenant_id",
            sets.join(", ")
        );

        let mut builder = self
            .db
            .query(&query)
            .bind(("id", id_str.clone()))
            .bind(("tenant_id", tenant_id.to_string()));

        if let Some(status) = input.status {
            builder = builder.bind(("status", status.as_str()));
            if status == PodStatus::Destroyed {
                builder = builder.bind(("destroyed_slot", format!("destroyed:{id}")));
            }
        }
        if let Some(status_reason) = input.status_reason {
            builder = builder.bind(("status_reason", status_reason));
        }
        if let Some(ipv4) = input.ipv4 {
            builder = builder.bind(("ipv4", ipv4));
        }
        if let Some(container_created) = input.container_created {
            builder = builder.bind(("container_created", container_created));
        }

        let result = builder.await.map_err(DbError::from)?;
        let mut result = result
            .check()
            .map_err(|e| DbError::from_statement(ENTITY, e))?;

        let rows: Vec<PodRow> = result.take(0).map_err(DbError::from)?;
        Ok(first_row(rows, ENTITY, &id_str)?.into_pod(id)?)
    }

    async fn list(&self, tenant_id: Uuid, pagination: Pagination) -> PodfleetResult<PaginatedResult<Pod>> {
        let tenant_id_str = tenant_id.to_string();

        let mut count_result = self
            .db
            .query(
                "SELECT count() AS total FROM pod \
                 WHERE tenant_id = $tenant_id GROUP ALL",
            )
            .bind(("tenant_id", tenant_id_str.clone()))
            .await
            .map_err(DbError::from)?;
        let count_rows: Vec<CountRow> = count_result.take(0).map_err(DbError::from)?;
        let total = count_rows.first().map(|r| r.total).unwrap_or(0);

        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM pod \
                 WHERE tenant_id = $tenant_id \
                 ORDER BY created_at ASC \
                 LIMIT $limit START $offset",
            )
            .bind(("tenant_id", tenant_id_str))
            .bind(("limit", pagination.limit))
            .bind(("offset", pagination.offset))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<PodRowWithId> = result.take(0).map_err(DbError::from)?;
        let items = rows
            .into_iter()
            .map(PodRowWithId::try_into_pod)
            .collect::<Result<Vec<_>, DbError>>()?;

        Ok(PaginatedResult {
            items,
            total,
            offset: pagination.offset,
            limit: pagination.limit,
        })
    }

    async fn usage_on_server(&self, server_id: Uuid) -> PodfleetResult<ServerUsage> {
        let mut result = self
            .db
            .query(
                "SELECT memory_mb, disk_gb FROM pod \
                 WHERE server_id = $server_id AND status != 'Destroyed'",
            )
            .bind(("server_id", server_id.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<UsageRow> = result.take(0).map_err(DbError::from)?;
        Ok(rows.iter().fold(ServerUsage::default(), |acc, row| ServerUsage {
            memory_mb: acc.memory_mb + row.memory_mb,
            disk_gb: acc.disk_gb + row.disk_gb,
            pod_count: acc.pod_count + 1,
        }))
    }

    async fn max_instance_id(&self, server_id: Uuid) -> PodfleetResult<Option<u32>> {
        let mut result = self
            .db
            .query(
                "SELECT instance_id FROM pod \
                 WHERE server_id = $server_id \
                 ORDER BY instance_id DESC LIMIT 1",
            )
            .bind(("server_id", server_id.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<InstanceIdRow> = result.take(0).map_err(DbError::from)?;
        Ok(rows.first().map(|r| r.instance_id))
    }
}
