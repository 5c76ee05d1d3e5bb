//! SurrealDB implementation of [`DnsRepository`]: domains, zones and
//! records.
//!
//! Uniqueness is enforced by the schema: `domain.name` globally,
//! `dns_zone.domain_id`, and `(zone_id, name, record_type)` for records.
//! Violations surface as `AlreadyExists`.

use chrono::{DateTime, Utc};
use podfleet_core::error::PodfleetResult;
use podfleet_core::models::dns::{
    CreateDnsRecord, CreateDnsZone, DnsRecord, DnsRecordType, DnsZone, UpdateDnsRecord,
};
use podfleet_core::models::domain::{CreateDomain, Domain};
use podfleet_core::repository::DnsRepository;
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use uuid::Uuid;

use super::{first_row, parse_opt_uuid, parse_uuid};
use crate::error::DbError;

// -----------------------------------------------------------------------
// Domains
// -----------------------------------------------------------------------

#[derive(Debug, SurrealValue)]
struct DomainRow {
    tenant_id: String,
    name: String,
    manage_dns: bool,
    manage_mail: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, SurrealValue)]
struct DomainRowWithId {
    record_id: String,
    tenant_id: String,
    name: String,
    manage_dns: bool,
    manage_mail: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl DomainRow {
    fn into_domain(self, id: Uuid) -> Result<Domain, DbError> {
        Ok(Domain {
            id,
            tenant_id: parse_uuid("domain", "tenant", &self.tenant_id)?,
            name: self.name,
            manage_dns: self.manage_dns,
            manage_mail: self.manage_mail,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl DomainRowWithId {
    fn try_into_domain(self) -> Result<Domain, DbError> {
        let id = parse_uuid("domain", "record", &self.record_id)?;
        DomainRow {
            tenant_id: self.tenant_id,
            name: self.name,
            manage_dns: self.manage_dns,
            manage_mail: self.manage_mail,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
        .into_domain(id)
    }
}

// -----------------------------------------------------------------------
// Zones
// -----------------------------------------------------------------------

#[derive(Debug, SurrealValue)]
struct ZoneRow {
    tenant_id: String,
    domain_id: String,
    zone_name: String,
    provider_zone_id: String,
    is_synced: bool,
    last_sync_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, SurrealValue)]
struct ZoneRowWithId {
    record_id: String,
    tenant_id: String,
    domain_id: String,
    zone_name: String,
    provider_zone_id: String,
    is_synced: bool,
    last_sync_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl ZoneRow {
    fn into_zone(self, id: Uuid) -> Result<DnsZone, DbError> {
        Ok(DnsZone {
            id,
            tenant_id: parse_uuid("dns_zone", "tenant", &self.tenant_id)?,
            domain_id: parse_uuid("dns_zone", "domain", &self.domain_id)?,
            zone_name: self.zone_name,
            provider_zone_id: self.provider_zone_id,
            is_synced: self.is_synced,
            last_sync_at: self.last_sync_at,
            created_at: self.created_at,
        })
    }
}

impl ZoneRowWithId {
    fn try_into_zone(self) -> Result<DnsZone, DbError> {
        let id = parse_uuid("dns_zone", "record", &self.record_id)?;
        ZoneRow {
            tenant_id: self.tenant_id,
            domain_id: self.domain_id,
            zone_name: self.zone_name,
            provider_zone_id: self.provider_zone_id,
            is_synced: self.is_synced,
            last_sync_at: self.last_sync_at,
            created_at: self.created_at,
        }
        .into_zone(id)
    }
}

// -----------------------------------------------------------------------
// Records
// -----------------------------------------------------------------------

#[derive(Debug, SurrealValue)]
struct RecordRow {
    tenant_id: String,
    zone_id: String,
    pod_id: Option<String>,
    name: String,
    record_type: String,
    content: String,
    ttl: u32,
    priority: Option<u32>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, SurrealValue)]
struct RecordRowWithId {
    record_id: String,
    tenant_id: String,
    zone_id: String,
    pod_id: Option<String>,
    name: String,
    record_type: String,
    content: String,
    ttl: u32,
    priority: Option<u32>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl RecordRow {
    fn into_record(self, id: Uuid) -> Result<DnsRecord, DbError> {
        let record_type = DnsRecordType::parse(&self.record_type).ok_or_else(|| {
            DbError::decode("dns_record", format!("unknown type: {}", self.record_type))
        })?;
        Ok(DnsRecord {
            id,
            tenant_id: parse_uuid("dns_record", "tenant", &self.tenant_id)?,
            zone_id: parse_uuid("dns_record", "zone", &self.zone_id)?,
            pod_id: parse_opt_uuid("dns_record", "pod", self.pod_id.as_deref())?,
            name: self.name,
            record_type,
            content: self.content,
            ttl: self.ttl,
            priority: self.priority,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl RecordRowWithId {
    fn try_into_record(self) -> Result<DnsRecord, DbError> {
        let id = parse_uuid("dns_record", "record", &self.record_id)?;
        RecordRow {
            tenant_id: self.tenant_id,
            zone_id: self.zone_id,
            pod_id: self.pod_id,
            name: self.name,
            record_type: self.record_type,
            content: self.content,
            ttl: self.ttl,
            priority: self.priority,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
        .into_record(id)
    }
}

/// SurrealDB implementation of the DNS repository.
pub struct SurrealDnsRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealDnsRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }

    async fn select_records(
        &self,
        query: &'static str,
        tenant_id: Uuid,
        key: (&'static str, String),
    ) -> Result<Vec<DnsRecord>, DbError> {
        let mut result = self
            .db
            .query(query)
            .bind(("tenant_id", tenant_id.to_string()))
            .bind(key)
            .await?;

        let rows: Vec<RecordRowWithId> = result.take(0)?;
        rows.into_iter()
            .map(RecordRowWithId::try_into_record)
            .collect()
    }
}

impl<C: Connection> DnsRepository for SurrealDnsRepository<C> {
    async fn create_domain(&self, input: CreateDomain) -> PodfleetResult<Domain> {
        let id = Uuid::new_v4();
        let id_str = id.to_string();

        let result = self
            .db
            .query(
                "CREATE type::record('domain', $id) SET \
                 tenant_id = $tenant_id, name = $name, \
                 manage_dns = $manage_dns, manage_mail = $manage_mail",
            )
            .bind(("id", id_str.clone()))
            .bind(("tenant_id", input.tenant_id.to_string()))
            .bind(("name", input.name))
            .bind(("manage_dns", input.manage_dns))
            .bind(("manage_mail", input.manage_mail))
            .await
            .map_err(DbError::from)?;

        let mut result = result
            .check()
            .map_err(|e| DbError::from_statement("domain", e))?;

        let rows: Vec<DomainRow> = result.take(0).map_err(DbError::from)?;
        Ok(first_row(rows, "domain", &id_str)?.into_domain(id)?)
    }

    async fn get_domain_by_name(&self, tenant_id: Uuid, name: &str) -> PodfleetResult<Option<Domain>> {
        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM domain \
                 WHERE tenant_id = $tenant_id AND name = $name",
            )
            .bind(("tenant_id", tenant_id.to_string()))
            .bind(("name", name.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<DomainRowWithId> = result.take(0).map_err(DbError::from)?;
        let domain = rows
            .into_iter()
            .next()
            .map(DomainRowWithId::try_into_domain)
            .transpose()?;
        Ok(domain)
    }

    async fn create_zone(&self, input: CreateDnsZone) -> PodfleetResult<DnsZone> {
        let id = Uuid::new_v4();
        let id_str = id.to_string();

        let result = self
            .db
            .query(
                "CREATE type::record('dns_zone', $id) SET \
                 tenant_id = $tenant_id, domain_id = $domain_id, \
                 zone_name = $zone_name, \
                 provider_zone_id = $provider_zone_id, \
                 is_synced = false, last_sync_at = NONE",
            )
            .bind(("id", id_str.clone()))
            .bind(("tenant_id", input.tenant_id.to_string()))
            .bind(("domain_id", input.domain_id.to_string()))
            .bind(("zone_name", input.zone_name))
            .bind(("provider_zone_id", input.provider_zone_id))
            .await
            .map_err(DbError::from)?;

        let mut result = result
            .check()
            .map_err(|e| DbError::from_statement("dns_zone", e))?;

        let rows: Vec<ZoneRow> = result.take(0).map_err(DbError::from)?;
        Ok(first_row(rows, "dns_zone", &id_str)?.into_zone(id)?)
    }

    async fn get_zone_for_domain(
        &self,
        tenant_id: Uuid,
        domain_id: Uuid,
    ) -> PodfleetResult<Option<DnsZone>> {
        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM dns_zone \
                 WHERE tenant_id = $tenant_id AND domain_id = $domain_id",
            )
            .bind(("tenant_id", tenant_id.to_string()))
            .bind(("domain_id", domain_id.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<ZoneRowWithId> = result.take(0).map_err(DbError::from)?;
        let zone = rows
            .into_iter()
            .next()
            .map(ZoneRowWithId::try_into_zone)
            .transpose()?;
        Ok(zone)
    }

    async fn get_zone_by_id(&self, tenant_id: Uuid, id: Uuid) -> PodfleetResult<DnsZone> {
        let id_str = id.to_string();

        let mut result = self
            .db
            .query(
                "SELECT * FROM type::record('dns_zone', $id) \
                 WHERE tenant_id = $tenant_id",
            )
            .bind(("id", id_str.clone()))
            .bind(("tenant_id", tenant_id.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<ZoneRow> = result.take(0).map_err(DbError::from)?;
        Ok(first_row(rows, "dns_zone", &id_str)?.into_zone(id)?)
    }

    async fn mark_zone_synced(&self, tenant_id: Uuid, id: Uuid) -> PodfleetResult<()> {
        self.db
            .query(
                "UPDATE type::record('dns_zone', $id) SET \
                 is_synced = true, last_sync_at = time::now() \
                 WHERE tenant_id = $tenant_id",
            )
            .bind(("id", id.to_string()))
            .bind(("tenant_id", tenant_id.to_string()))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::from_statement("dns_zone", e))?;

        Ok(())
    }

    async fn find_record(
        &self,
        tenant_id: Uuid,
        zone_id: Uuid,
        name: &str,
        record_type: DnsRecordType,
    ) -> PodfleetResult<Option<DnsRecord>> {
        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM dns_record \
                 WHERE tenant_id = $tenant_id AND zone_id = $zone_id \
                 AND name = $name AND record_type = $record_type",
            )
            .bind(("tenant_id", tenant_id.to_string()))
            .bind(("zone_id", zone_id.to_string()))
            .bind(("name", name.to_string()))
            .bind(("record_type", record_type.as_str()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<RecordRowWithId> = result.take(0).map_err(DbError::from)?;
        let record = rows
            .into_iter()
            .next()
            .map(RecordRowWithId::try_into_record)
            .transpose()?;
        Ok(record)
    }

    async fn create_record(&self, input: CreateDnsRecord) -> PodfleetResult<DnsRecord> {
        let id = Uuid::new_v4();
        let id_str = id.to_string();

        let result = self
            .db
            .query(
                "CREATE type::record('dns_record', $id) SET \
                 tenant_id = $tenant_id, zone_id = $zone_id, \
                 pod_id = $pod_id, name = $name, \
                 record_type = $record_type, content = $content, \
                 ttl = $ttl, priority = $priority",
            )
            .bind(("id", id_str.clone()))
            .bind(("tenant_id", input.tenant_id.to_string()))
            .bind(("zone_id", input.zone_id.to_string()))
            .bind(("pod_id", input.pod_id.map(|u| u.to_string())))
            .bind(("name", input.name))
            .bind(("record_type", input.record_type.as_str()))
            .bind(("content", input.content))
            .bind(("ttl", input.ttl))
            .bind(("priority", input.priority))
            .await
            .map_err(DbError::from)?;

        let mut result = result
            .check()
            .map_err(|e| DbError::from_statement("dns_record", e))?;

        let rows: Vec<RecordRow> = result.take(0).map_err(DbError::from)?;
        Ok(first_row(rows, "dns_record", &id_str)?.into_record(id)?)
    }

    async fn update_record(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        input: UpdateDnsRecord,
    ) -> PodfleetResult<DnsRecord> {
        let id_str = id.to_string();

        let result = self
            .db
            .query(
                "UPDATE type::record('dns_record', $id) SET \
                 content = $content, ttl = $ttl, priority = $priority, \
                 pod_id = $pod_id, updated_at = time::now() \
                 WHERE tenant_id = $tenant_id",
            )
            .bind(("id", id_str.clone()))
            .bind(("tenant_id", tenant_id.to_string()))
            .bind(("content", input.content))
            .bind(("ttl", input.ttl))
            .bind(("priority", input.priority))
            .bind(("pod_id", input.pod_id.map(|u| u.to_string())))
            .await
            .map_err(DbError::from)?;

        let mut result = result
            .check()
            .map_err(|e| DbError::from_statement("dns_record", e))?;

        let rows: Vec<RecordRow> = result.take(0).map_err(DbError::from)?;
        Ok(first_row(rows, "dns_record", &id_str)?.into_record(id)?)
    }

    async fn list_records_for_pod(&self, tenant_id: Uuid, pod_id: Uuid) -> PodfleetResult<Vec<DnsRecord>> {
        Ok(self
            .select_records(
                "SELECT meta::id(id) AS record_id, * FROM dns_record \
                 WHERE tenant_id = $tenant_id AND pod_id = $pod_id \
                 ORDER BY name ASC",
                tenant_id,
                ("pod_id", pod_id.to_string()),
            )
            .await?)
    }

    async fn list_records_for_zone(&self, tenant_id: Uuid, zone_id: Uuid) -> PodfleetResult<Vec<DnsRecord>> {
        Ok(self
            .select_records(
                "SELECT meta::id(id) AS record_id, * FROM dns_record \
                 WHERE tenant_id = $tenant_id AND zone_id = $zone_id \
                 ORDER BY name ASC",
                tenant_id,
                ("zone_id", zone_id.to_string()),
            )
            .await?)
    }

    async fn delete_record(&self, tenant_id: Uuid, id: Uuid) -> PodfleetResult<()> {
        self.db
            .query(
                "DELETE type::record('dns_record', $id) \
                 WHERE tenant_id = $tenant_id",
            )
            .bind(("id", id.to_string()))
            .bind(("tenant_id", tenant_id.to_string()))
            .await
            .map_err(DbError::from)?;

        Ok(())
    }
}
