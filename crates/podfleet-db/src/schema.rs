//! Schema definitions and migration runner for SurrealDB.
//!
//! All table definitions use SCHEMAFULL mode for data integrity.
//! UUIDs are stored as strings. Enums are stored as strings with
//! ASSERT constraints for validation.

use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tracing::info;

use crate::error::DbError;

// -----------------------------------------------------------------------
// Migration tracking
// -----------------------------------------------------------------------

const MIGRATION_TABLE_DDL: &str = "\
DEFINE TABLE IF NOT EXISTS _migration SCHEMAFULL;
DEFINE FIELD IF NOT EXISTS version ON TABLE _migration TYPE int;
DEFINE FIELD IF NOT EXISTS name ON TABLE _migration TYPE string;
DEFINE FIELD IF NOT EXISTS applied_at ON TABLE _migration TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX IF NOT EXISTS idx_migration_version ON TABLE _migration \
    COLUMNS version UNIQUE;
";

#[derive(Debug, SurrealValue)]
struct MigrationRecord {
    version: u32,
}

struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: SCHEMA_V1,
    },
];

// -----------------------------------------------------------------------
// Schema v1: initial table definitions
// -----------------------------------------------------------------------

const SCHEMA_V1: &str = "\
-- =======================================================================
-- Hypervisor hosts (global scope)
-- =======================================================================
DEFINE TABLE server SCHEMAFULL;
DEFINE FIELD name ON TABLE server TYPE string;
DEFINE FIELD address ON TABLE server TYPE string;
DEFINE FIELD region ON TABLE server TYPE option<string>;
DEFINE FIELD total_memory_mb ON TABLE server TYPE int;
DEFINE FIELD total_disk_gb ON TABLE server TYPE int;
DEFINE FIELD storage_target ON TABLE server TYPE string;
DEFINE FIELD is_active ON TABLE server TYPE bool DEFAULT true;
DEFINE FIELD is_draining ON TABLE server TYPE bool DEFAULT false;
DEFINE FIELD created_at ON TABLE server TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD updated_at ON TABLE server TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_server_name ON TABLE server COLUMNS name UNIQUE;

-- =======================================================================
-- Pods (tenant scope, placed on one host)
-- =======================================================================
DEFINE TABLE pod SCHEMAFULL;
DEFINE FIELD tenant_id ON TABLE pod TYPE string;
DEFINE FIELD subscription_id ON TABLE pod TYPE string;
DEFINE FIELD server_id ON TABLE pod TYPE string;
DEFINE FIELD instance_id ON TABLE pod TYPE int;
DEFINE FIELD hostname ON TABLE pod TYPE string;
DEFINE FIELD primary_domain ON TABLE pod TYPE option<string>;
DEFINE FIELD ipv4 ON TABLE pod TYPE option<string>;
DEFINE FIELD plan_code ON TABLE pod TYPE string;
DEFINE FIELD memory_mb ON TABLE pod TYPE int;
DEFINE FIELD swap_mb ON TABLE pod TYPE int;
DEFINE FIELD cores ON TABLE pod TYPE int;
DEFINE FIELD disk_gb ON TABLE pod TYPE int;
DEFINE FIELD bandwidth_mbps ON TABLE pod TYPE int;
DEFINE FIELD status ON TABLE pod TYPE string \
    ASSERT $value IN ['Provisioning', 'Starting', 'Running', 'Stopped', \
    'Failed', 'Destroyed'];
DEFINE FIELD status_reason ON TABLE pod TYPE option<string>;
DEFINE FIELD container_created ON TABLE pod TYPE bool DEFAULT false;
DEFINE FIELD created_by ON TABLE pod TYPE option<string>;
-- '<tenant>:<subscription>' while the pod lives, 'destroyed:<id>' after.
DEFINE FIELD subscription_slot ON TABLE pod TYPE string;
DEFINE FIELD created_at ON TABLE pod TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD updated_at ON TABLE pod TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_pod_server_instance ON TABLE pod \
    COLUMNS server_id, instance_id UNIQUE;
DEFINE INDEX idx_pod_tenant_subscription ON TABLE pod \
    COLUMNS tenant_id, subscription_id;
DEFINE INDEX idx_pod_subscription_slot ON TABLE pod \
    COLUMNS subscription_slot UNIQUE;
DEFINE INDEX idx_pod_server_status ON TABLE pod \
    COLUMNS server_id, status;

-- =======================================================================
-- Domains (tenant scope, globally unique name)
-- =======================================================================
DEFINE TABLE domain SCHEMAFULL;
DEFINE FIELD tenant_id ON TABLE domain TYPE string;
DEFINE FIELD name ON TABLE domain TYPE string;
DEFINE FIELD manage_dns ON TABLE domain TYPE bool DEFAULT true;
DEFINE FIELD manage_mail ON TABLE domain TYPE bool DEFAULT false;
DEFINE FIELD created_at ON TABLE domain TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD updated_at ON TABLE domain TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_domain_name ON TABLE domain COLUMNS name UNIQUE;

-- =======================================================================
-- DNS zones (tenant scope, one per domain)
-- =======================================================================
DEFINE TABLE dns_zone SCHEMAFULL;
DEFINE FIELD tenant_id ON TABLE dns_zone TYPE string;
DEFINE FIELD domain_id ON TABLE dns_zone TYPE string;
DEFINE FIELD zone_name ON TABLE dns_zone TYPE string;
DEFINE FIELD provider_zone_id ON TABLE dns_zone TYPE string;
DEFINE FIELD is_synced ON TABLE dns_zone TYPE bool DEFAULT false;
DEFINE FIELD last_sync_at ON TABLE dns_zone TYPE option<datetime>;
DEFINE FIELD created_at ON TABLE dns_zone TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_dns_zone_domain ON TABLE dns_zone \
    COLUMNS domain_id UNIQUE;

-- =======================================================================
-- DNS records (tenant scope, unique per zone/name/type)
-- =======================================================================
DEFINE TABLE dns_record SCHEMAFULL;
DEFINE FIELD tenant_id ON TABLE dns_record TYPE string;
DEFINE FIELD zone_id ON TABLE dns_record TYPE string;
DEFINE FIELD pod_id ON TABLE dns_record TYPE option<string>;
DEFINE FIELD name ON TABLE dns_record TYPE string;
DEFINE FIELD record_type ON TABLE dns_record TYPE string \
    ASSERT $value IN ['A', 'AAAA', 'CNAME', 'MX', 'TXT'];
DEFINE FIELD content ON TABLE dns_record TYPE string;
DEFINE FIELD ttl ON TABLE dns_record TYPE int;
DEFINE FIELD priority ON TABLE dns_record TYPE option<int>;
DEFINE FIELD created_at ON TABLE dns_record TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD updated_at ON TABLE dns_record TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_dns_record_identity ON TABLE dns_record \
    COLUMNS zone_id, name, record_type UNIQUE;
DEFINE INDEX idx_dns_record_pod ON TABLE dns_record \
    COLUMNS tenant_id, pod_id;

-- =======================================================================
-- TLS certificates (tenant scope)
-- =======================================================================
DEFINE TABLE tls_certificate SCHEMAFULL;
DEFINE FIELD tenant_id ON TABLE tls_certificate TYPE string;
DEFINE FIELD pod_id ON TABLE tls_certificate TYPE string;
DEFINE FIELD domain ON TABLE tls_certificate TYPE string;
DEFINE FIELD common_name ON TABLE tls_certificate TYPE string;
DEFINE FIELD issuer ON TABLE tls_certificate TYPE option<string>;
DEFINE FIELD not_before ON TABLE tls_certificate TYPE option<datetime>;
DEFINE FIELD not_after ON TABLE tls_certificate TYPE option<datetime>;
DEFINE FIELD auto_renew ON TABLE tls_certificate TYPE bool DEFAULT true;
DEFINE FIELD status ON TABLE tls_certificate TYPE string \
    ASSERT $value IN ['PendingDns', 'Active', 'Expired', 'Failed'];
DEFINE FIELD last_error ON TABLE tls_certificate TYPE option<string>;
DEFINE FIELD created_at ON TABLE tls_certificate TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD updated_at ON TABLE tls_certificate TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_tls_cert_identity ON TABLE tls_certificate \
    COLUMNS tenant_id, domain, common_name UNIQUE;

-- =======================================================================
-- Jobs (tenant scope, dispatched fleet-wide)
-- =======================================================================
DEFINE TABLE job SCHEMAFULL;
DEFINE FIELD tenant_id ON TABLE job TYPE string;
DEFINE FIELD job_type ON TABLE job TYPE string \
    ASSERT $value IN ['CREATE_POD', 'ISSUE_TLS', 'DESTROY_POD', \
    'START_POD', 'STOP_POD'];
DEFINE FIELD payload ON TABLE job TYPE object FLEXIBLE;
DEFINE FIELD status ON TABLE job TYPE string \
    ASSERT $value IN ['Pending', 'Running', 'Completed', 'Failed'];
DEFINE FIELD retry_count ON TABLE job TYPE int DEFAULT 0;
DEFINE FIELD dedupe_key ON TABLE job TYPE option<string>;
-- '<tenant>:<dedupe_key>' while the job is open, the job id otherwise.
DEFINE FIELD dedupe_slot ON TABLE job TYPE string;
DEFINE FIELD last_error ON TABLE job TYPE option<string>;
DEFINE FIELD run_after ON TABLE job TYPE datetime;
DEFINE FIELD claimed_at ON TABLE job TYPE option<datetime>;
DEFINE FIELD claimed_by ON TABLE job TYPE option<string>;
DEFINE FIELD finished_at ON TABLE job TYPE option<datetime>;
DEFINE FIELD created_at ON TABLE job TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD updated_at ON TABLE job TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_job_status_run_after ON TABLE job \
    COLUMNS status, run_after;
DEFINE INDEX idx_job_tenant_dedupe ON TABLE job \
    COLUMNS tenant_id, dedupe_key;
DEFINE INDEX idx_job_dedupe_slot ON TABLE job \
    COLUMNS dedupe_slot UNIQUE;

-- =======================================================================
-- Audit events (tenant scope, append-only)
-- =======================================================================
DEFINE TABLE audit_event SCHEMAFULL
    PERMISSIONS
        FOR create FULL
        FOR select FULL
        FOR update NONE
        FOR delete NONE;
DEFINE FIELD tenant_id ON TABLE audit_event TYPE string;
DEFINE FIELD actor_user_id ON TABLE audit_event TYPE option<string>;
DEFINE FIELD action ON TABLE audit_event TYPE string;
DEFINE FIELD resource_type ON TABLE audit_event TYPE option<string>;
DEFINE FIELD resource_id ON TABLE audit_event TYPE option<string>;
DEFINE FIELD outcome ON TABLE audit_event TYPE string \
    ASSERT $value IN ['Success', 'Failure', 'Denied'];
DEFINE FIELD metadata ON TABLE audit_event TYPE object FLEXIBLE \
    DEFAULT {};
DEFINE FIELD timestamp ON TABLE audit_event TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_audit_tenant_time ON TABLE audit_event \
    COLUMNS tenant_id, timestamp;
DEFINE INDEX idx_audit_tenant_action ON TABLE audit_event \
    COLUMNS tenant_id, action;
";

// -----------------------------------------------------------------------
// Public API
// -----------------------------------------------------------------------

/// Run all pending migrations against the given SurrealDB client.
///
/// Creates a `_migration` tracking table on first run, then applies
/// each migration whose version exceeds the recorded maximum, in order.
/// Returns the number of migrations applied by this call.
pub async fn run_migrations<C: Connection>(db: &Surreal<C>) -> Result<usize, DbError> {
    db.query(MIGRATION_TABLE_DDL)
        .await?
        .check()
        .map_err(|e| DbError::Migration(e.to_string()))?;

    let current_version = current_version(db).await?;
    let pending: Vec<&Migration> = MIGRATIONS
        .iter()
        .filter(|m| m.version > current_version)
        .collect();

    for migration in &pending {
        apply(db, migration).await?;
    }

    if pending.is_empty() {
        info!(version = current_version, "Schema is up to date");
    }

    Ok(pending.len())
}

async fn current_version<C: Connection>(db: &Surreal<C>) -> Result<u32, DbError> {
    let mut result = db
        .query("SELECT * FROM _migration ORDER BY version DESC LIMIT 1")
        .await?;
    let records: Vec<MigrationRecord> = result.take(0)?;
    Ok(records.first().map(|m| m.version).unwrap_or(0))
}

async fn apply<C: Connection>(db: &Surreal<C>, migration: &Migration) -> Result<(), DbError> {
    info!(
        version = migration.version,
        name = migration.name,
        "Applying migration"
    );

    db.query(migration.sql).await?.check().map_err(|e| {
        DbError::Migration(format!(
            "v{} '{}' failed: {}",
            migration.version, migration.name, e,
        ))
    })?;

    db.query("CREATE _migration SET version = $version, name = $name")
        .bind(("version", migration.version))
        .bind(("name", migration.name))
        .await?
        .check()
        .map_err(|e| {
            DbError::Migration(format!(
                "could not record v{}: {}",
                migration.version, e,
            ))
        })?;

    Ok(())
}
