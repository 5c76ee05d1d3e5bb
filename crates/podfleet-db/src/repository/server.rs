//! SurrealDB implementation of [`ServerRepository`].

use chrono::{DateTime, Utc};
use podfleet_core::error::PodfleetResult;
use podfleet_core::models::server::{CreateServer, Server};
use podfleet_core::repository::ServerRepository;
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use uuid::Uuid;

use super::{first_row, parse_uuid};
use crate::error::DbError;

const ENTITY: &str = "server";

#[derive(Debug, SurrealValue)]
struct ServerRow {
    name: String,
    address: String,
    region: Option<String>,
    total_memory_mb: u64,
    total_disk_gb: u64,
    storage_target: String,
    is_active: bool,
    is_draining: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, SurrealValue)]
struct ServerRowWithId {
    record_id: String,
    name: String,
    address: String,
    region: Option<String>,
    total_memory_mb: u64,
    total_disk_gb: u64,
    storage_target: String,
    is_active: bool,
    is_draining: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ServerRow {
    fn into_server(self, id: Uuid) -> Server {
        Server {
            id,
            name: self.name,
            address: self.address,
            region: self.region,
            total_memory_mb: self.total_memory_mb,
            total_disk_gb: self.total_disk_gb,
            storage_target: self.storage_target,
            is_active: self.is_active,
            is_draining: self.is_draining,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

impl ServerRowWithId {
    fn try_into_server(self) -> Result<Server, DbError> {
        let id = parse_uuid(ENTITY, "record", &self.record_id)?;
        Ok(ServerRow {
            name: self.name,
            address: self.address,
            region: self.region,
            total_memory_mb: self.total_memory_mb,
            total_disk_gb: self.total_disk_gb,
            storage_target: self.storage_target,
            is_active: self.is_active,
            is_draining: self.is_draining,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
        .into_server(id))
    }
}

/// SurrealDB implementation of the host registry.
pub struct SurrealServerRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealServerRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }
}

impl<C: Connection> ServerRepository for SurrealServerRepository<C> {
    async fn create(&self, input: CreateServer) -> PodfleetResult<Server> {
        let id = Uuid::new_v4();
        let id_str = id.to_string();

        let result = self
            .db
            .query(
                "CREATE type::record('server', $id) SET \
                 name = $name, address = $address, region = $region, \
                 total_memory_mb = $total_memory_mb, \
                 total_disk_gb = $total_disk_gb, \
                 storage_target = $storage_target, \
                 is_active = true, is_draining = false",
            )
            .bind(("id", id_str.clone()))
            .bind(("name", input.name))
            .bind(("address", input.address))
            .bind(("region", input.region))
            .bind(("total_memory_mb", input.total_memory_mb))
            .bind(("total_disk_gb", input.total_disk_gb))
            .bind(("storage_target", input.storage_target))
            .await
            .map_err(DbError::from)?;

        let mut result = result
            .check()
            .map_err(|e| DbError::from_statement(ENTITY, e))?;

        let rows: Vec<ServerRow> = result.take(0).map_err(DbError::from)?;
        Ok(first_row(rows, ENTITY, &id_str)?.into_server(id))
    }

    async fn get_by_id(&self, id: Uuid) -> PodfleetResult<Server> {
        let id_str = id.to_string();

        let mut result = self
            .db
            .query("SELECT * FROM type::record('server', $id)")
            .bind(("id", id_str.clone()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<ServerRow> = result.take(0).map_err(DbError::from)?;
        Ok(first_row(rows, ENTITY, &id_str)?.into_server(id))
    }

    async fn list_schedulable(&self) -> PodfleetResult<Vec<Server>> {
        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM server \
                 WHERE is_active = true AND is_draining = false \
                 ORDER BY name ASC",
            )
            .await
            .map_err(DbError::from)?;

        let rows: Vec<ServerRowWithId> = result.take(0).map_err(DbError::from)?;
        let servers = rows
            .into_iter()
            .map(ServerRowWithId::try_into_server)
            .collect::<Result<Vec<_>, DbError>>()?;
        Ok(servers)
    }

    async fn set_draining(&self, id: Uuid, draining: bool) -> PodfleetResult<Server> {
        let id_str = id.to_string();

        let result = self
            .db
            .query(
                "UPDATE type::record('server', $id) SET \
                 is_draining = $draining, updated_at = time::now()",
            )
            .bind(("id", id_str.clone()))
            .bind(("draining", draining))
            .await
            .map_err(DbError::from)?;
        let mut result = result
            .check()
            .map_err(|e| DbError::from_statement(ENTITY, e))?;

        let rows: Vec<ServerRow> = result.take(0).map_err(DbError::from)?;
        Ok(first_row(rows, ENTITY, &id_str)?.into_server(id))
    }
}
