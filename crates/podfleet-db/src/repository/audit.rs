//! SurrealDB implementation of [`AuditRepository`].
//!
//! The table's permissions forbid update and delete; this repository only
//! ever creates and selects.

use chrono::{DateTime, Utc};
use podfleet_core::error::PodfleetResult;
use podfleet_core::models::audit::{AuditAction, AuditEvent, AuditOutcome, CreateAuditEvent};
use podfleet_core::repository::{AuditEventFilter, AuditRepository, PaginatedResult, Pagination};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use uuid::Uuid;

use super::{CountRow, first_row, parse_opt_uuid, parse_uuid};
use crate::error::DbError;

const ENTITY: &str = "audit_event";

#[derive(Debug, SurrealValue)]
struct AuditRow {
    tenant_id: String,
    actor_user_id: Option<String>,
    action: String,
    resource_type: Option<String>,
    resource_id: Option<String>,
    outcome: String,
    metadata: serde_json::Value,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, SurrealValue)]
struct AuditRowWithId {
    record_id: String,
    tenant_id: String,
    actor_user_id: Option<String>,
    action: String,
    resource_type: Option<String>,
    resource_id: Option<String>,
    outcome: String,
    metadata: serde_json::Value,
    timestamp: DateTime<Utc>,
}

impl AuditRow {
    fn into_event(self, id: Uuid) -> Result<AuditEvent, DbError> {
        let action = AuditAction::parse(&self.action)
            .ok_or_else(|| DbError::decode(ENTITY, format!("unknown action: {}", self.action)))?;
        let outcome = AuditOutcome::parse(&self.outcome)
            .ok_or_else(|| DbError::decode(ENTITY, format!("unknown outcome: {}", self.outcome)))?;
        Ok(AuditEvent {
            id,
            tenant_id: parse_uuid(ENTITY, "tenant", &self.tenant_id)?,
            actor_user_id: parse_opt_uuid(ENTITY, "actor", self.actor_user_id.as_deref())?,
            action,
            resource_type: self.resource_type,
            resource_id: self.resource_id,
            outcome,
            metadata: self.metadata,
            timestamp: self.timestamp,
        })
    }
}

impl AuditRowWithId {
    fn try_into_event(self) -> Result<AuditEvent, DbError> {
        let id = parse_uuid(ENTITY, "record", &self.record_id)?;
        AuditRow {
            tenant_id: self.tenant_id,
            actor_user_id: self.actor_user_id,
            action: self.action,
            resource_type: self.resource_type,
            resource_id: self.resource_id,
            outcome: self.outcome,
            metadata: self.metadata,
            timestamp: self.timestamp,
        }
        .into_event(id)
    }
}

/// SurrealDB implementation of the audit log.
pub struct SurrealAuditRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealAuditRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }
}

impl<C: Connection> AuditRepository for SurrealAuditRepository<C> {
    async fn append(&self, input: CreateAuditEvent) -> PodfleetResult<AuditEvent> {
        let id = Uuid::new_v4();
        let id_str = id.to_string();

        let result = self
            .db
            .query(
                "CREATE type::record('audit_event', $id) SET \
                 tenant_id = $tenant_id, actor_user_id = $actor_user_id, \
                 action = $action, resource_type = $resource_type, \
                 resource_id = $resource_id, outcome = $outcome, \
                 metadata = $metadata",
            )
            .bind(("id", id_str.clone()))
            .bind(("tenant_id", input.tenant_id.to_string()))
            .bind(("actor_user_id", input.actor_user_id.map(|u| u.to_string())))
            .bind(("action", input.action.as_str()))
            .bind(("resource_type", input.resource_type))
            .bind(("resource_id", input.resource_id))
            .bind(("outcome", input.outcome.as_str()))
            .bind(("metadata", input.metadata))
            .await
            .map_err(DbError::from)?;

        let mut result = result
            .check()
            .map_err(|e| DbError::from_statement(ENTITY, e))?;

        let rows: Vec<AuditRow> = result.take(0).map_err(DbError::from)?;
        Ok(first_row(rows, ENTITY, &id_str)?.into_event(id)?)
    }

    async fn list(
        &self,
        tenant_id: Uuid,
        filter: AuditEventFilter,
        pagination: Pagination,
    ) -> PodfleetResult<PaginatedResult<AuditEvent>> {
        let mut conditions = vec!["tenant_id = $tenant_id"];
        if filter.action.is_some() {
            conditions.push("action = $action");
        }
        if filter.resource_id.is_some() {
            conditions.push("resource_id = $resource_id");
        }
        if filter.from.is_some() {
            conditions.push("timestamp >= $from");
        }
        if filter.to.is_some() {
            conditions.push("timestamp <= $to");
        }
        let where_clause = conditions.join(" AND ");

        let count_query =
            format!("SELECT count() AS total FROM audit_event WHERE {where_clause} GROUP ALL");
        let select_query = format!(
            "SELECT meta::id(id) AS record_id, * FROM audit_event \
             WHERE {where_clause} \
             ORDER BY timestamp ASC \
             LIMIT $limit START $offset"
        );

        let mut count_builder = self
            .db
            .query(&count_query)
            .bind(("tenant_id", tenant_id.to_string()));
        let mut select_builder = self
            .db
            .query(&select_query)
            .bind(("tenant_id", tenant_id.to_string()))
            .bind(("limit", pagination.limit))
            .bind(("offset", pagination.offset));

        if let Some(action) = filter.action {
            count_builder = count_builder.bind(("action", action.as_str()));
            select_builder = select_builder.bind(("action", action.as_str()));
        }
        if let Some(resource_id) = filter.resource_id {
            count_builder = count_builder.bind(("resource_id", resource_id.clone()));
            select_builder = select_builder.bind(("resource_id", resource_id));
        }
        if let Some(from) = filter.from {
            count_builder = count_builder.bind(("from", from));
            select_builder = select_builder.bind(("from", from));
        }
        if let Some(to) = filter.to {
            count_builder = count_builder.bind(("to", to));
            select_builder = select_builder.bind(("to", to));
        }

        let mut count_result = count_builder.await.map_err(DbError::from)?;
        let count_rows: Vec<CountRow> = count_result.take(0).map_err(DbError::from)?;
        let total = count_rows.first().map(|r| r.total).unwrap_or(0);

        let mut result = select_builder.await.map_err(DbError::from)?;
        let rows: Vec<AuditRowWithId> = result.take(0).map_err(DbError::from)?;
        let items = rows
            .into_iter()
            .map(AuditRowWithId::try_into_event)
            .collect::<Result<Vec<_>, DbError>>()?;

        Ok(PaginatedResult {
            items,
            total,
            offset: pagination.offset,
            limit: pagination.limit,
        })
    }
}
