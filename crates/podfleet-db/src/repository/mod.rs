//! SurrealDB repository implementations.

mod audit;
mod certificate;
mod dns;
mod job;
mod pod;
mod server;

pub use audit::SurrealAuditRepository;
pub use certificate::SurrealCertificateRepository;
pub use dns::SurrealDnsRepository;
pub use job::SurrealJobRepository;
pub use pod::SurrealPodRepository;
pub use server::SurrealServerRepository;

use surrealdb_types::SurrealValue;
use uuid::Uuid;

use crate::error::DbError;

/// Row struct for count queries.
#[derive(Debug, SurrealValue)]
struct CountRow {
    total: u64,
}

fn parse_uuid(entity: &str, field: &str, value: &str) -> Result<Uuid, DbError> {
    Uuid::parse_str(value).map_err(|e| DbError::decode(entity, format!("invalid {field} UUID: {e}")))
}

fn parse_opt_uuid(entity: &str, field: &str, value: Option<&str>) -> Result<Option<Uuid>, DbError> {
    value.map(|v| parse_uuid(entity, field, v)).transpose()
}

/// Unwrap the first row of a statement or report the record missing.
fn first_row<T>(rows: Vec<T>, entity: &str, id: impl ToString) -> Result<T, DbError> {
    rows.into_iter().next().ok_or_else(|| DbError::NotFound {
        entity: entity.into(),
        id: id.to_string(),
    })
}
