//! Database-specific error types and conversions.

use podfleet_core::error::PodfleetError;

/// Database-layer error type.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("SurrealDB error: {0}")]
    Surreal(#[from] surrealdb::Error),

    #[error("Could not connect: {0}")]
    Connect(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Corrupt row in {entity}: {message}")]
    Decode { entity: String, message: String },

    #[error("Record not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Unique constraint violated on {entity}")]
    AlreadyExists { entity: String },
}

impl DbError {
    /// Classify a failed statement, surfacing unique-index violations.
    pub(crate) fn from_statement(entity: &str, err: surrealdb::Error) -> Self {
        let message = err.to_string();
        if message.contains("already contains") {
            DbError::AlreadyExists {
                entity: entity.into(),
            }
        } else {
            DbError::Query(message)
        }
    }

    pub(crate) fn decode(entity: &str, message: impl Into<String>) -> Self {
        DbError::Decode {
            entity: entity.into(),
            message: message.into(),
        }
    }
}

impl From<DbError> for PodfleetError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound { entity, id } => PodfleetError::NotFound { entity, id },
            DbError::AlreadyExists { entity } => PodfleetError::AlreadyExists { entity },
            other => PodfleetError::Database(other.to_string()),
        }
    }
}
