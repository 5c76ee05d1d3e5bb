//! podfleet database layer: SurrealDB connection management, schema
//! migrations and repository implementations.
//!
//! This crate provides:
//! - Opening the fleet database ([`DbManager`], [`DbConfig`])
//! - Schema initialization and migrations ([`run_migrations`])
//! - Error types ([`DbError`])
//! - Repository implementations and the [`SurrealStore`] bundle

mod connection;
mod error;
pub mod repository;
mod schema;
mod store;

pub use connection::{DbConfig, DbManager};
pub use error::DbError;
pub use schema::run_migrations;
pub use store::SurrealStore;
