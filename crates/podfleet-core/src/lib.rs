//! podfleet core: domain models, the shared error type, and the
//! repository traits every storage backend implements.
//!
//! This crate performs no I/O. The provisioning pipeline depends on the
//! traits declared here and never on a concrete database.

pub mod error;
pub mod models;
pub mod repository;

pub use error::{PodfleetError, PodfleetResult};
