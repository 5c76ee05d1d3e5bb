//! Domain models for podfleet.
//!
//! Every tenant-owned model carries its `tenant_id`; hosts are fleet
//! resources and are the only global entity.

pub mod audit;
pub mod certificate;
pub mod dns;
pub mod domain;
pub mod job;
pub mod pod;
pub mod server;
