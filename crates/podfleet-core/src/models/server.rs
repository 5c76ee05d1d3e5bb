//! Hypervisor host model.
//!
//! Hosts are fleet-wide resources owned by the operator, not by a
//! tenant. Capacity is recorded as totals only; what is allocated is
//! always derived from the live pod rows placed on the host.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub id: Uuid,
    /// Human-readable name (e.g., `hv-fra-03`).
    pub name: String,
    /// Address the remote transport connects to (hostname or IPv4).
    pub address: String,
    pub region: Option<String>,
    pub total_memory_mb: u64,
    pub total_disk_gb: u64,
    /// Storage pool new containers are created on (e.g., `local-lvm`).
    pub storage_target: String,
    pub is_active: bool,
    /// Draining hosts keep their pods but receive no new placements.
    pub is_draining: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateServer {
    pub name: String,
    pub address: String,
    pub region: Option<String>,
    pub total_memory_mb: u64,
    pub total_disk_gb: u64,
    pub storage_target: String,
}

/// Resources currently allocated on a host, summed from its pods.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerUsage {
    pub memory_mb: u64,
    pub disk_gb: u64,
    pub pod_count: u64,
}

impl Server {
    pub fn free_memory_mb(&self, usage: &ServerUsage) -> u64 {
        self.total_memory_mb.saturating_sub(usage.memory_mb)
    }

    pub fn free_disk_gb(&self, usage: &ServerUsage) -> u64 {
        self.total_disk_gb.saturating_sub(usage.disk_gb)
    }
}
