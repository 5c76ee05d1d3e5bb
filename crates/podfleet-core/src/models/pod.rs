//! Pod domain model.
//!
//! A pod is a tenant-owned container on one hypervisor host. Its
//! `instance_id` is unique per host; its lifecycle is driven by the
//! provisioning worker and explicit start/stop/destroy jobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a pod.
///
/// ```text
/// Provisioning ──► Starting ──► Running ◄──► Stopped
///       │              │           │
///       └──────────────┴──► Failed │
///                             └────┴──► Destroyed
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PodStatus {
    Provisioning,
    Starting,
    Running,
    Stopped,
    Failed,
    Destroyed,
}

impl PodStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PodStatus::Provisioning => "Provisioning",
            PodStatus::Starting => "Starting",
            PodStatus::Running => "Running",
            PodStatus::Stopped => "Stopped",
            PodStatus::Failed => "Failed",
            PodStatus::Destroyed => "Destroyed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Provisioning" => Some(PodStatus::Provisioning),
            "Starting" => Some(PodStatus::Starting),
            "Running" => Some(PodStatus::Running),
            "Stopped" => Some(PodStatus::Stopped),
            "Failed" => Some(PodStatus::Failed),
            "Destroyed" => Some(PodStatus::Destroyed),
            _ => None,
        }
    }

    /// Terminal states of the create pipeline; only these may be destroyed.
    pub fn is_create_terminal(&self) -> bool {
        matches!(
            self,
            PodStatus::Running | PodStatus::Stopped | PodStatus::Failed
        )
    }
}

/// Resources allocated to one pod.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceProfile {
    pub memory_mb: u32,
    pub swap_mb: u32,
    pub cores: u32,
    pub disk_gb: u32,
    /// Network bandwidth ceiling in Mbit/s.
    pub bandwidth_mbps: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pod {
    pub id: Uuid,
    pub tenant_id: Uuid,
    /// Upstream subscription this pod was ordered under.
    pub subscription_id: Uuid,
    pub server_id: Uuid,
    /// Host-unique numeric container id.
    pub instance_id: u32,
    pub hostname: String,
    pub primary_domain: Option<String>,
    pub ipv4: Option<String>,
    pub plan_code: String,
    pub resources: ResourceProfile,
    pub status: PodStatus,
    /// Last failure reason, cleared on the next successful transition.
    pub status_reason: Option<String>,
    /// Set once the host has confirmed the container exists.
    pub container_created: bool,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePod {
    pub tenant_id: Uuid,
    pub subscription_id: Uuid,
    pub server_id: Uuid,
    pub instance_id: u32,
    pub hostname: String,
    pub primary_domain: Option<String>,
    pub plan_code: String,
    pub resources: ResourceProfile,
    pub created_by: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpdatePod {
    pub status: Option<PodStatus>,
    /// `Some(Some(v))` = set, `Some(None)` = clear, `None` = no change.
    pub status_reason: Option<Option<String>>,
    /// `Some(None)` releases the address back to the pool.
    pub ipv4: Option<Option<String>>,
    pub container_created: Option<bool>,
}

impl UpdatePod {
    pub fn status(status: PodStatus) -> Self {
        Self {
            status: Some(status),
            status_reason: Some(None),
            ..Default::default()
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: Some(PodStatus::Failed),
            status_reason: Some(Some(reason.into())),
            ..Default::default()
        }
    }
}
