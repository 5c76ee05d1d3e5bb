//! Job queue models.
//!
//! A job is a typed, tenant-scoped unit of work. The payload is a closed
//! set of variants so that adding a job type forces every dispatcher to
//! handle it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    CreatePod,
    IssueTls,
    DestroyPod,
    StartPod,
    StopPod,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::CreatePod => "CREATE_POD",
            JobType::IssueTls => "ISSUE_TLS",
            JobType::DestroyPod => "DESTROY_POD",
            JobType::StartPod => "START_POD",
            JobType::StopPod => "STOP_POD",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CREATE_POD" => Some(JobType::CreatePod),
            "ISSUE_TLS" => Some(JobType::IssueTls),
            "DESTROY_POD" => Some(JobType::DestroyPod),
            "START_POD" => Some(JobType::StartPod),
            "STOP_POD" => Some(JobType::StopPod),
            _ => None,
        }
    }
}

/// `PENDING → RUNNING → COMPLETED | FAILED`; a retry returns a job to
/// `PENDING`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "Pending",
            JobStatus::Running => "Running",
            JobStatus::Completed => "Completed",
            JobStatus::Failed => "Failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Pending" => Some(JobStatus::Pending),
            "Running" => Some(JobStatus::Running),
            "Completed" => Some(JobStatus::Completed),
            "Failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CreatePodPayload {
    pub tenant_id: Uuid,
    pub subscription_id: Uuid,
    pub plan_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggered_by_user_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_region: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IssueTlsPayload {
    pub tenant_id: Uuid,
    pub pod_id: Uuid,
    pub domain: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DestroyPodPayload {
    pub tenant_id: Uuid,
    pub pod_id: Uuid,
    #[serde(default)]
    pub backup: bool,
}

/// Payload shared by the start and stop jobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PodRefPayload {
    pub tenant_id: Uuid,
    pub pod_id: Uuid,
}

/// Typed job payload, serialized as `{"type": "CREATE_POD", "payload": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobPayload {
    CreatePod(CreatePodPayload),
    IssueTls(IssueTlsPayload),
    DestroyPod(DestroyPodPayload),
    StartPod(PodRefPayload),
    StopPod(PodRefPayload),
}

impl JobPayload {
    pub fn job_type(&self) -> JobType {
        match self {
            JobPayload::CreatePod(_) => JobType::CreatePod,
            JobPayload::IssueTls(_) => JobType::IssueTls,
            JobPayload::DestroyPod(_) => JobType::DestroyPod,
            JobPayload::StartPod(_) => JobType::StartPod,
            JobPayload::StopPod(_) => JobType::StopPod,
        }
    }

    pub fn tenant_id(&self) -> Uuid {
        match self {
            JobPayload::CreatePod(p) => p.tenant_id,
            JobPayload::IssueTls(p) => p.tenant_id,
            JobPayload::DestroyPod(p) => p.tenant_id,
            JobPayload::StartPod(p) | JobPayload::StopPod(p) => p.tenant_id,
        }
    }

    /// Key under which repeated deliveries of the same work collapse into
    /// one open job. Start and stop requests are ordered against each
    /// other, so they are never collapsed.
    pub fn dedupe_key(&self) -> Option<String> {
        match self {
            JobPayload::CreatePod(p) => Some(format!("create_pod:{}", p.subscription_id)),
            JobPayload::IssueTls(p) => Some(format!("issue_tls:{}", p.domain)),
            JobPayload::DestroyPod(p) => Some(format!("destroy_pod:{}", p.pod_id)),
            JobPayload::StartPod(_) | JobPayload::StopPod(_) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub job_type: JobType,
    pub payload: JobPayload,
    pub status: JobStatus,
    /// Number of times the job has been returned to `PENDING`.
    pub retry_count: u32,
    /// Open jobs sharing a key are collapsed into one.
    pub dedupe_key: Option<String>,
    pub last_error: Option<String>,
    /// The job is not claimable before this instant.
    pub run_after: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    /// Worker currently holding the claim.
    pub claimed_by: Option<String>,
    pub finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateJob {
    pub payload: JobPayload,
    pub dedupe_key: Option<String>,
    pub run_after: Option<DateTime<Utc>>,
}
