//! Provisioning configuration.
//!
//! Every tunable of the pipeline lives in [`ProvisionConfig`]. The binary
//! loads it from TOML; tests build it from `Default` and override fields.

use std::collections::BTreeMap;
use std::time::Duration;

use podfleet_core::models::pod::ResourceProfile;
use serde::Deserialize;

/// Immutable `plan code → resource profile` map handed to the worker at
/// construction.
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct PlanCatalog {
    plans: BTreeMap<String, ResourceProfile>,
}

impl PlanCatalog {
    pub fn new(plans: impl IntoIterator<Item = (String, ResourceProfile)>) -> Self {
        Self {
            plans: plans.into_iter().collect(),
        }
    }

    pub fn get(&self, plan_code: &str) -> Option<&ResourceProfile> {
        self.plans.get(plan_code)
    }

    /// Profile for `plan_code`, falling back to the smallest plan (by
    /// memory, then disk) for unknown codes. `None` only when the
    /// catalog is empty.
    pub fn resolve(&self, plan_code: &str) -> Option<ResourceProfile> {
        self.plans
            .get(plan_code)
            .or_else(|| self.smallest())
            .copied()
    }

    fn smallest(&self) -> Option<&ResourceProfile> {
        self.plans
            .values()
            .min_by_key(|p| (p.memory_mb, p.disk_gb))
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }
}

impl Default for PlanCatalog {
    fn default() -> Self {
        let plan = |memory_mb, swap_mb, cores, disk_gb, bandwidth_mbps| ResourceProfile {
            memory_mb,
            swap_mb,
            cores,
            disk_gb,
            bandwidth_mbps,
        };
        Self::new([
            ("pod-basic".to_string(), plan(1024, 512, 1, 10, 100)),
            ("pod-standard".to_string(), plan(2048, 1024, 2, 25, 250)),
            ("pod-pro".to_string(), plan(4096, 2048, 4, 50, 500)),
            ("pod-business".to_string(), plan(8192, 4096, 8, 100, 1000)),
        ])
    }
}

/// Records written for a domain by the DNS template.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DnsTemplateConfig {
    pub ttl: u32,
    /// Add MX/SPF/DMARC records when the domain allows mail management.
    pub include_email: bool,
    pub mx_priority: u32,
    pub spf: String,
    pub dmarc: String,
}

impl Default for DnsTemplateConfig {
    fn default() -> Self {
        Self {
            ttl: 3600,
            include_email: false,
            mx_priority: 10,
            spf: "v=spf1 mx a ~all".into(),
            dmarc: "v=DMARC1; p=none".into(),
        }
    }
}

/// Configuration for the provisioning pipeline.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProvisionConfig {
    pub plans: PlanCatalog,
    /// Lowest instance id handed out; ids below it are reserved for the
    /// host's own containers.
    pub instance_id_floor: u32,
    pub instance_id_max: u32,
    /// Attempts at claiming a fresh instance id when another worker
    /// races us on the same host.
    pub allocation_attempts: u32,
    pub ip_poll_attempts: u32,
    pub ip_poll_interval_ms: u64,
    pub container_timeout_secs: u64,
    pub command_timeout_secs: u64,
    pub acme_timeout_secs: u64,
    pub dns: DnsTemplateConfig,
    pub certificate_validity_days: i64,
    pub renewal_window_days: i64,
    pub job_max_attempts: u32,
    pub retry_backoff_base_secs: u64,
    pub retry_backoff_max_secs: u64,
    /// A `RUNNING` job whose claim has not been refreshed for this long
    /// is handed to another worker. Live workers refresh their claim
    /// every third of it.
    pub stale_claim_secs: u64,
    /// Port inside the pod the reverse proxy fronts.
    pub upstream_port: u16,
    pub audit_write_timeout_ms: u64,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            plans: PlanCatalog::default(),
            instance_id_floor: 100,
            instance_id_max: 999_999_999,
            allocation_attempts: 5,
            ip_poll_attempts: 60,
            ip_poll_interval_ms: 5_000,
            container_timeout_secs: 600,
            command_timeout_secs: 30,
            acme_timeout_secs: 180,
            dns: DnsTemplateConfig::default(),
            certificate_validity_days: 90,
            renewal_window_days: 14,
            job_max_attempts: 5,
            retry_backoff_base_secs: 30,
            retry_backoff_max_secs: 3_600,
            stale_claim_secs: 900,
            upstream_port: 80,
            audit_write_timeout_ms: 2_000,
        }
    }
}

impl ProvisionConfig {
    pub fn container_timeout(&self) -> Duration {
        Duration::from_secs(self.container_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn acme_timeout(&self) -> Duration {
        Duration::from_secs(self.acme_timeout_secs)
    }

    pub fn ip_poll_interval(&self) -> Duration {
        Duration::from_millis(self.ip_poll_interval_ms)
    }

    pub fn audit_write_timeout(&self) -> Duration {
        Duration::from_millis(self.audit_write_timeout_ms)
    }

    pub fn renewal_window(&self) -> chrono::Duration {
        chrono::Duration::days(self.renewal_window_days)
    }

    pub fn certificate_validity(&self) -> chrono::Duration {
        chrono::Duration::days(self.certificate_validity_days)
    }

    pub fn stale_claim(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stale_claim_secs as i64)
    }

    pub fn claim_heartbeat(&self) -> Duration {
        Duration::from_millis(self.stale_claim_secs.saturating_mul(1_000) / 3).max(Duration::from_millis(100))
    }

    /// Delay before the next attempt after `retry_count` earlier retries:
    /// `base * 2^retry_count`, capped.
    pub fn retry_backoff(&self, retry_count: u32) -> chrono::Duration {
        let factor = 1u64.checked_shl(retry_count.min(32)).unwrap_or(u64::MAX);
        let secs = self
            .retry_backoff_base_secs
            .saturating_mul(factor)
            .min(self.retry_backoff_max_secs);
        chrono::Duration::seconds(secs as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_plan_falls_back_to_smallest() {
        let catalog = PlanCatalog::default();
        let basic = catalog.resolve("pod-basic").unwrap();
        assert_eq!(basic.memory_mb, 1024);
        assert_eq!(catalog.resolve("pod-mystery"), Some(basic));
        assert_eq!(catalog.resolve("pod-pro").unwrap().cores, 4);
    }

    #[test]
    fn empty_catalog_resolves_nothing() {
        let catalog = PlanCatalog::new([]);
        assert!(catalog.is_empty());
        assert!(catalog.resolve("pod-basic").is_none());
    }

    #[test]
    fn backoff_doubles_until_capped() {
        let config = ProvisionConfig::default();
        assert_eq!(config.retry_backoff(0).num_seconds(), 30);
        assert_eq!(config.retry_backoff(1).num_seconds(), 60);
        assert_eq!(config.retry_backoff(3).num_seconds(), 240);
        assert_eq!(config.retry_backoff(10).num_seconds(), 3_600);
        assert_eq!(config.retry_backoff(40).num_seconds(), 3_600);
    }

    #[test]
    fn claims_are_refreshed_well_inside_the_stale_timeout() {
        let config = ProvisionConfig::default();
        assert_eq!(config.claim_heartbeat(), Duration::from_secs(300));

        let tight = ProvisionConfig {
            stale_claim_secs: 0,
            ..Default::default()
        };
        assert_eq!(tight.claim_heartbeat(), Duration::from_millis(100));
    }

    #[test]
    fn partial_config_keeps_defaults() {
        let config: ProvisionConfig = serde_json::from_value(serde_json::json!({
            "instance_id_floor": 200,
            "plans": {
                "tiny": {
                    "memory_mb": 256, "swap_mb": 0, "cores": 1,
                    "disk_gb": 2, "bandwidth_mbps": 10
                }
            }
        }))
        .unwrap();
        assert_eq!(config.instance_id_floor, 200);
        assert_eq!(config.ip_poll_attempts, 60);
        assert_eq!(config.plans.resolve("pod-basic").unwrap().memory_mb, 256);
    }
}
