//! Daemon configuration, loaded from a TOML file.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use podfleet_db::DbConfig;
use podfleet_provision::{PowerDnsConfig, ProvisionConfig, SshConfig};
use serde::Deserialize;

/// Top-level configuration. Every section has defaults, so an empty file
/// is valid.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub db: DbConfig,
    pub provision: ProvisionConfig,
    pub ssh: SshConfig,
    pub dns: PowerDnsConfig,
    pub workers: WorkerConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Concurrent job workers in this process.
    pub count: usize,
    pub poll_interval_ms: u64,
    pub renewal_sweep_secs: u64,
    pub stale_sweep_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: 4,
            poll_interval_ms: 1_000,
            renewal_sweep_secs: 3_600,
            stale_sweep_secs: 60,
        }
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn renewal_sweep(&self) -> Duration {
        Duration::from_secs(self.renewal_sweep_secs.max(1))
    }

    pub fn stale_sweep(&self) -> Duration {
        Duration::from_secs(self.stale_sweep_secs.max(1))
    }
}

impl ServerConfig {
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let config: ServerConfig = toml::from_str("").unwrap();
        assert_eq!(config.workers.count, 4);
        assert_eq!(config.provision.instance_id_floor, 100);
        assert_eq!(config.ssh.port, 22);
        assert_eq!(config.db.namespace, "podfleet");
    }

    #[test]
    fn sections_override_independently() {
        let config: ServerConfig = toml::from_str(
            r#"
            [workers]
            count = 8

            [provision]
            ip_poll_attempts = 10

            [provision.plans.pod-tiny]
            memory_mb = 256
            swap_mb = 0
            cores = 1
            disk_gb = 2
            bandwidth_mbps = 10

            [dns]
            api_url = "http://ns1.internal:8081"
            api_key = "secret"
            "#,
        )
        .unwrap();

        assert_eq!(config.workers.count, 8);
        assert_eq!(config.workers.poll_interval_ms, 1_000);
        assert_eq!(config.provision.ip_poll_attempts, 10);
        assert_eq!(config.provision.container_timeout_secs, 600);
        assert_eq!(config.provision.plans.get("pod-tiny").unwrap().memory_mb, 256);
        assert_eq!(config.dns.api_url, "http://ns1.internal:8081");
        assert_eq!(config.dns.server_id, "localhost");
    }
}
