//! Host placement.
//!
//! Usage is read from the live pod rows on every call; nothing is cached
//! between selections.

use podfleet_core::models::server::{Server, ServerUsage};
use podfleet_core::repository::{PodRepository, ServerRepository, Store};
use tracing::debug;

use crate::error::ProvisionResult;

/// Score bonus for a host in the preferred region. Larger than any
/// capacity score difference can be, so region wins whenever it is
/// eligible.
const REGION_BONUS: f64 = 2.0;

/// Placement score for `server`, or `None` when it cannot take a pod of
/// the given size. Higher is better.
pub fn score(
    server: &Server,
    usage: &ServerUsage,
    memory_mb: u32,
    disk_gb: u32,
    preferred_region: Option<&str>,
) -> Option<f64> {
    if server.total_memory_mb == 0 || server.total_disk_gb == 0 {
        return None;
    }
    let free_memory = server.free_memory_mb(usage);
    let free_disk = server.free_disk_gb(usage);
    if free_memory == 0 || free_disk == 0 {
        return None;
    }
    if free_memory < u64::from(memory_mb) || free_disk < u64::from(disk_gb) {
        return None;
    }

    let memory_left = (free_memory - u64::from(memory_mb)) as f64 / server.total_memory_mb as f64;
    let disk_left = (free_disk - u64::from(disk_gb)) as f64 / server.total_disk_gb as f64;
    let region = match (preferred_region, server.region.as_deref()) {
        (Some(wanted), Some(actual)) if wanted == actual => REGION_BONUS,
        _ => 0.0,
    };
    Some(memory_left + disk_left + region)
}

#[derive(Clone)]
pub struct ServerSelector<S: Store> {
    store: S,
}

impl<S: Store> ServerSelector<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Best schedulable host with at least the requested free memory and
    /// disk, or `None`.
    pub async fn select_server_for_pod(
        &self,
        memory_mb: u32,
        disk_gb: u32,
        preferred_region: Option<&str>,
    ) -> ProvisionResult<Option<Server>> {
        let mut best: Option<(f64, u64, Server)> = None;

        for server in self.store.servers().list_schedulable().await? {
            let usage = self.store.pods().usage_on_server(server.id).await?;
            let Some(score) = score(&server, &usage, memory_mb, disk_gb, preferred_region) else {
                debug!(server_id = %server.id, memory_mb, disk_gb, "Host lacks capacity");
                continue;
            };
            let better = match &best {
                None => true,
                Some((best_score, best_pods, _)) => {
                    score > *best_score || (score == *best_score && usage.pod_count < *best_pods)
                }
            };
            if better {
                best = Some((score, usage.pod_count, server));
            }
        }

        Ok(best.map(|(_, _, server)| server))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn server(memory_mb: u64, disk_gb: u64, region: Option<&str>) -> Server {
        Server {
            id: Uuid::new_v4(),
            name: "hv".into(),
            address: "10.0.0.1".into(),
            region: region.map(str::to_string),
            total_memory_mb: memory_mb,
            total_disk_gb: disk_gb,
            storage_target: "local-lvm".into(),
            is_active: true,
            is_draining: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn used(memory_mb: u64, disk_gb: u64) -> ServerUsage {
        ServerUsage {
            memory_mb,
            disk_gb,
            pod_count: 1,
        }
    }

    #[test]
    fn requires_both_minimums() {
        // 2048 MB and 50 GB free.
        let host = server(8192, 100, None);
        let usage = used(6144, 50);
        assert!(score(&host, &usage, 4096, 10, None).is_none());
        assert!(score(&host, &usage, 1024, 10, None).is_some());
        assert!(score(&host, &usage, 1024, 60, None).is_none());
    }

    #[test]
    fn full_or_overcommitted_hosts_are_never_eligible() {
        let host = server(4096, 100, None);
        assert!(score(&host, &used(4096, 10), 0, 0, None).is_none());
        assert!(score(&host, &used(5000, 10), 0, 0, None).is_none());
    }

    #[test]
    fn emptier_host_scores_higher_and_region_dominates() {
        let host = server(8192, 100, Some("eu"));
        let busy = score(&host, &used(6144, 50), 1024, 10, None).unwrap();
        let idle = score(&host, &used(0, 0), 1024, 10, None).unwrap();
        assert!(idle > busy);

        let busy_in_region = score(&host, &used(6144, 50), 1024, 10, Some("eu")).unwrap();
        assert!(busy_in_region > idle);
    }
}
