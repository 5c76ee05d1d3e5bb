//! Host selection against live pod rows.

mod common;

use common::Harness;
use podfleet_core::models::pod::{CreatePod, ResourceProfile};
use podfleet_core::models::server::CreateServer;
use podfleet_core::repository::{PodRepository, ServerRepository, Store};
use podfleet_provision::ServerSelector;
use uuid::Uuid;

fn profile(memory_mb: u32, disk_gb: u32) -> ResourceProfile {
    ResourceProfile {
        memory_mb,
        swap_mb: 0,
        cores: 1,
        disk_gb,
        bandwidth_mbps: 100,
    }
}

async fn place(h: &Harness, server_id: Uuid, instance_id: u32, memory_mb: u32, disk_gb: u32) {
    h.store
        .pods()
        .create(CreatePod {
            tenant_id: Uuid::new_v4(),
            subscription_id: Uuid::new_v4(),
            server_id,
            instance_id,
            hostname: format!("pod-{instance_id}"),
            primary_domain: None,
            plan_code: "custom".into(),
            resources: profile(memory_mb, disk_gb),
            created_by: None,
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn capacity_is_computed_from_live_pods() {
    let h = Harness::new().await;
    let server = h.add_server("hv-1", 8_192, 100).await;
    place(&h, server.id, 100, 6_144, 50).await;
    let selector = ServerSelector::new(h.store.clone());

    // 2048 MB and 50 GB left.
    assert!(selector.select_server_for_pod(4096, 10, None).await.unwrap().is_none());
    let chosen = selector.select_server_for_pod(1024, 10, None).await.unwrap().unwrap();
    assert_eq!(chosen.id, server.id);
    assert!(selector.select_server_for_pod(2048, 50, None).await.unwrap().is_some());
    assert!(selector.select_server_for_pod(2048, 51, None).await.unwrap().is_none());
}

#[tokio::test]
async fn draining_hosts_are_skipped() {
    let h = Harness::new().await;
    let big = h.add_server("hv-big", 65_536, 2_000).await;
    let small = h.add_server("hv-small", 4_096, 100).await;
    h.store.servers().set_draining(big.id, true).await.unwrap();

    let chosen = ServerSelector::new(h.store.clone())
        .select_server_for_pod(1024, 10, None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(chosen.id, small.id);
}

#[tokio::test]
async fn region_is_a_preference_not_a_filter() {
    let h = Harness::new().await;
    let servers = h.store.servers();
    let fra = servers
        .create(CreateServer {
            name: "hv-fra".into(),
            address: "hv-fra.fleet.internal".into(),
            region: Some("fra".into()),
            total_memory_mb: 8_192,
            total_disk_gb: 200,
            storage_target: "local-lvm".into(),
        })
        .await
        .unwrap();
    let ams = servers
        .create(CreateServer {
            name: "hv-ams".into(),
            address: "hv-ams.fleet.internal".into(),
            region: Some("ams".into()),
            total_memory_mb: 8_192,
            total_disk_gb: 200,
            storage_target: "local-lvm".into(),
        })
        .await
        .unwrap();
    let selector = ServerSelector::new(h.store.clone());

    let chosen = selector.select_server_for_pod(1024, 10, Some("ams")).await.unwrap().unwrap();
    assert_eq!(chosen.id, ams.id);

    let chosen = selector.select_server_for_pod(1024, 10, Some("fra")).await.unwrap().unwrap();
    assert_eq!(chosen.id, fra.id);

    let chosen = selector.select_server_for_pod(1024, 10, Some("nyc")).await.unwrap();
    assert!(chosen.is_some());
}
