//! In-process fakes for the pipeline's external systems, and a harness
//! wiring them to an in-memory SurrealDB store.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use podfleet_core::models::audit::{AuditAction, AuditEvent};
use podfleet_core::models::dns::DnsRecordType;
use podfleet_core::models::server::{CreateServer, Server};
use podfleet_core::repository::{
    AuditEventFilter, AuditRepository, Pagination, ServerRepository, Store,
};
use podfleet_db::SurrealStore;
use podfleet_provision::dns::ProviderRecord;
use podfleet_provision::transport::CommandOutput;
use podfleet_provision::{
    AuditRecorder, CertificateManager, CommandExecutor, CommandTransport, DnsProvider,
    DnsReconciler, DnsResolver, JobQueue, JobRunner, PodProvisioner, ProvisionConfig,
    ProvisionError, ProvisionResult,
};
use surrealdb::Surreal;
use surrealdb::engine::local::{Db, Mem};
use uuid::Uuid;

pub type TestStore = SurrealStore<Db>;

pub const POD_IP: &str = "10.20.0.5";

// ---------------------------------------------------------------------------
// Command transport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Call {
    pub host: String,
    pub script: String,
    pub args: Vec<String>,
}

#[derive(Default)]
struct TransportState {
    calls: Vec<Call>,
    failing: HashSet<String>,
    delays: HashMap<String, Duration>,
    ipv4: Option<String>,
}

/// Records every call and answers with canned result blocks.
#[derive(Clone, Default)]
pub struct FakeTransport {
    state: Arc<Mutex<TransportState>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        let transport = Self::default();
        transport.set_ipv4(Some(POD_IP));
        transport
    }

    pub fn set_ipv4(&self, ip: Option<&str>) {
        self.state.lock().unwrap().ipv4 = ip.map(str::to_string);
    }

    /// Make `script` report `success: false` until cleared.
    pub fn fail(&self, script: &str) {
        self.state.lock().unwrap().failing.insert(script.to_string());
    }

    /// Make `script` take `delay` before answering.
    pub fn slow(&self, script: &str, delay: Duration) {
        self.state
            .lock()
            .unwrap()
            .delays
            .insert(script.to_string(), delay);
    }

    pub fn recover(&self, script: &str) {
        self.state.lock().unwrap().failing.remove(script);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn scripts(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.script).collect()
    }

    pub fn count(&self, script: &str) -> usize {
        self.calls().iter().filter(|c| c.script == script).count()
    }
}

impl CommandTransport for FakeTransport {
    async fn execute(
        &self,
        host: &str,
        script: &str,
        args: &[String],
        _timeout: Duration,
    ) -> ProvisionResult<CommandOutput> {
        let delay = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(Call {
                host: host.to_string(),
                script: script.to_string(),
                args: args.to_vec(),
            });
            state.delays.get(script).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let state = self.state.lock().unwrap();

        if state.failing.contains(script) {
            return Ok(CommandOutput {
                exit_code: Some(1),
                stdout: r#"@@RESULT {"success":false,"message":"simulated failure"}"#.into(),
                stderr: String::new(),
            });
        }

        let result = match script {
            "pod-status" => match &state.ipv4 {
                Some(ip) => format!(r#"{{"success":true,"ipv4":"{ip}"}}"#),
                None => r#"{"success":true}"#.to_string(),
            },
            "tls-issue-proxy" | "tls-issue-standalone" => {
                r#"{"success":true,"issuer":"Test CA"}"#.to_string()
            }
            _ => r#"{"success":true,"duration_ms":12}"#.to_string(),
        };
        Ok(CommandOutput {
            exit_code: Some(0),
            stdout: format!("starting\n@@LOG {{\"step\":\"{script}\"}}\n@@RESULT {result}\n"),
            stderr: String::new(),
        })
    }
}

// ---------------------------------------------------------------------------
// DNS provider
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ProviderState {
    zones: HashMap<String, String>,
    records: HashMap<(String, String, DnsRecordType), ProviderRecord>,
    writes: usize,
    fail_writes: bool,
    fail_reads: bool,
}

/// Authoritative DNS held in memory, counting every write.
#[derive(Clone, Default)]
pub struct FakeDnsProvider {
    state: Arc<Mutex<ProviderState>>,
}

impl FakeDnsProvider {
    pub fn writes(&self) -> usize {
        self.state.lock().unwrap().writes
    }

    pub fn record(&self, name: &str, record_type: DnsRecordType) -> Option<ProviderRecord> {
        self.state
            .lock()
            .unwrap()
            .records
            .values()
            .find(|r| r.name == name && r.record_type == record_type)
            .cloned()
    }

    pub fn record_count(&self) -> usize {
        self.state.lock().unwrap().records.len()
    }

    pub fn has_zone(&self, name: &str) -> bool {
        self.state.lock().unwrap().zones.contains_key(name)
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.state.lock().unwrap().fail_writes = fail;
    }

    /// Make every provider call fail, zone lookups included.
    pub fn set_unreachable(&self, fail: bool) {
        let mut state = self.state.lock().unwrap();
        state.fail_reads = fail;
        state.fail_writes = fail;
    }

    /// Delete a zone and its records behind the reconciler's back.
    pub fn drop_zone(&self, name: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(id) = state.zones.remove(name) {
            state.records.retain(|(zone_id, _, _), _| *zone_id != id);
        }
    }

    /// Drop a record behind the reconciler's back.
    pub fn remove(&self, name: &str, record_type: DnsRecordType) {
        self.state
            .lock()
            .unwrap()
            .records
            .retain(|(_, n, t), _| !(n == name && *t == record_type));
    }
}

fn unavailable() -> ProvisionError {
    ProvisionError::DnsProvider("simulated outage".into())
}

impl DnsProvider for FakeDnsProvider {
    async fn find_zone(&self, zone_name: &str) -> ProvisionResult<Option<String>> {
        let state = self.state.lock().unwrap();
        if state.fail_reads {
            return Err(unavailable());
        }
        Ok(state.zones.get(zone_name).cloned())
    }

    async fn create_zone(&self, zone_name: &str) -> ProvisionResult<String> {
        let mut state = self.state.lock().unwrap();
        if state.fail_writes {
            return Err(unavailable());
        }
        state.writes += 1;
        let id = format!("{zone_name}.");
        state.zones.insert(zone_name.to_string(), id.clone());
        Ok(id)
    }

    async fn get_record(
        &self,
        zone_id: &str,
        name: &str,
        record_type: DnsRecordType,
    ) -> ProvisionResult<Option<ProviderRecord>> {
        let state = self.state.lock().unwrap();
        if state.fail_reads {
            return Err(unavailable());
        }
        Ok(state
            .records
            .get(&(zone_id.to_string(), name.to_string(), record_type))
            .cloned())
    }

    async fn upsert_record(&self, zone_id: &str, record: &ProviderRecord) -> ProvisionResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_writes {
            return Err(unavailable());
        }
        state.writes += 1;
        state.records.insert(
            (zone_id.to_string(), record.name.clone(), record.record_type),
            record.clone(),
        );
        Ok(())
    }

    async fn delete_record(
        &self,
        zone_id: &str,
        name: &str,
        record_type: DnsRecordType,
    ) -> ProvisionResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_writes {
            return Err(unavailable());
        }
        if !state.zones.values().any(|id| id == zone_id) {
            return Err(ProvisionError::DnsProvider(format!(
                "HTTP 404 Not Found: Could not find domain '{zone_id}'"
            )));
        }
        state.writes += 1;
        state
            .records
            .remove(&(zone_id.to_string(), name.to_string(), record_type));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Public resolver
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct FakeResolver {
    answers: Arc<Mutex<HashMap<String, Vec<Ipv4Addr>>>>,
}

impl FakeResolver {
    pub fn point(&self, name: &str, ip: &str) {
        let ip: Ipv4Addr = ip.parse().unwrap();
        self.answers
            .lock()
            .unwrap()
            .insert(name.to_string(), vec![ip]);
    }
}

impl DnsResolver for FakeResolver {
    async fn resolve_ipv4(&self, name: &str) -> ProvisionResult<Vec<Ipv4Addr>> {
        Ok(self
            .answers
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub store: TestStore,
    pub transport: FakeTransport,
    pub provider: FakeDnsProvider,
    pub resolver: FakeResolver,
    pub config: ProvisionConfig,
}

pub fn test_config() -> ProvisionConfig {
    ProvisionConfig {
        ip_poll_attempts: 3,
        ip_poll_interval_ms: 0,
        retry_backoff_base_secs: 0,
        ..Default::default()
    }
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: ProvisionConfig) -> Self {
        let db: Surreal<Db> = Surreal::new::<Mem>(()).await.unwrap();
        db.use_ns("test").use_db("test").await.unwrap();
        podfleet_db::run_migrations(&db).await.unwrap();
        Self {
            store: SurrealStore::new(db),
            transport: FakeTransport::new(),
            provider: FakeDnsProvider::default(),
            resolver: FakeResolver::default(),
            config,
        }
    }

    pub fn audit(&self) -> AuditRecorder<TestStore> {
        AuditRecorder::new(self.store.clone(), self.config.audit_write_timeout())
    }

    pub fn executor(&self) -> CommandExecutor<FakeTransport, TestStore> {
        CommandExecutor::new(self.transport.clone(), self.audit(), self.config.clone())
    }

    pub fn reconciler(&self) -> DnsReconciler<TestStore, FakeDnsProvider> {
        DnsReconciler::new(
            self.store.clone(),
            self.provider.clone(),
            self.audit(),
            self.config.dns.clone(),
        )
    }

    pub fn queue(&self) -> JobQueue<TestStore> {
        JobQueue::new(self.store.clone(), self.config.clone())
    }

    pub fn provisioner(&self) -> PodProvisioner<TestStore, FakeTransport, FakeDnsProvider> {
        PodProvisioner::new(
            self.store.clone(),
            self.executor(),
            self.reconciler(),
            self.audit(),
            self.config.clone(),
        )
    }

    pub fn certificates(&self) -> CertificateManager<TestStore, FakeTransport, FakeResolver> {
        CertificateManager::new(
            self.store.clone(),
            self.executor(),
            self.resolver.clone(),
            self.audit(),
            self.config.clone(),
        )
    }

    pub fn runner(&self) -> JobRunner<TestStore, FakeTransport, FakeDnsProvider, FakeResolver> {
        JobRunner::new(self.queue(), self.provisioner(), self.certificates())
    }

    pub async fn add_server(&self, name: &str, memory_mb: u64, disk_gb: u64) -> Server {
        self.store
            .servers()
            .create(CreateServer {
                name: name.to_string(),
                address: format!("{name}.fleet.internal"),
                region: None,
                total_memory_mb: memory_mb,
                total_disk_gb: disk_gb,
                storage_target: "local-lvm".into(),
            })
            .await
            .unwrap()
    }

    pub async fn audit_events(&self, tenant_id: Uuid, action: AuditAction) -> Vec<AuditEvent> {
        self.store
            .audit()
            .list(
                tenant_id,
                AuditEventFilter {
                    action: Some(action),
                    ..Default::default()
                },
                Pagination {
                    offset: 0,
                    limit: 100,
                },
            )
            .await
            .unwrap()
            .items
    }
}
