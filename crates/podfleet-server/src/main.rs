//! Podfleet daemon: runs the provisioning job workers and the periodic
//! renewal and stale-claim sweeps until interrupted.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use podfleet_db::DbManager;
use podfleet_provision::runner::periodically;
use podfleet_provision::{
    AuditRecorder, CertificateManager, CommandExecutor, DnsReconciler, JobQueue, JobRunner,
    PodProvisioner, PowerDnsProvider, SshTransport, SystemResolver,
};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::ServerConfig;

#[derive(Debug, Parser)]
#[command(name = "podfleet", version, about = "Pod provisioning workers")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("podfleet=info"));
    tracing_subscriber::fmt().with_env_filter(filter).json().init();

    let cli = Cli::parse();
    let config = ServerConfig::load(cli.config.as_deref())?;
    info!(workers = config.workers.count, "Starting podfleet");

    let store = DbManager::open(&config.db).await?.store();
    let provision = config.provision.clone();
    let audit = AuditRecorder::new(store.clone(), provision.audit_write_timeout());
    let executor = CommandExecutor::new(
        SshTransport::new(config.ssh.clone()),
        audit.clone(),
        provision.clone(),
    );
    let reconciler = DnsReconciler::new(
        store.clone(),
        PowerDnsProvider::new(config.dns.clone())?,
        audit.clone(),
        provision.dns.clone(),
    );
    let provisioner = PodProvisioner::new(
        store.clone(),
        executor.clone(),
        reconciler,
        audit.clone(),
        provision.clone(),
    );
    let certificates =
        CertificateManager::new(store.clone(), executor, SystemResolver, audit, provision.clone());
    let runner = Arc::new(JobRunner::new(
        JobQueue::new(store, provision),
        provisioner,
        certificates,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::new();
    for n in 0..config.workers.count {
        let runner = runner.clone();
        let shutdown = shutdown_rx.clone();
        let worker_id = format!("worker-{}-{n}", std::process::id());
        let poll_interval = config.workers.poll_interval();
        tasks.push(tokio::spawn(async move {
            runner.run(&worker_id, poll_interval, shutdown).await;
        }));
    }

    let stale = runner.clone();
    tasks.push(tokio::spawn(periodically(
        "stale_claims",
        config.workers.stale_sweep(),
        shutdown_rx.clone(),
        move || {
            let runner = stale.clone();
            async move { runner.sweep_stale().await }
        },
    )));
    let renewals = runner.clone();
    tasks.push(tokio::spawn(periodically(
        "certificate_renewal",
        config.workers.renewal_sweep(),
        shutdown_rx,
        move || {
            let runner = renewals.clone();
            async move { runner.sweep_renewals().await }
        },
    )));

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested, finishing in-flight jobs");
    shutdown_tx.send(true)?;
    for task in tasks {
        task.await?;
    }

    info!("Podfleet stopped");
    Ok(())
}
