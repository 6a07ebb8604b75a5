//! tiergated — the tiergate daemon.
//!
//! Single binary that assembles:
//! - Workload registry (shared counters)
//! - Pod, ReplicaSet, and workload watchers
//! - Mutating admission gateway (TLS)
//!
//! # Usage
//!
//! ```text
//! tiergated --config /etc/tiergate/tiergate.toml --port 8443
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::core::v1::Pod;
use kube::Api;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tiergate_core::TiergateConfig;
use tiergate_placement::owner::WORKLOAD_KINDS;
use tiergate_placement::{DecisionEngine, OwnerIndex, PatchGenerator};
use tiergate_registry::WorkloadRegistry;
use tiergate_watcher::{LiveWorkloads, PodSync, ReplicaSetSync, WorkloadSync};
use tiergate_webhook::{WebhookState, build_router};

const DEFAULT_LOG_FILTER: &str = "info,tiergated=debug,tiergate=debug";

#[derive(Parser, Debug)]
#[command(name = "tiergated", about = "tiergate admission daemon")]
struct Cli {
    /// Path to tiergate.toml. Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Port to listen on.
    #[arg(long)]
    port: Option<u16>,

    /// PEM certificate served to the API server.
    #[arg(long)]
    cert_file: Option<PathBuf>,

    /// PEM private key for the certificate.
    #[arg(long)]
    key_file: Option<PathBuf>,

    /// Log output format.
    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = load_config(&cli)?;
    run(config).await
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
    }
}

/// Read the config file (if any) and apply CLI overrides.
fn load_config(cli: &Cli) -> anyhow::Result<TiergateConfig> {
    let mut config = match &cli.config {
        Some(path) => TiergateConfig::from_file(path)?,
        None => TiergateConfig::default(),
    };

    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(cert_file) = &cli.cert_file {
        config.server.cert_file = cert_file.clone();
    }
    if let Some(key_file) = &cli.key_file {
        config.server.key_file = key_file.clone();
    }

    config.validate()?;
    Ok(config)
}

async fn run(config: TiergateConfig) -> anyhow::Result<()> {
    info!("tiergate daemon starting");

    // ── Shared state ───────────────────────────────────────────

    let registry = Arc::new(WorkloadRegistry::new(config.registry.reservation_ttl()));
    let owners = Arc::new(OwnerIndex::new());
    info!(
        reservation_ttl_secs = config.registry.reservation_ttl_secs,
        "workload registry initialized"
    );

    let client = kube::Client::try_default()
        .await
        .context("failed to build Kubernetes client")?;

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Watchers ───────────────────────────────────────────────

    let live = Arc::new(LiveWorkloads::new(WORKLOAD_KINDS));
    let watchers: Vec<JoinHandle<()>> = vec![
        tokio::spawn(tiergate_watcher::run(
            Api::<Pod>::all(client.clone()),
            PodSync::new(registry.clone(), owners.clone(), config.labels.clone()),
            shutdown_rx.clone(),
        )),
        tokio::spawn(tiergate_watcher::run(
            Api::<ReplicaSet>::all(client.clone()),
            ReplicaSetSync::new(owners.clone()),
            shutdown_rx.clone(),
        )),
        tokio::spawn(tiergate_watcher::run(
            Api::<Deployment>::all(client.clone()),
            WorkloadSync::<Deployment>::new(registry.clone(), config.labels.clone(), live.clone()),
            shutdown_rx.clone(),
        )),
        tokio::spawn(tiergate_watcher::run(
            Api::<StatefulSet>::all(client),
            WorkloadSync::<StatefulSet>::new(registry.clone(), config.labels.clone(), live),
            shutdown_rx.clone(),
        )),
    ];
    info!(count = watchers.len(), "watchers started");

    // ── Admission gateway ──────────────────────────────────────

    let tls = tiergate_webhook::tls::load_server_config(&config.server.cert_file, &config.server.key_file)
        .with_context(|| format!("failed to load TLS material from {}", config.server.cert_file.display()))?;

    let state = WebhookState {
        engine: DecisionEngine::new(registry, owners),
        patches: PatchGenerator::new(config.labels.clone(), config.patch.clone()),
        labels: config.labels.clone(),
        request_timeout: std::time::Duration::from_secs(config.server.request_timeout_secs),
    };
    let router = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    let server = tokio::spawn(tiergate_webhook::tls::serve(listener, router, tls, shutdown_rx));

    shutdown_signal().await;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "admission gateway failed"),
        Err(e) => error!(error = %e, "admission gateway task panicked"),
    }
    for handle in watchers {
        let _ = handle.await;
    }

    info!("tiergate daemon stopped");
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
