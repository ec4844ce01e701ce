//! meshgated — the meshgate daemon.
//!
//! Single binary that assembles the gateway core:
//! - Replica registry
//! - Health monitor + circuit breaker
//! - Load balancer
//! - Replica lifecycle (discovery + eviction)
//! - Saga orchestrator
//! - REST API
//!
//! # Usage
//!
//! ```text
//! meshgated run --config /etc/meshgate/meshgate.toml
//! meshgated check-config --config meshgate.toml
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use meshgate_api::ApiState;
use meshgate_balancer::{LoadBalancer, Policy};
use meshgate_core::{DiscoveryMode, GatewayConfig};
use meshgate_health::{
    CircuitBreaker, CircuitBreakerConfig, HealthMonitor, HealthProbe, HealthReporter,
    HttpTransport, Transport,
};
use meshgate_lifecycle::{
    CommandTerminator, Discovery, DnsDiscovery, LogTerminator, ReplicaLifecycleManager,
    StaticDiscovery, Terminator,
};
use meshgate_metrics::GatewayMetrics;
use meshgate_registry::ReplicaRegistry;
use meshgate_saga::SagaOrchestrator;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "info,meshgated=debug,meshgate=debug";

#[derive(Parser)]
#[command(name = "meshgated", about = "meshgate API gateway daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the gateway.
    Run {
        /// Path to meshgate.toml.
        #[arg(long, default_value = "meshgate.toml")]
        config: PathBuf,

        /// Override `gateway.listen`.
        #[arg(long)]
        listen: Option<SocketAddr>,

        /// Emit logs as JSON lines.
        #[arg(long)]
        log_json: bool,
    },
    /// Parse and validate a config file, then print it with defaults applied.
    CheckConfig {
        #[arg(long, default_value = "meshgate.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            listen,
            log_json,
        } => {
            init_tracing(log_json);
            run(&config, listen).await
        }
        Command::CheckConfig { config } => {
            init_tracing(false);
            check_config(&config)
        }
    }
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn load_config(path: &Path) -> anyhow::Result<(GatewayConfig, Policy)> {
    let config = GatewayConfig::from_file(path)
        .with_context(|| format!("loading config from {}", path.display()))?;
    let policy: Policy = config
        .default_policy()
        .parse()
        .context("gateway.default_policy")?;
    Ok((config, policy))
}

fn check_config(path: &Path) -> anyhow::Result<()> {
    let (config, _) = load_config(path)?;
    print!("{}", config.to_toml_string()?);
    Ok(())
}

fn build_discovery(config: &GatewayConfig) -> Arc<dyn Discovery> {
    match config.discovery_mode() {
        DiscoveryMode::Static => {
            let discovery = StaticDiscovery::new();
            for svc in &config.services {
                discovery.set(&svc.name, &svc.replicas);
            }
            Arc::new(discovery)
        }
        DiscoveryMode::Dns => {
            let mut discovery = DnsDiscovery::new();
            for svc in &config.services {
                // Validation guarantees a port in dns mode.
                if let Some(port) = svc.port {
                    discovery = discovery.with_service(&svc.name, port);
                }
            }
            Arc::new(discovery)
        }
    }
}

fn build_terminator(config: &GatewayConfig) -> Arc<dyn Terminator> {
    match config.terminate_command().and_then(CommandTerminator::new) {
        Some(terminator) => Arc::new(terminator),
        None => {
            info!("no terminate command configured, evictions only log");
            Arc::new(LogTerminator)
        }
    }
}

async fn run(config_path: &Path, listen: Option<SocketAddr>) -> anyhow::Result<()> {
    let (config, policy) = load_config(config_path)?;
    info!(config = %config_path.display(), services = config.services.len(), "starting meshgated");

    // ── Registry ───────────────────────────────────────────────
    let registry = ReplicaRegistry::new();
    for svc in &config.services {
        registry.register_service(&svc.name, svc.probe_path());
    }
    let metrics = GatewayMetrics::new();

    // ── Lifecycle ──────────────────────────────────────────────
    let lifecycle = Arc::new(ReplicaLifecycleManager::new(
        registry.clone(),
        build_discovery(&config),
        build_terminator(&config),
        metrics.clone(),
        config.services.iter().map(|s| s.name.clone()).collect(),
    ));
    lifecycle.discover_all().await;

    // ── Health ─────────────────────────────────────────────────
    let breaker = CircuitBreaker::new(CircuitBreakerConfig {
        failure_threshold: config.failure_threshold(),
        cooling_period: config.cooling_period(),
    });
    let mut reporter = HealthReporter::new(registry.clone(), breaker, metrics.clone())
        .with_load_alert_threshold(config.load_alert_threshold());
    if config.evict_on_trip() {
        reporter = reporter.with_trip_callback(lifecycle.trip_callback());
    } else {
        warn!("evict_on_trip disabled, tripped replicas stay registered");
    }

    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new());
    let probe = HealthProbe::new(Arc::clone(&transport), config.request_timeout());
    let balancer =
        Arc::new(LoadBalancer::new(reporter.clone(), probe.clone()).with_default_policy(policy));

    // ── Background loops ───────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let monitor = HealthMonitor::new(
        reporter.clone(),
        probe,
        config.health_interval(),
        config.sweep_interval(),
    );
    let monitor_handle = tokio::spawn(monitor.run(shutdown_rx.clone()));
    let discovery_handle = tokio::spawn(
        Arc::clone(&lifecycle).run(config.discovery_interval(), shutdown_rx),
    );

    // ── API server ─────────────────────────────────────────────
    let router = meshgate_api::build_router(ApiState {
        registry,
        reporter,
        balancer,
        orchestrator: SagaOrchestrator::new(metrics.clone()),
        metrics,
        transport,
        request_timeout: config.request_timeout(),
    });

    let addr = match listen {
        Some(addr) => addr,
        None => config
            .listen()
            .parse()
            .with_context(|| format!("invalid gateway.listen {:?}", config.listen()))?,
    };
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, %policy, "API server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for shutdown signal");
            }
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    let _ = monitor_handle.await;
    let _ = discovery_handle.await;
    info!("meshgated stopped");
    Ok(())
}
