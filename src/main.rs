//! Adaptive Storage
//!
//! Storage orchestration service: profiles the host CPU once at startup,
//! then serves pool, dataset, snapshot and file-tree operations over REST.

use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use adaptive_storage::{
    ApiServer, ApiServerConfig, ArchitectureProfiler, Backend, BackendBinaries, CommandMetrics,
    FileTreeConfig, FileTreeMetrics, OrchestratorConfig, SafeFileTree,
    StorageOrchestrator, SystemCommandRunner, SystemCpuInspector,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Adaptive Storage - architecture-aware ZFS/Btrfs/mdadm orchestration
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// REST API bind address
    #[arg(long, env = "API_ADDR", default_value = "0.0.0.0:8090")]
    api_addr: String,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Root directory of the file tree
    #[arg(long, env = "FILES_ROOT", default_value = "/data/uploads")]
    files_root: PathBuf,

    /// Directory under which labelled btrfs filesystems are mounted
    #[arg(long, env = "BTRFS_MOUNT_ROOT", default_value = "/mnt")]
    btrfs_mount_root: PathBuf,

    /// Enabled storage backends
    #[arg(long, env = "BACKENDS", value_delimiter = ',', default_value = "zfs,btrfs,mdadm")]
    backends: Vec<String>,

    /// zpool binary
    #[arg(long, env = "ZPOOL_BIN", default_value = "zpool")]
    zpool_bin: String,

    /// zfs binary
    #[arg(long, env = "ZFS_BIN", default_value = "zfs")]
    zfs_bin: String,

    /// btrfs binary
    #[arg(long, env = "BTRFS_BIN", default_value = "btrfs")]
    btrfs_bin: String,

    /// mkfs.btrfs binary
    #[arg(long, env = "MKFS_BTRFS_BIN", default_value = "mkfs.btrfs")]
    mkfs_btrfs_bin: String,

    /// mdadm binary
    #[arg(long, env = "MDADM_BIN", default_value = "mdadm")]
    mdadm_bin: String,

    /// Max upload size in bytes
    #[arg(long, env = "MAX_BODY_SIZE", default_value = "67108864")]
    max_body_size: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn orchestrator_config(&self) -> anyhow::Result<OrchestratorConfig> {
        let enabled_backends = self
            .backends
            .iter()
            .map(|b| b.parse::<Backend>())
            .collect::<adaptive_storage::Result<Vec<_>>>()
            .context("invalid --backends")?;

        Ok(OrchestratorConfig {
            enabled_backends,
            binaries: BackendBinaries {
                zpool: self.zpool_bin.clone(),
                zfs: self.zfs_bin.clone(),
                btrfs: self.btrfs_bin.clone(),
                mkfs_btrfs: self.mkfs_btrfs_bin.clone(),
                mdadm: self.mdadm_bin.clone(),
            },
            btrfs_mount_root: self.btrfs_mount_root.clone(),
        })
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args);

    info!("Starting Adaptive Storage");
    info!("  Version: {}", adaptive_storage::VERSION);
    info!("  REST API: {}", args.api_addr);
    info!("  File tree root: {}", args.files_root.display());
    info!("  Backends: {}", args.backends.join(", "));

    let orch_config = args.orchestrator_config()?;
    let registry = prometheus::default_registry();
    let command_metrics = CommandMetrics::register(registry)?;
    let file_metrics = FileTreeMetrics::register(registry)?;

    let runner = Arc::new(SystemCommandRunner::new().with_metrics(command_metrics));

    // Probe once; the profile is injected, never looked up globally
    let profiler = ArchitectureProfiler::new(Arc::new(SystemCpuInspector::new(runner.clone())));
    profiler
        .initialize()
        .await
        .context("architecture probe failed")?;
    let profile = profiler.get_profile()?.clone();

    let orchestrator = StorageOrchestrator::new(orch_config, runner, profile);
    let files = SafeFileTree::open(FileTreeConfig {
        root: args.files_root.clone(),
    })
    .await
    .with_context(|| format!("cannot open file tree at {}", args.files_root.display()))?
    .with_metrics(file_metrics)
    .with_locks(orchestrator.locks().clone());

    // Start health server
    let health_addr = args.health_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = args.metrics_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr).await {
            error!("Metrics server error: {}", e);
        }
    });

    let api_config = ApiServerConfig {
        rest_addr: args
            .api_addr
            .parse()
            .with_context(|| format!("invalid REST API address {}", args.api_addr))?,
        max_body_size: args.max_body_size,
    };
    let api_server = Arc::new(ApiServer::new(api_config, orchestrator, Arc::new(files)));

    let signal_server = api_server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            signal_server.shutdown();
        }
    });

    api_server.run().await?;

    info!("Shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "tower=warn", "tower_http=info", "axum=info"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Health & Metrics Servers
// =============================================================================

fn plain_response(
    status: hyper::StatusCode,
    content_type: &str,
    body: impl Into<hyper::Body>,
) -> hyper::Response<hyper::Body> {
    let mut response = hyper::Response::new(body.into());
    *response.status_mut() = status;
    if let Ok(value) = hyper::header::HeaderValue::from_str(content_type) {
        response
            .headers_mut()
            .insert(hyper::header::CONTENT_TYPE, value);
    }
    response
}

async fn run_health_server(addr: &str) -> anyhow::Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Server, StatusCode};

    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, std::convert::Infallible>(service_fn(|req: Request<Body>| async move {
            let response = match req.uri().path() {
                "/healthz" | "/livez" | "/readyz" => {
                    plain_response(StatusCode::OK, "text/plain", "ok")
                }
                _ => plain_response(StatusCode::NOT_FOUND, "text/plain", "not found"),
            };
            Ok::<_, std::convert::Infallible>(response)
        }))
    });

    let addr: SocketAddr = addr
        .parse()
        .with_context(|| format!("invalid health server address {}", addr))?;

    info!("Health server listening on {}", addr);
    Server::try_bind(&addr)?.serve(make_svc).await?;
    Ok(())
}

async fn run_metrics_server(addr: &str) -> anyhow::Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Server, StatusCode};
    use prometheus::{Encoder, TextEncoder};

    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, std::convert::Infallible>(service_fn(|req: Request<Body>| async move {
            let response = match req.uri().path() {
                "/metrics" => {
                    let encoder = TextEncoder::new();
                    let metric_families = prometheus::gather();
                    let mut buffer = Vec::new();
                    match encoder.encode(&metric_families, &mut buffer) {
                        Ok(()) => plain_response(StatusCode::OK, encoder.format_type(), buffer),
                        Err(e) => plain_response(
                            StatusCode::INTERNAL_SERVER_ERROR,
                            "text/plain",
                            e.to_string(),
                        ),
                    }
                }
                _ => plain_response(StatusCode::NOT_FOUND, "text/plain", "not found"),
            };
            Ok::<_, std::convert::Infallible>(response)
        }))
    });

    let addr: SocketAddr = addr
        .parse()
        .with_context(|| format!("invalid metrics server address {}", addr))?;

    info!("Metrics server listening on {}", addr);
    Server::try_bind(&addr)?.serve(make_svc).await?;
    Ok(())
}
