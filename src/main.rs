//! Mayastor Pool Operator
//!
//! Keeps MayastorPool resources in sync with the pools on Mayastor nodes.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Mayastor Pool Operator                      │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │ KubePoolStore│───▶│ PoolOperator │◀───│   Registry   │       │
//! │  │  (desired)   │◀───│              │───▶│   (actual)   │       │
//! │  └──────────────┘    └──────────────┘    └──────────────┘       │
//! │                                                 ▲               │
//! │                                          RegistrySync (REST)    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use kube::{Client, CustomResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pool_operator::adapters::{KubePoolStore, RestConfig, RestControlPlane};
use pool_operator::error::{Error, Result};
use pool_operator::{metrics, MayastorPool, PoolOperator, Registry, RegistrySync};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Mayastor Pool Operator - creates and destroys pools for MayastorPool resources
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Namespace holding the MayastorPool resources
    #[arg(long, env = "MAYASTOR_NAMESPACE", default_value = "mayastor")]
    namespace: String,

    /// Mayastor control-plane REST URL
    #[arg(
        long,
        env = "REST_URL",
        default_value = "http://rest.mayastor.svc.cluster.local:8080"
    )]
    rest_url: String,

    /// How often to poll the control plane, in seconds
    #[arg(long, env = "POLL_INTERVAL_SECONDS", default_value = "10")]
    poll_interval_seconds: u64,

    /// Timeout for control-plane requests, in seconds
    #[arg(long, env = "REQUEST_TIMEOUT_SECONDS", default_value = "30")]
    request_timeout_seconds: u64,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Print the MayastorPool CRD as YAML and exit
    #[arg(long)]
    print_crd: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_crd {
        let crd = serde_yaml::to_string(&MayastorPool::crd())
            .map_err(|e| Error::Internal(format!("Failed to render CRD: {}", e)))?;
        print!("{}", crd);
        return Ok(());
    }

    // Initialize logging
    init_logging(&args);
    metrics::init();

    info!("Starting Mayastor Pool Operator");
    info!("  Namespace: {}", args.namespace);
    info!("  Control plane: {}", args.rest_url);
    info!("  Poll interval: {} seconds", args.poll_interval_seconds);

    let shutdown = CancellationToken::new();
    let ready = Arc::new(AtomicBool::new(false));

    // Start health server
    let health_addr = args.health_addr.clone();
    let health_ready = Arc::clone(&ready);
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr, health_ready).await {
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

    // Create Kubernetes client
    let client = Client::try_default().await.map_err(|e| {
        error!("Failed to create Kubernetes client: {}", e);
        Error::Internal(format!("Kubernetes client creation failed: {}", e))
    })?;

    info!("Connected to Kubernetes cluster");

    let store = KubePoolStore::new(client, &args.namespace);
    let watch_handle = store.start(shutdown.clone()).await?;

    let rest = Arc::new(RestControlPlane::new(RestConfig {
        url: args.rest_url.clone(),
        request_timeout: Duration::from_secs(args.request_timeout_seconds),
    })?);
    let registry = Registry::new(rest.clone());

    // The operator subscribes before the first poll so that every pool found
    // on the fleet reaches it as a live event.
    let operator = PoolOperator::new(store.clone(), registry.clone());
    let operator_handle = operator.start(shutdown.clone());

    let sync = RegistrySync::new(
        registry,
        rest,
        Duration::from_secs(args.poll_interval_seconds),
    );
    let sync_handle = tokio::spawn(sync.run(shutdown.clone()));

    ready.store(true, Ordering::SeqCst);
    info!("Pool operator running");

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for the shutdown signal: {}", e);
            }
            info!("Shutdown signal received");
        }
        _ = shutdown.cancelled() => {}
    }
    shutdown.cancel();

    let (operator, sync, watch) = tokio::join!(operator_handle, sync_handle, watch_handle);
    for result in [operator, sync, watch] {
        if let Err(e) = result {
            error!("Task failed during shutdown: {}", e);
        }
    }

    info!("Operator shutdown complete");
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
    for directive in ["hyper=warn", "kube=info", "tower=warn"] {
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
// HTTP Servers
// =============================================================================

type HttpResponse = hyper::Response<http_body_util::Full<hyper::body::Bytes>>;

fn respond(status: hyper::StatusCode, body: impl Into<hyper::body::Bytes>) -> HttpResponse {
    let mut response = hyper::Response::new(http_body_util::Full::new(body.into()));
    *response.status_mut() = status;
    response
}

async fn bind(addr: &str, name: &str) -> Result<tokio::net::TcpListener> {
    let addr: std::net::SocketAddr = addr
        .parse()
        .map_err(|e| Error::Config(format!("Invalid {} server address: {}", name, e)))?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("{} server listening on {}", name, addr);
    Ok(listener)
}

async fn run_health_server(addr: &str, ready: Arc<AtomicBool>) -> Result<()> {
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, StatusCode};
    use hyper_util::rt::TokioIo;

    let listener = bind(addr, "Health").await?;

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let ready = Arc::clone(&ready);

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                let ready = ready.load(Ordering::SeqCst);
                async move {
                    let response = match req.uri().path() {
                        "/healthz" | "/livez" => respond(StatusCode::OK, "ok"),
                        "/readyz" if ready => respond(StatusCode::OK, "ok"),
                        "/readyz" => respond(StatusCode::SERVICE_UNAVAILABLE, "not ready"),
                        _ => respond(StatusCode::NOT_FOUND, "not found"),
                    };
                    Ok::<_, std::convert::Infallible>(response)
                }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("Health server connection error: {}", e);
            }
        });
    }
}

async fn run_metrics_server(addr: &str) -> Result<()> {
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, StatusCode};
    use hyper_util::rt::TokioIo;
    use prometheus::{Encoder, TextEncoder};

    async fn metrics_handler(
        req: Request<hyper::body::Incoming>,
    ) -> std::result::Result<HttpResponse, std::convert::Infallible> {
        let response = match req.uri().path() {
            "/metrics" => {
                let encoder = TextEncoder::new();
                let mut buffer = Vec::new();
                match encoder.encode(&prometheus::gather(), &mut buffer) {
                    Ok(()) => {
                        let mut response = respond(StatusCode::OK, buffer);
                        if let Ok(value) = encoder.format_type().parse() {
                            response
                                .headers_mut()
                                .insert(hyper::header::CONTENT_TYPE, value);
                        }
                        response
                    }
                    Err(e) => respond(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
                }
            }
            _ => respond(StatusCode::NOT_FOUND, "not found"),
        };
        Ok(response)
    }

    let listener = bind(addr, "Metrics").await?;

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(metrics_handler))
                .await
            {
                error!("Metrics server connection error: {}", e);
            }
        });
    }
}
