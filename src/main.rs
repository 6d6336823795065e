//! FCD CSI Controller
//!
//! Serves the CSI controller RPCs for First Class Disks over JSON/HTTP,
//! alongside health and Prometheus metrics endpoints.

use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use fcd_csi_controller::{
    ApiServer, ApiServerConfig, Config, Controller, Error, RequestContext, Result,
    SimulatedConnectionManager,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// FCD CSI Controller - provisions and attaches vSphere First Class Disks
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the YAML configuration file
    #[arg(long, env = "CSI_CONFIG")]
    config: Option<String>,

    /// REST API bind address
    #[arg(long, env = "API_ADDR", default_value = "0.0.0.0:8090")]
    api_addr: String,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Per-request deadline in seconds (overrides the config file)
    #[arg(long, env = "REQUEST_TIMEOUT_SECS")]
    request_timeout_secs: Option<u64>,

    /// Serialize CreateVolume calls that share a volume name
    #[arg(long, env = "SERIALIZE_CREATES")]
    serialize_creates: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    info!("Starting FCD CSI Controller");
    info!("  Version: {}", fcd_csi_controller::VERSION);
    info!("  REST API: {}", args.api_addr);

    let config = load_config(&args)?;
    info!(
        "  Virtual centers: {}, serialize creates: {}, request timeout: {}s",
        config.virtual_centers.len(),
        config.controller.serialize_creates,
        config.controller.request_timeout_secs
    );

    let connections = Arc::new(SimulatedConnectionManager::from_config(&config));
    let controller = Controller::new(&config, connections)?;

    controller.init(&RequestContext::background()).await?;
    info!("Controller initialized");

    // Start health server
    let health_addr = args.health_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = args.metrics_addr.clone();
    let metrics_controller = controller.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr, metrics_controller).await {
            error!("Metrics server error: {}", e);
        }
    });

    let api_config = ApiServerConfig {
        rest_addr: args.api_addr.parse().map_err(|e| {
            Error::Configuration(format!("Invalid REST API address: {}", e))
        })?,
        request_timeout_secs: config.controller.request_timeout_secs,
    };
    let api_server = ApiServer::new(api_config, controller);

    let serve = api_server.run();
    tokio::pin!(serve);
    tokio::select! {
        result = &mut serve => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            api_server.shutdown();
            serve.await?;
        }
    }

    info!("Controller shutdown complete");
    Ok(())
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => {
            info!("  Config: {}", path);
            Config::from_file(path)?
        }
        None => {
            warn!("No configuration file given; starting with an empty inventory");
            Config::default()
        }
    };

    if args.serialize_creates {
        config.controller.serialize_creates = true;
    }
    if let Some(secs) = args.request_timeout_secs {
        config.controller.request_timeout_secs = secs;
    }
    Ok(config)
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

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{},hyper=warn,tower=warn,tower_http=info,axum=info",
            level.as_str().to_lowercase()
        ))
    });

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
// Health Server
// =============================================================================

fn plain(status: hyper::StatusCode, body: impl Into<hyper::Body>) -> hyper::Response<hyper::Body> {
    let mut response = hyper::Response::new(body.into());
    *response.status_mut() = status;
    response
}

async fn run_health_server(addr: &str) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Server, StatusCode};

    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, std::convert::Infallible>(service_fn(|req: Request<Body>| async move {
            let response = match req.uri().path() {
                "/healthz" | "/livez" | "/readyz" => plain(StatusCode::OK, "ok"),
                _ => plain(StatusCode::NOT_FOUND, "not found"),
            };
            Ok::<_, std::convert::Infallible>(response)
        }))
    });

    let addr: SocketAddr = addr.parse().map_err(|e| {
        Error::Configuration(format!("Invalid health server address: {}", e))
    })?;

    info!("Health server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Health server error: {}", e)))?;

    Ok(())
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: &str, controller: Arc<Controller>) -> Result<()> {
    use hyper::header::CONTENT_TYPE;
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Server, StatusCode};

    let make_svc = make_service_fn(move |_conn| {
        let controller = controller.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let controller = controller.clone();
                async move {
                    let response = match req.uri().path() {
                        "/metrics" => match controller.metrics().encode() {
                            Ok((content_type, buffer)) => {
                                let mut response = plain(StatusCode::OK, buffer);
                                let value = content_type.parse::<hyper::header::HeaderValue>();
                                if let Ok(value) = value {
                                    response.headers_mut().insert(CONTENT_TYPE, value);
                                }
                                response
                            }
                            Err(e) => {
                                error!("Metrics encoding failed: {}", e);
                                plain(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
                            }
                        },
                        _ => plain(StatusCode::NOT_FOUND, "not found"),
                    };
                    Ok::<_, std::convert::Infallible>(response)
                }
            }))
        }
    });

    let addr: SocketAddr = addr.parse().map_err(|e| {
        Error::Configuration(format!("Invalid metrics server address: {}", e))
    })?;

    info!("Metrics server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}
