//! MedTriage Server
//!
//! Classifies medical questions into one of five focus groups over HTTP.
//! Serves keyword-rule predictions whenever the fine-tuned model is not
//! available.

use anyhow::Result;
use clap::Parser;
use medtriage_server::{create_router, AppState, ServiceConfig};
use metrics_exporter_prometheus::PrometheusHandle;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;
use tracing::{debug, info, warn};

/// Upper bound on the interval between rate limiter sweeps
const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

const DEFAULT_FILTER: &str =
    "medtriage=info,medtriage_server=info,medtriage_classifiers=info,medtriage_telemetry=info";

const VERBOSE_FILTER: &str =
    "medtriage=debug,medtriage_server=debug,medtriage_classifiers=debug,tower_http=debug";

#[derive(Parser, Debug)]
#[command(name = "medtriage-server")]
#[command(about = "Medical text classification service", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "MEDTRIAGE_CONFIG", default_value = "medtriage.yaml")]
    config: String,

    /// Listen address
    #[arg(short = 'l', long)]
    listen: Option<String>,

    /// Listen port
    #[arg(short = 'P', long)]
    port: Option<u16>,

    /// Local model checkpoint directory
    #[arg(short, long)]
    model_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.log_json);

    info!("Starting MedTriage server");

    let mut config = ServiceConfig::load(Some(&cli.config))?;
    if let Some(listen) = cli.listen {
        config.server.listen = listen;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(model_dir) = cli.model_dir {
        config.model.model_dir = Some(model_dir);
        config.model.hf_repo = None;
    }
    config.validate()?;
    info!("Configuration loaded from {}", cli.config);

    let metrics_handle = init_metrics()?;

    let addr: SocketAddr = format!("{}:{}", config.server.listen, config.server.port).parse()?;
    let state = AppState::from_config(config, metrics_handle)?;

    if !state.classifier.load().await {
        warn!("Serving keyword-rule predictions until a model is available");
    }

    let sweeper = spawn_rate_limit_sweeper(&state);
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        shutdown_signal().await;
        warn!("Shutdown signal received, stopping server...");
    })
    .await?;

    sweeper.abort();
    info!("Server shutdown complete");
    Ok(())
}

/// Periodically drop idle clients from the rate limiter
fn spawn_rate_limit_sweeper(state: &AppState) -> tokio::task::JoinHandle<()> {
    let limiter = state.limiter.clone();
    let period = limiter.window().min(MAX_SWEEP_INTERVAL);

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await;
        loop {
            interval.tick().await;
            let dropped = limiter.sweep();
            if dropped > 0 {
                debug!(dropped, remaining = limiter.tracked_clients(), "Rate limiter swept");
            }
        }
    })
}

/// Listen for shutdown signals (SIGTERM, SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Initialize tracing/logging
fn init_tracing(verbose: bool, json: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if verbose {
        EnvFilter::new(VERBOSE_FILTER)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    };

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Initialize metrics recorder and return handle for rendering
fn init_metrics() -> Result<PrometheusHandle> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install metrics: {}", e))?;

    medtriage_telemetry::metrics::describe_metrics();

    info!("Metrics recorder initialized");
    Ok(handle)
}
