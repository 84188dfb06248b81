//! Emerald Service - Electricity Advisor to Prometheus and Home Assistant.
//!
//! Run with: `cargo run -p emerald-service -- --address AA:BB:CC:DD:EE:FF`

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

use emerald_core::{AdvisorSession, BleTransport};
use emerald_service::{AppState, Config, EnergyMetrics, api, attach};

/// Bridge an Emerald Electricity Advisor to Prometheus and Home Assistant.
#[derive(Parser, Debug)]
#[command(name = "emerald-service")]
#[command(version, about, long_about = None)]
struct Args {
    /// Address of the paired advisor (overrides config).
    #[arg(short, long)]
    address: Option<String>,

    /// Path to configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address (overrides config).
    #[arg(short, long)]
    bind: Option<String>,

    /// HTTP port (overrides the port of the bind address).
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level (error, warn, info, debug, trace). `RUST_LOG` takes precedence.
    #[arg(long, default_value = "info")]
    log_level: LevelFilter,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(args.log_level.into())
                .from_env_lossy(),
        )
        .init();

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };
    if let Some(address) = args.address {
        config.device.address = address;
    }
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(port) = args.port {
        config.server.set_port(port);
    }
    config.validate()?;

    info!(
        bind = %config.server.bind,
        address = %config.device.address,
        "Starting up"
    );

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Interrupt received, shutting down"),
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
        shutdown.cancel();
    });

    let transport = BleTransport::with_config(
        config.device.address.clone(),
        config.bluetooth.connection_config(),
    );
    let mut session = AdvisorSession::new(transport);

    let metrics = Arc::new(EnergyMetrics::new(config.device.sample_interval()));
    attach(&mut session, Arc::clone(&metrics));

    // Outputs keep running until the session has torn down.
    let services = CancellationToken::new();
    let mut tasks = Vec::new();

    #[cfg(feature = "mqtt")]
    if config.home_assistant.enabled {
        let (publisher, handle) =
            emerald_service::mqtt::HomeAssistantPublisher::new(config.home_assistant.clone());
        attach(&mut session, Arc::new(handle));
        tasks.push(tokio::spawn(publisher.run(services.clone())));
    } else {
        info!("Home Assistant publishing is disabled");
    }
    #[cfg(not(feature = "mqtt"))]
    if config.home_assistant.enabled {
        warn!("Home Assistant publishing requested but built without the mqtt feature");
    }

    let state = AppState::new(metrics, session.stats(), session.subscribe_state());
    let app = Router::new()
        .merge(api::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr: SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid bind address '{}'", config.server.bind))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Serving metrics on http://{}/metrics", addr);

    let server_stop = services.clone();
    tasks.push(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(server_stop.cancelled_owned())
            .await
        {
            error!("HTTP server error: {}", e);
        }
    }));

    let result = session.run(cancel).await;
    if let Err(e) = &result {
        warn!("Session ended: {}", e);
    }

    services.cancel();
    for task in tasks {
        if let Err(e) = task.await {
            warn!("Service task failed: {}", e);
        }
    }
    info!("Shutdown complete");

    result.context("advisor session failed")
}
