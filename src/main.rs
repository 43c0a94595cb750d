//! trace-relay service binary.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client ──POST /send──▶ ┌──────────────────┐ ──POST /process──▶ ┌──────────────────┐
//!                            │  sender-service  │   traceparent      │ receiver-service │
//!     Client ◀── 200/500/502 │  (gateway)       │ ◀── 200/500 ────── │  (worker)        │
//!                            └────────┬─────────┘                    └────────┬─────────┘
//!                                     │                                       │
//!                                     ▼                                       ▼
//!                     spans (exporter) · http.server/client.* metrics · structured logs
//! ```
//!
//! Both roles run from this binary: `trace-relay sender` or `trace-relay receiver`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::net::TcpListener;

use trace_relay::config::{self, ServiceRole};
use trace_relay::lifecycle::{spawn_signal_handler, Shutdown};
use trace_relay::observability::{logging, metrics, Telemetry};
use trace_relay::RelayServer;

#[derive(Parser)]
#[command(name = "trace-relay")]
#[command(about = "Sender/receiver relay with distributed tracing", long_about = None)]
struct Cli {
    /// Optional TOML configuration file; environment variables override it
    #[arg(short, long, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway that forwards /send to the receiver
    Sender,
    /// Run the worker that serves /process
    Receiver,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let role = match cli.command {
        Commands::Sender => ServiceRole::Sender,
        Commands::Receiver => ServiceRole::Receiver,
    };

    let config = config::load(role, cli.config.as_deref())?;
    logging::init_logging(config.observability.log_format);

    tracing::info!(
        service.name = %config.service.name,
        tenant.id = %config.service.tenant_id,
        version = %config.service.version,
        "trace-relay starting"
    );
    tracing::info!(
        otlp.endpoint = %config.observability.collector_endpoint(),
        k8s.node.ip = %config.observability.node_ip,
        "OTLP endpoint configured"
    );
    tracing::info!(
        bind_address = %config.listener.bind_address,
        error_rate = config.faults.error_rate,
        latency_ms = config.faults.latency_ms,
        "Configuration loaded"
    );

    if let Some(addr) = &config.observability.metrics_address {
        match addr.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(metrics_address = %addr, "Failed to parse metrics address"),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let telemetry = Telemetry::from_config(&config);
    let server = RelayServer::new(config, telemetry.clone())?;

    let shutdown = Shutdown::new();
    spawn_signal_handler(&shutdown);
    server.run(listener, shutdown.subscribe()).await?;
    telemetry.shutdown();

    tracing::info!("Shutdown complete");
    Ok(())
}
