//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router for the configured role
//! - Wire up middleware (telemetry, body limit, request ID, access log)
//! - Bind the router to a listener and serve until shutdown

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

use crate::config::{RelayConfig, ServiceRole};
use crate::fault::FaultInjector;
use crate::http::client::{ClientBuildError, UpstreamClient};
use crate::http::handlers::{health, metrics_info, ServiceInfo};
use crate::http::middleware::{telemetry_middleware, TelemetryState};
use crate::http::receiver::{process, ReceiverState, SimulatedDatabase};
use crate::http::request::{propagate_request_id_layer, set_request_id_layer};
use crate::http::sender::{send, SenderState};
use crate::observability::Telemetry;

/// Port reported when the bind address has none.
const DEFAULT_PORT: u16 = 8000;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid receiver url '{url}': {source}")]
    InvalidReceiverUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("upstream TLS setup failed: {0}")]
    Tls(#[source] rustls::Error),
}

/// HTTP server for one relay service.
pub struct RelayServer {
    router: Router,
    config: RelayConfig,
}

impl RelayServer {
    /// Build the server for `config.service.role`.
    pub fn new(config: RelayConfig, telemetry: Telemetry) -> Result<Self, ServerError> {
        let router = Self::build_router(&config, telemetry)?;
        Ok(Self { router, config })
    }

    fn build_router(config: &RelayConfig, telemetry: Telemetry) -> Result<Router, ServerError> {
        let info = ServiceInfo::from(&config.service);
        let faults = FaultInjector::new(&config.faults);

        let common = Router::new()
            .route("/health", get(health))
            .route("/metrics", get(metrics_info))
            .with_state(info.clone());

        let role_routes = match config.service.role {
            ServiceRole::Sender => {
                let upstream = UpstreamClient::new(&config.upstream, telemetry.client.clone())
                    .map_err(|e| match e {
                        ClientBuildError::Url(source) => ServerError::InvalidReceiverUrl {
                            url: config.upstream.receiver_url.clone(),
                            source,
                        },
                        ClientBuildError::Tls(source) => ServerError::Tls(source),
                    })?;
                Router::new().route("/send", post(send)).with_state(SenderState {
                    service: info.clone(),
                    faults,
                    upstream: Arc::new(upstream),
                })
            }
            ServiceRole::Receiver => Router::new().route("/process", post(process)).with_state(ReceiverState {
                service: info.clone(),
                faults,
                database: SimulatedDatabase::new(&config.faults),
            }),
        };

        let telemetry_state = TelemetryState {
            telemetry,
            service_name: info.name,
            tenant_id: info.tenant_id,
            listener_port: listener_port(&config.listener.bind_address),
        };

        // Last layer added runs first: request ids exist before telemetry
        // starts, and body-limit rejections are still measured.
        Ok(common
            .merge(role_routes)
            .layer(RequestBodyLimitLayer::new(config.listener.max_body_bytes))
            .layer(middleware::from_fn_with_state(telemetry_state, telemetry_middleware))
            .layer(propagate_request_id_layer())
            .layer(set_request_id_layer())
            .layer(TraceLayer::new_for_http()))
    }

    /// Router with all layers, for in-process use.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Serve on `listener` until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            service.name = %self.config.service.name,
            role = ?self.config.service.role,
            "HTTP server starting"
        );

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received, draining connections");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

fn listener_port(bind_address: &str) -> u16 {
    bind_address
        .parse::<SocketAddr>()
        .map(|addr| addr.port())
        .unwrap_or(DEFAULT_PORT)
}
