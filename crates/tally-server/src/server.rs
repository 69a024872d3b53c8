//! `TallyServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use tally_auth::TokenVerifier;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::api::expenses;
use crate::api::store::ExpenseStore;
use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::metrics;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::handler::stream_expenses;
use crate::websocket::hub::StreamHub;
use crate::websocket::ingress::Publisher;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Change stream hub.
    pub hub: Arc<StreamHub>,
    /// Publish handle for mutation handlers.
    pub publisher: Publisher,
    /// Expense storage.
    pub store: Arc<ExpenseStore>,
    /// Credential verifier shared by the API and the stream handshake.
    pub verifier: Arc<dyn TokenVerifier>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle, if a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The tally server.
pub struct TallyServer {
    config: ServerConfig,
    hub: Arc<StreamHub>,
    store: Arc<ExpenseStore>,
    verifier: Arc<dyn TokenVerifier>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

impl TallyServer {
    /// Create a server and start its stream hub.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn new(config: ServerConfig, verifier: Arc<dyn TokenVerifier>) -> Self {
        Self {
            config,
            hub: Arc::new(StreamHub::start(verifier.clone())),
            store: Arc::new(ExpenseStore::new()),
            verifier,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            metrics: None,
        }
    }

    /// Serve `/metrics` from this handle.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            hub: self.hub.clone(),
            publisher: self.hub.publisher(),
            store: self.store.clone(),
            verifier: self.verifier.clone(),
            shutdown: self.shutdown.clone(),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route(
                "/api/expenses",
                get(expenses::list_expenses)
                    .post(expenses::create_expense)
                    .put(expenses::update_expense),
            )
            .route(
                "/api/expenses/{id}",
                get(expenses::get_expense).delete(expenses::delete_expense),
            )
            .route("/api/stream/expenses", get(stream_expenses))
            .layer(TraceLayer::new_for_http())
            .layer(cors_layer(&self.config.allowed_origins))
            .with_state(state)
    }

    /// Bind the listener and serve in a background task.
    ///
    /// Returns the bound address (useful with port `0`) and the serve task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind((self.config.host.as_str(), self.config.port)).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let token = self.shutdown.token();

        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = result {
                error!(error = %e, "http server failed");
            }
        });
        info!(%addr, "tally server listening");
        Ok((addr, handle))
    }

    /// Stop accepting requests, close every stream, and wait for `handles`.
    ///
    /// Returns `false` if the configured grace period ran out.
    pub async fn stop(&self, handles: Vec<JoinHandle<()>>) -> bool {
        self.shutdown.shutdown();
        self.hub.shutdown().await;
        self.shutdown
            .drain(handles, self.config.shutdown_timeout())
            .await
    }

    /// The stream hub.
    pub fn hub(&self) -> &Arc<StreamHub> {
        &self.hub
    }

    /// A publish handle for the change stream.
    pub fn publisher(&self) -> Publisher {
        self.hub.publisher()
    }

    /// The expense store.
    pub fn store(&self) -> &Arc<ExpenseStore> {
        &self.store
    }

    /// The shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// The server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods(Any)
        .allow_headers(Any)
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.hub.connection_count(),
        state.shutdown.is_shutting_down(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => metrics::render(handle).into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "metrics recorder not installed",
        )
            .into_response(),
    }
}
