//! `HuddleServer`: wiring of the registry task, the bridge and the Axum
//! router.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::{Router, middleware};
use huddle_bus::{BusError, SharedBus};
use huddle_store::Directory;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::auth::{TokenValidator, require_user};
use crate::bridge::Bridge;
use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::presence::PresenceAggregator;
use crate::registry::{Registry, RegistryHandle, spawn_registry};
use crate::router::BroadcastRouter;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::inbound::InboundHandler;
use crate::websocket::ws_handler;

/// Shared state accessible from Axum handlers and sessions.
#[derive(Clone)]
pub struct AppState {
    /// Entry point to the registry task.
    pub registry: RegistryHandle,
    /// Client frame handling.
    pub inbound: InboundHandler,
    /// Membership, profile and user lookups.
    pub directory: Arc<dyn Directory>,
    /// Connection token verification.
    pub validator: Arc<TokenValidator>,
    /// Timings and limits.
    pub config: Arc<ServerConfig>,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
    /// When the server started.
    pub start_time: Instant,
}

/// The fan-out server for one instance.
pub struct HuddleServer {
    state: AppState,
    router: BroadcastRouter,
    shutdown: Arc<ShutdownCoordinator>,
}

impl HuddleServer {
    /// Spawn the registry task and subscribe the bridge to every topic.
    ///
    /// Fails only when the bus subscriptions cannot be established.
    pub async fn start(
        config: ServerConfig,
        bus: SharedBus,
        directory: Arc<dyn Directory>,
    ) -> Result<Self, BusError> {
        let shutdown = Arc::new(ShutdownCoordinator::new());
        let (registry, registry_task) = spawn_registry(
            Arc::new(Registry::new()),
            PresenceAggregator::new(Arc::clone(&bus)),
            shutdown.token(),
        );
        shutdown.track(registry_task);

        let router = BroadcastRouter::new(registry.clone());
        let bridge = Bridge::new(Arc::clone(&bus), router.clone(), shutdown.token());
        match bridge.start().await {
            Ok(tasks) => tasks.into_iter().for_each(|t| shutdown.track(t)),
            Err(e) => {
                shutdown.shutdown();
                return Err(e);
            }
        }

        let state = AppState {
            inbound: InboundHandler::new(registry.clone(), Arc::clone(&directory), bus),
            registry,
            directory,
            validator: Arc::new(TokenValidator::new(&config.jwt_secret)),
            config: Arc::new(config),
            metrics: None,
            start_time: Instant::now(),
        };
        Ok(Self {
            state,
            router,
            shutdown,
        })
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.state.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let ws = Router::new()
            .route("/ws", get(ws_handler))
            .route_layer(middleware::from_fn_with_state(self.state.clone(), require_user));

        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .merge(ws)
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    /// Bind the configured address and serve until shutdown. Returns the
    /// bound address.
    pub async fn listen(&self) -> std::io::Result<SocketAddr> {
        let config = &self.state.config;
        let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
        let addr = listener.local_addr()?;
        info!(%addr, "huddle server listening");

        let app = self.router();
        let token = self.shutdown.token();
        self.shutdown.track(tokio::spawn(async move {
            let serve = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await });
            if let Err(e) = serve.await {
                error!(error = %e, "http server failed");
            }
        }));
        Ok(addr)
    }

    /// Cancel everything and wait for tracked tasks, bounded by the
    /// configured shutdown timeout.
    pub async fn shutdown_gracefully(&self) {
        self.shutdown
            .graceful_shutdown(Some(self.state.config.shutdown_timeout))
            .await;
    }

    /// The registry handle.
    pub fn registry(&self) -> &RegistryHandle {
        &self.state.registry
    }

    /// The local broadcast router.
    pub fn broadcast_router(&self) -> &BroadcastRouter {
        &self.router
    }

    /// The shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// The server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let registry = state.registry.registry();
    Json(health::health_check(
        state.start_time,
        registry.connection_count(),
        registry.user_count(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, header};
    use huddle_bus::MemoryBus;
    use huddle_store::MemoryDirectory;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use tower::ServiceExt;

    use super::*;
    use crate::auth::test_support::token_for;

    const SECRET: &str = "server-secret";

    async fn make_server() -> HuddleServer {
        let directory = Arc::new(MemoryDirectory::new());
        directory.add_user("A", "Alice", "");
        let config = ServerConfig {
            jwt_secret: SECRET.into(),
            ..ServerConfig::default()
        };
        HuddleServer::start(config, Arc::new(MemoryBus::default()), directory)
            .await
            .unwrap()
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn start_tracks_registry_and_bridge_tasks() {
        let server = make_server().await;
        assert_eq!(server.config().port, 0);
        assert_eq!(server.shutdown().tracked(), 3);
        assert!(!server.shutdown().is_shutting_down());
    }

    #[tokio::test]
    async fn health_endpoint_reports_counts() {
        let server = make_server().await;
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let json = body_json(resp).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["connections"], 0);
        assert_eq!(json["users"], 0);
    }

    #[tokio::test]
    async fn metrics_endpoint_needs_recorder() {
        let server = make_server().await;
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let handle = PrometheusBuilder::new().build_recorder().handle();
        let server = server.with_metrics(handle);
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn ws_without_token_is_unauthorized() {
        let server = make_server().await;
        let req = Request::builder().uri("/ws").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(resp).await["message"], "No token provided");
    }

    #[tokio::test]
    async fn ws_with_unknown_user_is_unauthorized() {
        let server = make_server().await;
        let uri = format!("/ws?token={}", token_for(SECRET, "ghost"));
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(resp).await["message"], "User not found");
    }

    #[tokio::test]
    async fn ws_with_bad_bearer_is_unauthorized() {
        let server = make_server().await;
        let req = Request::builder()
            .uri("/ws")
            .header(header::AUTHORIZATION, format!("Bearer {}", token_for("wrong", "A")))
            .body(Body::empty())
            .unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(resp).await["message"], "Invalid token");
    }

    #[tokio::test]
    async fn graceful_shutdown_drains_tasks() {
        let server = make_server().await;
        let _addr = server.listen().await.unwrap();
        server.shutdown_gracefully().await;
        assert!(server.shutdown().is_shutting_down());
        assert_eq!(server.shutdown().tracked(), 0);
    }
}
