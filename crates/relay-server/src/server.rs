use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use tokio::sync::oneshot;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use relay_core::direction::{AuthorHeuristic, DirectionPolicy};
use relay_core::security::ApiKey;
use relay_provider::ConversationProvider;
use relay_settings::{NotificationSource, ServerSettings};
use relay_store::EventStore;

use crate::auth::API_KEY_HEADER;
use crate::forward::Forwarder;
use crate::{conversations, media, messages, notifications, webhook};

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Allowed CORS origin; `None` allows any origin.
    pub allowed_origin: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            allowed_origin: None,
        }
    }
}

impl ServerConfig {
    pub fn from_settings(settings: &ServerSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            allowed_origin: settings.allowed_origin.clone(),
        }
    }
}

/// Limits for the provider-scan notification source.
#[derive(Clone, Copy, Debug)]
pub struct ScanLimits {
    pub conversations: usize,
    pub messages_per_conversation: usize,
}

impl Default for ScanLimits {
    fn default() -> Self {
        Self {
            conversations: 100,
            messages_per_conversation: 20,
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub events: Arc<EventStore>,
    pub provider: Arc<dyn ConversationProvider>,
    pub direction: Arc<dyn DirectionPolicy>,
    pub forwarder: Option<Arc<Forwarder>>,
    pub api_secret: Option<ApiKey>,
    pub notification_source: NotificationSource,
    pub scan_limits: ScanLimits,
    pub media_settle_delay: Duration,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// State with the default direction policy, no secret, no forwarding.
    pub fn new(events: Arc<EventStore>, provider: Arc<dyn ConversationProvider>) -> Self {
        Self {
            events,
            provider,
            direction: Arc::new(AuthorHeuristic::default()),
            forwarder: None,
            api_secret: None,
            notification_source: NotificationSource::Store,
            scan_limits: ScanLimits::default(),
            media_settle_delay: Duration::from_secs(2),
            metrics: None,
        }
    }

    /// Apply the server section of the settings.
    pub fn configure(mut self, settings: &ServerSettings) -> Self {
        self.api_secret = settings.api_secret.clone().map(ApiKey::new);
        self.notification_source = settings.notification_source;
        self.scan_limits = ScanLimits {
            conversations: settings.scan_conversation_limit,
            messages_per_conversation: settings.scan_message_limit,
        };
        self.media_settle_delay = Duration::from_millis(settings.media_settle_delay_ms);
        self
    }

    pub fn with_forwarder(mut self, forwarder: Option<Arc<Forwarder>>) -> Self {
        self.forwarder = forwarder;
        self
    }

    pub fn with_metrics(mut self, handle: Option<PrometheusHandle>) -> Self {
        self.metrics = handle;
        self
    }

    pub fn with_direction(mut self, direction: Arc<dyn DirectionPolicy>) -> Self {
        self.direction = direction;
        self
    }
}

fn cors_layer(allowed_origin: Option<&str>) -> CorsLayer {
    let origin = match allowed_origin.filter(|o| *o != "*").map(HeaderValue::from_str) {
        Some(Ok(value)) => AllowOrigin::exact(value),
        Some(Err(_)) => {
            tracing::warn!(origin = ?allowed_origin, "invalid allowed origin, allowing any");
            AllowOrigin::any()
        }
        None => AllowOrigin::any(),
    };
    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            HeaderName::from_static(API_KEY_HEADER),
            CONTENT_TYPE,
            AUTHORIZATION,
            ACCEPT,
        ])
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState, allowed_origin: Option<&str>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/api/notifications/poll", get(notifications::poll))
        .route(
            "/api/webhook/sms",
            post(webhook::receive_sms).put(webhook::send_outbound),
        )
        .route("/api/conversations", get(conversations::list))
        .route("/api/conversations/create", post(conversations::create))
        .route("/api/conversations/backfill", post(conversations::backfill))
        .route("/api/messages", get(messages::list))
        .route("/api/send-message", post(messages::send))
        .route("/api/media/{message_sid}/{media_sid}", get(media::message_media))
        .route(
            "/api/conversation-media/{service_sid}/{media_sid}",
            get(media::conversation_media),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(allowed_origin))
}

/// Bind and start serving. Returns a handle used to stop the server.
pub async fn start(config: ServerConfig, state: AppState) -> Result<ServerHandle, std::io::Error> {
    let router = build_router(state, config.allowed_origin.as_deref());
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(host = %config.host, port = local_addr.port(), "relay server started");

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        let shutdown = async {
            let _ = shutdown_rx.await;
        };
        if let Err(e) = axum::serve(listener, router).with_graceful_shutdown(shutdown).await {
            tracing::error!(error = %e, "server terminated with error");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        shutdown: Some(shutdown_tx),
        server,
    })
}

/// Handle returned by `start()`; dropping it leaves the server running.
pub struct ServerHandle {
    pub port: u16,
    shutdown: Option<oneshot::Sender<()>>,
    server: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Stop accepting connections and wait for in-flight requests.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(e) = self.server.await {
            tracing::warn!(error = %e, "server task ended abnormally");
        }
    }
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "events": state.events.len(),
        "capacity": state.events.capacity(),
        "notificationSource": state.notification_source.as_str(),
    }))
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => relay_telemetry::metrics::render(handle).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics disabled").into_response(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use relay_provider::mock::MockProvider;

    pub(crate) fn test_state(provider: Arc<MockProvider>) -> AppState {
        let mut state = AppState::new(Arc::new(EventStore::default()), provider);
        state.media_settle_delay = Duration::from_millis(10);
        state
    }

    pub(crate) async fn spawn(state: AppState) -> (ServerHandle, String) {
        let config = ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            allowed_origin: None,
        };
        let handle = start(config, state).await.unwrap();
        let base = format!("http://127.0.0.1:{}", handle.port);
        (handle, base)
    }

    #[tokio::test]
    async fn server_starts_and_serves_health() {
        let (handle, base) = spawn(test_state(Arc::new(MockProvider::new()))).await;
        assert!(handle.port > 0);

        let resp = reqwest::get(format!("{base}/health")).await.unwrap();
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["capacity"], 200);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn metrics_disabled_returns_404() {
        let (handle, base) = spawn(test_state(Arc::new(MockProvider::new()))).await;
        let resp = reqwest::get(format!("{base}/metrics")).await.unwrap();
        assert_eq!(resp.status(), 404);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn metrics_render_when_enabled() {
        let handle = metrics_exporter_prometheus::PrometheusBuilder::new()
            .build_recorder()
            .handle();
        let state = test_state(Arc::new(MockProvider::new())).with_metrics(Some(handle));
        let (server, base) = spawn(state).await;
        let resp = reqwest::get(format!("{base}/metrics")).await.unwrap();
        assert_eq!(resp.status(), 200);
        server.shutdown().await;
    }

    #[tokio::test]
    async fn preflight_allows_api_key_header() {
        let (handle, base) = spawn(test_state(Arc::new(MockProvider::new()))).await;
        let resp = reqwest::Client::new()
            .request(reqwest::Method::OPTIONS, format!("{base}/api/notifications/poll"))
            .header("origin", "https://mail.example.com")
            .header("access-control-request-method", "GET")
            .header("access-control-request-headers", "x-api-key")
            .send()
            .await
            .unwrap();
        assert!(resp.status().is_success());
        assert_eq!(resp.headers()["access-control-allow-origin"], "*");
        let allowed = resp.headers()["access-control-allow-headers"].to_str().unwrap();
        assert!(allowed.contains("x-api-key"), "got {allowed}");
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn configured_origin_is_echoed() {
        let state = test_state(Arc::new(MockProvider::new()));
        let config = ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            allowed_origin: Some("https://mail.example.com".into()),
        };
        let handle = start(config, state).await.unwrap();
        let resp = reqwest::Client::new()
            .get(format!("http://127.0.0.1:{}/health", handle.port))
            .header("origin", "https://mail.example.com")
            .send()
            .await
            .unwrap();
        assert_eq!(
            resp.headers()["access-control-allow-origin"],
            "https://mail.example.com"
        );
        handle.shutdown().await;
    }

    #[test]
    fn configure_applies_settings() {
        let settings = ServerSettings {
            api_secret: Some("k".into()),
            notification_source: NotificationSource::Provider,
            media_settle_delay_ms: 5,
            ..Default::default()
        };
        let state = AppState::new(Arc::new(EventStore::default()), Arc::new(MockProvider::new()))
            .configure(&settings);
        assert!(state.api_secret.is_some());
        assert_eq!(state.notification_source, NotificationSource::Provider);
        assert_eq!(state.media_settle_delay, Duration::from_millis(5));
    }
}
