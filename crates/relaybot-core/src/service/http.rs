use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::agent::{CompletionClient, Dispatcher};
use crate::channel::facebook::{FacebookChannel, FacebookWebhookEvent};
use crate::config::Config;
use crate::provider::OpenAiCompatProvider;
use crate::service::usage::UsageCounter;
use crate::session::{ContextStore, InMemoryContextStore};

/// Webhook bodies above this size are rejected with 413.
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Shared application state for the HTTP API.
pub struct AppState {
    pub verify_token: String,
    pub admin_password: String,
    pub dispatcher: Dispatcher,
    pub usage: Arc<dyn UsageCounter>,
}

impl AppState {
    pub fn new(
        verify_token: impl Into<String>,
        admin_password: impl Into<String>,
        dispatcher: Dispatcher,
        usage: Arc<dyn UsageCounter>,
    ) -> Self {
        Self {
            verify_token: verify_token.into(),
            admin_password: admin_password.into(),
            dispatcher,
            usage,
        }
    }

    /// Wire the production collaborators: OpenAI-compatible provider,
    /// Messenger Send API, and an in-memory context window.
    pub fn from_config(config: &Config, usage: Arc<dyn UsageCounter>) -> Self {
        let provider = Arc::new(OpenAiCompatProvider::new(
            config.provider.api_key.clone(),
            Some(config.provider.api_base.clone()),
            Duration::from_secs(config.provider.timeout_secs),
        ));
        let completion = CompletionClient::from_config(provider, &config.provider, &config.bot);
        let notifier = Arc::new(FacebookChannel::from_config(&config.messenger));
        let contexts = Arc::new(InMemoryContextStore::new(config.bot.context_limit));
        info!(
            "Keeping up to {} turns of context per user (model {})",
            contexts.capacity(),
            config.provider.model
        );

        let dispatcher = Dispatcher::new(
            contexts,
            completion,
            notifier,
            usage.clone(),
            config.bot.clone(),
        );

        Self::new(
            &config.messenger.verify_token,
            &config.admin.password,
            dispatcher,
            usage,
        )
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct VerifyParams {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StatsParams {
    pub pwd: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Create the axum Router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Messenger
        .route("/webhook", get(handle_verify).post(handle_webhook))
        // Admin
        .route("/stats", get(handle_stats))
        // Health
        .route("/health", get(handle_health))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /webhook — Messenger subscription handshake
async fn handle_verify(
    State(state): State<Arc<AppState>>,
    Query(params): Query<VerifyParams>,
) -> Response {
    if params.verify_token.as_deref() == Some(state.verify_token.as_str()) {
        info!("Webhook verified (mode {:?})", params.mode);
        return (StatusCode::OK, params.challenge.unwrap_or_default()).into_response();
    }
    (StatusCode::FORBIDDEN, "Invalid token").into_response()
}

/// POST /webhook — Messenger events
async fn handle_webhook(State(state): State<Arc<AppState>>, body: String) -> impl IntoResponse {
    let envelope = match FacebookChannel::parse_webhook_event(&body) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!("Malformed webhook body ({} bytes): {}", body.len(), e);
            FacebookWebhookEvent::default()
        }
    };

    for event in envelope.inbound_events() {
        if let Err(e) = state.dispatcher.dispatch(&event).await {
            error!("Failed to handle event from {}: {}", event.user_id, e);
        }
    }

    Json(json!({ "status": "ok" }))
}

/// GET /stats — Usage summary for the admin
async fn handle_stats(
    State(state): State<Arc<AppState>>,
    Query(params): Query<StatsParams>,
) -> Response {
    if params.pwd.as_deref() != Some(state.admin_password.as_str()) {
        return StatusCode::FORBIDDEN.into_response();
    }

    match state.usage.stats().await {
        Ok(stats) => Html(format!(
            "<h1>👤 المستخدمون: {}</h1><h2>📨 الرسائل: {}</h2>",
            stats.users, stats.messages
        ))
        .into_response(),
        Err(e) => {
            error!("Failed to read usage stats: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// GET /health — Health check
async fn handle_health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: crate::VERSION.to_string(),
    })
}

/// Start the HTTP server on the given address.
pub async fn serve(addr: &str, state: Arc<AppState>) -> crate::error::Result<()> {
    let router = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);
    axum::serve(listener, router).await?;
    Ok(())
}
