//! HTTP server built on axum.
//!
//! Sets up the webhook and admin routes, request tracing and the shared state.

use anyhow::{Context, Result};
use axum::{extract::State, routing::{get, post}, Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

use crate::admin::{self, SessionStore};
use crate::bot::{ConversationEngine, LifecycleController, ProviderDesk};
use crate::config::AppConfig;
use crate::locks::ConversationLocks;
use crate::notifier::Notifier;
use crate::review::{Analyzer, ReviewRecorder};
use crate::store::OrderStore;
use crate::webhook;

/// Shared state for axum request handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn OrderStore>,
    pub notifier: Arc<dyn Notifier>,
    pub engine: Arc<ConversationEngine>,
    pub lifecycle: Arc<LifecycleController>,
    pub provider_desk: Arc<ProviderDesk>,
    pub recorder: Arc<ReviewRecorder>,
    pub sessions: Arc<SessionStore>,
}

impl AppState {
    /// Wire the workflow components around one store, notifier and analyzer
    pub fn new(
        config: AppConfig,
        store: Arc<dyn OrderStore>,
        notifier: Arc<dyn Notifier>,
        analyzer: Arc<dyn Analyzer>,
    ) -> Self {
        let locks = Arc::new(ConversationLocks::new());
        let lifecycle = Arc::new(LifecycleController::new(
            Arc::clone(&store),
            Arc::clone(&locks),
            config.locale.clone(),
        ));

        Self {
            engine: Arc::new(ConversationEngine::new(
                Arc::clone(&store),
                Arc::clone(&locks),
                config.locale.clone(),
            )),
            provider_desk: Arc::new(ProviderDesk::new(
                Arc::clone(&store),
                Arc::clone(&lifecycle),
                config.provider_chat_ids.clone(),
                config.locale.clone(),
            )),
            recorder: Arc::new(ReviewRecorder::new(Arc::clone(&store), analyzer)),
            sessions: Arc::new(SessionStore::new(Duration::from_secs(config.session_ttl_secs))),
            lifecycle,
            store,
            notifier,
            config: Arc::new(config),
        }
    }
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let store = match state.store.list_categories().await {
        Ok(_) => "ok",
        Err(e) => {
            tracing::warn!(error = %e, "Health check could not reach the store");
            "unavailable"
        }
    };
    Json(json!({ "status": "ok", "store": store, "version": env!("CARGO_PKG_VERSION") }))
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/telegram/user_webhook", post(webhook::customer_webhook))
        .route("/telegram/master_webhook", post(webhook::provider_webhook))
        .merge(admin::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until the process is stopped
pub async fn serve(state: AppState) -> Result<()> {
    let addr = state.config.bind_address.clone();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind HTTP server to {addr}"))?;

    tracing::info!("HTTP server listening on {addr}");

    axum::serve(listener, build_router(state))
        .await
        .context("HTTP server error")?;
    Ok(())
}
