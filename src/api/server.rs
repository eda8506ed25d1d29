//! HTTP server implementation using axum.

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use super::handlers;
use super::routes::{CHAT_PATH, MINUTE_WRITER_PATH, route_catalog};
use crate::agent::{ChatbotAgent, ConversationStore, MinuteWriter};
use crate::ai::LlmClient;
use crate::core::config::AppConfig;
use crate::core::models::RouteConfig;
use crate::errors::AgentError;

/// Largest accepted request body; meeting recordings can be long.
pub const MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub chatbot: Arc<ChatbotAgent>,
    pub minute_writer: MinuteWriter,
    pub routes: Arc<Vec<RouteConfig>>,
    pub request_timeout: Duration,
}

impl AppState {
    pub fn new(config: &AppConfig) -> Result<Self, AgentError> {
        let llm = LlmClient::new(config)?;
        Self::from_llm(llm, config.request_timeout())
    }

    pub fn from_llm(llm: LlmClient, request_timeout: Duration) -> Result<Self, AgentError> {
        Ok(Self {
            minute_writer: MinuteWriter::new(&llm)?,
            chatbot: Arc::new(ChatbotAgent::new(llm, ConversationStore::default())?),
            routes: Arc::new(route_catalog()),
            request_timeout,
        })
    }
}

pub fn build_router(state: AppState) -> Router {
    let timeout = state.request_timeout;

    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/routes", get(handlers::list_routes))
        .route(CHAT_PATH, post(handlers::chat))
        .route(MINUTE_WRITER_PATH, post(handlers::process_meeting))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TimeoutLayer::new(timeout))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Binds `config.bind_addr` and serves until Ctrl-C.
pub async fn serve(config: &AppConfig, state: AppState) -> Result<(), AgentError> {
    let listener = TcpListener::bind(config.bind_addr).await?;
    serve_on(listener, state).await
}

/// Serves on an already bound listener until Ctrl-C.
pub async fn serve_on(listener: TcpListener, state: AppState) -> Result<(), AgentError> {
    info!("graph-agent API listening on {}", listener.local_addr()?);

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("graph-agent API stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received, draining connections"),
        Err(e) => {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
