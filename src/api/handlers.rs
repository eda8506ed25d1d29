use axum::Json;
use axum::extract::{Multipart, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt};
use serde_json::{Map, Value, json};
use std::convert::Infallible;
use std::time::Duration;
use tracing::info;

use super::error::ApiError;
use super::routes::{UPLOAD_FIELD, supported_audio_extension};
use super::server::AppState;
use crate::core::models::{AgentResponse, ChatParams, ChatQuery, RouteConfig};
use crate::errors::AgentError;

pub const WELCOME_MESSAGE: &str = "Welcome to the graph-agent API!";
pub const MINUTES_SUCCESS_MESSAGE: &str = "Meeting minutes generated successfully";

const SSE_KEEP_ALIVE: Duration = Duration::from_secs(15);

pub async fn root() -> Json<Value> {
    Json(json!({ "message": WELCOME_MESSAGE }))
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn list_routes(State(state): State<AppState>) -> Json<Vec<RouteConfig>> {
    Json(state.routes.as_ref().clone())
}

/// SSE field values cannot carry carriage returns.
fn sse_event(text: &str) -> Event {
    Event::default().data(text.replace("\r\n", "\n").replace('\r', "\n"))
}

/// Streams the chatbot's reply, one `data:` event per token.
pub async fn chat(
    State(state): State<AppState>,
    Query(params): Query<ChatParams>,
    Json(query): Json<ChatQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let tokens = state
        .chatbot
        .stream_chatbot(&query, &params.thread_id)
        .await?;
    let events = tokens.map(|text| Ok(sse_event(&text)));

    Ok(Sse::new(events).keep_alive(KeepAlive::new().interval(SSE_KEEP_ALIVE)))
}

/// Accepts a meeting recording and returns its minutes.
pub async fn process_meeting(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<AgentResponse>, ApiError> {
    let mut upload = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AgentError::Validation(format!("Malformed multipart body: {e}")))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let file_name = field.file_name().unwrap_or_default().to_string();
        let extension = supported_audio_extension(&file_name)
            .ok_or(AgentError::UnsupportedFormat)?
            .to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AgentError::Validation(format!("Failed to read upload: {e}")))?;

        upload = Some((file_name, extension, bytes));
        break;
    }

    let (file_name, extension, bytes) = upload.ok_or_else(|| {
        AgentError::Validation(format!("Missing '{UPLOAD_FIELD}' file upload"))
    })?;

    info!(file = %file_name, bytes = bytes.len(), "Received meeting recording");

    // Removed when dropped, on success and on every error path.
    let temp = tempfile::Builder::new()
        .prefix("meeting-")
        .suffix(&format!(".{extension}"))
        .tempfile()
        .map_err(AgentError::from)?;
    tokio::fs::write(temp.path(), &bytes)
        .await
        .map_err(AgentError::from)?;

    let summary = state.minute_writer.process(temp.path()).await?;

    let mut data = Map::new();
    data.insert("summary".to_string(), Value::String(summary));
    Ok(Json(AgentResponse::ok(MINUTES_SUCCESS_MESSAGE, data)))
}
