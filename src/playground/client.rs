use futures::StreamExt;
use reqwest::header::ACCEPT;
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use std::path::Path;
use tracing::{error, info, warn};
use url::Url;

use crate::ai::SseParser;
use crate::api::routes::{AUDIO_EXTENSIONS, CHAT_PATH, UPLOAD_FIELD};
use crate::core::config::join_endpoint;
use crate::core::models::{ChatQuery, RouteConfig};
use crate::errors::AgentError;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";
pub const EMPTY_REPLY_WARNING: &str = "Received empty response from AI";

const AUDIO_CONTENT_TYPE: &str = "audio/mpeg";
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Content type sent with an uploaded file.
pub fn content_type_for(file_name: &str) -> String {
    let lower = file_name.to_ascii_lowercase();
    if AUDIO_EXTENSIONS
        .iter()
        .any(|ext| lower.ends_with(&format!(".{ext}")))
    {
        return AUDIO_CONTENT_TYPE.to_string();
    }
    mime_guess::from_path(file_name)
        .first_raw()
        .unwrap_or(DEFAULT_CONTENT_TYPE)
        .to_string()
}

/// Status and raw body of an API call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiReply {
    pub status: u16,
    pub body: String,
}

/// Formats a reply for the terminal: pretty JSON when the body parses, raw text otherwise.
pub fn render_response(reply: &ApiReply) -> String {
    let body = serde_json::from_str::<Value>(&reply.body)
        .ok()
        .and_then(|json| serde_json::to_string_pretty(&json).ok())
        .unwrap_or_else(|| reply.body.clone());
    format!("Status Code: {}\n{}", reply.status, body)
}

/// Splits off the longest valid UTF-8 prefix of `pending`, keeping an
/// incomplete trailing sequence for the next chunk.
fn take_utf8(pending: &mut Vec<u8>) -> Result<String, AgentError> {
    let valid = match std::str::from_utf8(pending) {
        Ok(_) => pending.len(),
        Err(e) if e.error_len().is_none() => e.valid_up_to(),
        Err(e) => {
            return Err(AgentError::GeneralError(format!(
                "Invalid UTF-8 in chat stream: {e}"
            )));
        }
    };
    let bytes: Vec<u8> = pending.drain(..valid).collect();
    String::from_utf8(bytes)
        .map_err(|e| AgentError::GeneralError(format!("Invalid UTF-8 in chat stream: {e}")))
}

/// HTTP client for a running graph-agent API.
#[derive(Debug, Clone)]
pub struct PlaygroundClient {
    http: reqwest::Client,
    base_url: Url,
}

impl PlaygroundClient {
    pub fn new(base_url: &str) -> Result<Self, AgentError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| AgentError::Config(format!("Invalid API base URL '{base_url}': {e}")))?;
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| AgentError::HttpError(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self { http, base_url })
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, endpoint: &str) -> Result<Url, AgentError> {
        join_endpoint(&self.base_url, endpoint)
    }

    fn send_error(url: &Url, error: reqwest::Error) -> AgentError {
        if error.is_connect() {
            AgentError::HttpError(format!(
                "Connection error: Could not connect to {url}. Is the API server running?"
            ))
        } else {
            AgentError::from(error)
        }
    }

    async fn send(&self, url: Url, request: reqwest::RequestBuilder) -> Result<ApiReply, AgentError> {
        let response = request
            .send()
            .await
            .map_err(|e| Self::send_error(&url, e))?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(ApiReply { status, body })
    }

    /// Fetches the route catalog. Failures are logged and yield no routes.
    pub async fn load_routes(&self) -> Vec<RouteConfig> {
        info!("Loading routes from {}", self.base_url);
        match self.fetch_routes().await {
            Ok(routes) => {
                info!("Successfully loaded {} routes", routes.len());
                routes
            }
            Err(e) => {
                error!("Error loading routes: {}", e);
                Vec::new()
            }
        }
    }

    async fn fetch_routes(&self) -> Result<Vec<RouteConfig>, AgentError> {
        let url = self.url("/routes")?;
        let reply = self.send(url.clone(), self.http.get(url)).await?;
        if !(200..300).contains(&reply.status) {
            return Err(AgentError::GeneralError(format!(
                "Route catalog request failed with status {}",
                reply.status
            )));
        }
        Ok(serde_json::from_str(&reply.body)?)
    }

    /// Sends a chat message and forwards each streamed chunk to `on_token`.
    ///
    /// Returns the assembled reply, which is empty (with a warning logged)
    /// when the server streamed nothing.
    ///
    /// # Errors
    ///
    /// Connection failures, a non-success status, or a broken stream.
    pub async fn chat<F>(&self, prompt: &str, thread_id: &str, mut on_token: F) -> Result<String, AgentError>
    where
        F: FnMut(&str),
    {
        let mut url = self.url(CHAT_PATH)?;
        url.query_pairs_mut().append_pair("thread_id", thread_id);

        let response = self
            .http
            .post(url.clone())
            .header(ACCEPT, "text/event-stream")
            .json(&ChatQuery {
                message: prompt.to_string(),
            })
            .send()
            .await
            .map_err(|e| Self::send_error(&url, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::GeneralError(format!(
                "Failed to get response from AI. Status code: {}. {}",
                status.as_u16(),
                body
            )));
        }

        let mut parser = SseParser::new();
        let mut pending = Vec::new();
        let mut reply = String::new();
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            pending.extend_from_slice(&chunk?);
            let text = take_utf8(&mut pending)?;
            for frame in parser.feed_frames(&text) {
                on_token(&frame.data);
                reply.push_str(&frame.data);
            }
        }

        if !pending.is_empty() {
            return Err(AgentError::GeneralError(
                "Chat stream ended inside a UTF-8 sequence".to_string(),
            ));
        }
        // An unterminated last frame still counts.
        if !parser.remaining_buffer().trim().is_empty() {
            for frame in parser.feed_frames("\n\n") {
                on_token(&frame.data);
                reply.push_str(&frame.data);
            }
        }

        if reply.is_empty() {
            warn!("{}", EMPTY_REPLY_WARNING);
        }
        Ok(reply)
    }

    /// Uploads `path` as the `audio_file` field of a multipart POST.
    ///
    /// # Errors
    ///
    /// The file cannot be read or the server cannot be reached. Non-success
    /// statuses are returned in the reply, not as errors.
    pub async fn upload(&self, route: &RouteConfig, path: &Path) -> Result<ApiReply, AgentError> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload")
            .to_string();
        let content_type = content_type_for(&file_name);

        info!(file = %file_name, content_type = %content_type, "Uploading to {}", route.endpoint);

        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(&content_type)?;
        let form = Form::new().part(UPLOAD_FIELD, part);

        let url = self.url(&route.endpoint)?;
        self.send(url.clone(), self.http.post(url).multipart(form))
            .await
    }

    /// Calls `route` with its method, attaching `file` for uploads.
    ///
    /// # Errors
    ///
    /// `Validation("Unsupported method: ...")` for anything but GET or POST.
    pub async fn request(&self, route: &RouteConfig, file: Option<&Path>) -> Result<ApiReply, AgentError> {
        match route.method.to_ascii_uppercase().as_str() {
            "GET" => {
                let url = self.url(&route.endpoint)?;
                self.send(url.clone(), self.http.get(url)).await
            }
            "POST" => match file {
                Some(path) => self.upload(route, path).await,
                None => {
                    let url = self.url(&route.endpoint)?;
                    self.send(url.clone(), self.http.post(url)).await
                }
            },
            other => Err(AgentError::Validation(format!("Unsupported method: {other}"))),
        }
    }
}
