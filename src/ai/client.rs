//! LLM (`OpenAI`-compatible) API client module
//!
//! Encapsulates chat completion, streaming chat completion and audio
//! transcription against the configured base URL.

use futures::StreamExt;
use reqwest::Client;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::multipart::{Form, Part};
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::path::Path;
use std::pin::Pin;
use std::time::Duration;
use tokio_retry::RetryIf;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tracing::{debug, info, warn};
use url::Url;

use super::sse::{ParseResult, SseParser, StreamEvent};
use crate::core::config::{AppConfig, join_endpoint};
use crate::core::models::ChatMessage;
use crate::errors::AgentError;

const MAX_CONTEXT_TOKENS: usize = 128_000;
const TOKEN_BUFFER: usize = 2_000;
const DEFAULT_MAX_RETRIES: usize = 3;

pub const TRANSCRIPTION_LANGUAGE: &str = "en";

#[must_use]
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / 4 + 1
}

/// Rejects prompts that cannot fit the model context window.
pub fn check_context_budget(messages: &[ChatMessage]) -> Result<usize, AgentError> {
    let estimated = messages
        .iter()
        .map(|m| estimate_tokens(&m.content))
        .sum::<usize>();

    if estimated > MAX_CONTEXT_TOKENS.saturating_sub(TOKEN_BUFFER) {
        return Err(AgentError::Validation(format!(
            "Conversation is too long to process (about {estimated} tokens). Start a new thread or shorten the input."
        )));
    }

    Ok(estimated)
}

/// LLM API client shared by the chatbot and the minute writer.
#[derive(Debug, Clone)]
pub struct LlmClient {
    http: Client,
    base_url: Url,
    api_key: String,
    chat_model: String,
    whisper_model: String,
    max_retries: usize,
}

impl LlmClient {
    pub fn new(config: &AppConfig) -> Result<Self, AgentError> {
        let http = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| AgentError::HttpError(format!("Failed to build OpenAI HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.openai_base_url.clone(),
            api_key: config.openai_api_key.clone(),
            chat_model: config.chat_completion_model.clone(),
            whisper_model: config.whisper_model.clone(),
            max_retries: DEFAULT_MAX_RETRIES,
        })
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn chat_model(&self) -> &str {
        &self.chat_model
    }

    #[must_use]
    pub fn whisper_model(&self) -> &str {
        &self.whisper_model
    }

    fn headers(&self, accept: &'static str) -> Result<HeaderMap, AgentError> {
        let mut headers = HeaderMap::new();
        let auth_value = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|e| AgentError::HttpError(format!("Invalid Authorization header: {e}")))?;
        headers.insert(AUTHORIZATION, auth_value);
        headers.insert(ACCEPT, HeaderValue::from_static(accept));
        Ok(headers)
    }

    async fn with_retry<F, Fut, T>(&self, operation: F) -> Result<T, AgentError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, AgentError>>,
    {
        let strategy = ExponentialBackoff::from_millis(2)
            .factor(100)
            .max_delay(Duration::from_secs(5))
            .map(jitter)
            .take(self.max_retries);

        RetryIf::spawn(strategy, operation, |e: &AgentError| {
            let transient = e.is_transient();
            if transient {
                warn!("Retrying OpenAI request after transient error: {}", e);
            }
            transient
        })
        .await
    }

    fn chat_body(&self, messages: &[ChatMessage], stream: bool) -> Value {
        let messages: Vec<Value> = messages
            .iter()
            .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
            .collect();

        json!({
            "model": self.chat_model,
            "messages": messages,
            "stream": stream,
        })
    }

    /// # Errors
    ///
    /// Returns an error if the prompt exceeds the context budget, the request
    /// fails after retries, or the response carries no text.
    pub async fn chat_completion(&self, messages: &[ChatMessage]) -> Result<String, AgentError> {
        #[cfg(feature = "debug-logs")]
        info!("Using chat prompt:\n{:?}", messages);

        let estimated = check_context_budget(messages)?;
        info!(
            model = %self.chat_model,
            "Requesting chat completion with {} messages (~{} tokens)",
            messages.len(),
            estimated
        );

        let url = join_endpoint(&self.base_url, "chat/completions")?;
        let body = self.chat_body(messages, false);

        let response_json: Value = self
            .with_retry(|| async {
                let response = self
                    .http
                    .post(url.clone())
                    .headers(self.headers("application/json")?)
                    .json(&body)
                    .send()
                    .await
                    .map_err(|e| AgentError::HttpError(format!("OpenAI API request failed: {e}")))?;

                let response = ensure_success(response).await?;
                response.json::<Value>().await.map_err(|e| {
                    AgentError::OpenAIError(format!("Failed to parse OpenAI response: {e}"))
                })
            })
            .await?;

        response_json
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .filter(|text| !text.trim().is_empty())
            .map(str::to_string)
            .ok_or_else(|| AgentError::OpenAIError("No text in response".to_string()))
    }

    /// Opens a streaming chat completion.
    ///
    /// # Errors
    ///
    /// Returns an error if the prompt exceeds the context budget or the
    /// request is rejected before the stream starts.
    pub async fn chat_completion_stream(
        &self,
        messages: &[ChatMessage],
    ) -> Result<ChatStream, AgentError> {
        #[cfg(feature = "debug-logs")]
        info!("Using streaming chat prompt:\n{:?}", messages);

        let estimated = check_context_budget(messages)?;
        info!(
            model = %self.chat_model,
            "Opening chat stream with {} messages (~{} tokens)",
            messages.len(),
            estimated
        );

        let url = join_endpoint(&self.base_url, "chat/completions")?;
        let body = self.chat_body(messages, true);

        let response = self
            .with_retry(|| async {
                let response = self
                    .http
                    .post(url.clone())
                    .headers(self.headers("text/event-stream")?)
                    .json(&body)
                    .send()
                    .await
                    .map_err(|e| {
                        AgentError::HttpError(format!("OpenAI streaming request failed: {e}"))
                    })?;
                ensure_success(response).await
            })
            .await?;

        Ok(ChatStream::from_byte_stream(response.bytes_stream()))
    }

    /// Transcribes an audio file to plain text.
    ///
    /// # Errors
    ///
    /// Returns `AgentError::Io` if the file cannot be read, otherwise an
    /// HTTP/upstream error if the transcription request fails.
    pub async fn transcribe(&self, path: &Path) -> Result<String, AgentError> {
        let audio = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("audio")
            .to_string();
        let mime = mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();

        info!(
            model = %self.whisper_model,
            "Transcribing {} ({} bytes)",
            file_name,
            audio.len()
        );

        let url = join_endpoint(&self.base_url, "audio/transcriptions")?;

        let text = self
            .with_retry(|| async {
                let part = Part::bytes(audio.clone())
                    .file_name(file_name.clone())
                    .mime_str(&mime)
                    .map_err(|e| AgentError::HttpError(format!("Invalid audio MIME type: {e}")))?;
                let form = Form::new()
                    .text("model", self.whisper_model.clone())
                    .text("response_format", "text")
                    .text("language", TRANSCRIPTION_LANGUAGE)
                    .part("file", part);

                let response = self
                    .http
                    .post(url.clone())
                    .headers(self.headers("text/plain")?)
                    .multipart(form)
                    .send()
                    .await
                    .map_err(|e| {
                        AgentError::HttpError(format!("Transcription request failed: {e}"))
                    })?;

                let response = ensure_success(response).await?;
                response.text().await.map_err(|e| {
                    AgentError::HttpError(format!("Failed to read transcription response: {e}"))
                })
            })
            .await?;

        Ok(text.trim().to_string())
    }
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, AgentError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_else(|e| {
        format!("Failed to read error response body (status {status}): {e}")
    });
    Err(AgentError::Upstream {
        status: status.as_u16(),
        body,
    })
}

/// Type alias for the boxed byte stream.
type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>>;

/// An active streaming chat completion.
pub struct ChatStream {
    byte_stream: ByteStream,
    parser: SseParser,
    pending_results: VecDeque<ParseResult>,
    utf8_buffer: Vec<u8>,
    saw_completed_event: bool,
    saw_any_text: bool,
    completed: bool,
}

impl std::fmt::Debug for ChatStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatStream")
            .field("completed", &self.completed)
            .field("saw_completed_event", &self.saw_completed_event)
            .field("saw_any_text", &self.saw_any_text)
            .field("pending_results_len", &self.pending_results.len())
            .field("utf8_buffer_len", &self.utf8_buffer.len())
            .field("parser_buffer_len", &self.parser.remaining_buffer().len())
            .finish_non_exhaustive()
    }
}

impl ChatStream {
    pub(crate) fn from_byte_stream<S>(stream: S) -> Self
    where
        S: futures::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
    {
        Self {
            byte_stream: Box::pin(stream),
            parser: SseParser::new(),
            pending_results: VecDeque::new(),
            utf8_buffer: Vec::new(),
            saw_completed_event: false,
            saw_any_text: false,
            completed: false,
        }
    }

    fn drain_pending_results(&mut self) -> Result<Option<StreamEvent>, AgentError> {
        while let Some(result) = self.pending_results.pop_front() {
            match result {
                ParseResult::Event(event) => match event {
                    StreamEvent::Completed => {
                        self.saw_completed_event = true;
                        self.completed = true;
                        return Ok(Some(StreamEvent::Completed));
                    }
                    StreamEvent::Error(_) => {
                        self.completed = true;
                        return Ok(Some(event));
                    }
                    StreamEvent::TextDelta(ref delta) => {
                        if !delta.is_empty() {
                            self.saw_any_text = true;
                        }
                        return Ok(Some(event));
                    }
                },
                ParseResult::Done => return self.finish("[DONE] before a finish_reason"),
                ParseResult::Ignored => {
                    debug!("Ignoring chat stream chunk without content");
                }
            }
        }

        Ok(None)
    }

    /// Terminates the stream when the server stops without a `finish_reason`.
    ///
    /// Some OpenAI-compatible servers skip the final chunk; if text already
    /// arrived the reply is usable and counts as completed.
    fn finish(&mut self, how: &str) -> Result<Option<StreamEvent>, AgentError> {
        self.completed = true;
        if self.saw_completed_event {
            return Ok(None);
        }
        if self.saw_any_text {
            warn!("Chat stream ended with {}; treating as completed", how);
            self.saw_completed_event = true;
            return Ok(Some(StreamEvent::Completed));
        }
        warn!("Chat stream ended with {}", how);
        Err(AgentError::OpenAIError(format!(
            "Chat stream ended with {how} and no content"
        )))
    }

    /// Returns the next stream event, or `None` once the stream is complete.
    ///
    /// # Errors
    ///
    /// Returns an error on network failure, invalid UTF-8, or a stream that
    /// ends before producing any content.
    pub async fn next_event(&mut self) -> Result<Option<StreamEvent>, AgentError> {
        if self.completed {
            return Ok(None);
        }

        loop {
            if let Some(event) = self.drain_pending_results()? {
                return Ok(Some(event));
            }
            if self.completed {
                return Ok(None);
            }

            match self.byte_stream.next().await {
                Some(Ok(bytes)) => {
                    // Codepoints may be split across chunks; keep an incomplete
                    // trailing sequence until the next chunk arrives.
                    self.utf8_buffer.extend_from_slice(&bytes);

                    match std::str::from_utf8(&self.utf8_buffer) {
                        Ok(valid_str) => {
                            self.pending_results.extend(self.parser.feed(valid_str));
                            self.utf8_buffer.clear();
                        }
                        Err(e) => {
                            let valid_up_to = e.valid_up_to();
                            if e.error_len().is_some() {
                                self.completed = true;
                                return Err(AgentError::OpenAIError(
                                    "Invalid UTF-8 in chat stream".to_string(),
                                ));
                            }
                            if valid_up_to > 0 {
                                let prefix = String::from_utf8_lossy(&self.utf8_buffer[..valid_up_to])
                                    .into_owned();
                                self.pending_results.extend(self.parser.feed(&prefix));
                                self.utf8_buffer.drain(..valid_up_to);
                            }
                        }
                    }
                }
                Some(Err(e)) => {
                    self.completed = true;
                    return Err(AgentError::HttpError(format!(
                        "Error reading streaming response: {e}"
                    )));
                }
                None => return self.finish("connection close before a finish_reason"),
            }
        }
    }

    #[must_use]
    pub const fn is_completed(&self) -> bool {
        self.completed
    }

    /// Collects all remaining text deltas into a single string.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream fails or reports an error event.
    pub async fn collect_text(&mut self) -> Result<String, AgentError> {
        let mut collected = String::new();

        while let Some(event) = self.next_event().await? {
            match event {
                StreamEvent::TextDelta(delta) => collected.push_str(&delta),
                StreamEvent::Completed => break,
                StreamEvent::Error(msg) => {
                    return Err(AgentError::OpenAIError(format!("Chat stream error: {msg}")));
                }
            }
        }

        Ok(collected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::ChatMessage;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn delta(text: &str) -> String {
        format!(
            "data: {{\"choices\":[{{\"index\":0,\"delta\":{{\"content\":{}}},\"finish_reason\":null}}]}}\n\n",
            serde_json::to_string(text).unwrap()
        )
    }

    const FINISH: &str =
        "data: {\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n";

    fn stream_of(chunks: Vec<Vec<u8>>) -> ChatStream {
        let items: Vec<Result<bytes::Bytes, reqwest::Error>> = chunks
            .into_iter()
            .map(|c| Ok(bytes::Bytes::from(c)))
            .collect();
        ChatStream::from_byte_stream(futures::stream::iter(items))
    }

    fn client_for(server: &MockServer) -> LlmClient {
        let config = AppConfig::from_lookup(|key| match key {
            "OPENAI_BASE_URL" => Some(format!("{}/v1", server.uri())),
            "OPENAI_API_KEY" => Some("sk-test".to_string()),
            _ => None,
        })
        .unwrap();
        LlmClient::new(&config).unwrap().with_max_retries(0)
    }

    #[test]
    fn test_context_budget_rejects_huge_prompt() {
        let big = ChatMessage::user("a".repeat(1_600_000));

        let err = check_context_budget(&[big]).unwrap_err();

        assert!(matches!(err, AgentError::Validation(_)));
        assert!(err.to_string().contains("too long"));
    }

    #[tokio::test]
    async fn test_next_event_does_not_drop_multiple_events_in_single_chunk() {
        let sse = format!("{}{}{}", delta("Hello"), delta(" World"), FINISH);
        let mut resp = stream_of(vec![sse.into_bytes()]);

        assert_eq!(
            resp.next_event().await.unwrap(),
            Some(StreamEvent::TextDelta("Hello".to_string()))
        );
        assert!(resp.saw_any_text);
        assert_eq!(
            resp.next_event().await.unwrap(),
            Some(StreamEvent::TextDelta(" World".to_string()))
        );
        assert_eq!(resp.next_event().await.unwrap(), Some(StreamEvent::Completed));
        assert_eq!(resp.next_event().await.unwrap(), None);
        assert!(resp.is_completed());
    }

    #[tokio::test]
    async fn test_next_event_handles_utf8_split_across_byte_chunks() {
        let event = delta("Hello 世界");
        let event_bytes = event.as_bytes();

        // Split inside the UTF-8 bytes for '世' (0xE4 0xB8 0x96).
        let split_at = event_bytes
            .iter()
            .position(|b| *b == 0xE4)
            .expect("expected UTF-8 multi-byte sequence in test input");

        let mut resp = stream_of(vec![
            event_bytes[..=split_at].to_vec(),
            event_bytes[split_at + 1..].to_vec(),
        ]);

        assert_eq!(
            resp.next_event().await.unwrap(),
            Some(StreamEvent::TextDelta("Hello 世界".to_string()))
        );
    }

    #[tokio::test]
    async fn test_collect_text_happy_path() {
        let sse = format!("{}{}{}data: [DONE]\n\n", delta("Hello"), delta(" World"), FINISH);
        let mut resp = stream_of(vec![sse.into_bytes()]);

        assert_eq!(resp.collect_text().await.unwrap(), "Hello World");
    }

    #[tokio::test]
    async fn test_collect_text_errors_on_error_event() {
        let sse = "data: {\"error\":{\"message\":\"boom\"}}\n\n";
        let mut resp = stream_of(vec![sse.as_bytes().to_vec()]);

        let err = resp.collect_text().await.unwrap_err();
        assert!(err.to_string().contains("Chat stream error"));
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn test_premature_end_after_text_counts_as_completed() {
        let mut resp = stream_of(vec![delta("partial").into_bytes()]);

        assert_eq!(resp.collect_text().await.unwrap(), "partial");
    }

    #[tokio::test]
    async fn test_done_without_text_is_an_error() {
        let mut resp = stream_of(vec![b"data: [DONE]\n\n".to_vec()]);

        let err = resp.next_event().await.unwrap_err();
        assert!(err.to_string().contains("no content"));
    }

    #[tokio::test]
    async fn test_next_event_errors_on_invalid_utf8() {
        let mut resp = stream_of(vec![vec![0xFF]]);

        let err = resp.next_event().await.unwrap_err();
        assert!(err.to_string().contains("Invalid UTF-8"));
    }

    #[tokio::test]
    async fn test_next_event_errors_on_network_error() {
        // Build a reqwest::Error without doing any network I/O.
        let req_err = reqwest::Client::new().get("not a url").build().unwrap_err();
        let mut resp = ChatStream::from_byte_stream(futures::stream::iter(vec![Err(req_err)]));

        let err = resp.next_event().await.unwrap_err();
        assert!(err.to_string().contains("Error reading streaming response"));
    }

    #[tokio::test]
    async fn test_chat_completion_returns_message_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"index": 0, "message": {"role": "assistant", "content": "Hi there"}}]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let reply = client
            .chat_completion(&[ChatMessage::user("Hello")])
            .await
            .unwrap();

        assert_eq!(reply, "Hi there");
    }

    #[tokio::test]
    async fn test_chat_completion_surfaces_upstream_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .chat_completion(&[ChatMessage::user("Hello")])
            .await
            .unwrap_err();

        match err {
            AgentError::Upstream { status, body } => {
                assert_eq!(status, 401);
                assert_eq!(body, "bad key");
            }
            other => panic!("expected upstream error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_chat_completion_retries_transient_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"index": 0, "message": {"role": "assistant", "content": "recovered"}}]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server).with_max_retries(2);
        let reply = client
            .chat_completion(&[ChatMessage::user("Hello")])
            .await
            .unwrap();

        assert_eq!(reply, "recovered");
    }

    #[tokio::test]
    async fn test_chat_completion_stream_over_http() {
        let server = MockServer::start().await;
        let body = format!("{}{}{}data: [DONE]\n\n", delta("Str"), delta("eamed"), FINISH);
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("accept", "text/event-stream"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let mut stream = client_for(&server)
            .chat_completion_stream(&[ChatMessage::user("Hello")])
            .await
            .unwrap();

        assert_eq!(stream.collect_text().await.unwrap(), "Streamed");
    }

    #[tokio::test]
    async fn test_transcribe_posts_audio_and_trims_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/audio/transcriptions"))
            .respond_with(ResponseTemplate::new(200).set_body_string("  hello team \n"))
            .mount(&server)
            .await;

        let file = tempfile::Builder::new().suffix(".wav").tempfile().unwrap();
        std::fs::write(file.path(), b"RIFF....WAVE").unwrap();

        let text = client_for(&server).transcribe(file.path()).await.unwrap();
        assert_eq!(text, "hello team");
    }

    #[tokio::test]
    async fn test_transcribe_missing_file_is_not_found() {
        let server = MockServer::start().await;

        let err = client_for(&server)
            .transcribe(Path::new("/definitely/not/here.wav"))
            .await
            .unwrap_err();

        assert!(err.is_client_error());
        assert!(matches!(err, AgentError::Io(_)));
    }
}
