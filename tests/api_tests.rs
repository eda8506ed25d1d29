use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use graph_agent::ai::{LlmClient, SseParser};
use graph_agent::api::{AppState, build_router};
use graph_agent::core::config::AppConfig;
use serde_json::{Value, json};
use std::time::Duration;
use tower::ServiceExt;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const BOUNDARY: &str = "graph-agent-test-boundary";

fn app(server: &MockServer) -> Router {
    let config = AppConfig::from_lookup(|key| match key {
        "OPENAI_BASE_URL" => Some(server.uri()),
        "OPENAI_API_KEY" => Some("sk-test".to_string()),
        _ => None,
    })
    .unwrap();
    let llm = LlmClient::new(&config).unwrap().with_max_retries(0);
    build_router(AppState::from_llm(llm, Duration::from_secs(30)).unwrap())
}

fn sse_completion(parts: &[&str]) -> String {
    let mut body = String::new();
    for part in parts {
        let chunk = json!({"choices": [{"index": 0, "delta": {"content": part}, "finish_reason": null}]});
        body.push_str(&format!("data: {chunk}\n\n"));
    }
    body.push_str("data: {\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n");
    body.push_str("data: [DONE]\n\n");
    body
}

fn multipart(field: &str, file_name: &str, bytes: &[u8]) -> Request<Body> {
    let mut body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\n\
         Content-Type: application/octet-stream\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::post("/minute-writer/process")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn chat_request(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn sse_data(response: axum::response::Response) -> Vec<String> {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let mut parser = SseParser::new();
    parser
        .feed_frames(std::str::from_utf8(&bytes).unwrap())
        .into_iter()
        .map(|frame| frame.data)
        .collect()
}

#[tokio::test]
async fn test_root_welcome() {
    let server = MockServer::start().await;
    let response = app(&server)
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await,
        json!({"message": "Welcome to the graph-agent API!"})
    );
}

#[tokio::test]
async fn test_health() {
    let server = MockServer::start().await;
    let response = app(&server)
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(json_body(response).await, json!({"status": "ok"}));
}

#[tokio::test]
async fn test_route_catalog() {
    let server = MockServer::start().await;
    let response = app(&server)
        .oneshot(Request::get("/routes").body(Body::empty()).unwrap())
        .await
        .unwrap();

    let routes = json_body(response).await;
    let endpoints: Vec<&str> = routes
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["endpoint"].as_str().unwrap())
        .collect();
    assert_eq!(endpoints, ["/", "/health", "/chat", "/minute-writer/process"]);
    assert_eq!(routes[3]["input_type"], "file");
}

#[tokio::test]
async fn test_chat_streams_tokens() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_string_contains("\"stream\":true"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(sse_completion(&["Hel", "lo\nworld"]), "text/event-stream"),
        )
        .mount(&server)
        .await;

    let response = app(&server)
        .oneshot(chat_request("/chat?thread_id=abc", json!({"message": "Hi"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
    assert!(content_type.starts_with("text/event-stream"));
    assert_eq!(sse_data(response).await, vec!["Hel", "lo\nworld"]);
}

#[tokio::test]
async fn test_chat_error_is_last_event() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(400).set_body_string("model not found"))
        .mount(&server)
        .await;

    let response = app(&server)
        .oneshot(chat_request("/chat", json!({"message": "Hi"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let data = sse_data(response).await;
    assert_eq!(data.len(), 1);
    assert!(data[0].contains("model not found"));
}

#[tokio::test]
async fn test_chat_rejects_bad_bodies() {
    let server = MockServer::start().await;

    let missing = app(&server)
        .oneshot(chat_request("/chat", json!({"text": "Hi"})))
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let blank = app(&server)
        .oneshot(chat_request("/chat", json!({"message": "  "})))
        .await
        .unwrap();
    assert_eq!(blank.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        json_body(blank).await,
        json!({"detail": "Invalid request: message must not be empty"})
    );
}

#[tokio::test]
async fn test_minute_writer_rejects_unsupported_format() {
    let server = MockServer::start().await;
    let response = app(&server)
        .oneshot(multipart("audio_file", "notes.txt", b"hello"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        json_body(response).await,
        json!({"detail": "Unsupported file format. Please upload MP3, WAV, or M4A files."})
    );
}

#[tokio::test]
async fn test_minute_writer_requires_audio_field() {
    let server = MockServer::start().await;
    let response = app(&server)
        .oneshot(multipart("recording", "standup.mp3", b"ID3"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let detail = json_body(response).await["detail"].as_str().unwrap().to_string();
    assert!(detail.contains("audio_file"));
}

#[tokio::test]
async fn test_minute_writer_generates_minutes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/audio/transcriptions"))
        .and(body_string_contains(".M4A\""))
        .and(body_string_contains("gpt-4o-mini-transcribe"))
        .respond_with(ResponseTemplate::new(200).set_body_string("Bob: budget approved."))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_string_contains("Bob: budget approved."))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "## Meeting Overview\nBudget approved."}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let response = app(&server)
        .oneshot(multipart("audio_file", "Budget.M4A", b"ID3 fake audio"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await,
        json!({
            "success": true,
            "message": "Meeting minutes generated successfully",
            "data": {"summary": "## Meeting Overview\nBudget approved."}
        })
    );
}

async fn minute_writer_with_transcription_status(status: u16, body: &str) -> (StatusCode, String) {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/audio/transcriptions"))
        .respond_with(ResponseTemplate::new(status).set_body_string(body))
        .mount(&server)
        .await;

    let response = app(&server)
        .oneshot(multipart("audio_file", "standup.wav", b"RIFF"))
        .await
        .unwrap();

    let status = response.status();
    let detail = json_body(response).await["detail"].as_str().unwrap().to_string();
    (status, detail)
}

#[tokio::test]
async fn test_minute_writer_upstream_rejection_is_server_error() {
    let (status, detail) = minute_writer_with_transcription_status(415, "unsupported audio").await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(
        detail.starts_with("An error occurred: Failed to transcribe audio: "),
        "{detail}"
    );
    assert!(detail.contains("unsupported audio"));
}

#[tokio::test]
async fn test_minute_writer_bad_api_key_is_server_error() {
    let (status, detail) = minute_writer_with_transcription_status(401, "invalid api key").await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        detail,
        "An error occurred: Failed to transcribe audio: OpenAI API returned status 401: invalid api key"
    );
}

#[tokio::test]
async fn test_minute_writer_upstream_outage_is_server_error() {
    let (status, detail) = minute_writer_with_transcription_status(503, "overloaded").await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(detail.contains("status 503: overloaded"), "{detail}");
}

#[tokio::test]
async fn test_minute_writer_blank_transcript_is_client_error() {
    let (status, detail) = minute_writer_with_transcription_status(200, "  \n").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        detail,
        "Failed to summarize transcript: Missing or empty transcript in state"
    );
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let server = MockServer::start().await;
    let response = app(&server)
        .oneshot(Request::get("/nope").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
