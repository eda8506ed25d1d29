//! Meeting-minutes pipeline: `transcribe → summarize`.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{error, info};

use super::graph::{CompiledGraph, Node, NodeContext, StateGraph};
use super::prompts::{MEETING_SUMMARY_SYSTEM_PROMPT, build_summary_prompt, sanitize_transcript};
use crate::ai::LlmClient;
use crate::core::models::{ChatMessage, MinuteWriterOutput};
use crate::errors::AgentError;

pub const TRANSCRIBE_NODE: &str = "transcribe";
pub const SUMMARIZE_NODE: &str = "summarize";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MinuteWriterState {
    pub audio_path: PathBuf,
    pub transcript: Option<String>,
    pub summary: Option<String>,
}

impl MinuteWriterState {
    #[must_use]
    pub fn new(audio_path: impl Into<PathBuf>) -> Self {
        Self {
            audio_path: audio_path.into(),
            ..Self::default()
        }
    }
}

/// Fills `transcript` from the audio file.
pub struct Transcriber {
    llm: LlmClient,
}

#[async_trait]
impl Node<MinuteWriterState> for Transcriber {
    async fn run(
        &self,
        mut state: MinuteWriterState,
        _ctx: &NodeContext,
    ) -> Result<MinuteWriterState, AgentError> {
        info!(audio = %state.audio_path.display(), "Transcribing meeting audio");

        let transcript = self
            .llm
            .transcribe(&state.audio_path)
            .await
            .map_err(|e| match e {
                AgentError::Io(io) if io.kind() == std::io::ErrorKind::NotFound => {
                    AgentError::Io(io)
                }
                other => AgentError::transcription_failed(other),
            })?;

        info!("Transcription finished ({} chars)", transcript.len());
        state.transcript = Some(transcript);
        Ok(state)
    }
}

/// Turns `transcript` into markdown minutes.
pub struct Summarizer {
    llm: LlmClient,
}

#[async_trait]
impl Node<MinuteWriterState> for Summarizer {
    async fn run(
        &self,
        mut state: MinuteWriterState,
        _ctx: &NodeContext,
    ) -> Result<MinuteWriterState, AgentError> {
        let transcript = state
            .transcript
            .as_deref()
            .map(sanitize_transcript)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AgentError::invalid_summary_input("Missing or empty transcript in state"))?;

        let messages = [
            ChatMessage::system(MEETING_SUMMARY_SYSTEM_PROMPT),
            ChatMessage::user(build_summary_prompt(&transcript)),
        ];
        let summary = self
            .llm
            .chat_completion(&messages)
            .await
            .map_err(AgentError::summarization_failed)?;

        MinuteWriterOutput {
            audio_path: state.audio_path.display().to_string(),
            transcript: transcript.clone(),
            summary: summary.clone(),
        }
        .validate()
        .map_err(|e| match e {
            AgentError::Validation(msg) => AgentError::summarization_failed(AgentError::OpenAIError(
                format!("Invalid summary output: {msg}"),
            )),
            other => other,
        })?;

        state.transcript = Some(transcript);
        state.summary = Some(summary);
        Ok(state)
    }
}

/// Builds the two-step minutes graph.
///
/// # Errors
///
/// Only fails if the graph wiring is invalid.
pub fn create_minute_writer_graph(
    llm: &LlmClient,
) -> Result<CompiledGraph<MinuteWriterState>, AgentError> {
    let mut builder = StateGraph::new();
    builder
        .add_node(TRANSCRIBE_NODE, Transcriber { llm: llm.clone() })
        .add_node(SUMMARIZE_NODE, Summarizer { llm: llm.clone() })
        .add_edge(TRANSCRIBE_NODE, SUMMARIZE_NODE)
        .set_entry_point(TRANSCRIBE_NODE)
        .set_finish_point(SUMMARIZE_NODE);
    builder.compile()
}

#[derive(Clone)]
pub struct MinuteWriter {
    graph: CompiledGraph<MinuteWriterState>,
}

impl MinuteWriter {
    pub fn new(llm: &LlmClient) -> Result<Self, AgentError> {
        Ok(Self {
            graph: create_minute_writer_graph(llm)?,
        })
    }

    #[must_use]
    pub fn graph(&self) -> &CompiledGraph<MinuteWriterState> {
        &self.graph
    }

    /// Runs the pipeline on one recording and returns the summary.
    ///
    /// # Errors
    ///
    /// `Io(NotFound)` for a missing file, `Transcription` or `Summarization`
    /// for failures in the respective step. Those two are client errors only
    /// when the step rejected its input; upstream failures keep their source.
    pub async fn process(&self, audio_path: &Path) -> Result<String, AgentError> {
        let state = self
            .graph
            .invoke(MinuteWriterState::new(audio_path))
            .await
            .inspect_err(|e| error!("Minute writer failed: {}", e))?;

        state.summary.ok_or_else(|| {
            AgentError::summarization_failed(AgentError::Graph(
                "Pipeline finished without a summary".to_string(),
            ))
        })
    }
}

/// One-shot helper: builds the graph and processes a single recording.
pub async fn process_meeting_recording(
    llm: &LlmClient,
    audio_path: &Path,
) -> Result<String, AgentError> {
    MinuteWriter::new(llm)?.process(audio_path).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::AppConfig;
    use serde_json::json;
    use std::io::Write;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn llm_for(server: &MockServer) -> LlmClient {
        let config = AppConfig::from_lookup(|key| match key {
            "OPENAI_BASE_URL" => Some(server.uri()),
            "OPENAI_API_KEY" => Some("sk-test".to_string()),
            _ => None,
        })
        .unwrap();
        LlmClient::new(&config).unwrap().with_max_retries(0)
    }

    fn audio_fixture() -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".mp3").tempfile().unwrap();
        file.write_all(b"ID3 fake audio").unwrap();
        file
    }

    fn completion(content: &str) -> serde_json::Value {
        json!({"choices": [{"index": 0, "message": {"role": "assistant", "content": content}, "finish_reason": "stop"}]})
    }

    #[tokio::test]
    async fn test_graph_shape() {
        let server = MockServer::start().await;
        let graph = create_minute_writer_graph(&llm_for(&server)).unwrap();

        assert_eq!(graph.node_names(), [TRANSCRIBE_NODE, SUMMARIZE_NODE]);
        assert_eq!(graph.entry_point(), TRANSCRIBE_NODE);
        assert_eq!(graph.finish_point(), SUMMARIZE_NODE);
    }

    #[tokio::test]
    async fn test_process_meeting_recording() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio/transcriptions"))
            .respond_with(ResponseTemplate::new(200).set_body_string("Alice: ship it Friday.\n"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_string_contains("concise meeting summaries"))
            .and(body_string_contains("Alice: ship it Friday."))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("## Meeting Overview\nShip Friday")))
            .expect(1)
            .mount(&server)
            .await;

        let audio = audio_fixture();
        let summary = process_meeting_recording(&llm_for(&server), audio.path())
            .await
            .unwrap();

        assert_eq!(summary, "## Meeting Overview\nShip Friday");
    }

    #[tokio::test]
    async fn test_missing_file_keeps_not_found_kind() {
        let server = MockServer::start().await;
        let err = process_meeting_recording(&llm_for(&server), Path::new("/no/such/meeting.mp3"))
            .await
            .unwrap_err();

        assert!(matches!(&err, AgentError::Io(e) if e.kind() == std::io::ErrorKind::NotFound));
        assert!(err.is_client_error());
    }

    #[tokio::test]
    async fn test_transcription_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio/transcriptions"))
            .respond_with(ResponseTemplate::new(500).set_body_string("whisper down"))
            .mount(&server)
            .await;

        let audio = audio_fixture();
        let err = process_meeting_recording(&llm_for(&server), audio.path())
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::Transcription { .. }));
        assert!(err.to_string().starts_with("Failed to transcribe audio: "));
        assert!(err.to_string().contains("whisper down"));
        assert!(!err.is_client_error());
    }

    #[tokio::test]
    async fn test_transcription_auth_failure_is_not_a_client_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio/transcriptions"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
            .mount(&server)
            .await;

        let audio = audio_fixture();
        let err = process_meeting_recording(&llm_for(&server), audio.path())
            .await
            .unwrap_err();

        let AgentError::Transcription {
            source: Some(source),
            ..
        } = &err
        else {
            panic!("expected a wrapped transcription error, got {err:?}");
        };
        assert!(matches!(**source, AgentError::Upstream { status: 401, .. }));
        assert!(std::error::Error::source(&err).is_some());
        assert!(!err.is_client_error());
    }

    #[tokio::test]
    async fn test_blank_transcript_is_rejected_before_summarizing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio/transcriptions"))
            .respond_with(ResponseTemplate::new(200).set_body_string("   \n"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("unused")))
            .expect(0)
            .mount(&server)
            .await;

        let audio = audio_fixture();
        let err = process_meeting_recording(&llm_for(&server), audio.path())
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "Failed to summarize transcript: Missing or empty transcript in state"
        );
        assert!(err.is_client_error());
    }

    #[tokio::test]
    async fn test_summarizer_requires_transcript() {
        let server = MockServer::start().await;
        let summarizer = Summarizer {
            llm: llm_for(&server),
        };
        let graph = {
            let mut builder = StateGraph::new();
            builder
                .add_node(SUMMARIZE_NODE, summarizer)
                .set_entry_point(SUMMARIZE_NODE)
                .set_finish_point(SUMMARIZE_NODE);
            builder.compile().unwrap()
        };

        let err = graph
            .invoke(MinuteWriterState::new("meeting.wav"))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Summarization { source: None, .. }));
    }

    #[tokio::test]
    async fn test_blank_summary_is_a_summarization_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio/transcriptions"))
            .respond_with(ResponseTemplate::new(200).set_body_string("we talked"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("  ")))
            .mount(&server)
            .await;

        let audio = audio_fixture();
        let err = process_meeting_recording(&llm_for(&server), audio.path())
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::Summarization { .. }));
        assert!(err.to_string().contains("No text in response"));
        assert!(!err.is_client_error());
    }
}
