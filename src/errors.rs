use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to send HTTP request: {0}")]
    HttpError(String),

    #[error("Failed to access OpenAI API: {0}")]
    OpenAIError(String),

    #[error("OpenAI API returned status {status}: {body}")]
    Upstream { status: u16, body: String },

    /// A minute-writer step failed. `source` is the underlying error when
    /// there is one; without it the step rejected its input.
    #[error("Failed to transcribe audio: {message}")]
    Transcription {
        message: String,
        #[source]
        source: Option<Box<AgentError>>,
    },

    #[error("Failed to summarize transcript: {message}")]
    Summarization {
        message: String,
        #[source]
        source: Option<Box<AgentError>>,
    },

    #[error("Unsupported file format. Please upload MP3, WAV, or M4A files.")]
    UnsupportedFormat,

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Graph error: {0}")]
    Graph(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    GeneralError(String),
}

impl AgentError {
    /// Transcription failure caused by `source`.
    #[must_use]
    pub fn transcription_failed(source: AgentError) -> Self {
        Self::Transcription {
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Summarization failure caused by `source`.
    #[must_use]
    pub fn summarization_failed(source: AgentError) -> Self {
        Self::Summarization {
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// The summarizer rejected its input.
    #[must_use]
    pub fn invalid_summary_input(message: impl Into<String>) -> Self {
        Self::Summarization {
            message: message.into(),
            source: None,
        }
    }

    /// Whether the error was caused by the caller's input rather than by the
    /// service or an upstream dependency.
    ///
    /// A wrapped step failure takes the classification of its source, so an
    /// upstream 401 or 5xx during transcription is not blamed on the caller.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        match self {
            Self::UnsupportedFormat | Self::Validation(_) => true,
            Self::Transcription { source, .. } | Self::Summarization { source, .. } => {
                source.as_deref().is_none_or(Self::is_client_error)
            }
            Self::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// Transport failures, rate limiting and upstream 5xx are worth retrying.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::HttpError(_) => true,
            Self::Upstream { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(error: reqwest::Error) -> Self {
        AgentError::HttpError(error.to_string())
    }
}

impl From<anyhow::Error> for AgentError {
    fn from(error: anyhow::Error) -> Self {
        AgentError::GeneralError(error.to_string())
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(error: serde_json::Error) -> Self {
        AgentError::OpenAIError(format!("Failed to parse JSON: {error}"))
    }
}
