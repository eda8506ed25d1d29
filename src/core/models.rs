use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::errors::AgentError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A single conversation turn. The id lets a later message replace an
/// earlier one when merged into a chat state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Body of `POST /chat`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatQuery {
    pub message: String,
}

/// Query string of `POST /chat`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatParams {
    #[serde(default = "default_thread_id")]
    pub thread_id: String,
}

impl Default for ChatParams {
    fn default() -> Self {
        Self {
            thread_id: default_thread_id(),
        }
    }
}

fn default_thread_id() -> String {
    "1".to_string()
}

/// Envelope returned by every non-streaming agent operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub success: bool,
    pub message: String,
    #[serde(default)]
    pub data: Option<Map<String, Value>>,
}

impl AgentResponse {
    #[must_use]
    pub fn ok(message: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinuteWriterOutput {
    pub audio_path: String,
    pub transcript: String,
    pub summary: String,
}

impl MinuteWriterOutput {
    pub fn validate(&self) -> Result<(), AgentError> {
        for (field, value) in [
            ("audio_path", &self.audio_path),
            ("transcript", &self.transcript),
            ("summary", &self.summary),
        ] {
            if value.trim().is_empty() {
                return Err(AgentError::Validation(format!("{field} must not be empty")));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    None,
    Text,
    File,
}

/// Description of one API route, as published on `GET /routes`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
    pub endpoint: String,
    pub method: String,
    pub input_type: InputType,
    pub description: String,
    #[serde(default)]
    pub accepted_files: Vec<String>,
    #[serde(default)]
    pub required_params: Vec<String>,
}
