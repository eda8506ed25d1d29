//! All AI/LLM functionality

pub mod client;
pub mod sse;

// Re-export main types for convenience
pub use client::{ChatStream, LlmClient, estimate_tokens};
pub use sse::{ParseResult, SseFrame, SseParser, StreamEvent};
