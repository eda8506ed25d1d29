//! Terminal client for exercising a running API
//!
//! Discovers the server's routes from `GET /routes`, chats with the streaming
//! `/chat` endpoint and uploads files to file routes.

pub mod client;
pub mod repl;

pub use client::{
    ApiReply, DEFAULT_API_BASE_URL, PlaygroundClient, content_type_for, render_response,
};
pub use repl::{Command, Session, WELCOME_MESSAGE, parse_command, run_repl};
