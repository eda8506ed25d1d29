use std::io::Write;
use std::path::PathBuf;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use super::client::{EMPTY_REPLY_WARNING, PlaygroundClient, render_response};
use crate::core::models::{InputType, RouteConfig};
use crate::errors::AgentError;

pub const WELCOME_MESSAGE: &str = "Hello! I'm your AI assistant. How can I help you today?";

pub const HELP_TEXT: &str = "\
Commands:
  /routes            list the API routes
  /use <endpoint>    select a route (GET routes are called right away)
  /upload <path>     send a file to the selected file route
  /thread <id>       switch conversation thread
  /help              show this help
  /quit              exit
Anything else is sent to the chat endpoint.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Routes,
    Use(String),
    Upload(PathBuf),
    Thread(String),
    Help,
    Quit,
    Chat(String),
    Empty,
    Invalid(String),
}

pub fn parse_command(line: &str) -> Command {
    let line = line.trim();
    if line.is_empty() {
        return Command::Empty;
    }
    if !line.starts_with('/') {
        return Command::Chat(line.to_string());
    }

    let (name, arg) = match line.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (line, ""),
    };

    match (name, arg) {
        ("/routes", "") => Command::Routes,
        ("/help", "") => Command::Help,
        ("/quit" | "/exit", "") => Command::Quit,
        ("/use", endpoint) if !endpoint.is_empty() => Command::Use(endpoint.to_string()),
        ("/upload", path) if !path.is_empty() => Command::Upload(PathBuf::from(path)),
        ("/thread", id) if !id.is_empty() => Command::Thread(id.to_string()),
        _ => Command::Invalid(line.to_string()),
    }
}

fn describe_route(route: &RouteConfig) -> String {
    let input = match route.input_type {
        InputType::None => "none",
        InputType::Text => "text",
        InputType::File => "file",
    };
    format!(
        "  {:<6} {:<26} [{input}] {}",
        route.method, route.endpoint, route.description
    )
}

/// Interactive session state.
pub struct Session {
    client: PlaygroundClient,
    routes: Vec<RouteConfig>,
    active: Option<RouteConfig>,
    thread_id: String,
}

impl Session {
    #[must_use]
    pub fn new(client: PlaygroundClient, routes: Vec<RouteConfig>) -> Self {
        Self {
            client,
            routes,
            active: None,
            thread_id: "1".to_string(),
        }
    }

    #[must_use]
    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    #[must_use]
    pub fn active_route(&self) -> Option<&RouteConfig> {
        self.active.as_ref()
    }

    /// Runs one command. Returns `false` when the session should end.
    pub async fn handle<W: Write>(&mut self, command: Command, out: &mut W) -> Result<bool, AgentError> {
        match command {
            Command::Empty => {}
            Command::Quit => return Ok(false),
            Command::Help => writeln!(out, "{HELP_TEXT}")?,
            Command::Invalid(line) => {
                writeln!(out, "Unknown command: {line}. Type /help for commands.")?;
            }
            Command::Thread(id) => {
                writeln!(out, "Switched to thread {id}")?;
                self.thread_id = id;
            }
            Command::Routes => {
                if self.routes.is_empty() {
                    writeln!(out, "No API routes were found.")?;
                }
                for route in &self.routes {
                    writeln!(out, "{}", describe_route(route))?;
                }
            }
            Command::Use(endpoint) => self.select(&endpoint, out).await?,
            Command::Upload(path) => self.upload(path, out).await?,
            Command::Chat(message) => self.chat(&message, out).await?,
        }
        Ok(true)
    }

    async fn select<W: Write>(&mut self, endpoint: &str, out: &mut W) -> Result<(), AgentError> {
        let Some(route) = self.routes.iter().find(|r| r.endpoint == endpoint).cloned() else {
            writeln!(out, "Unknown endpoint: {endpoint}. Use /routes to list them.")?;
            return Ok(());
        };

        writeln!(out, "Method: {}", route.method)?;
        writeln!(out, "Description: {}", route.description)?;

        match route.input_type {
            InputType::None => match self.client.request(&route, None).await {
                Ok(reply) => writeln!(out, "{}", render_response(&reply))?,
                Err(e) => writeln!(out, "Error making request: {e}")?,
            },
            InputType::Text => writeln!(out, "Type a message to chat.")?,
            InputType::File => {
                let accepted = if route.accepted_files.is_empty() {
                    "any".to_string()
                } else {
                    route.accepted_files.join(", ")
                };
                writeln!(out, "Use /upload <path> to send a file (accepted: {accepted}).")?;
            }
        }

        self.active = Some(route);
        Ok(())
    }

    async fn upload<W: Write>(&mut self, path: PathBuf, out: &mut W) -> Result<(), AgentError> {
        let Some(route) = self
            .active
            .as_ref()
            .filter(|r| r.input_type == InputType::File)
        else {
            writeln!(out, "Select a file endpoint first with /use <endpoint>.")?;
            return Ok(());
        };

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        if !route.accepted_files.is_empty()
            && !route
                .accepted_files
                .iter()
                .any(|a| a == "*" || a.eq_ignore_ascii_case(extension))
        {
            writeln!(
                out,
                "File type not accepted; expected one of: {}",
                route.accepted_files.join(", ")
            )?;
            return Ok(());
        }

        writeln!(out, "Processing request...")?;
        match self.client.request(route, Some(&path)).await {
            Ok(reply) => writeln!(out, "{}", render_response(&reply))?,
            Err(e) => writeln!(out, "Error making request: {e}")?,
        }
        Ok(())
    }

    async fn chat<W: Write>(&mut self, message: &str, out: &mut W) -> Result<(), AgentError> {
        write!(out, "assistant> ")?;
        out.flush()?;

        let result = self
            .client
            .chat(message, &self.thread_id, |token| {
                // Display is best effort while streaming.
                let _ = write!(out, "{token}");
                let _ = out.flush();
            })
            .await;
        writeln!(out)?;

        match result {
            Ok(reply) if reply.is_empty() => writeln!(out, "{EMPTY_REPLY_WARNING}")?,
            Ok(_) => {}
            Err(e) => writeln!(out, "Error: {e}")?,
        }
        Ok(())
    }
}

/// Reads commands from `input` until `/quit` or end of input.
///
/// # Errors
///
/// Only fails when reading input or writing output fails.
pub async fn run_repl<R, W>(client: PlaygroundClient, input: R, out: &mut W) -> Result<(), AgentError>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    writeln!(out, "graph-agent playground ({})", client.base_url())?;

    let routes = client.load_routes().await;
    if routes.is_empty() {
        writeln!(
            out,
            "No API routes were found. Make sure the API server is running at {}.",
            client.base_url()
        )?;
    } else {
        writeln!(out, "Loaded {} routes. Type /help for commands.", routes.len())?;
    }
    writeln!(out, "assistant> {WELCOME_MESSAGE}")?;

    let mut session = Session::new(client, routes);
    let mut lines = input.lines();

    loop {
        write!(out, "> ")?;
        out.flush()?;

        let Some(line) = lines.next_line().await? else {
            writeln!(out)?;
            break;
        };
        if !session.handle(parse_command(&line), out).await? {
            break;
        }
    }

    Ok(())
}
