//! Conversational agent built on a single-node graph.
//!
//! The `chatbot` node streams a completion for the thread's message history
//! and appends the assistant reply. History is kept per `thread_id` in a
//! bounded in-memory [`ConversationStore`]. A turn holds its thread's lock
//! from loading the history until the reply is saved, so concurrent turns on
//! one thread run one after the other.

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info};

use super::graph::{CompiledGraph, GraphEvent, Node, NodeContext, StateGraph};
use crate::ai::{LlmClient, StreamEvent};
use crate::core::models::{ChatMessage, ChatQuery, Role};
use crate::errors::AgentError;

pub const CHATBOT_NODE: &str = "chatbot";
pub const DEFAULT_HISTORY_LIMIT: usize = 50;
pub const DEFAULT_MAX_THREADS: usize = 1000;

/// Conversation state flowing through the chatbot graph.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatState {
    pub messages: Vec<ChatMessage>,
}

impl ChatState {
    /// Merges messages into the history: a message whose id is already
    /// present replaces the old one, anything else is appended.
    pub fn add_messages(&mut self, incoming: impl IntoIterator<Item = ChatMessage>) {
        for message in incoming {
            if let Some(existing) = self.messages.iter_mut().find(|m| m.id == message.id) {
                *existing = message;
            } else {
                self.messages.push(message);
            }
        }
    }

    #[must_use]
    pub fn last_reply(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .map(|m| m.content.as_str())
    }
}

/// History of one thread. Holding its lock serializes turns on the thread.
pub type ThreadHistory = Arc<Mutex<Vec<ChatMessage>>>;

/// In-memory per-thread message history.
///
/// Each thread keeps at most `history_limit` messages and the store keeps at
/// most `max_threads` threads, evicting the least recently used one.
#[derive(Debug, Clone)]
pub struct ConversationStore {
    threads: Arc<Mutex<LruCache<String, ThreadHistory>>>,
    history_limit: usize,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::with_max_threads(DEFAULT_HISTORY_LIMIT, DEFAULT_MAX_THREADS)
    }
}

impl ConversationStore {
    #[must_use]
    pub fn new(history_limit: usize) -> Self {
        Self::with_max_threads(history_limit, DEFAULT_MAX_THREADS)
    }

    #[must_use]
    pub fn with_max_threads(history_limit: usize, max_threads: usize) -> Self {
        let capacity = NonZeroUsize::new(max_threads).unwrap_or(NonZeroUsize::MIN);
        Self {
            threads: Arc::new(Mutex::new(LruCache::new(capacity))),
            history_limit,
        }
    }

    async fn thread(&self, thread_id: &str) -> ThreadHistory {
        let mut threads = self.threads.lock().await;
        if let Some(history) = threads.get(thread_id) {
            return history.clone();
        }

        let history = ThreadHistory::default();
        if let Some((evicted, _)) = threads.push(thread_id.to_string(), history.clone()) {
            debug!(thread_id = %evicted, "Evicted least recently used thread");
        }
        history
    }

    /// Takes the thread's lock, waiting for any turn already in progress.
    pub async fn lock(&self, thread_id: &str) -> OwnedMutexGuard<Vec<ChatMessage>> {
        self.thread(thread_id).await.lock_owned().await
    }

    pub async fn load(&self, thread_id: &str) -> Vec<ChatMessage> {
        let history = self.threads.lock().await.get(thread_id).cloned();
        match history {
            Some(history) => history.lock().await.clone(),
            None => Vec::new(),
        }
    }

    /// Stores the history, keeping only the most recent messages.
    pub async fn save(&self, thread_id: &str, messages: Vec<ChatMessage>) {
        let mut history = self.lock(thread_id).await;
        self.replace(&mut history, messages);
    }

    /// Writes `messages` into a locked thread, keeping only the most recent.
    pub fn replace(&self, history: &mut Vec<ChatMessage>, mut messages: Vec<ChatMessage>) {
        if messages.len() > self.history_limit {
            messages.drain(..messages.len() - self.history_limit);
        }
        *history = messages;
    }

    pub async fn clear(&self, thread_id: &str) -> bool {
        self.threads.lock().await.pop(thread_id).is_some()
    }

    pub async fn thread_count(&self) -> usize {
        self.threads.lock().await.len()
    }
}

struct ChatbotNode {
    llm: LlmClient,
}

#[async_trait]
impl Node<ChatState> for ChatbotNode {
    async fn run(&self, mut state: ChatState, ctx: &NodeContext) -> Result<ChatState, AgentError> {
        let mut stream = self.llm.chat_completion_stream(&state.messages).await?;
        let mut reply = String::new();

        while let Some(event) = stream.next_event().await? {
            match event {
                StreamEvent::TextDelta(delta) => {
                    reply.push_str(&delta);
                    if !ctx.emit(delta) {
                        debug!("Chat stream consumer went away; stopping early");
                        break;
                    }
                }
                StreamEvent::Completed => break,
                StreamEvent::Error(msg) => {
                    return Err(AgentError::OpenAIError(format!("Chat stream error: {msg}")));
                }
            }
        }

        state.add_messages([ChatMessage::assistant(reply)]);
        Ok(state)
    }
}

pub struct ChatbotAgent {
    llm: LlmClient,
    graph: CompiledGraph<ChatState>,
    store: ConversationStore,
}

impl ChatbotAgent {
    pub fn new(llm: LlmClient, store: ConversationStore) -> Result<Self, AgentError> {
        let mut builder = StateGraph::new();
        builder
            .add_node(
                CHATBOT_NODE,
                ChatbotNode {
                    llm: llm.clone(),
                },
            )
            .set_entry_point(CHATBOT_NODE)
            .set_finish_point(CHATBOT_NODE);

        Ok(Self {
            llm,
            graph: builder.compile()?,
            store,
        })
    }

    #[must_use]
    pub fn llm(&self) -> &LlmClient {
        &self.llm
    }

    #[must_use]
    pub fn graph(&self) -> &CompiledGraph<ChatState> {
        &self.graph
    }

    #[must_use]
    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    fn validate(query: &ChatQuery) -> Result<(), AgentError> {
        if query.message.trim().is_empty() {
            return Err(AgentError::Validation("message must not be empty".to_string()));
        }
        Ok(())
    }

    fn initial_state(query: &ChatQuery, history: &[ChatMessage]) -> ChatState {
        let mut state = ChatState::default();
        state.add_messages(history.iter().cloned());
        state.add_messages([ChatMessage::user(query.message.clone())]);
        state
    }

    /// Streams the reply to `query` as it is generated.
    ///
    /// Each item is a chunk of reply text. A failure after the stream has
    /// started is reported as a final item carrying the error text, and the
    /// thread history is left untouched.
    ///
    /// # Errors
    ///
    /// Returns `AgentError::Validation` for an empty message.
    pub async fn stream_chatbot(
        &self,
        query: &ChatQuery,
        thread_id: &str,
    ) -> Result<BoxStream<'static, String>, AgentError> {
        Self::validate(query)?;
        let mut history = self.store.lock(thread_id).await;
        let state = Self::initial_state(query, &history);
        let store = self.store.clone();
        let thread_id = thread_id.to_string();

        info!(thread_id = %thread_id, "Streaming chatbot reply");

        // The stream owns the thread lock until it ends or is dropped.
        let stream = self.graph.stream(state).filter_map(move |event| {
            let item = match event {
                GraphEvent::Token { text, .. } => Some(text),
                GraphEvent::NodeFinished { .. } => None,
                GraphEvent::Done(state) => {
                    debug!(thread_id = %thread_id, messages = state.messages.len(), "Saving thread history");
                    store.replace(&mut history, state.messages);
                    None
                }
                GraphEvent::Failed(e) => {
                    error!(thread_id = %thread_id, "Chatbot stream failed: {}", e);
                    Some(e.to_string())
                }
            };
            futures::future::ready(item)
        });

        Ok(stream.boxed())
    }

    /// Produces the full reply without streaming.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty message or a failed completion.
    pub async fn invoke(&self, query: &ChatQuery, thread_id: &str) -> Result<String, AgentError> {
        Self::validate(query)?;
        let mut history = self.store.lock(thread_id).await;
        let state = Self::initial_state(query, &history);
        let state = self.graph.invoke(state).await?;
        let reply = state.last_reply().unwrap_or_default().to_string();
        self.store.replace(&mut history, state.messages);
        Ok(reply)
    }
}
