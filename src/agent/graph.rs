//! Minimal state-graph orchestration.
//!
//! A graph is a set of named async nodes, each transforming a state value,
//! joined by directed edges from an entry point to a finish point. A compiled
//! graph can be run to completion with [`CompiledGraph::invoke`] or observed
//! as it runs with [`CompiledGraph::stream`], which also forwards tokens that
//! nodes emit through their [`NodeContext`].

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

use crate::errors::AgentError;

pub const DEFAULT_RECURSION_LIMIT: usize = 25;

/// One step of a graph.
#[async_trait]
pub trait Node<S: Send + 'static>: Send + Sync {
    async fn run(&self, state: S, ctx: &NodeContext) -> Result<S, AgentError>;
}

/// Adapts an async closure `Fn(S) -> Future<Output = Result<S, AgentError>>` into a node.
pub struct FnNode<F>(pub F);

#[async_trait]
impl<S, F, Fut> Node<S> for FnNode<F>
where
    S: Send + 'static,
    F: Fn(S) -> Fut + Send + Sync,
    Fut: Future<Output = Result<S, AgentError>> + Send,
{
    async fn run(&self, state: S, _ctx: &NodeContext) -> Result<S, AgentError> {
        (self.0)(state).await
    }
}

type TokenSink = Arc<dyn Fn(&str, String) -> bool + Send + Sync>;

/// Per-step context handed to a node.
pub struct NodeContext {
    node: String,
    sink: Option<TokenSink>,
}

impl NodeContext {
    #[must_use]
    pub fn node(&self) -> &str {
        &self.node
    }

    /// Forwards a token to the stream consumer.
    ///
    /// Returns `false` once the consumer has gone away, so long-running nodes
    /// can stop early. Always `true` when the graph is invoked without streaming.
    pub fn emit(&self, text: impl Into<String>) -> bool {
        match &self.sink {
            Some(sink) => sink(&self.node, text.into()),
            None => true,
        }
    }

    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.sink.is_some()
    }
}

/// Events produced by [`CompiledGraph::stream`].
#[derive(Debug)]
pub enum GraphEvent<S> {
    Token { node: String, text: String },
    NodeFinished { node: String },
    Done(S),
    Failed(AgentError),
}

pub type GraphStream<S> = UnboundedReceiverStream<GraphEvent<S>>;

/// Graph under construction. Mistakes are collected and reported by [`StateGraph::compile`].
pub struct StateGraph<S: Send + 'static> {
    nodes: HashMap<String, Arc<dyn Node<S>>>,
    order: Vec<String>,
    edges: HashMap<String, String>,
    entry: Option<String>,
    finish: Option<String>,
    recursion_limit: usize,
    problems: Vec<String>,
}

impl<S: Send + 'static> Default for StateGraph<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Send + 'static> StateGraph<S> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            order: Vec::new(),
            edges: HashMap::new(),
            entry: None,
            finish: None,
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            problems: Vec::new(),
        }
    }

    pub fn add_node(&mut self, name: &str, node: impl Node<S> + 'static) -> &mut Self {
        if self.nodes.contains_key(name) {
            self.problems.push(format!("Node '{name}' is already present"));
        } else {
            self.nodes.insert(name.to_string(), Arc::new(node));
            self.order.push(name.to_string());
        }
        self
    }

    pub fn add_edge(&mut self, from: &str, to: &str) -> &mut Self {
        if let Some(existing) = self.edges.get(from) {
            self.problems.push(format!(
                "Node '{from}' already has an edge to '{existing}'"
            ));
        } else {
            self.edges.insert(from.to_string(), to.to_string());
        }
        self
    }

    pub fn set_entry_point(&mut self, name: &str) -> &mut Self {
        self.entry = Some(name.to_string());
        self
    }

    pub fn set_finish_point(&mut self, name: &str) -> &mut Self {
        self.finish = Some(name.to_string());
        self
    }

    pub fn with_recursion_limit(&mut self, limit: usize) -> &mut Self {
        self.recursion_limit = limit;
        self
    }

    /// Validates the graph and freezes it.
    ///
    /// # Errors
    ///
    /// Returns `AgentError::Graph` for duplicate nodes, edges to unknown
    /// nodes, a missing or unknown entry/finish point, or a finish point that
    /// cannot be reached from the entry point.
    pub fn compile(self) -> Result<CompiledGraph<S>, AgentError> {
        if let Some(problem) = self.problems.first() {
            return Err(AgentError::Graph(problem.clone()));
        }
        if self.nodes.is_empty() {
            return Err(AgentError::Graph("Graph has no nodes".to_string()));
        }

        let entry = self
            .entry
            .ok_or_else(|| AgentError::Graph("Entry point is not set".to_string()))?;
        let finish = self
            .finish
            .ok_or_else(|| AgentError::Graph("Finish point is not set".to_string()))?;

        for (label, name) in [("Entry point", &entry), ("Finish point", &finish)] {
            if !self.nodes.contains_key(name) {
                return Err(AgentError::Graph(format!("{label} '{name}' is not a node")));
            }
        }

        for (from, to) in &self.edges {
            for name in [from, to] {
                if !self.nodes.contains_key(name) {
                    return Err(AgentError::Graph(format!(
                        "Edge {from} -> {to} references unknown node '{name}'"
                    )));
                }
            }
        }

        let mut seen = HashSet::new();
        let mut current = entry.as_str();
        while current != finish {
            if !seen.insert(current) {
                return Err(AgentError::Graph(format!(
                    "Finish point '{finish}' is unreachable: cycle at '{current}'"
                )));
            }
            current = self.edges.get(current).map(String::as_str).ok_or_else(|| {
                AgentError::Graph(format!(
                    "Finish point '{finish}' is unreachable: '{current}' has no outgoing edge"
                ))
            })?;
        }

        Ok(CompiledGraph {
            inner: Arc::new(GraphInner {
                nodes: self.nodes,
                order: self.order,
                edges: self.edges,
                entry,
                finish,
                recursion_limit: self.recursion_limit,
            }),
        })
    }
}

struct GraphInner<S: Send + 'static> {
    nodes: HashMap<String, Arc<dyn Node<S>>>,
    order: Vec<String>,
    edges: HashMap<String, String>,
    entry: String,
    finish: String,
    recursion_limit: usize,
}

/// A validated, immutable graph. Cheap to clone.
pub struct CompiledGraph<S: Send + 'static> {
    inner: Arc<GraphInner<S>>,
}

impl<S: Send + 'static> Clone for CompiledGraph<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: Send + 'static> CompiledGraph<S> {
    /// Node names in insertion order.
    #[must_use]
    pub fn node_names(&self) -> &[String] {
        &self.inner.order
    }

    #[must_use]
    pub fn entry_point(&self) -> &str {
        &self.inner.entry
    }

    #[must_use]
    pub fn finish_point(&self) -> &str {
        &self.inner.finish
    }

    /// Runs the graph from the entry point to the finish point.
    ///
    /// # Errors
    ///
    /// Returns the first node error, or `AgentError::Graph` when the
    /// recursion limit is exceeded.
    pub async fn invoke(&self, state: S) -> Result<S, AgentError> {
        run_graph(&self.inner, state, None).await
    }

    /// Runs the graph on a background task and streams its events.
    ///
    /// The stream always ends with exactly one `Done` or `Failed` event.
    #[must_use]
    pub fn stream(&self, state: S) -> GraphStream<S> {
        let (tx, rx) = mpsc::unbounded_channel();
        let inner = Arc::clone(&self.inner);

        tokio::spawn(async move {
            let outcome = run_graph(&inner, state, Some(&tx)).await;
            let last = match outcome {
                Ok(state) => GraphEvent::Done(state),
                Err(e) => GraphEvent::Failed(e),
            };
            // The consumer may already be gone.
            let _ = tx.send(last);
        });

        UnboundedReceiverStream::new(rx)
    }
}

async fn run_graph<S: Send + 'static>(
    inner: &GraphInner<S>,
    mut state: S,
    events: Option<&mpsc::UnboundedSender<GraphEvent<S>>>,
) -> Result<S, AgentError> {
    let sink: Option<TokenSink> = events.map(|tx| {
        let tx = tx.clone();
        Arc::new(move |node: &str, text: String| {
            tx.send(GraphEvent::Token {
                node: node.to_string(),
                text,
            })
            .is_ok()
        }) as TokenSink
    });

    let mut current = inner.entry.clone();
    let mut steps = 0usize;

    loop {
        steps += 1;
        if steps > inner.recursion_limit {
            return Err(AgentError::Graph(format!(
                "Recursion limit of {} reached without hitting finish point '{}'",
                inner.recursion_limit, inner.finish
            )));
        }

        let node = inner
            .nodes
            .get(&current)
            .ok_or_else(|| AgentError::Graph(format!("Unknown node '{current}'")))?;
        let ctx = NodeContext {
            node: current.clone(),
            sink: sink.clone(),
        };

        debug!(node = %current, step = steps, "Running graph node");
        state = node.run(state, &ctx).await?;

        if let Some(tx) = events {
            let _ = tx.send(GraphEvent::NodeFinished {
                node: current.clone(),
            });
        }

        if current == inner.finish {
            return Ok(state);
        }

        current = inner.edges.get(&current).cloned().ok_or_else(|| {
            AgentError::Graph(format!("Node '{current}' has no outgoing edge"))
        })?;
    }
}
