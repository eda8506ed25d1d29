//! Agents and the graph engine they run on

pub mod chatbot;
pub mod graph;
pub mod minute_writer;
pub mod prompts;

pub use chatbot::{ChatState, ChatbotAgent, ConversationStore};
pub use graph::{CompiledGraph, FnNode, GraphEvent, GraphStream, Node, NodeContext, StateGraph};
pub use minute_writer::{
    MinuteWriter, MinuteWriterState, create_minute_writer_graph, process_meeting_recording,
};
