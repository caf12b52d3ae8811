//! RAG (Retrieval-Augmented Generation) for streaming question answering.
//!
//! Ties retrieval, prompt assembly, and the streaming completion service
//! together, threading conversation history and citations through each answer.

mod answer;
pub mod context;

pub use answer::{AnswerEngine, ChannelSink, StdoutSink, TokenSink};
pub use context::{ConversationContext, Role, Turn};
