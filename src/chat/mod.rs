//! Conversational layer
//!
//! Session store, reply decoding and the orchestrator that ties the catalog,
//! the providers and the execution gateway together.

pub mod orchestrator;
pub mod prompt;
pub mod reply;
pub mod session;

pub use orchestrator::{ChatRequest, ChatTurn, ConversationOrchestrator};
pub use reply::{AssistantReply, ReplyAction, StructuredReply};
pub use session::{SessionStore, DEFAULT_SESSION_ID};
