//! Core types and error definitions for chatwire.
//!
//! This crate holds the provider-independent conversation model shared by the
//! streaming client and its front-ends. It performs no I/O.
//!
//! # Main types
//!
//! - [`ChatError`]: Unified error enum for transport, protocol and config failures.
//! - [`ChatResult`]: Convenience alias for `Result<T, ChatError>`.
//! - [`LastError`]: The error value a session publishes to observers.
//! - [`ConversationTurn`]: One user or assistant entry in the timeline.
//! - [`MessagePart`]: A tagged piece of a turn (text, reasoning, tool, sources...).
//! - [`ProtocolFrame`]: One decoded, event-tagged unit of a streamed response.

/// Error types.
pub mod error;
/// Protocol frames produced by the provider adapters.
pub mod frame;
/// Conversation turns and their parts.
pub mod message;

pub use error::{ChatError, ChatResult, LastError};
pub use frame::{ProtocolFrame, ToolUpdate};
pub use message::{
    Attachment, ConversationTurn, MessagePart, Role, StreamingState, ToolInvocation, ToolState,
};
