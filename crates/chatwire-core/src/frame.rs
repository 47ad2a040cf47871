use crate::message::{Attachment, ToolState};
use serde::{Deserialize, Serialize};

/// One decoded unit of a response, tagged with its event type.
///
/// The first four variants are the events of the predict protocol
/// (`{"event": "...", "data": ...}`). The remaining ones carry the richer
/// parts of the UI message stream once its adapter has translated them.
/// Frames are applied strictly in arrival order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ProtocolFrame {
    /// A text delta to append.
    Token(String),
    /// A backend warning or error emitted without closing the stream.
    Error(String),
    /// Citation records; replaces any previous list.
    SourceDocuments(serde_json::Value),
    /// Tool usage records; replaces any previous list.
    UsedTools(serde_json::Value),
    /// A reasoning delta to append.
    Reasoning(String),
    /// A tool invocation state change.
    ToolInvocation(ToolUpdate),
    /// A file produced by the assistant.
    File(Attachment),
}

impl ProtocolFrame {
    /// Short event name, for logging.
    pub fn event_name(&self) -> &'static str {
        match self {
            ProtocolFrame::Token(_) => "token",
            ProtocolFrame::Error(_) => "error",
            ProtocolFrame::SourceDocuments(_) => "sourceDocuments",
            ProtocolFrame::UsedTools(_) => "usedTools",
            ProtocolFrame::Reasoning(_) => "reasoning",
            ProtocolFrame::ToolInvocation(_) => "toolInvocation",
            ProtocolFrame::File(_) => "file",
        }
    }
}

/// An update to the tool invocation identified by `key`.
///
/// `None` fields leave the existing value untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolUpdate {
    /// Stable per-invocation key.
    pub key: String,
    /// Tool name; always present on the first update for a key.
    #[serde(default)]
    pub name: Option<String>,
    /// Tool input.
    #[serde(default)]
    pub input: Option<serde_json::Value>,
    /// Tool output.
    #[serde(default)]
    pub output: Option<serde_json::Value>,
    /// Failure description.
    #[serde(default)]
    pub error_text: Option<String>,
    /// The state this update moves the invocation to.
    pub state: ToolState,
}

impl ToolUpdate {
    /// An update that only moves `key` to `state`.
    pub fn new(key: impl Into<String>, state: ToolState) -> Self {
        Self {
            key: key.into(),
            name: None,
            input: None,
            output: None,
            error_text: None,
            state,
        }
    }
}
