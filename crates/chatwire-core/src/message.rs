use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The role of the participant that authored a [`ConversationTurn`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A human end-user.
    User,
    /// The conversational backend.
    Assistant,
}

/// Lifecycle of a turn's content.
///
/// Assistant turns start `Pending`, become `Streaming` once the first frame
/// lands and freeze at `Complete` (or `Errored`). User turns are created
/// `Complete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamingState {
    /// Placeholder created, no frame received yet.
    Pending,
    /// Frames are being merged into the turn.
    Streaming,
    /// Frozen; parts no longer change.
    Complete,
    /// Frozen after a failure.
    Errored,
}

impl StreamingState {
    /// Whether the turn can still receive content.
    pub fn is_open(self) -> bool {
        matches!(self, StreamingState::Pending | StreamingState::Streaming)
    }
}

/// State of a tool invocation. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolState {
    /// The call was announced; its input may still be streaming.
    Pending,
    /// The full input is known.
    InputAvailable,
    /// The tool produced output.
    OutputAvailable,
    /// The call failed.
    Errored,
}

impl ToolState {
    fn rank(self) -> u8 {
        match self {
            ToolState::Pending => 0,
            ToolState::InputAvailable => 1,
            ToolState::OutputAvailable | ToolState::Errored => 2,
        }
    }

    /// `OutputAvailable` and `Errored` accept no further updates.
    pub fn is_terminal(self) -> bool {
        matches!(self, ToolState::OutputAvailable | ToolState::Errored)
    }

    /// Whether moving from `self` to `next` keeps the state machine monotonic.
    pub fn can_advance_to(self, next: ToolState) -> bool {
        !self.is_terminal() && next.rank() >= self.rank()
    }
}

/// One tool call made by the assistant, updated in place as it progresses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocation {
    /// Stable per-invocation key (the backend's tool call id).
    pub key: String,
    /// Tool name.
    pub name: String,
    /// Tool input, once known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Value>,
    /// Tool output, once produced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    /// Failure description when `state` is `Errored`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_text: Option<String>,
    /// Current state.
    pub state: ToolState,
}

/// A tagged piece of a turn. Parts keep arrival order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MessagePart {
    /// Plain answer text.
    Text {
        /// Accumulated text.
        content: String,
    },
    /// Model "thinking" trace.
    Reasoning {
        /// Accumulated reasoning text.
        content: String,
    },
    /// A tool call and its progress.
    ToolInvocation(ToolInvocation),
    /// Citation records, opaque to the client.
    SourceDocuments {
        /// The records as sent by the backend.
        documents: Vec<serde_json::Value>,
    },
    /// Tool usage records, opaque to the client.
    UsedTools {
        /// The records as sent by the backend.
        tools: Vec<serde_json::Value>,
    },
    /// A file attached by the user or produced by the assistant.
    #[serde(rename_all = "camelCase")]
    File {
        /// `data:` URL or remote URL.
        url: String,
        /// IANA media type.
        media_type: String,
        /// Original file name, when known.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },
}

impl MessagePart {
    /// Creates a text part.
    pub fn text(content: impl Into<String>) -> Self {
        MessagePart::Text {
            content: content.into(),
        }
    }

    /// Parts that carry content in the reading flow. Metadata parts
    /// (sources, used tools) do not split a run of text.
    pub fn is_flow(&self) -> bool {
        !matches!(
            self,
            MessagePart::SourceDocuments { .. } | MessagePart::UsedTools { .. }
        )
    }
}

/// Attachment descriptor supplied by the upload pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    /// `data:` URL (inline, base64) or remote URL.
    pub url: String,
    /// IANA media type.
    pub media_type: String,
    /// Original file name.
    #[serde(default)]
    pub filename: Option<String>,
}

impl From<Attachment> for MessagePart {
    fn from(a: Attachment) -> Self {
        MessagePart::File {
            url: a.url,
            media_type: a.media_type,
            filename: a.filename,
        }
    }
}

/// A single user or assistant entry in the conversation timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationTurn {
    /// Stable identifier.
    pub id: Uuid,
    /// Author.
    pub role: Role,
    /// Parts in arrival order.
    pub parts: Vec<MessagePart>,
    /// Content lifecycle.
    pub state: StreamingState,
    /// UTC timestamp of creation.
    pub created_at: DateTime<Utc>,
}

impl ConversationTurn {
    /// Creates a complete user turn from text and attachments.
    pub fn user(text: impl Into<String>, attachments: Vec<Attachment>) -> Self {
        let text = text.into();
        let mut parts = Vec::with_capacity(attachments.len() + 1);
        if !text.is_empty() {
            parts.push(MessagePart::text(text));
        }
        parts.extend(attachments.into_iter().map(MessagePart::from));
        Self {
            id: Uuid::new_v4(),
            role: Role::User,
            parts,
            state: StreamingState::Complete,
            created_at: Utc::now(),
        }
    }

    /// Creates an empty assistant turn awaiting its first frame.
    pub fn assistant_placeholder() -> Self {
        Self {
            id: Uuid::new_v4(),
            role: Role::Assistant,
            parts: Vec::new(),
            state: StreamingState::Pending,
            created_at: Utc::now(),
        }
    }

    /// Whether this is an assistant turn currently receiving frames.
    pub fn is_streaming_assistant(&self) -> bool {
        self.role == Role::Assistant && self.state == StreamingState::Streaming
    }

    /// All text parts concatenated in order.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                MessagePart::Text { content } => Some(content.as_str()),
                _ => None,
            })
            .collect()
    }

    /// All reasoning parts concatenated in order.
    pub fn reasoning(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                MessagePart::Reasoning { content } => Some(content.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Looks up a tool invocation by its key.
    pub fn tool_invocation(&self, key: &str) -> Option<&ToolInvocation> {
        self.parts.iter().find_map(|p| match p {
            MessagePart::ToolInvocation(t) if t.key == key => Some(t),
            _ => None,
        })
    }

    /// The cited source documents, if any were received.
    pub fn source_documents(&self) -> Option<&[serde_json::Value]> {
        self.parts.iter().find_map(|p| match p {
            MessagePart::SourceDocuments { documents } => Some(documents.as_slice()),
            _ => None,
        })
    }

    /// The used-tool records, if any were received.
    pub fn used_tools(&self) -> Option<&[serde_json::Value]> {
        self.parts.iter().find_map(|p| match p {
            MessagePart::UsedTools { tools } => Some(tools.as_slice()),
            _ => None,
        })
    }

    /// Whether the turn has no parts at all.
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}
