use chatwire_core::{
    ConversationTurn, MessagePart, ProtocolFrame, StreamingState, ToolInvocation, ToolUpdate,
};
use tracing::debug;

/// What applying a frame did to the turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// The turn's parts changed.
    Updated,
    /// The frame was valid but changed nothing (e.g. a backwards tool state).
    Unchanged,
    /// The backend reported an error; the session should surface it.
    SurfaceError(String),
}

/// Applies decoded frames to the in-progress assistant turn.
///
/// Frames must be applied in arrival order: text and reasoning deltas are
/// concatenated, so reordering corrupts the result.
#[derive(Debug, Default, Clone, Copy)]
pub struct EventDispatcher;

impl EventDispatcher {
    /// Creates a dispatcher.
    pub fn new() -> Self {
        Self
    }

    /// Applies exactly one frame to `turn`.
    pub fn apply(&self, frame: ProtocolFrame, turn: &mut ConversationTurn) -> Effect {
        match frame {
            ProtocolFrame::Token(delta) => {
                append_text(&mut turn.parts, &delta);
                if turn.state == StreamingState::Pending {
                    turn.state = StreamingState::Streaming;
                }
                Effect::Updated
            }
            ProtocolFrame::Reasoning(delta) => {
                append_reasoning(&mut turn.parts, &delta);
                Effect::Updated
            }
            ProtocolFrame::Error(message) => Effect::SurfaceError(message),
            ProtocolFrame::SourceDocuments(payload) => {
                let documents = normalize_records(payload);
                replace_part(&mut turn.parts, MessagePart::SourceDocuments { documents });
                Effect::Updated
            }
            ProtocolFrame::UsedTools(payload) => {
                let tools = normalize_records(payload);
                replace_part(&mut turn.parts, MessagePart::UsedTools { tools });
                Effect::Updated
            }
            ProtocolFrame::ToolInvocation(update) => upsert_tool(&mut turn.parts, update),
            ProtocolFrame::File(attachment) => {
                turn.parts.push(attachment.into());
                Effect::Updated
            }
        }
    }
}

/// Normalizes a record-list payload into a list.
///
/// String payloads are parsed as JSON when possible. A bare value is wrapped
/// in a one-element list, `null` included.
pub fn normalize_records(payload: serde_json::Value) -> Vec<serde_json::Value> {
    let value = match payload {
        serde_json::Value::String(raw) => {
            serde_json::from_str(&raw).unwrap_or(serde_json::Value::String(raw))
        }
        other => other,
    };
    match value {
        serde_json::Value::Array(items) => items,
        other => vec![other],
    }
}

/// Appends to the trailing text run, or starts a new one after a reasoning,
/// tool or file part. Source and used-tool parts do not break the run.
fn append_text(parts: &mut Vec<MessagePart>, delta: &str) {
    if let Some(i) = parts.iter().rposition(MessagePart::is_flow) {
        if let MessagePart::Text { content } = &mut parts[i] {
            content.push_str(delta);
            return;
        }
    }
    parts.push(MessagePart::text(delta));
}

fn append_reasoning(parts: &mut Vec<MessagePart>, delta: &str) {
    if let Some(i) = parts.iter().rposition(MessagePart::is_flow) {
        if let MessagePart::Reasoning { content } = &mut parts[i] {
            content.push_str(delta);
            return;
        }
    }
    parts.push(MessagePart::Reasoning {
        content: delta.to_string(),
    });
}

/// Replaces the part of the same kind, keeping its position, or appends.
fn replace_part(parts: &mut Vec<MessagePart>, part: MessagePart) {
    let kind = std::mem::discriminant(&part);
    match parts.iter_mut().find(|p| std::mem::discriminant(&**p) == kind) {
        Some(existing) => *existing = part,
        None => parts.push(part),
    }
}

fn upsert_tool(parts: &mut Vec<MessagePart>, update: ToolUpdate) -> Effect {
    let existing = parts.iter_mut().find_map(|p| match p {
        MessagePart::ToolInvocation(t) if t.key == update.key => Some(t),
        _ => None,
    });

    if let Some(tool) = existing {
        if !tool.state.can_advance_to(update.state) {
            debug!(
                key = %tool.key,
                from = ?tool.state,
                to = ?update.state,
                "Ignoring backwards tool state"
            );
            return Effect::Unchanged;
        }
        tool.state = update.state;
        if let Some(name) = update.name {
            tool.name = name;
        }
        if update.input.is_some() {
            tool.input = update.input;
        }
        if update.output.is_some() {
            tool.output = update.output;
        }
        if update.error_text.is_some() {
            tool.error_text = update.error_text;
        }
        return Effect::Updated;
    }

    parts.push(MessagePart::ToolInvocation(ToolInvocation {
        key: update.key,
        name: update.name.unwrap_or_default(),
        input: update.input,
        output: update.output,
        error_text: update.error_text,
        state: update.state,
    }));
    Effect::Updated
}
