use super::{build_headers, is_event_stream, ChatRequest, ProviderAdapter};
use crate::config::PredictConfig;
use crate::history::HistoryWindow;
use crate::stream::{spawn_frame_reader, FrameStream};
use async_trait::async_trait;
use chatwire_core::{ChatError, ChatResult, ConversationTurn, MessagePart, ProtocolFrame, Role};
use reqwest::Method;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Fields tried, in order, when a prediction is answered with a single JSON
/// document instead of a stream.
pub const FALLBACK_FIELDS: [&str; 4] = ["/text", "/data", "/message/text", "/result"];

/// Prediction protocol backend.
///
/// Requests carry the flow id, the question, a reduced history and the
/// override map. The response is either an SSE stream of
/// `data: {"event": ..., "data": ...}` lines or one JSON document.
pub struct PredictAdapter {
    config: PredictConfig,
    http: reqwest::Client,
    capacity: usize,
}

impl PredictAdapter {
    pub fn new(config: PredictConfig, capacity: usize) -> Self {
        Self::with_client(config, capacity, reqwest::Client::new())
    }

    pub fn with_client(config: PredictConfig, capacity: usize, http: reqwest::Client) -> Self {
        Self {
            config,
            http,
            capacity,
        }
    }
}

#[async_trait]
impl ProviderAdapter for PredictAdapter {
    fn name(&self) -> &'static str {
        "predict"
    }

    fn http(&self) -> &reqwest::Client {
        &self.http
    }

    fn build_request(
        &self,
        session_id: Uuid,
        turn: &ConversationTurn,
        history: &[Arc<ConversationTurn>],
    ) -> ChatResult<ChatRequest> {
        let window = HistoryWindow::new(self.config.history_limit);
        let history: Vec<HistoryEntry> = window
            .select(history)
            .filter_map(HistoryEntry::from_turn)
            .collect();

        let mut override_config = self.config.override_config.clone();
        override_config
            .entry("sessionId")
            .or_insert_with(|| serde_json::json!(session_id.to_string()));

        let uploads: Vec<Upload> = turn.parts.iter().filter_map(Upload::from_part).collect();

        let body = PredictionRequest {
            chatflow_id: &self.config.chatflow_id,
            question: turn.text(),
            history,
            override_config,
            streaming: self.config.streaming,
            uploads,
        };

        Ok(ChatRequest {
            url: self.config.prediction_url(),
            method: Method::POST,
            headers: build_headers(self.config.api_key.as_deref(), &self.config.extra_headers)?,
            body: serde_json::to_value(&body)?,
        })
    }

    async fn consume(&self, response: reqwest::Response) -> ChatResult<FrameStream> {
        if is_event_stream(&response) {
            debug!("Consuming streamed prediction");
            return Ok(spawn_frame_reader(
                response.bytes_stream(),
                self.capacity,
                wire_frame,
            ));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ChatError::Http(e.to_string()))?;
        let document: serde_json::Value = serde_json::from_str(&body).map_err(|e| {
            ChatError::Protocol(format!("prediction response is neither a stream nor JSON: {e}"))
        })?;
        debug!("Consuming single-document prediction");
        Ok(FrameStream::ready(vec![ProtocolFrame::Token(
            fallback_text(&document),
        )]))
    }
}

/// Maps one decoded `{event, data}` object onto a frame.
///
/// Events other than the four the client consumes are skipped.
pub fn wire_frame(value: serde_json::Value) -> Option<ProtocolFrame> {
    let serde_json::Value::Object(mut object) = value else {
        return None;
    };
    let event = object.get("event")?.as_str()?.to_string();
    let data = object.remove("data").unwrap_or(serde_json::Value::Null);

    match event.as_str() {
        "token" => Some(ProtocolFrame::Token(as_text(data))),
        "error" => Some(ProtocolFrame::Error(as_text(data))),
        "sourceDocuments" => Some(ProtocolFrame::SourceDocuments(data)),
        "usedTools" => Some(ProtocolFrame::UsedTools(data)),
        other => {
            debug!(event = other, "Skipping prediction event");
            None
        }
    }
}

/// Picks the answer text out of a non-streamed prediction.
///
/// The first populated field of [`FALLBACK_FIELDS`] wins; a bare JSON string
/// is used as is; otherwise the whole document is serialized.
pub fn fallback_text(document: &serde_json::Value) -> String {
    if let serde_json::Value::String(s) = document {
        return s.clone();
    }
    FALLBACK_FIELDS
        .iter()
        .find_map(|pointer| document.pointer(pointer).and_then(populated))
        .unwrap_or_else(|| document.to_string())
}

fn populated(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) if s.is_empty() => None,
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn as_text(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

// -- Prediction wire types --

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PredictionRequest<'a> {
    chatflow_id: &'a str,
    question: String,
    history: Vec<HistoryEntry>,
    override_config: serde_json::Map<String, serde_json::Value>,
    streaming: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    uploads: Vec<Upload>,
}

#[derive(Debug, Serialize, PartialEq)]
struct HistoryEntry {
    message: String,
    #[serde(rename = "type")]
    kind: HistoryKind,
}

#[derive(Debug, Serialize, PartialEq)]
enum HistoryKind {
    #[serde(rename = "userMessage")]
    User,
    #[serde(rename = "apiMessage")]
    Api,
}

impl HistoryEntry {
    fn from_turn(turn: &ConversationTurn) -> Option<Self> {
        let message = turn.text();
        if message.is_empty() {
            return None;
        }
        let kind = match turn.role {
            Role::User => HistoryKind::User,
            Role::Assistant => HistoryKind::Api,
        };
        Some(Self { message, kind })
    }
}

#[derive(Debug, Serialize)]
struct Upload {
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<String>,
    #[serde(rename = "type")]
    kind: &'static str,
    name: String,
    mime: String,
}

impl Upload {
    fn from_part(part: &MessagePart) -> Option<Self> {
        let MessagePart::File {
            url,
            media_type,
            filename,
        } = part
        else {
            return None;
        };
        Some(Self {
            data: (!url.is_empty()).then(|| url.clone()),
            kind: "file",
            name: filename.clone().unwrap_or_else(|| "file".to_string()),
            mime: media_type.clone(),
        })
    }
}
