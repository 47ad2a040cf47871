use super::{build_headers, ChatRequest, ProviderAdapter};
use crate::config::UiStreamConfig;
use crate::history::HistoryWindow;
use crate::stream::{spawn_frame_reader, FrameStream};
use async_trait::async_trait;
use chatwire_core::{
    Attachment, ChatResult, ConversationTurn, MessagePart, ProtocolFrame, Role, ToolInvocation,
    ToolState, ToolUpdate,
};
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};
use uuid::Uuid;

/// UI message stream backend.
///
/// The request carries the whole visible conversation as UI messages; the
/// response is an SSE stream of typed chunks (`{"type": "text-delta", ...}`),
/// terminated by `data: [DONE]`.
pub struct UiStreamAdapter {
    config: UiStreamConfig,
    http: reqwest::Client,
    capacity: usize,
}

impl UiStreamAdapter {
    pub fn new(config: UiStreamConfig, capacity: usize) -> Self {
        Self::with_client(config, capacity, reqwest::Client::new())
    }

    pub fn with_client(config: UiStreamConfig, capacity: usize, http: reqwest::Client) -> Self {
        Self {
            config,
            http,
            capacity,
        }
    }
}

#[async_trait]
impl ProviderAdapter for UiStreamAdapter {
    fn name(&self) -> &'static str {
        "ui_stream"
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
        let messages: Vec<serde_json::Value> = window
            .select(history)
            .chain(std::iter::once(turn))
            .map(ui_message)
            .collect();

        let mut body = serde_json::Map::new();
        body.insert("id".to_string(), json!(session_id.to_string()));
        body.insert("messages".to_string(), serde_json::Value::Array(messages));
        body.insert("trigger".to_string(), json!("submit-message"));
        body.extend(self.config.body.clone());

        Ok(ChatRequest {
            url: self.config.endpoint.clone(),
            method: Method::POST,
            headers: build_headers(self.config.api_key.as_deref(), &self.config.extra_headers)?,
            body: serde_json::Value::Object(body),
        })
    }

    async fn consume(&self, response: reqwest::Response) -> ChatResult<FrameStream> {
        let mut translator = UiTranslator::default();
        Ok(spawn_frame_reader(
            response.bytes_stream(),
            self.capacity,
            move |value| translator.translate(value),
        ))
    }
}

// -- Request encoding --

fn ui_message(turn: &ConversationTurn) -> serde_json::Value {
    let role = match turn.role {
        Role::User => "user",
        Role::Assistant => "assistant",
    };
    let parts: Vec<serde_json::Value> = turn.parts.iter().filter_map(ui_part).collect();
    json!({
        "id": turn.id.to_string(),
        "role": role,
        "parts": parts,
    })
}

fn ui_part(part: &MessagePart) -> Option<serde_json::Value> {
    match part {
        MessagePart::Text { content } => Some(json!({"type": "text", "text": content})),
        MessagePart::Reasoning { content } => Some(json!({"type": "reasoning", "text": content})),
        MessagePart::File {
            url,
            media_type,
            filename,
        } => {
            let mut file = json!({"type": "file", "mediaType": media_type, "url": url});
            if let Some(name) = filename {
                file["filename"] = json!(name);
            }
            Some(file)
        }
        MessagePart::ToolInvocation(tool) => Some(ui_tool_part(tool)),
        MessagePart::SourceDocuments { .. } | MessagePart::UsedTools { .. } => None,
    }
}

fn ui_tool_part(tool: &ToolInvocation) -> serde_json::Value {
    let state = match tool.state {
        ToolState::Pending => "input-streaming",
        ToolState::InputAvailable => "input-available",
        ToolState::OutputAvailable => "output-available",
        ToolState::Errored => "output-error",
    };
    let mut part = json!({
        "type": format!("tool-{}", tool.name),
        "toolCallId": tool.key,
        "state": state,
    });
    if let Some(input) = &tool.input {
        part["input"] = input.clone();
    }
    if let Some(output) = &tool.output {
        part["output"] = output.clone();
    }
    if let Some(error) = &tool.error_text {
        part["errorText"] = json!(error);
    }
    part
}

// -- Response decoding --

/// Chunks of the UI message stream the client understands.
///
/// Lifecycle chunks (`start`, `finish`, `text-start`, `start-step`, ...) and
/// custom `data-*` chunks all land in [`UiChunk::Unknown`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum UiChunk {
    TextDelta {
        delta: String,
    },
    ReasoningDelta {
        delta: String,
    },
    ToolInputStart {
        tool_call_id: String,
        tool_name: String,
    },
    ToolInputDelta {
        tool_call_id: String,
        input_text_delta: String,
    },
    ToolInputAvailable {
        tool_call_id: String,
        tool_name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    ToolInputError {
        tool_call_id: String,
        #[serde(default)]
        tool_name: Option<String>,
        #[serde(default)]
        input: Option<serde_json::Value>,
        error_text: String,
    },
    ToolOutputAvailable {
        tool_call_id: String,
        #[serde(default)]
        output: serde_json::Value,
    },
    ToolOutputError {
        tool_call_id: String,
        error_text: String,
    },
    SourceUrl {
        source_id: String,
        url: String,
        #[serde(default)]
        title: Option<String>,
    },
    SourceDocument {
        source_id: String,
        media_type: String,
        title: String,
        #[serde(default)]
        filename: Option<String>,
    },
    File {
        url: String,
        media_type: String,
    },
    Error {
        error_text: String,
    },
    #[serde(other)]
    Unknown,
}

/// Stateful chunk-to-frame translation for one response.
///
/// Tool inputs streamed as text fragments are buffered per call id, and
/// sources are gathered so each source chunk republishes the whole list.
#[derive(Debug, Default)]
pub struct UiTranslator {
    tool_inputs: HashMap<String, String>,
    sources: Vec<serde_json::Value>,
}

impl UiTranslator {
    /// Maps one decoded chunk onto at most one frame.
    pub fn translate(&mut self, value: serde_json::Value) -> Option<ProtocolFrame> {
        let chunk = match serde_json::from_value::<UiChunk>(value) {
            Ok(chunk) => chunk,
            Err(e) => {
                trace!(error = %e, "Skipping undecodable UI chunk");
                return None;
            }
        };

        match chunk {
            UiChunk::TextDelta { delta } => Some(ProtocolFrame::Token(delta)),
            UiChunk::ReasoningDelta { delta } => Some(ProtocolFrame::Reasoning(delta)),
            UiChunk::ToolInputStart {
                tool_call_id,
                tool_name,
            } => {
                self.tool_inputs.insert(tool_call_id.clone(), String::new());
                let mut update = ToolUpdate::new(tool_call_id, ToolState::Pending);
                update.name = Some(tool_name);
                Some(ProtocolFrame::ToolInvocation(update))
            }
            UiChunk::ToolInputDelta {
                tool_call_id,
                input_text_delta,
            } => {
                let raw = self.tool_inputs.entry(tool_call_id.clone()).or_default();
                raw.push_str(&input_text_delta);
                // Partial JSON is held back until it parses.
                let input = serde_json::from_str::<serde_json::Value>(raw).ok()?;
                let mut update = ToolUpdate::new(tool_call_id, ToolState::Pending);
                update.input = Some(input);
                Some(ProtocolFrame::ToolInvocation(update))
            }
            UiChunk::ToolInputAvailable {
                tool_call_id,
                tool_name,
                input,
            } => {
                self.tool_inputs.remove(&tool_call_id);
                let mut update = ToolUpdate::new(tool_call_id, ToolState::InputAvailable);
                update.name = Some(tool_name);
                update.input = Some(input);
                Some(ProtocolFrame::ToolInvocation(update))
            }
            UiChunk::ToolInputError {
                tool_call_id,
                tool_name,
                input,
                error_text,
            } => {
                self.tool_inputs.remove(&tool_call_id);
                let mut update = ToolUpdate::new(tool_call_id, ToolState::Errored);
                update.name = tool_name;
                update.input = input;
                update.error_text = Some(error_text);
                Some(ProtocolFrame::ToolInvocation(update))
            }
            UiChunk::ToolOutputAvailable {
                tool_call_id,
                output,
            } => {
                let mut update = ToolUpdate::new(tool_call_id, ToolState::OutputAvailable);
                update.output = Some(output);
                Some(ProtocolFrame::ToolInvocation(update))
            }
            UiChunk::ToolOutputError {
                tool_call_id,
                error_text,
            } => {
                let mut update = ToolUpdate::new(tool_call_id, ToolState::Errored);
                update.error_text = Some(error_text);
                Some(ProtocolFrame::ToolInvocation(update))
            }
            UiChunk::SourceUrl {
                source_id,
                url,
                title,
            } => {
                self.sources
                    .push(json!({"sourceId": source_id, "url": url, "title": title}));
                Some(ProtocolFrame::SourceDocuments(serde_json::Value::Array(
                    self.sources.clone(),
                )))
            }
            UiChunk::SourceDocument {
                source_id,
                media_type,
                title,
                filename,
            } => {
                self.sources.push(json!({
                    "sourceId": source_id,
                    "mediaType": media_type,
                    "title": title,
                    "filename": filename,
                }));
                Some(ProtocolFrame::SourceDocuments(serde_json::Value::Array(
                    self.sources.clone(),
                )))
            }
            UiChunk::File { url, media_type } => Some(ProtocolFrame::File(Attachment {
                url,
                media_type,
                filename: None,
            })),
            UiChunk::Error { error_text } => Some(ProtocolFrame::Error(error_text)),
            UiChunk::Unknown => {
                debug!("Skipping UI lifecycle chunk");
                None
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chatwire_core::StreamingState;
    use std::collections::BTreeMap;

    fn config() -> UiStreamConfig {
        UiStreamConfig {
            endpoint: "http://localhost:3000/api/chat".to_string(),
            api_key: None,
            extra_headers: BTreeMap::new(),
            body: json!({"model": "small"}).as_object().cloned().unwrap(),
            history_limit: 100,
        }
    }

    #[test]
    fn test_request_body_shape() {
        let adapter = UiStreamAdapter::new(config(), 8);
        let session_id = Uuid::new_v4();

        let mut answer = ConversationTurn::assistant_placeholder();
        answer.parts.push(MessagePart::Reasoning {
            content: "checking".to_string(),
        });
        answer.parts.push(MessagePart::ToolInvocation(ToolInvocation {
            key: "call-1".to_string(),
            name: "weather".to_string(),
            input: Some(json!({"city": "Oslo"})),
            output: None,
            error_text: Some("timeout".to_string()),
            state: ToolState::Errored,
        }));
        answer.parts.push(MessagePart::UsedTools { tools: vec![] });
        answer.state = StreamingState::Complete;
        let history = vec![
            Arc::new(ConversationTurn::user("weather?", vec![])),
            Arc::new(answer),
        ];
        let turn = ConversationTurn::user("try again", vec![]);

        let request = adapter.build_request(session_id, &turn, &history).unwrap();
        assert_eq!(request.url, "http://localhost:3000/api/chat");
        assert!(request.headers.is_empty());

        let body = &request.body;
        assert_eq!(body["id"], session_id.to_string());
        assert_eq!(body["trigger"], "submit-message");
        assert_eq!(body["model"], "small");

        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[0]["parts"], json!([{"type": "text", "text": "weather?"}]));
        assert_eq!(
            messages[1]["parts"],
            json!([
                {"type": "reasoning", "text": "checking"},
                {
                    "type": "tool-weather",
                    "toolCallId": "call-1",
                    "state": "output-error",
                    "input": {"city": "Oslo"},
                    "errorText": "timeout",
                },
            ])
        );
        assert_eq!(messages[2]["id"], turn.id.to_string());
    }

    #[test]
    fn test_file_parts_are_encoded() {
        let part = MessagePart::File {
            url: "data:image/png;base64,AAAA".to_string(),
            media_type: "image/png".to_string(),
            filename: Some("a.png".to_string()),
        };
        assert_eq!(
            ui_part(&part).unwrap(),
            json!({
                "type": "file",
                "mediaType": "image/png",
                "url": "data:image/png;base64,AAAA",
                "filename": "a.png",
            })
        );
    }

    #[test]
    fn test_text_and_reasoning_deltas() {
        let mut t = UiTranslator::default();
        assert_eq!(
            t.translate(json!({"type": "text-delta", "id": "t1", "delta": "Hel"})),
            Some(ProtocolFrame::Token("Hel".to_string()))
        );
        assert_eq!(
            t.translate(json!({"type": "reasoning-delta", "id": "r1", "delta": "hmm"})),
            Some(ProtocolFrame::Reasoning("hmm".to_string()))
        );
    }

    #[test]
    fn test_lifecycle_and_custom_chunks_are_skipped() {
        let mut t = UiTranslator::default();
        for chunk in [
            json!({"type": "start", "messageId": "m1"}),
            json!({"type": "text-start", "id": "t1"}),
            json!({"type": "finish-step"}),
            json!({"type": "finish"}),
            json!({"type": "data-weather", "data": {"temp": 3}}),
        ] {
            assert_eq!(t.translate(chunk), None);
        }
        // Known type with missing fields.
        assert_eq!(t.translate(json!({"type": "text-delta"})), None);
        assert_eq!(t.translate(json!("not an object")), None);
    }

    #[test]
    fn test_tool_input_streams_until_parseable() {
        let mut t = UiTranslator::default();
        let start = t
            .translate(json!({"type": "tool-input-start", "toolCallId": "c1", "toolName": "calc"}))
            .unwrap();
        let ProtocolFrame::ToolInvocation(update) = start else {
            panic!("expected tool frame");
        };
        assert_eq!(update.name.as_deref(), Some("calc"));
        assert_eq!(update.state, ToolState::Pending);

        let delta = |text: &str| json!({"type": "tool-input-delta", "toolCallId": "c1", "inputTextDelta": text});
        assert_eq!(t.translate(delta("{\"a\":")), None);
        let Some(ProtocolFrame::ToolInvocation(update)) = t.translate(delta("1}")) else {
            panic!("expected parsed input");
        };
        assert_eq!(update.input, Some(json!({"a": 1})));

        let Some(ProtocolFrame::ToolInvocation(update)) = t.translate(json!({
            "type": "tool-output-available", "toolCallId": "c1", "output": 2
        })) else {
            panic!("expected output frame");
        };
        assert_eq!(update.state, ToolState::OutputAvailable);
        assert_eq!(update.output, Some(json!(2)));
    }

    #[test]
    fn test_tool_errors() {
        let mut t = UiTranslator::default();
        let Some(ProtocolFrame::ToolInvocation(update)) = t.translate(json!({
            "type": "tool-output-error", "toolCallId": "c9", "errorText": "boom"
        })) else {
            panic!("expected tool frame");
        };
        assert_eq!(update.state, ToolState::Errored);
        assert_eq!(update.error_text.as_deref(), Some("boom"));
    }

    #[test]
    fn test_sources_accumulate() {
        let mut t = UiTranslator::default();
        t.translate(json!({"type": "source-url", "sourceId": "s1", "url": "https://a"}));
        let frame = t.translate(json!({
            "type": "source-document", "sourceId": "s2", "mediaType": "application/pdf", "title": "Manual"
        }));
        let Some(ProtocolFrame::SourceDocuments(serde_json::Value::Array(sources))) = frame else {
            panic!("expected source list");
        };
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0]["url"], "https://a");
        assert_eq!(sources[1]["title"], "Manual");
    }

    #[test]
    fn test_error_and_file_chunks() {
        let mut t = UiTranslator::default();
        assert_eq!(
            t.translate(json!({"type": "error", "errorText": "rate limited"})),
            Some(ProtocolFrame::Error("rate limited".to_string()))
        );
        assert_eq!(
            t.translate(json!({"type": "file", "url": "https://f/x.png", "mediaType": "image/png"})),
            Some(ProtocolFrame::File(Attachment {
                url: "https://f/x.png".to_string(),
                media_type: "image/png".to_string(),
                filename: None,
            }))
        );
    }
}
