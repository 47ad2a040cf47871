pub mod predict;
pub mod ui_stream;

use crate::config::{ProviderConfig, SessionConfig};
use crate::stream::FrameStream;
use async_trait::async_trait;
use chatwire_core::{ChatError, ChatResult, ConversationTurn};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

pub use predict::PredictAdapter;
pub use ui_stream::UiStreamAdapter;

/// A fully described HTTP request, built before anything is sent.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub url: String,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: serde_json::Value,
}

/// Trait for backend protocol adapters.
///
/// Each supported protocol implements this trait so the session controller
/// never needs to know which one is active. An adapter only builds requests
/// and turns responses into [`ProtocolFrame`](chatwire_core::ProtocolFrame)s;
/// it never touches session state.
///
/// To add a protocol:
/// 1. Create a new module in `adapters/`
/// 2. Implement `ProviderAdapter` for your struct
/// 3. Add the variant to `ProviderConfig` in `config.rs`
/// 4. Wire it up in [`build_adapter`]
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Protocol name, for logging.
    fn name(&self) -> &'static str;

    /// HTTP client used by [`ProviderAdapter::open`].
    fn http(&self) -> &reqwest::Client;

    /// Builds the request for `turn`, given the turns that precede it.
    fn build_request(
        &self,
        session_id: Uuid,
        turn: &ConversationTurn,
        history: &[Arc<ConversationTurn>],
    ) -> ChatResult<ChatRequest>;

    /// Turns a successful response into frames.
    async fn consume(&self, response: reqwest::Response) -> ChatResult<FrameStream>;

    /// Builds, sends and consumes in one step.
    async fn open(
        &self,
        session_id: Uuid,
        turn: &ConversationTurn,
        history: &[Arc<ConversationTurn>],
    ) -> ChatResult<FrameStream> {
        let request = self.build_request(session_id, turn, history)?;
        let response = execute(self.http(), request).await?;
        self.consume(response).await
    }
}

/// Creates the adapter selected by `config`.
pub fn build_adapter(
    config: &ProviderConfig,
    session: &SessionConfig,
) -> ChatResult<Box<dyn ProviderAdapter>> {
    config.validate()?;
    let adapter: Box<dyn ProviderAdapter> = match config {
        ProviderConfig::Predict(c) => {
            Box::new(PredictAdapter::new(c.clone(), session.channel_capacity))
        }
        ProviderConfig::UiStream(c) => {
            Box::new(UiStreamAdapter::new(c.clone(), session.channel_capacity))
        }
    };
    Ok(adapter)
}

/// Sends `request` and checks the status.
///
/// `401` becomes [`ChatError::Unauthenticated`]; any other non-2xx status
/// becomes [`ChatError::Api`] with the message from the error body.
pub async fn execute(
    http: &reqwest::Client,
    request: ChatRequest,
) -> ChatResult<reqwest::Response> {
    let resp = http
        .request(request.method, &request.url)
        .headers(request.headers)
        .json(&request.body)
        .send()
        .await
        .map_err(|e| ChatError::Http(e.to_string()))?;

    let status = resp.status();
    if status == StatusCode::UNAUTHORIZED {
        return Err(ChatError::Unauthenticated);
    }
    if !status.is_success() {
        let error_body = resp.text().await.unwrap_or_default();
        return Err(ChatError::Api {
            status: status.as_u16(),
            message: error_message(status, &error_body),
        });
    }
    Ok(resp)
}

/// Extracts a readable message from an error body: the `detail` field, then
/// the `error` field (a string or an object with `message`), then the status
/// line.
pub fn error_message(status: StatusCode, body: &str) -> String {
    let from_body = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|json| {
            ["detail", "error"].iter().find_map(|field| match &json[*field] {
                serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
                serde_json::Value::Object(o) => o
                    .get("message")
                    .and_then(serde_json::Value::as_str)
                    .map(str::to_string),
                _ => None,
            })
        });

    from_body.unwrap_or_else(|| match status.canonical_reason() {
        Some(reason) => format!("{} {reason}", status.as_u16()),
        None => status.as_u16().to_string(),
    })
}

/// Whether the response declares a server-sent event stream.
pub fn is_event_stream(response: &reqwest::Response) -> bool {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.to_ascii_lowercase().starts_with("text/event-stream"))
}

/// Common headers: optional bearer token plus configured extras.
pub(crate) fn build_headers(
    api_key: Option<&str>,
    extra: &BTreeMap<String, String>,
) -> ChatResult<HeaderMap> {
    let mut headers = HeaderMap::new();
    if let Some(key) = api_key.filter(|k| !k.is_empty()) {
        let value = HeaderValue::from_str(&format!("Bearer {key}"))
            .map_err(|e| ChatError::Config(format!("invalid api_key: {e}")))?;
        headers.insert(AUTHORIZATION, value);
    }
    for (name, value) in extra {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ChatError::Config(format!("invalid header name `{name}`: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| ChatError::Config(format!("invalid header value for `{name}`: {e}")))?;
        headers.insert(name, value);
    }
    Ok(headers)
}
