use chatwire_core::{ChatError, ChatResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Which backend protocol a session speaks, with its settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "protocol", rename_all = "snake_case")]
pub enum ProviderConfig {
    /// Prediction endpoint streaming `{event, data}` frames, or a single JSON document.
    Predict(PredictConfig),
    /// Endpoint streaming typed UI message chunks.
    UiStream(UiStreamConfig),
}

impl ProviderConfig {
    /// Short protocol name, for logging.
    pub fn protocol(&self) -> &'static str {
        match self {
            ProviderConfig::Predict(_) => "predict",
            ProviderConfig::UiStream(_) => "ui_stream",
        }
    }

    /// Replaces the API key, e.g. from an environment variable.
    pub fn set_api_key(&mut self, key: impl Into<String>) {
        let key = Some(key.into());
        match self {
            ProviderConfig::Predict(c) => c.api_key = key,
            ProviderConfig::UiStream(c) => c.api_key = key,
        }
    }

    /// Checks that the settings can produce a request.
    pub fn validate(&self) -> ChatResult<()> {
        match self {
            ProviderConfig::Predict(c) => {
                require("base_url", &c.base_url)?;
                require("chatflow_id", &c.chatflow_id)
            }
            ProviderConfig::UiStream(c) => require("endpoint", &c.endpoint),
        }
    }
}

fn require(field: &str, value: &str) -> ChatResult<()> {
    if value.trim().is_empty() {
        return Err(ChatError::Config(format!("`{field}` must not be empty")));
    }
    Ok(())
}

/// Settings for the prediction protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictConfig {
    pub base_url: String,
    pub chatflow_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Free-form map forwarded as `overrideConfig`.
    #[serde(default)]
    pub override_config: serde_json::Map<String, serde_json::Value>,
    #[serde(default = "default_streaming")]
    pub streaming: bool,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default)]
    pub extra_headers: BTreeMap<String, String>,
}

impl PredictConfig {
    /// `{base_url}/api/v1/prediction/{chatflow_id}`
    pub fn prediction_url(&self) -> String {
        format!(
            "{}/api/v1/prediction/{}",
            self.base_url.trim_end_matches('/'),
            self.chatflow_id
        )
    }

    /// Applies the latest flow settings fetched for this backend.
    ///
    /// Keys in `settings.override_config` win over keys already configured.
    pub fn apply_settings(&mut self, settings: FlowSettings) {
        self.chatflow_id = settings.chatflow_id;
        self.override_config.extend(settings.override_config);
    }
}

/// Flow identifier and override map, as served by the settings store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowSettings {
    pub chatflow_id: String,
    #[serde(default)]
    pub override_config: serde_json::Map<String, serde_json::Value>,
}

/// Settings for the UI message stream protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiStreamConfig {
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub extra_headers: BTreeMap<String, String>,
    /// Extra fields merged into every request body.
    #[serde(default)]
    pub body: serde_json::Map<String, serde_json::Value>,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

/// Session-level tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Frames buffered between the reader task and the session.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// Complete client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    pub provider: ProviderConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

impl ChatConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(s: &str) -> ChatResult<Self> {
        let config: ChatConfig =
            toml::from_str(s).map_err(|e| ChatError::Config(e.to_string()))?;
        config.provider.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> ChatResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ChatError::Config(format!(
                "Failed to read config file '{}': {e}",
                path.display()
            ))
        })?;
        Self::from_toml_str(&raw)
    }
}

fn default_streaming() -> bool {
    true
}

fn default_history_limit() -> usize {
    100
}

fn default_channel_capacity() -> usize {
    256
}
