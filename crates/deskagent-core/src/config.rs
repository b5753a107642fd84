use serde::{Deserialize, Serialize};

/// The user-level configuration document.
///
/// Only the shape is defined here; where it lives on disk is the host's
/// business.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_model: Option<String>,
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
    #[serde(default)]
    pub settings: Settings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointConfig {
    pub id: String,
    pub name: String,
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default)]
    pub models: Vec<ModelConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfig {
    pub id: String,
    pub name: String,
    pub max_tokens: u32,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_status: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub auto_approve: bool,
    #[serde(default)]
    pub debug_mode: bool,
    #[serde(default = "default_true")]
    pub stream_response: bool,
    #[serde(default = "default_true")]
    pub auto_save: bool,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_true() -> bool {
    true
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_temperature() -> f32 {
    0.7
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            auto_approve: false,
            debug_mode: false,
            stream_response: true,
            auto_save: true,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

impl AppConfig {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn current_endpoint(&self) -> Option<&EndpointConfig> {
        let id = self.current_endpoint.as_deref()?;
        self.endpoints.iter().find(|endpoint| endpoint.id == id)
    }

    /// Look up a model within an endpoint, honoring its `enabled` flag.
    pub fn resolve_model(&self, endpoint_id: &str, model_id: &str) -> Option<&ModelConfig> {
        self.endpoints
            .iter()
            .find(|endpoint| endpoint.id == endpoint_id)?
            .models
            .iter()
            .find(|model| model.id == model_id && model.enabled)
    }

    /// The context window of the currently selected model, if any.
    pub fn current_context_window(&self) -> Option<u32> {
        let endpoint = self.current_endpoint()?;
        let model_id = self.current_model.as_deref()?;
        endpoint
            .models
            .iter()
            .find(|model| model.id == model_id)
            .map(|model| model.max_tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "currentEndpoint": "local",
        "currentModel": "qwen3-32b",
        "endpoints": [
            {
                "id": "local",
                "name": "Local llama.cpp",
                "baseUrl": "http://127.0.0.1:8080/v1",
                "models": [
                    { "id": "qwen3-32b", "name": "Qwen3 32B", "maxTokens": 128000, "enabled": true },
                    { "id": "old", "name": "Old", "maxTokens": 8192, "enabled": false }
                ]
            }
        ],
        "settings": { "autoApprove": true, "maxTokens": 2048 }
    }"#;

    #[test]
    fn parses_document_with_partial_settings() {
        let config = AppConfig::from_json(SAMPLE).unwrap();
        assert!(config.settings.auto_approve);
        assert_eq!(config.settings.max_tokens, 2048);
        // Defaults fill the omitted fields.
        assert!(config.settings.stream_response);
        assert!((config.settings.temperature - 0.7).abs() < f32::EPSILON);
    }

    #[test]
    fn resolve_model_skips_disabled_models() {
        let config = AppConfig::from_json(SAMPLE).unwrap();
        assert!(config.resolve_model("local", "qwen3-32b").is_some());
        assert!(config.resolve_model("local", "old").is_none());
        assert!(config.resolve_model("missing", "qwen3-32b").is_none());
    }

    #[test]
    fn current_context_window_follows_selection() {
        let config = AppConfig::from_json(SAMPLE).unwrap();
        assert_eq!(config.current_context_window(), Some(128000));
    }

    #[test]
    fn round_trips_through_json() {
        let config = AppConfig::from_json(SAMPLE).unwrap();
        let text = config.to_json().unwrap();
        let reparsed = AppConfig::from_json(&text).unwrap();
        assert_eq!(reparsed.current_model.as_deref(), Some("qwen3-32b"));
        assert_eq!(reparsed.endpoints.len(), 1);
    }
}
