use serde::{Deserialize, Serialize};

use super::Mode;

/// Payload sent to the completion service for one interaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_text: Option<String>,
    pub prompt: String,
    pub mode: Mode,
}

/// Image-mode response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageResult {
    pub image_url: String,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub aspect_ratio: Option<String>,
}

/// Body of a non-2xx response: `{error, details?, code?}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceErrorBody {
    #[serde(default)]
    pub error: Option<serde_json::Value>,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub code: Option<serde_json::Value>,
}

impl ServiceErrorBody {
    /// `error ?? details ?? "unknown"`; OpenAI-style `{error: {message}}` is unwrapped.
    pub fn message(&self) -> String {
        let error = self.error.as_ref().and_then(|value| match value {
            serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
            serde_json::Value::Object(map) => map
                .get("message")
                .and_then(|m| m.as_str())
                .map(|s| s.to_string()),
            _ => None,
        });

        error
            .or_else(|| self.details.clone().filter(|d| !d.is_empty()))
            .unwrap_or_else(|| "unknown".to_string())
    }
}
