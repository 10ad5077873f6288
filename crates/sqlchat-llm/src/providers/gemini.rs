//! Google Gemini `generateContent` provider.

use crate::provider::{LlmError, TextGenerator};
use async_trait::async_trait;
use serde_json::{json, Value};
use sqlchat_core::{ConversationTurn, Role};
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiProvider {
    pub model: String,
    pub base_url: String,
    pub temperature: f32,
    api_key: String,
    client: reqwest::Client,
}

impl GeminiProvider {
    pub fn new(api_key: &str, model: &str) -> Self {
        Self {
            model: model.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            temperature: 0.0,
            api_key: api_key.to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// System turns go to `systemInstruction`; the rest become `user`/`model`
    /// contents in order.
    pub fn request_body(&self, turns: &[ConversationTurn]) -> Value {
        let system: Vec<&str> = turns
            .iter()
            .filter(|t| t.role == Role::System)
            .map(|t| t.text.as_str())
            .collect();
        let contents: Vec<Value> = turns
            .iter()
            .filter_map(|t| {
                let role = match t.role {
                    Role::System => return None,
                    Role::Human => "user",
                    Role::Assistant => "model",
                };
                Some(json!({ "role": role, "parts": [{ "text": t.text }] }))
            })
            .collect();

        let mut body = json!({
            "contents": contents,
            "generationConfig": { "temperature": self.temperature },
        });
        if !system.is_empty() {
            body["systemInstruction"] = json!({ "parts": [{ "text": system.join("\n\n") }] });
        }
        body
    }

    pub fn parse_response(&self, json: &Value) -> Result<String, LlmError> {
        let parts = json
            .pointer("/candidates/0/content/parts")
            .and_then(|v| v.as_array())
            .ok_or_else(|| LlmError::Parse("missing candidates[0].content.parts".to_string()))?;
        let text: String = parts
            .iter()
            .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
            .collect();
        if text.trim().is_empty() {
            return Err(LlmError::Empty);
        }
        Ok(text)
    }
}

#[async_trait]
impl TextGenerator for GeminiProvider {
    async fn generate(&self, turns: &[ConversationTurn]) -> Result<String, LlmError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        debug!(model = self.model.as_str(), turns = turns.len(), "gemini request");
        let resp = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&self.request_body(turns))
            .send()
            .await?
            .error_for_status()?;
        let json: Value = resp.json().await?;
        self.parse_response(&json)
    }

    fn name(&self) -> &str {
        "gemini"
    }
}
