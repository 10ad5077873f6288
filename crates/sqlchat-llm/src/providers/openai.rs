//! OpenAI-compatible `/chat/completions` provider (OpenAI, Azure, local gateways).

use crate::provider::{LlmError, TextGenerator};
use async_trait::async_trait;
use serde_json::{json, Value};
use sqlchat_core::{ConversationTurn, Role};
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiProvider {
    pub model: String,
    pub base_url: String,
    pub temperature: f32,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiProvider {
    pub fn new(api_key: &str, model: &str, base_url: &str) -> Self {
        Self {
            model: model.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            temperature: 0.0,
            api_key: api_key.to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn request_body(&self, turns: &[ConversationTurn]) -> Value {
        let messages: Vec<Value> = turns
            .iter()
            .map(|t| {
                let role = match t.role {
                    Role::System => "system",
                    Role::Human => "user",
                    Role::Assistant => "assistant",
                };
                json!({ "role": role, "content": t.text })
            })
            .collect();
        json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
        })
    }

    pub fn parse_response(&self, json: &Value) -> Result<String, LlmError> {
        let text = json
            .pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| LlmError::Parse("missing choices[0].message.content".to_string()))?;
        if text.trim().is_empty() {
            return Err(LlmError::Empty);
        }
        Ok(text.to_string())
    }
}

#[async_trait]
impl TextGenerator for OpenAiProvider {
    async fn generate(&self, turns: &[ConversationTurn]) -> Result<String, LlmError> {
        debug!(model = self.model.as_str(), turns = turns.len(), "openai request");
        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&self.request_body(turns))
            .send()
            .await?
            .error_for_status()?;
        let json: Value = resp.json().await?;
        self.parse_response(&json)
    }

    fn name(&self) -> &str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_keeps_turn_order_and_roles() {
        let p = OpenAiProvider::new("key", "gpt-4o-mini", DEFAULT_BASE_URL);
        let body = p.request_body(&[
            ConversationTurn::system("sys"),
            ConversationTurn::human("q"),
            ConversationTurn::assistant("a"),
        ]);
        let messages = body["messages"].as_array().unwrap();
        let roles: Vec<&str> = messages.iter().map(|m| m["role"].as_str().unwrap()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant"]);
        assert_eq!(body["model"], "gpt-4o-mini");
    }

    #[test]
    fn parse_reads_first_choice() {
        let p = OpenAiProvider::new("key", "m", "http://localhost:11434/v1/");
        assert_eq!(p.base_url, "http://localhost:11434/v1");
        let raw = json!({ "choices": [{ "message": { "content": "SELECT 1" } }] });
        assert_eq!(p.parse_response(&raw).unwrap(), "SELECT 1");
        assert!(p.parse_response(&json!({ "choices": [] })).is_err());
    }
}
