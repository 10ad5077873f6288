//! Text-generation seam. The pipeline only ever sees [`TextGenerator`].

use async_trait::async_trait;
use sqlchat_core::{ConversationTurn, SqlChatError};

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("http error: {0}")]
    Http(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("provider returned no text")]
    Empty,
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        LlmError::Http(e.to_string())
    }
}

impl From<LlmError> for SqlChatError {
    fn from(e: LlmError) -> Self {
        SqlChatError::Generation(e.to_string())
    }
}

/// Synchronous request/response completion over role-tagged turns.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, turns: &[ConversationTurn]) -> Result<String, LlmError>;
    fn name(&self) -> &str;
}
