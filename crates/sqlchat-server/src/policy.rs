//! Timeouts and retries around the blocking calls of a question.

use metrics::counter;
use sqlchat_core::{ConversationTurn, SqlChatError};
use sqlchat_llm::{LlmError, TextGenerator};
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct CallPolicy {
    pub generation_timeout: Duration,
    pub query_timeout: Duration,
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self {
            generation_timeout: Duration::from_secs(60),
            query_timeout: Duration::from_secs(120),
            max_retries: 2,
            backoff: Duration::from_millis(500),
        }
    }
}

impl CallPolicy {
    /// Delay before retry number `attempt` (1-based), doubling each time.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.backoff
            .saturating_mul(1u32 << attempt.saturating_sub(1).min(16))
    }

    /// One text generation with a per-attempt timeout. Transport failures and
    /// timeouts are retried up to `max_retries` times; a malformed or empty
    /// response is not.
    pub async fn generate(
        &self,
        generator: &dyn TextGenerator,
        turns: &[ConversationTurn],
        stage: &str,
    ) -> Result<String, SqlChatError> {
        let mut attempt = 0u32;
        loop {
            let err = match tokio::time::timeout(self.generation_timeout, generator.generate(turns))
                .await
            {
                Ok(Ok(text)) => return Ok(text),
                Ok(Err(err @ LlmError::Http(_))) => SqlChatError::from(err),
                Ok(Err(err)) => return Err(err.into()),
                Err(_) => SqlChatError::Timeout {
                    operation: format!("{stage} generation"),
                    seconds: self.generation_timeout.as_secs(),
                },
            };
            if attempt >= self.max_retries {
                return Err(err);
            }
            attempt += 1;
            counter!("sqlchat_generation_retries_total").increment(1);
            warn!(stage, attempt, provider = generator.name(), "retrying generation: {err}");
            tokio::time::sleep(self.backoff_for(attempt)).await;
        }
    }
}
