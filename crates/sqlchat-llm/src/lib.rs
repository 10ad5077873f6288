pub mod prompt;
pub mod provider;
pub mod providers;

pub use prompt::{explanation_request, sql_request, strip_sql_fence};
pub use provider::{LlmError, TextGenerator};
pub use providers::{GeminiProvider, OpenAiProvider, OPENAI_DEFAULT_BASE_URL};
