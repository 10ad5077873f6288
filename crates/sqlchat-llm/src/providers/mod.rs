mod gemini;
mod openai;

pub use gemini::GeminiProvider;
pub use openai::{OpenAiProvider, DEFAULT_BASE_URL as OPENAI_DEFAULT_BASE_URL};
