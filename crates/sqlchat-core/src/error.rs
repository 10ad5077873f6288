use thiserror::Error;

#[derive(Debug, Error)]
pub enum SqlChatError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("introspection error: {0}")]
    Introspection(String),
    #[error("statement error: {0}")]
    Statement(String),
    #[error("generation error: {0}")]
    Generation(String),
    #[error("execution error: {0}")]
    Execution(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },
}
