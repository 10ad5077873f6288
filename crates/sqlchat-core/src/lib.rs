pub mod catalog;
pub mod error;
pub mod history;
pub mod types;

pub use catalog::{ColumnDescriptor, SampleRow, SchemaSnapshot, TableSchema, SAMPLE_ROW_LIMIT};
pub use error::SqlChatError;
pub use history::{ConversationHistory, ConversationTurn, Role, DEFAULT_HISTORY_TURNS};
pub use types::{DataValue, QueryResult, StatementResult, Table};
