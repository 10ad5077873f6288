use crate::connector::ConnectOptions;
use async_trait::async_trait;
use sqlchat_core::{SqlChatError, Table};

/// What a single statement produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// First result set of the statement.
    ResultSet(Table),
    /// No result set; DDL or a mutation.
    NoResultSet { rows_affected: u64 },
}

/// An open, authenticated database session. Owned by whoever opened it and
/// released with [`SqlSession::close`].
#[async_trait]
pub trait SqlSession: Send {
    /// Runs one statement in the current session context.
    async fn run(&mut self, sql: &str) -> Result<Outcome, SqlChatError>;

    /// Runs a read-only query with positional `@P1..@Pn` parameters and
    /// returns its first result set.
    async fn query(&mut self, sql: &str, params: &[&str]) -> Result<Table, SqlChatError>;

    async fn close(&mut self) -> Result<(), SqlChatError>;

    /// True once a statement was abandoned before the server finished
    /// answering it. Such a session refuses further statements and should be
    /// replaced.
    fn is_interrupted(&self) -> bool {
        false
    }
}

/// Opens sessions. Lets callers swap the live driver for something else.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, options: &ConnectOptions) -> Result<Box<dyn SqlSession>, SqlChatError>;
}
