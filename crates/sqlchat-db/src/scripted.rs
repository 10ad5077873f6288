//! In-memory [`SqlSession`] that answers from canned rules. Stands in for a
//! live server in tests.

use crate::connector::ConnectOptions;
use crate::session::{Connector, Outcome, SqlSession};
use async_trait::async_trait;
use sqlchat_core::{DataValue, SqlChatError, Table};
use std::time::Duration;

#[derive(Debug, Clone)]
enum Reply {
    Outcome(Outcome),
    Fail(String),
    /// Never answers within a reasonable timeout.
    Stall(Duration),
}

#[derive(Debug, Clone)]
struct Rule {
    fragment: String,
    catalog: Option<String>,
    reply: Reply,
}

/// Rules are checked in insertion order; the first rule whose fragment occurs
/// in the statement (with parameters bound as quoted literals) wins.
/// `USE [name]` and `DB_NAME()` are handled natively against the registered
/// catalogs. Dropping a stalled statement before it finishes leaves the
/// session interrupted, as with a live server.
#[derive(Debug, Default)]
pub struct ScriptedSession {
    rules: Vec<Rule>,
    catalogs: Vec<String>,
    current: Option<String>,
    executed: Vec<String>,
    closed: bool,
    in_flight: bool,
}

impl ScriptedSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a catalog that `USE` may switch to.
    pub fn catalog(mut self, name: &str) -> Self {
        self.catalogs.push(name.to_string());
        self
    }

    /// Registers `name` and starts the session in it.
    pub fn connected_to(mut self, name: &str) -> Self {
        self.current = Some(name.to_string());
        self.catalog(name)
    }

    pub fn on(self, fragment: &str, outcome: Outcome) -> Self {
        self.rule(fragment, None, Reply::Outcome(outcome))
    }

    pub fn on_rows(self, fragment: &str, table: Table) -> Self {
        self.on(fragment, Outcome::ResultSet(table))
    }

    pub fn fail_on(self, fragment: &str, message: &str) -> Self {
        self.rule(fragment, None, Reply::Fail(message.to_string()))
    }

    /// Statements matching `fragment` sleep for `delay` before failing.
    pub fn stall_on(self, fragment: &str, delay: Duration) -> Self {
        self.rule(fragment, None, Reply::Stall(delay))
    }

    /// Like [`ScriptedSession::on_rows`] but only while `catalog` is current.
    pub fn on_rows_in(self, catalog: &str, fragment: &str, table: Table) -> Self {
        self.rule(
            fragment,
            Some(catalog.to_string()),
            Reply::Outcome(Outcome::ResultSet(table)),
        )
    }

    fn rule(mut self, fragment: &str, catalog: Option<String>, reply: Reply) -> Self {
        self.rules.push(Rule {
            fragment: fragment.to_string(),
            catalog,
            reply,
        });
        self
    }

    /// Every statement seen so far, parameters bound.
    pub fn executed(&self) -> &[String] {
        &self.executed
    }

    pub fn current_catalog(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    async fn answer(&mut self, sql: String) -> Result<Outcome, SqlChatError> {
        if self.closed {
            return Err(SqlChatError::Connection("session is closed".into()));
        }
        if self.in_flight {
            return Err(SqlChatError::Connection(
                "session was interrupted mid-statement".into(),
            ));
        }
        self.executed.push(sql.clone());

        if sql.contains("DB_NAME()") {
            let name = self.current.clone().map_or(DataValue::Null, DataValue::String);
            return Ok(Outcome::ResultSet(Table::new(
                vec!["name".into()],
                vec![vec![name]],
            )));
        }

        if let Some(name) = use_target(&sql) {
            if self.catalogs.iter().any(|c| c == &name) {
                self.current = Some(name);
                return Ok(Outcome::NoResultSet { rows_affected: 0 });
            }
            return Err(SqlChatError::Statement(format!(
                "Database '{name}' does not exist. Make sure that the name is entered correctly."
            )));
        }

        let current = self.current.as_deref();
        let rule = self.rules.iter().find(|rule| {
            sql.contains(&rule.fragment)
                && rule
                    .catalog
                    .as_deref()
                    .map_or(true, |c| Some(c) == current)
        });
        match rule.map(|r| r.reply.clone()) {
            Some(Reply::Outcome(outcome)) => Ok(outcome),
            Some(Reply::Fail(message)) => Err(SqlChatError::Statement(message)),
            Some(Reply::Stall(delay)) => {
                self.in_flight = true;
                tokio::time::sleep(delay).await;
                self.in_flight = false;
                Err(SqlChatError::Statement(format!(
                    "statement stalled for {delay:?}"
                )))
            }
            None => Err(SqlChatError::Statement(format!(
                "no scripted response for: {sql}"
            ))),
        }
    }
}

fn use_target(sql: &str) -> Option<String> {
    let rest = sql.trim().strip_prefix("USE ")?.trim();
    let name = rest.strip_prefix('[')?.strip_suffix(']')?;
    Some(name.replace("]]", "]"))
}

fn bind(sql: &str, params: &[&str]) -> String {
    let mut bound = sql.to_string();
    // highest index first so @P1 never eats part of @P10
    for (idx, value) in params.iter().enumerate().rev() {
        let literal = format!("'{}'", value.replace('\'', "''"));
        bound = bound.replace(&format!("@P{}", idx + 1), &literal);
    }
    bound
}

#[async_trait]
impl SqlSession for ScriptedSession {
    async fn run(&mut self, sql: &str) -> Result<Outcome, SqlChatError> {
        self.answer(sql.to_string()).await
    }

    async fn query(&mut self, sql: &str, params: &[&str]) -> Result<Table, SqlChatError> {
        match self.answer(bind(sql, params)).await {
            Ok(Outcome::ResultSet(table)) => Ok(table),
            Ok(Outcome::NoResultSet { .. }) => Ok(Table::default()),
            Err(SqlChatError::Statement(message)) => Err(SqlChatError::Introspection(message)),
            Err(other) => Err(other),
        }
    }

    async fn close(&mut self) -> Result<(), SqlChatError> {
        self.closed = true;
        Ok(())
    }

    fn is_interrupted(&self) -> bool {
        self.in_flight
    }
}

type SessionFactory =
    Box<dyn Fn(&ConnectOptions) -> Result<ScriptedSession, SqlChatError> + Send + Sync>;

/// [`Connector`] that builds a fresh [`ScriptedSession`] per open.
pub struct ScriptedConnector {
    factory: SessionFactory,
}

impl ScriptedConnector {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(&ConnectOptions) -> Result<ScriptedSession, SqlChatError> + Send + Sync + 'static,
    {
        Self {
            factory: Box::new(factory),
        }
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn open(&self, options: &ConnectOptions) -> Result<Box<dyn SqlSession>, SqlChatError> {
        let session = (self.factory)(options)?;
        Ok(Box::new(session))
    }
}
