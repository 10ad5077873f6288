use crate::session::{Outcome, SqlSession};
use metrics::counter;
use sqlchat_core::{QueryResult, SqlChatError, StatementResult, Table};
use std::time::Duration;
use tracing::{debug, warn};

/// Splits a script on `;`, trimming fragments and dropping empty ones.
/// The split is purely textual.
pub fn split_statements(script: &str) -> Vec<&str> {
    script
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Runs one statement, giving up after `limit`. A statement cut off this way
/// leaves the session interrupted.
async fn run_within<S: SqlSession + ?Sized>(
    session: &mut S,
    statement: &str,
    limit: Duration,
) -> Result<Outcome, SqlChatError> {
    match tokio::time::timeout(limit, session.run(statement)).await {
        Ok(outcome) => outcome,
        Err(_) => {
            counter!("sqlchat_statement_timeouts_total").increment(1);
            Err(SqlChatError::Timeout {
                operation: "statement".to_string(),
                seconds: limit.as_secs(),
            })
        }
    }
}

/// Runs every fragment of `script` in order against the same session, each
/// under its own `statement_timeout`.
///
/// The result has exactly one entry per fragment; a failing or timed out
/// fragment is recorded as [`StatementResult::Failure`] and the batch moves
/// on. Fragments after a timeout fail with a connection error because the
/// interrupted session refuses them.
pub async fn execute_batch<S: SqlSession + ?Sized>(
    session: &mut S,
    script: &str,
    statement_timeout: Duration,
) -> Vec<StatementResult> {
    let statements = split_statements(script);
    let mut results = Vec::with_capacity(statements.len());
    for (idx, statement) in statements.into_iter().enumerate() {
        counter!("sqlchat_statements_total").increment(1);
        debug!(statement = idx + 1, "executing");
        let result = match run_within(session, statement, statement_timeout).await {
            Ok(Outcome::ResultSet(Table { columns, rows })) => {
                StatementResult::Rows { columns, rows }
            }
            Ok(Outcome::NoResultSet { rows_affected }) => StatementResult::Affected {
                count: rows_affected,
            },
            Err(err) => {
                counter!("sqlchat_statement_errors_total").increment(1);
                warn!(statement = idx + 1, "statement failed: {err}");
                StatementResult::Failure {
                    message: err.to_string(),
                }
            }
        };
        results.push(result);
    }
    results
}

/// Runs one statement under `limit` and returns its rows with exact decimals
/// converted to floats. Errors and timeouts come back as
/// [`QueryResult::Error`] rather than `Err`.
pub async fn execute_single<S: SqlSession + ?Sized>(
    session: &mut S,
    query: &str,
    limit: Duration,
) -> QueryResult {
    counter!("sqlchat_statements_total").increment(1);
    match run_within(session, query, limit).await {
        Ok(Outcome::ResultSet(table)) => QueryResult::Table(table.with_decimals_as_float()),
        // nothing to tabulate; keep the shape so callers render uniformly
        Ok(Outcome::NoResultSet { .. }) => QueryResult::Table(Table::default()),
        Err(err) => {
            counter!("sqlchat_statement_errors_total").increment(1);
            warn!("query failed: {err}");
            QueryResult::Error(format!("SQL execution error: {err}"))
        }
    }
}
