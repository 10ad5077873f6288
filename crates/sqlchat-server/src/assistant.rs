//! The question pipeline: SQL generation, execution, explanation.

use crate::policy::CallPolicy;
use metrics::counter;
use serde::Serialize;
use sqlchat_core::{ConversationHistory, QueryResult, SchemaSnapshot, SqlChatError};
use sqlchat_db::{execute_single, introspect, use_catalog, ConnectOptions, Connector, SqlSession};
use sqlchat_llm::{explanation_request, sql_request, strip_sql_fence, TextGenerator};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Everything produced for one question.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub request_id: Uuid,
    pub question: String,
    pub sql: String,
    pub result: QueryResult,
    pub explanation: String,
}

/// One connected conversation. Owns the session, the schema snapshot taken
/// at connect time and the bounded history.
///
/// A statement cut off by the query timeout leaves the session interrupted;
/// it is then closed and a fresh one opened with the same options before the
/// next statement runs.
pub struct Assistant {
    connector: Arc<dyn Connector>,
    options: ConnectOptions,
    session: Box<dyn SqlSession>,
    generator: Arc<dyn TextGenerator>,
    snapshot: SchemaSnapshot,
    schema_text: String,
    history: ConversationHistory,
    policy: CallPolicy,
    target_database: Option<String>,
}

impl Assistant {
    /// Opens a session and introspects once. Only the connection can fail the
    /// start; introspection problems just shrink the snapshot.
    pub async fn start(
        connector: Arc<dyn Connector>,
        options: ConnectOptions,
        generator: Arc<dyn TextGenerator>,
        policy: CallPolicy,
        history_turns: usize,
        target_database: Option<String>,
    ) -> Result<Self, SqlChatError> {
        let mut session = connector.open(&options).await?;
        let snapshot = introspect(session.as_mut(), target_database.as_deref()).await;
        let schema_text = snapshot.render();
        Ok(Self {
            connector,
            options,
            session,
            generator,
            snapshot,
            schema_text,
            history: ConversationHistory::new(history_turns),
            policy,
            target_database,
        })
    }

    pub async fn ask(&mut self, question: &str) -> Result<Answer, SqlChatError> {
        let request_id = Uuid::new_v4();
        counter!("sqlchat_questions_total").increment(1);
        info!(%request_id, "question received");
        match self.answer(request_id, question).await {
            Ok(answer) => {
                info!(%request_id, failed = answer.result.is_error(), "question answered");
                Ok(answer)
            }
            Err(err) => {
                counter!("sqlchat_question_errors_total").increment(1);
                warn!(%request_id, "question failed: {err}");
                Err(err)
            }
        }
    }

    async fn answer(&mut self, request_id: Uuid, question: &str) -> Result<Answer, SqlChatError> {
        if self.session.is_interrupted() {
            self.reopen().await?;
        }

        let turns = sql_request(&self.history, question, &self.schema_text);
        let raw = self
            .policy
            .generate(self.generator.as_ref(), &turns, "sql")
            .await?;
        let sql = strip_sql_fence(&raw);
        if sql.is_empty() {
            return Err(SqlChatError::Generation(
                "model returned no SQL".to_string(),
            ));
        }
        self.history.record_exchange(question, sql.as_str());

        let result =
            execute_single(self.session.as_mut(), &sql, self.policy.query_timeout).await;
        info!(%request_id, "query executed");
        if self.session.is_interrupted() {
            if let Err(err) = self.reopen().await {
                warn!(%request_id, "reconnect after timeout failed: {err}");
            }
        } else {
            self.return_home().await;
        }

        let turns = explanation_request(question, &sql);
        let explanation = self
            .policy
            .generate(self.generator.as_ref(), &turns, "explanation")
            .await?;

        Ok(Answer {
            request_id,
            question: question.to_string(),
            sql,
            result,
            explanation,
        })
    }

    /// Replaces an interrupted session with a fresh one.
    async fn reopen(&mut self) -> Result<(), SqlChatError> {
        counter!("sqlchat_session_reopens_total").increment(1);
        warn!(descriptor = %self.options.describe(), "session interrupted, reconnecting");
        let fresh = self.connector.open(&self.options).await?;
        let mut stale = std::mem::replace(&mut self.session, fresh);
        if let Err(err) = stale.close().await {
            warn!("closing interrupted session: {err}");
        }
        Ok(())
    }

    /// Undoes any `USE` in generated SQL so the database named in the
    /// schema text stays the one statements run in.
    async fn return_home(&mut self) {
        let Some(home) = self.snapshot.current_catalog().map(str::to_string) else {
            return;
        };
        if let Err(err) = use_catalog(self.session.as_mut(), &home).await {
            warn!(catalog = home.as_str(), "cannot return to the current database: {err}");
        }
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// Takes a new snapshot in place of the one from connect time.
    pub async fn refresh_schema(&mut self) -> usize {
        self.snapshot = introspect(self.session.as_mut(), self.target_database.as_deref()).await;
        self.schema_text = self.snapshot.render();
        self.snapshot.len()
    }

    pub fn snapshot(&self) -> &SchemaSnapshot {
        &self.snapshot
    }

    pub fn schema_text(&self) -> &str {
        &self.schema_text
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub async fn close(mut self) -> Result<(), SqlChatError> {
        self.session.close().await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use sqlchat_core::{ConversationTurn, DataValue, Role, Table};
    use sqlchat_db::scripted::{ScriptedConnector, ScriptedSession};
    use sqlchat_llm::prompt::SQL_SYSTEM_PROMPT;
    use sqlchat_llm::LlmError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Answers the SQL stage from a queue and the explanation stage with a
    /// fixed sentence. Keeps every request it saw.
    pub(crate) struct CannedGenerator {
        sql: Mutex<Vec<String>>,
        explanation: String,
        pub(crate) requests: Mutex<Vec<Vec<ConversationTurn>>>,
    }

    impl CannedGenerator {
        pub(crate) fn new(sql: &[&str], explanation: &str) -> Self {
            Self {
                sql: Mutex::new(sql.iter().rev().map(|s| s.to_string()).collect()),
                explanation: explanation.to_string(),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TextGenerator for CannedGenerator {
        async fn generate(&self, turns: &[ConversationTurn]) -> Result<String, LlmError> {
            self.requests.lock().unwrap().push(turns.to_vec());
            if turns[0].text == SQL_SYSTEM_PROMPT {
                self.sql.lock().unwrap().pop().ok_or(LlmError::Empty)
            } else {
                Ok(self.explanation.clone())
            }
        }

        fn name(&self) -> &str {
            "canned"
        }
    }

    fn text(s: &str) -> DataValue {
        DataValue::String(s.to_string())
    }

    pub(crate) fn retail_session() -> ScriptedSession {
        ScriptedSession::new()
            .connected_to("Retail")
            .on_rows(
                "SUM(SalesAmount)",
                Table::new(
                    vec!["TotalRevenue".into()],
                    vec![vec![DataValue::Decimal("300.75".parse().unwrap())]],
                ),
            )
            .on_rows(
                "INFORMATION_SCHEMA.TABLES",
                Table::new(
                    vec!["TABLE_SCHEMA".into(), "TABLE_NAME".into()],
                    vec![vec![text("dbo"), text("Sales")]],
                ),
            )
            .on_rows(
                "TABLE_NAME = 'Sales'",
                Table::new(
                    vec![
                        "COLUMN_NAME".into(),
                        "DATA_TYPE".into(),
                        "CHARACTER_MAXIMUM_LENGTH".into(),
                        "NUMERIC_PRECISION".into(),
                        "NUMERIC_SCALE".into(),
                    ],
                    vec![
                        vec![
                            text("ProductID"),
                            text("int"),
                            DataValue::Null,
                            DataValue::Int64(10),
                            DataValue::Int64(0),
                        ],
                        vec![
                            text("SalesAmount"),
                            text("decimal"),
                            DataValue::Null,
                            DataValue::Int64(10),
                            DataValue::Int64(2),
                        ],
                    ],
                ),
            )
            .on_rows(
                "FROM [dbo].[Sales]",
                Table::new(
                    vec!["ProductID".into(), "SalesAmount".into()],
                    vec![
                        vec![DataValue::Int64(1), DataValue::Decimal("100.50".parse().unwrap())],
                        vec![DataValue::Int64(2), DataValue::Decimal("200.25".parse().unwrap())],
                    ],
                ),
            )
    }

    const TOTAL_SQL: &str = "```sql\nSELECT SUM(SalesAmount) AS TotalRevenue FROM dbo.Sales;\n```";
    const EXPLANATION: &str = "Total revenue across all recorded sales is about 300.";

    fn options() -> ConnectOptions {
        ConnectOptions::new("localhost,1433", "Retail", "report_reader", "correct horse")
    }

    async fn assistant(generator: Arc<CannedGenerator>) -> Assistant {
        Assistant::start(
            Arc::new(ScriptedConnector::new(|_| Ok(retail_session()))),
            options(),
            generator,
            CallPolicy::default(),
            10,
            Some("Retail".to_string()),
        )
        .await
        .unwrap()
    }

    fn fast_queries() -> CallPolicy {
        CallPolicy {
            query_timeout: Duration::from_millis(50),
            ..CallPolicy::default()
        }
    }

    #[tokio::test]
    async fn answers_total_sales_end_to_end() {
        let generator = Arc::new(CannedGenerator::new(&[TOTAL_SQL], EXPLANATION));
        let mut assistant = assistant(generator.clone()).await;
        assert_eq!(assistant.snapshot().table_names(), vec!["Retail.dbo.Sales"]);

        let answer = assistant.ask("total sales amount").await.unwrap();

        assert_eq!(
            answer.sql,
            "SELECT SUM(SalesAmount) AS TotalRevenue FROM dbo.Sales;"
        );
        assert!(answer.sql.contains("dbo.Sales"));
        let table = answer.result.as_table().expect("rows");
        assert_eq!(table.columns, vec!["TotalRevenue".to_string()]);
        assert_eq!(table.rows, vec![vec![DataValue::Float64(300.75)]]);
        assert!(!answer.explanation.is_empty());
        assert!(!answer.explanation.contains("SELECT"));
        assert_eq!(answer.question, "total sales amount");
    }

    #[tokio::test]
    async fn sql_prompt_carries_schema_and_explanation_prompt_has_no_history() {
        let generator = Arc::new(CannedGenerator::new(&[TOTAL_SQL, TOTAL_SQL], EXPLANATION));
        let mut assistant = assistant(generator.clone()).await;
        assistant.ask("total sales amount").await.unwrap();
        assistant.ask("and again").await.unwrap();

        let requests = generator.requests.lock().unwrap();
        assert_eq!(requests.len(), 4);
        let first_sql = &requests[0];
        let human = first_sql.last().unwrap();
        assert_eq!(human.role, Role::Human);
        assert!(human.text.starts_with("total sales amount\nSchema:\n"));
        assert!(human.text.contains("[SalesAmount] DECIMAL(10,2)"));
        assert!(human.text.contains("-- Current database: Retail"));

        let second_sql = &requests[2];
        assert_eq!(second_sql.len(), 4);
        assert_eq!(second_sql[1], ConversationTurn::human("total sales amount"));

        let explanation = &requests[3];
        assert_eq!(explanation.len(), 2);
        assert!(explanation[1].text.starts_with("User Question: and again\nSQL Query:\n"));
    }

    #[tokio::test]
    async fn history_keeps_the_last_five_exchanges() {
        let sql = [TOTAL_SQL; 6];
        let generator = Arc::new(CannedGenerator::new(&sql, EXPLANATION));
        let mut assistant = assistant(generator).await;
        for n in 1..=6 {
            assistant.ask(&format!("question {n}")).await.unwrap();
        }
        let turns: Vec<_> = assistant.history().turns().collect();
        assert_eq!(turns.len(), 10);
        assert_eq!(turns[0].text, "question 2");
        assert_eq!(turns[9].role, Role::Assistant);

        assistant.clear_history();
        assert!(assistant.history().is_empty());
    }

    #[tokio::test]
    async fn failed_generation_leaves_history_untouched() {
        let generator = Arc::new(CannedGenerator::new(&[], EXPLANATION));
        let mut assistant = assistant(generator).await;
        let err = assistant.ask("anything").await.unwrap_err();
        assert!(matches!(err, SqlChatError::Generation(_)));
        assert!(assistant.history().is_empty());
    }

    #[tokio::test]
    async fn execution_error_is_returned_as_a_result() {
        let generator = Arc::new(CannedGenerator::new(
            &["SELECT * FROM dbo.Missing"],
            EXPLANATION,
        ));
        let mut assistant = assistant(generator).await;
        let answer = assistant.ask("show missing").await.unwrap();
        assert!(answer.result.is_error());
        assert_eq!(assistant.history().len(), 2);
    }

    #[tokio::test]
    async fn refresh_rebuilds_the_snapshot() {
        let generator = Arc::new(CannedGenerator::new(&[], EXPLANATION));
        let mut assistant = assistant(generator).await;
        assert_eq!(assistant.refresh_schema().await, 1);
        assert!(assistant.schema_text().contains("-- Table: Retail.dbo.Sales"));
        assistant.close().await.unwrap();
    }

    #[tokio::test]
    async fn timed_out_query_gets_a_fresh_session() {
        let opens = Arc::new(AtomicUsize::new(0));
        let seen = opens.clone();
        let connector = ScriptedConnector::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(retail_session().stall_on("dbo.Slow", Duration::from_secs(30)))
        });
        let generator = Arc::new(CannedGenerator::new(
            &["SELECT * FROM dbo.Slow", TOTAL_SQL],
            EXPLANATION,
        ));
        let mut assistant = Assistant::start(
            Arc::new(connector),
            options(),
            generator,
            fast_queries(),
            10,
            Some("Retail".to_string()),
        )
        .await
        .unwrap();

        let slow = assistant.ask("the slow report").await.unwrap();
        match &slow.result {
            QueryResult::Error(message) => assert!(message.contains("timed out")),
            other => panic!("expected a timeout, got {other:?}"),
        }
        assert_eq!(opens.load(Ordering::SeqCst), 2);

        let answer = assistant.ask("total sales amount").await.unwrap();
        let table = answer.result.as_table().expect("rows");
        assert_eq!(table.rows, vec![vec![DataValue::Float64(300.75)]]);
    }

    #[tokio::test]
    async fn interrupted_session_is_not_reused_when_reconnect_fails() {
        let opens = Arc::new(AtomicUsize::new(0));
        let seen = opens.clone();
        let connector = ScriptedConnector::new(move |_| {
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(retail_session().stall_on("dbo.Slow", Duration::from_secs(30)))
            } else {
                Err(SqlChatError::Connection("server went away".into()))
            }
        });
        let generator = Arc::new(CannedGenerator::new(
            &["SELECT * FROM dbo.Slow", TOTAL_SQL],
            EXPLANATION,
        ));
        let mut assistant = Assistant::start(
            Arc::new(connector),
            options(),
            generator,
            fast_queries(),
            10,
            Some("Retail".to_string()),
        )
        .await
        .unwrap();

        assert!(assistant.ask("the slow report").await.unwrap().result.is_error());
        let err = assistant.ask("total sales amount").await.unwrap_err();
        assert!(matches!(err, SqlChatError::Connection(_)));
        assert_eq!(opens.load(Ordering::SeqCst), 3);
        assert_eq!(assistant.history().len(), 2);
    }
}
