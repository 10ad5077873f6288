use crate::assistant::{Answer, Assistant};
use crate::config::Config;
use crate::policy::CallPolicy;
use axum::extract::{Json, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlchat_core::{ConversationTurn, SqlChatError};
use sqlchat_db::{ConnectOptions, Connector, MssqlConnector};
use sqlchat_llm::TextGenerator;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Shared by every handler. At most one assistant is live; holding the lock
/// for a whole request keeps questions strictly one at a time.
#[derive(Clone)]
pub struct AppState {
    assistant: Arc<Mutex<Option<Assistant>>>,
    connector: Arc<dyn Connector>,
    generator: Arc<dyn TextGenerator>,
    policy: CallPolicy,
    history_turns: usize,
}

impl AppState {
    pub fn new(
        connector: Arc<dyn Connector>,
        generator: Arc<dyn TextGenerator>,
        policy: CallPolicy,
        history_turns: usize,
    ) -> Self {
        Self {
            assistant: Arc::new(Mutex::new(None)),
            connector,
            generator,
            policy,
            history_turns,
        }
    }

    /// Opens a session and replaces the current assistant, if any. On failure
    /// the previous assistant is left in place.
    pub async fn open(
        &self,
        options: &ConnectOptions,
        target_database: Option<String>,
    ) -> Result<usize, SqlChatError> {
        let mut slot = self.assistant.lock().await;
        info!(descriptor = %options.describe(), "connecting");
        let assistant = Assistant::start(
            self.connector.clone(),
            options.clone(),
            self.generator.clone(),
            self.policy.clone(),
            self.history_turns,
            target_database,
        )
        .await?;
        let tables = assistant.snapshot().len();
        if let Some(previous) = slot.replace(assistant) {
            if let Err(err) = previous.close().await {
                warn!("closing previous session: {err}");
            }
        }
        info!(tables, "connected");
        Ok(tables)
    }

    /// Closes the live session. Returns false when there was none.
    pub async fn shutdown(&self) -> bool {
        let Some(assistant) = self.assistant.lock().await.take() else {
            return false;
        };
        if let Err(err) = assistant.close().await {
            warn!("closing session: {err}");
        }
        true
    }
}

#[derive(Debug)]
pub enum ApiError {
    NotConnected,
    BadRequest(String),
    Chat(SqlChatError),
}

impl From<SqlChatError> for ApiError {
    fn from(err: SqlChatError) -> Self {
        ApiError::Chat(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotConnected => (StatusCode::CONFLICT, "not connected".to_string()),
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Chat(err) => {
                let status = match &err {
                    SqlChatError::Connection(_) | SqlChatError::Generation(_) => {
                        StatusCode::BAD_GATEWAY
                    }
                    SqlChatError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                    SqlChatError::Config(_) => StatusCode::BAD_REQUEST,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, err.to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct ConnectRequest {
    pub server: String,
    pub database: String,
    pub username: String,
    pub password: String,
    pub encrypt: Option<bool>,
    pub trust_certificate: Option<bool>,
    pub target_database: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ConnectResponse {
    pub descriptor: String,
    pub tables: usize,
}

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub question: String,
}

#[derive(Debug, Serialize)]
pub struct SchemaResponse {
    pub tables: Vec<String>,
    pub text: String,
}

pub async fn connect(
    State(state): State<AppState>,
    Json(req): Json<ConnectRequest>,
) -> Result<Json<ConnectResponse>, ApiError> {
    let mut options = ConnectOptions::new(req.server, req.database, req.username, req.password);
    if let Some(encrypt) = req.encrypt {
        options.encrypt = encrypt;
    }
    if let Some(trust) = req.trust_certificate {
        options.trust_certificate = trust;
    }
    let tables = state.open(&options, req.target_database).await?;
    Ok(Json(ConnectResponse {
        descriptor: options.describe(),
        tables,
    }))
}

pub async fn disconnect(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    if state.shutdown().await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotConnected)
    }
}

pub async fn ask(
    State(state): State<AppState>,
    Json(req): Json<AskRequest>,
) -> Result<Json<Answer>, ApiError> {
    let question = req.question.trim();
    if question.is_empty() {
        return Err(ApiError::BadRequest("question must not be empty".into()));
    }
    let mut slot = state.assistant.lock().await;
    let assistant = slot.as_mut().ok_or(ApiError::NotConnected)?;
    Ok(Json(assistant.ask(question).await?))
}

pub async fn history(
    State(state): State<AppState>,
) -> Result<Json<Vec<ConversationTurn>>, ApiError> {
    let slot = state.assistant.lock().await;
    let assistant = slot.as_ref().ok_or(ApiError::NotConnected)?;
    Ok(Json(assistant.history().turns().cloned().collect()))
}

pub async fn clear_history(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    let mut slot = state.assistant.lock().await;
    slot.as_mut().ok_or(ApiError::NotConnected)?.clear_history();
    Ok(StatusCode::NO_CONTENT)
}

pub async fn refresh_schema(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut slot = state.assistant.lock().await;
    let assistant = slot.as_mut().ok_or(ApiError::NotConnected)?;
    let tables = assistant.refresh_schema().await;
    Ok(Json(json!({ "tables": tables })))
}

pub async fn schema(State(state): State<AppState>) -> Result<Json<SchemaResponse>, ApiError> {
    let slot = state.assistant.lock().await;
    let assistant = slot.as_ref().ok_or(ApiError::NotConnected)?;
    Ok(Json(SchemaResponse {
        tables: assistant.snapshot().table_names(),
        text: assistant.schema_text().to_string(),
    }))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/connect", post(connect).delete(disconnect))
        .route("/ask", post(ask))
        .route("/history", get(history))
        .route("/history/clear", post(clear_history))
        .route("/schema", get(schema))
        .route("/schema/refresh", post(refresh_schema))
        .route("/health", get(|| async { "ok" }))
        .with_state(state)
}

pub async fn serve(config: Config) -> anyhow::Result<()> {
    let metrics_handle = PrometheusBuilder::new().install_recorder()?;
    let generator = config.llm.build_generator()?;
    let state = AppState::new(
        Arc::new(MssqlConnector),
        generator,
        config.policy.call_policy(),
        config.history.max_turns,
    );

    if let Some(db) = &config.database {
        let options = db.connect_options()?;
        // the API stays up so a caller can retry through POST /connect
        if let Err(err) = state.open(&options, db.target_database.clone()).await {
            error!("initial connection failed: {err}");
        }
    }

    let app = router(state.clone()).route(
        "/metrics",
        get(move || async move { metrics_handle.render() }),
    );
    let listener = TcpListener::bind(&config.server.listen_addr).await?;
    info!("sqlchat listening on {}", config.server.listen_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!("failed to listen for shutdown signal: {err}");
            }
        })
        .await?;

    state.shutdown().await;
    info!("sqlchat stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assistant::tests::{retail_session, CannedGenerator};
    use sqlchat_db::scripted::ScriptedConnector;

    fn state(sql: &[&str]) -> AppState {
        let connector = ScriptedConnector::new(|options: &ConnectOptions| {
            if options.password == "correct horse" {
                Ok(retail_session())
            } else {
                Err(SqlChatError::Connection(format!(
                    "Login failed for user '{}'.",
                    options.username
                )))
            }
        });
        AppState::new(
            Arc::new(connector),
            Arc::new(CannedGenerator::new(
                sql,
                "Revenue from all sales adds up to roughly three hundred.",
            )),
            CallPolicy::default(),
            10,
        )
    }

    fn connect_request(password: &str) -> ConnectRequest {
        ConnectRequest {
            server: "localhost,1433".into(),
            database: "Retail".into(),
            username: "report_reader".into(),
            password: password.into(),
            encrypt: Some(false),
            trust_certificate: None,
            target_database: Some("Retail".into()),
        }
    }

    #[tokio::test]
    async fn bad_credentials_leave_no_session() {
        let state = state(&[]);
        let err = connect(State(state.clone()), Json(connect_request("wrong")))
            .await
            .unwrap_err();
        match &err {
            ApiError::Chat(SqlChatError::Connection(message)) => {
                assert!(message.contains("Login failed"))
            }
            other => panic!("expected connection error, got {other:?}"),
        }
        assert_eq!(err.into_response().status(), StatusCode::BAD_GATEWAY);

        let err = ask(
            State(state),
            Json(AskRequest {
                question: "total sales amount".into(),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::NotConnected));
    }

    #[tokio::test]
    async fn connect_then_ask() {
        let state = state(&["SELECT SUM(SalesAmount) AS TotalRevenue FROM dbo.Sales"]);
        let Json(connected) = connect(State(state.clone()), Json(connect_request("correct horse")))
            .await
            .unwrap();
        assert_eq!(connected.tables, 1);
        assert!(connected.descriptor.contains("PWD=***"));
        assert!(!connected.descriptor.contains("correct horse"));

        let Json(answer) = ask(
            State(state.clone()),
            Json(AskRequest {
                question: "total sales amount".into(),
            }),
        )
        .await
        .unwrap();
        assert!(!answer.result.is_error());

        let Json(turns) = history(State(state.clone())).await.unwrap();
        assert_eq!(turns.len(), 2);

        let status = clear_history(State(state.clone())).await.unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);
        let Json(turns) = history(State(state.clone())).await.unwrap();
        assert!(turns.is_empty());

        let Json(snapshot) = schema(State(state.clone())).await.unwrap();
        assert_eq!(snapshot.tables, vec!["Retail.dbo.Sales".to_string()]);

        assert_eq!(disconnect(State(state.clone())).await.unwrap(), StatusCode::NO_CONTENT);
        assert!(matches!(
            disconnect(State(state)).await,
            Err(ApiError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn blank_question_is_rejected() {
        let state = state(&[]);
        let err = ask(
            State(state),
            Json(AskRequest {
                question: "   ".into(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn timeouts_map_to_gateway_timeout() {
        let err = ApiError::Chat(SqlChatError::Timeout {
            operation: "sql generation".into(),
            seconds: 60,
        });
        assert_eq!(err.into_response().status(), StatusCode::GATEWAY_TIMEOUT);
    }
}
