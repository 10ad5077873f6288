use crate::session::{Connector, Outcome, SqlSession};
use async_trait::async_trait;
use futures_util::TryStreamExt;
use rust_decimal::Decimal;
use sqlchat_core::{DataValue, SqlChatError, Table};
use std::fmt;
use tiberius::numeric::Numeric;
use tiberius::time::chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use tiberius::{
    AuthMethod, Client, ColumnData, Config, EncryptionLevel, FromSql, QueryItem, QueryStream,
    SqlBrowser, ToSql,
};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info};

const DRIVER_NAME: &str = "tiberius (TDS 7.3)";
const ROWS_AFFECTED_COLUMN: &str = "__sqlchat_rows_affected";

type TdsClient = Client<Compat<TcpStream>>;

/// Where the server lives, parsed from the user-supplied server string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerAddress {
    Host { host: String, port: Option<u16> },
    /// `host\INSTANCE`, resolved through the SQL Browser service.
    Named { host: String, instance: String },
}

impl ServerAddress {
    pub fn parse(server: &str) -> Result<Self, SqlChatError> {
        let trimmed = server.trim();
        let trimmed = trimmed.strip_prefix("tcp:").unwrap_or(trimmed);
        if trimmed.is_empty() {
            return Err(SqlChatError::Connection("server address is empty".into()));
        }
        if let Some((host, instance)) = trimmed.split_once('\\') {
            if instance.is_empty() {
                return Err(SqlChatError::Connection(format!(
                    "missing instance name in {server}"
                )));
            }
            return Ok(ServerAddress::Named {
                host: normalize_host(host),
                instance: instance.to_string(),
            });
        }
        let split = trimmed.split_once(',').or_else(|| trimmed.split_once(':'));
        match split {
            Some((host, port)) => {
                let port = port.trim().parse::<u16>().map_err(|_| {
                    SqlChatError::Connection(format!("invalid port in server address {server}"))
                })?;
                Ok(ServerAddress::Host {
                    host: normalize_host(host),
                    port: Some(port),
                })
            }
            None => Ok(ServerAddress::Host {
                host: normalize_host(trimmed),
                port: None,
            }),
        }
    }
}

fn normalize_host(host: &str) -> String {
    match host.trim() {
        "." | "(local)" | "" => "localhost".to_string(),
        other => other.to_string(),
    }
}

/// Everything needed to open a session. The password never shows up in
/// `Debug` output or in [`ConnectOptions::describe`].
#[derive(Clone)]
pub struct ConnectOptions {
    pub server: String,
    pub database: String,
    pub username: String,
    pub password: String,
    pub encrypt: bool,
    pub trust_certificate: bool,
}

impl ConnectOptions {
    pub fn new(
        server: impl Into<String>,
        database: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            server: server.into(),
            database: database.into(),
            username: username.into(),
            password: password.into(),
            encrypt: true,
            trust_certificate: true,
        }
    }

    /// Connection descriptor in the usual key=value form, password redacted.
    pub fn describe(&self) -> String {
        format!(
            "DRIVER={{{}}};SERVER={};DATABASE={};UID={};PWD=***;Encrypt={};TrustServerCertificate={};",
            DRIVER_NAME,
            self.server,
            self.database,
            self.username,
            yes_no(self.encrypt),
            yes_no(self.trust_certificate),
        )
    }

    fn tds_config(&self, address: &ServerAddress) -> Config {
        let mut config = Config::new();
        match address {
            ServerAddress::Host { host, port } => {
                config.host(host);
                if let Some(port) = port {
                    config.port(*port);
                }
            }
            ServerAddress::Named { host, instance } => {
                config.host(host);
                config.instance_name(instance);
            }
        }
        config.database(&self.database);
        config.authentication(AuthMethod::sql_server(&self.username, &self.password));
        config.encryption(if self.encrypt {
            EncryptionLevel::Required
        } else {
            EncryptionLevel::Off
        });
        if self.trust_certificate {
            config.trust_cert();
        }
        config
    }
}

impl fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("server", &self.server)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"***")
            .field("encrypt", &self.encrypt)
            .field("trust_certificate", &self.trust_certificate)
            .finish()
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

/// Opens an authenticated session. No retry, no pooling: a failure yields a
/// `Connection` error and no session.
pub async fn connect(options: &ConnectOptions) -> Result<MssqlSession, SqlChatError> {
    let address = ServerAddress::parse(&options.server)?;
    let config = options.tds_config(&address);
    debug!("connecting with {}", options.describe());

    let tcp = match &address {
        ServerAddress::Named { .. } => TcpStream::connect_named(&config)
            .await
            .map_err(|e| SqlChatError::Connection(e.to_string()))?,
        ServerAddress::Host { .. } => TcpStream::connect(config.get_addr())
            .await
            .map_err(|e| SqlChatError::Connection(e.to_string()))?,
    };
    tcp.set_nodelay(true)
        .map_err(|e| SqlChatError::Connection(e.to_string()))?;

    let client = Client::connect(config, tcp.compat_write())
        .await
        .map_err(|e| SqlChatError::Connection(e.to_string()))?;
    info!(
        server = options.server.as_str(),
        database = options.database.as_str(),
        "connected"
    );
    Ok(MssqlSession {
        client: Some(client),
        database: options.database.clone(),
        in_flight: false,
    })
}

/// [`Connector`] backed by [`connect`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MssqlConnector;

#[async_trait]
impl Connector for MssqlConnector {
    async fn open(&self, options: &ConnectOptions) -> Result<Box<dyn SqlSession>, SqlChatError> {
        let session = connect(options).await?;
        Ok(Box::new(session))
    }
}

/// Live SQL Server session over TDS.
///
/// A request whose future is dropped before its results are drained leaves
/// unread tokens on the wire. `in_flight` stays set in that case and the
/// client is discarded on the next use instead of being read out of step.
pub struct MssqlSession {
    client: Option<TdsClient>,
    database: String,
    in_flight: bool,
}

impl MssqlSession {
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Marks a request as started and hands out the client along with the
    /// flag to clear once the response has been drained.
    fn begin(&mut self) -> Result<(&mut TdsClient, &mut bool), SqlChatError> {
        if self.in_flight {
            self.client = None;
            return Err(SqlChatError::Connection(
                "session was interrupted mid-statement; reconnect".into(),
            ));
        }
        let client = self
            .client
            .as_mut()
            .ok_or_else(|| SqlChatError::Connection("session is closed".into()))?;
        self.in_flight = true;
        Ok((client, &mut self.in_flight))
    }
}

#[async_trait]
impl SqlSession for MssqlSession {
    async fn run(&mut self, sql: &str) -> Result<Outcome, SqlChatError> {
        // A trailing ROWCOUNT_BIG() select tells mutations apart from queries
        // that return zero rows. Module definitions must stay alone in their batch.
        let batch = if must_run_alone(sql) {
            sql.to_string()
        } else {
            format!("{sql}\n;SELECT ROWCOUNT_BIG() AS [{ROWS_AFFECTED_COLUMN}]")
        };
        let (client, in_flight) = self.begin()?;
        let sets = simple_result_sets(client, batch).await;
        *in_flight = false;
        let sets = sets.map_err(|e| SqlChatError::Statement(e.to_string()))?;

        let outcome = match sets.into_iter().next() {
            Some(set) if is_rows_affected_marker(&set) => Outcome::NoResultSet {
                rows_affected: marker_count(&set),
            },
            Some(set) => Outcome::ResultSet(set),
            None => Outcome::NoResultSet { rows_affected: 0 },
        };
        Ok(outcome)
    }

    async fn query(&mut self, sql: &str, params: &[&str]) -> Result<Table, SqlChatError> {
        let params: Vec<&dyn ToSql> = params.iter().map(|p| p as &dyn ToSql).collect();
        let (client, in_flight) = self.begin()?;
        let sets = param_result_sets(client, sql, &params).await;
        *in_flight = false;
        let sets = sets.map_err(|e| SqlChatError::Introspection(e.to_string()))?;
        Ok(sets.into_iter().next().unwrap_or_default())
    }

    async fn close(&mut self) -> Result<(), SqlChatError> {
        if self.in_flight {
            // the stream is mid-response; drop the socket without a goodbye
            self.client = None;
            self.in_flight = false;
            info!(database = self.database.as_str(), "interrupted session dropped");
            return Ok(());
        }
        if let Some(client) = self.client.take() {
            client
                .close()
                .await
                .map_err(|e| SqlChatError::Connection(e.to_string()))?;
            info!(database = self.database.as_str(), "session closed");
        }
        Ok(())
    }

    fn is_interrupted(&self) -> bool {
        self.in_flight
    }
}

async fn simple_result_sets(client: &mut TdsClient, batch: String) -> tiberius::Result<Vec<Table>> {
    let stream = client.simple_query(batch).await?;
    collect_result_sets(stream).await
}

async fn param_result_sets(
    client: &mut TdsClient,
    sql: &str,
    params: &[&dyn ToSql],
) -> tiberius::Result<Vec<Table>> {
    let stream = client.query(sql, params).await?;
    collect_result_sets(stream).await
}

fn must_run_alone(sql: &str) -> bool {
    let upper = sql.trim_start().to_ascii_uppercase();
    let words: Vec<&str> = upper.split_whitespace().take(4).collect();
    let object = match words.as_slice() {
        ["CREATE", "OR", "ALTER", object, ..] => *object,
        ["CREATE", object, ..] | ["ALTER", object, ..] => *object,
        _ => return false,
    };
    matches!(
        object,
        "VIEW" | "PROC" | "PROCEDURE" | "FUNCTION" | "TRIGGER" | "SCHEMA"
    )
}

fn is_rows_affected_marker(set: &Table) -> bool {
    set.columns.len() == 1 && set.columns[0] == ROWS_AFFECTED_COLUMN
}

fn marker_count(set: &Table) -> u64 {
    match set.rows.first().and_then(|row| row.first()) {
        Some(DataValue::Int64(n)) => (*n).max(0) as u64,
        _ => 0,
    }
}

async fn collect_result_sets(mut stream: QueryStream<'_>) -> tiberius::Result<Vec<Table>> {
    let mut sets: Vec<Table> = Vec::new();
    while let Some(item) = stream.try_next().await? {
        match item {
            QueryItem::Metadata(meta) => {
                let columns = meta
                    .columns()
                    .iter()
                    .map(|c| c.name().to_string())
                    .collect();
                sets.push(Table::new(columns, Vec::new()));
            }
            QueryItem::Row(row) => {
                let values = row
                    .into_iter()
                    .map(cell_value)
                    .collect::<tiberius::Result<Vec<_>>>()?;
                if let Some(set) = sets.last_mut() {
                    set.rows.push(values);
                }
            }
        }
    }
    Ok(sets)
}

fn cell_value(data: ColumnData<'static>) -> tiberius::Result<DataValue> {
    let value = match &data {
        ColumnData::U8(v) => v.map(|v| DataValue::Int64(v.into())),
        ColumnData::I16(v) => v.map(|v| DataValue::Int64(v.into())),
        ColumnData::I32(v) => v.map(|v| DataValue::Int64(v.into())),
        ColumnData::I64(v) => v.map(DataValue::Int64),
        ColumnData::F32(v) => v.map(|v| DataValue::Float64(v.into())),
        ColumnData::F64(v) => v.map(DataValue::Float64),
        ColumnData::Bit(v) => v.map(DataValue::Bool),
        ColumnData::String(v) => v.as_ref().map(|s| DataValue::String(s.to_string())),
        ColumnData::Guid(v) => v.map(|g| DataValue::String(g.to_string())),
        ColumnData::Binary(v) => v.as_ref().map(|b| DataValue::Bytes(b.to_vec())),
        ColumnData::Numeric(v) => v.clone().map(numeric_value),
        ColumnData::Xml(v) => v
            .as_ref()
            .map(|x| DataValue::String(x.clone().into_owned().into_string())),
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            NaiveDateTime::from_sql(&data)?.map(|d| DataValue::String(d.to_string()))
        }
        ColumnData::Date(_) => NaiveDate::from_sql(&data)?.map(|d| DataValue::String(d.to_string())),
        ColumnData::Time(_) => NaiveTime::from_sql(&data)?.map(|t| DataValue::String(t.to_string())),
        ColumnData::DateTimeOffset(_) => {
            DateTime::<FixedOffset>::from_sql(&data)?.map(|d| DataValue::String(d.to_string()))
        }
        #[allow(unreachable_patterns)]
        other => Some(DataValue::String(format!("{other:?}"))),
    };
    Ok(value.unwrap_or(DataValue::Null))
}

fn numeric_value(n: Numeric) -> DataValue {
    match Decimal::try_from_i128_with_scale(n.value(), u32::from(n.scale())) {
        Ok(d) => DataValue::Decimal(d),
        // beyond 28 digits of scale; keep the magnitude
        Err(_) => DataValue::Float64(n.value() as f64 / 10f64.powi(i32::from(n.scale()))),
    }
}
