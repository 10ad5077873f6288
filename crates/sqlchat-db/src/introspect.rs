use crate::session::{Outcome, SqlSession};
use metrics::counter;
use sqlchat_core::{
    ColumnDescriptor, DataValue, SampleRow, SchemaSnapshot, SqlChatError, Table, TableSchema,
    SAMPLE_ROW_LIMIT,
};
use tracing::{error, info, warn};

/// Catalogs that are never scanned when no target database is given.
pub const SYSTEM_CATALOGS: [&str; 4] = ["master", "tempdb", "model", "msdb"];

pub(crate) const CURRENT_CATALOG_QUERY: &str = "SELECT DB_NAME() AS name";

const TABLES_QUERY: &str = "SELECT TABLE_SCHEMA, TABLE_NAME \
     FROM INFORMATION_SCHEMA.TABLES \
     WHERE TABLE_TYPE = 'BASE TABLE' \
     ORDER BY TABLE_SCHEMA, TABLE_NAME";

const COLUMNS_QUERY: &str = "SELECT COLUMN_NAME, DATA_TYPE, CHARACTER_MAXIMUM_LENGTH, \
     NUMERIC_PRECISION, NUMERIC_SCALE \
     FROM INFORMATION_SCHEMA.COLUMNS \
     WHERE TABLE_SCHEMA = @P1 AND TABLE_NAME = @P2 \
     ORDER BY ORDINAL_POSITION";

/// Builds a fresh snapshot of every base table reachable from the session.
///
/// With `target_database` only that catalog is scanned; otherwise every
/// catalog except [`SYSTEM_CATALOGS`]. Failures never propagate: a catalog
/// that cannot be entered is skipped, a table whose samples cannot be read is
/// kept with no samples, and a failure to enumerate catalogs yields an empty
/// snapshot.
///
/// The scan moves between catalogs with `USE`; afterwards the session is put
/// back in the catalog it started in, which the snapshot records as current.
pub async fn introspect<S: SqlSession + ?Sized>(
    session: &mut S,
    target_database: Option<&str>,
) -> SchemaSnapshot {
    let home = match current_catalog(session).await {
        Ok(home) => home,
        Err(err) => {
            warn!("cannot read the current database: {err}");
            None
        }
    };

    let mut snapshot = scan(session, target_database).await;

    if let Some(home) = &home {
        if let Err(err) = use_catalog(session, home).await {
            error!(catalog = home.as_str(), "cannot return to the starting database: {err}");
        }
    }
    snapshot.set_current_catalog(home);
    snapshot
}

async fn scan<S: SqlSession + ?Sized>(
    session: &mut S,
    target_database: Option<&str>,
) -> SchemaSnapshot {
    let mut snapshot = SchemaSnapshot::new();
    let catalogs = match target_database {
        Some(db) => vec![db.to_string()],
        None => match list_catalogs(session).await {
            Ok(catalogs) => catalogs,
            Err(err) => {
                error!("failed to enumerate catalogs: {err}");
                return snapshot;
            }
        },
    };

    for catalog in &catalogs {
        info!(catalog = catalog.as_str(), "scanning catalog");
        if let Err(err) = introspect_catalog(session, catalog, &mut snapshot).await {
            warn!(catalog = catalog.as_str(), "skipping catalog: {err}");
        }
    }
    info!(
        catalogs = catalogs.len(),
        tables = snapshot.len(),
        "schema introspection finished"
    );
    snapshot
}

/// Name of the catalog the session is in, `None` when the server reports none.
pub async fn current_catalog<S: SqlSession + ?Sized>(
    session: &mut S,
) -> Result<Option<String>, SqlChatError> {
    let table = session.query(CURRENT_CATALOG_QUERY, &[]).await?;
    Ok(table.rows.first().and_then(|row| text_at(row, 0)))
}

/// Switches the session's database context.
pub async fn use_catalog<S: SqlSession + ?Sized>(
    session: &mut S,
    catalog: &str,
) -> Result<(), SqlChatError> {
    session
        .run(&format!("USE {}", quote_ident(catalog)))
        .await
        .map(|_| ())
        .map_err(|e| SqlChatError::Introspection(format!("cannot switch to {catalog}: {e}")))
}

pub(crate) fn catalogs_query() -> String {
    let excluded: Vec<String> = SYSTEM_CATALOGS.iter().map(|c| format!("'{c}'")).collect();
    format!(
        "SELECT name FROM sys.databases WHERE name NOT IN ({}) ORDER BY name",
        excluded.join(", ")
    )
}

async fn list_catalogs<S: SqlSession + ?Sized>(session: &mut S) -> Result<Vec<String>, SqlChatError> {
    let table = session.query(&catalogs_query(), &[]).await?;
    Ok(table
        .rows
        .iter()
        .filter_map(|row| text_at(row, 0))
        .collect())
}

async fn introspect_catalog<S: SqlSession + ?Sized>(
    session: &mut S,
    catalog: &str,
    snapshot: &mut SchemaSnapshot,
) -> Result<(), SqlChatError> {
    use_catalog(session, catalog).await?;

    let tables = session.query(TABLES_QUERY, &[]).await?;
    for row in &tables.rows {
        let (Some(schema), Some(table)) = (text_at(row, 0), text_at(row, 1)) else {
            continue;
        };
        let columns = match list_columns(session, &schema, &table).await {
            Ok(columns) => columns,
            Err(err) => {
                warn!(
                    catalog,
                    table = %format!("{schema}.{table}"),
                    "skipping table, column metadata unavailable: {err}"
                );
                continue;
            }
        };
        let samples = fetch_samples(session, catalog, &schema, &table).await;
        snapshot.insert(TableSchema::new(catalog, &schema, &table, columns, samples));
    }
    Ok(())
}

async fn list_columns<S: SqlSession + ?Sized>(
    session: &mut S,
    schema: &str,
    table: &str,
) -> Result<Vec<ColumnDescriptor>, SqlChatError> {
    let result = session.query(COLUMNS_QUERY, &[schema, table]).await?;
    Ok(result
        .rows
        .iter()
        .filter_map(|row| {
            Some(ColumnDescriptor {
                name: text_at(row, 0)?,
                data_type: text_at(row, 1)?,
                max_length: int_at(row, 2),
                numeric_precision: int_at(row, 3),
                numeric_scale: int_at(row, 4),
            })
        })
        .collect())
}

async fn fetch_samples<S: SqlSession + ?Sized>(
    session: &mut S,
    catalog: &str,
    schema: &str,
    table: &str,
) -> Vec<SampleRow> {
    let sql = format!(
        "SELECT TOP {SAMPLE_ROW_LIMIT} * FROM {}.{}",
        quote_ident(schema),
        quote_ident(table)
    );
    match session.run(&sql).await {
        Ok(Outcome::ResultSet(set)) => sample_rows(set),
        Ok(Outcome::NoResultSet { .. }) => Vec::new(),
        Err(err) => {
            counter!("sqlchat_sample_fetch_failures_total").increment(1);
            warn!(
                "could not fetch sample rows from {catalog}.{schema}.{table}: {err}"
            );
            Vec::new()
        }
    }
}

fn sample_rows(set: Table) -> Vec<SampleRow> {
    let Table { columns, rows } = set;
    rows.into_iter()
        .take(SAMPLE_ROW_LIMIT)
        .map(|row| columns.iter().cloned().zip(row).collect())
        .collect()
}

/// Bracket-quotes an identifier, doubling any closing bracket.
pub fn quote_ident(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

fn text_at(row: &[DataValue], idx: usize) -> Option<String> {
    match row.get(idx)? {
        DataValue::String(s) => Some(s.clone()),
        DataValue::Null => None,
        other => Some(other.to_string()),
    }
}

fn int_at(row: &[DataValue], idx: usize) -> Option<i64> {
    match row.get(idx)? {
        DataValue::Int64(v) => Some(*v),
        DataValue::String(s) => s.parse().ok(),
        _ => None,
    }
}
