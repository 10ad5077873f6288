use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;

/// A single cell value as returned by the database driver.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum DataValue {
    Null,
    Int64(i64),
    Float64(f64),
    Decimal(Decimal),
    Bool(bool),
    String(String),
    Bytes(Vec<u8>),
}

impl DataValue {
    /// Exact decimals become binary floats; every other value passes through.
    pub fn decimal_to_float(self) -> Self {
        match self {
            DataValue::Decimal(d) => match d.to_f64() {
                Some(v) => DataValue::Float64(v),
                None => DataValue::String(d.to_string()),
            },
            other => other,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, DataValue::Null)
    }
}

impl fmt::Display for DataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataValue::Null => f.write_str("NULL"),
            DataValue::Int64(v) => write!(f, "{v}"),
            DataValue::Float64(v) => write!(f, "{v}"),
            DataValue::Decimal(v) => write!(f, "{v}"),
            DataValue::Bool(v) => write!(f, "{v}"),
            DataValue::String(v) => f.write_str(v),
            DataValue::Bytes(v) => {
                f.write_str("0x")?;
                for b in v {
                    write!(f, "{b:02X}")?;
                }
                Ok(())
            }
        }
    }
}

/// Column headers plus rows, in result-set order.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<DataValue>>,
}

impl Table {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<DataValue>>) -> Self {
        Self { columns, rows }
    }

    pub fn with_decimals_as_float(self) -> Self {
        let rows = self
            .rows
            .into_iter()
            .map(|row| row.into_iter().map(DataValue::decimal_to_float).collect())
            .collect();
        Self {
            columns: self.columns,
            rows,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Outcome of the single-statement executor. Errors are values so callers can
/// render both cases the same way.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum QueryResult {
    Table(Table),
    Error(String),
}

impl QueryResult {
    pub fn as_table(&self) -> Option<&Table> {
        match self {
            QueryResult::Table(table) => Some(table),
            QueryResult::Error(_) => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, QueryResult::Error(_))
    }
}

/// Outcome of one fragment of a batch script.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatementResult {
    Rows {
        columns: Vec<String>,
        rows: Vec<Vec<DataValue>>,
    },
    Affected {
        count: u64,
    },
    Failure {
        message: String,
    },
}

impl StatementResult {
    pub fn is_failure(&self) -> bool {
        matches!(self, StatementResult::Failure { .. })
    }
}
