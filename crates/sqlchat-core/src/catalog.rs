use crate::types::DataValue;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Maximum number of sample rows kept per table.
pub const SAMPLE_ROW_LIMIT: usize = 3;

const CHARACTER_TYPES: [&str; 4] = ["varchar", "nvarchar", "char", "nchar"];
const EXACT_NUMERIC_TYPES: [&str; 2] = ["decimal", "numeric"];

/// One sample row as (column name, value) pairs in column order.
pub type SampleRow = Vec<(String, DataValue)>;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ColumnDescriptor {
    pub name: String,
    pub data_type: String,
    pub max_length: Option<i64>,
    pub numeric_precision: Option<i64>,
    pub numeric_scale: Option<i64>,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            max_length: None,
            numeric_precision: None,
            numeric_scale: None,
        }
    }

    /// Renders `[name] TYPE`, `[name] TYPE(length)` or `[name] TYPE(p,s)`.
    pub fn render(&self) -> String {
        let lower = self.data_type.to_ascii_lowercase();
        let upper = self.data_type.to_ascii_uppercase();
        if CHARACTER_TYPES.contains(&lower.as_str()) {
            match self.max_length {
                // -1 is how the catalog reports (MAX)
                Some(-1) => return format!("[{}] {}(MAX)", self.name, upper),
                Some(len) => return format!("[{}] {}({})", self.name, upper, len),
                None => {}
            }
        } else if EXACT_NUMERIC_TYPES.contains(&lower.as_str()) {
            if let (Some(precision), Some(scale)) = (self.numeric_precision, self.numeric_scale) {
                return format!("[{}] {}({},{})", self.name, upper, precision, scale);
            }
        }
        format!("[{}] {}", self.name, upper)
    }
}

/// Introspected description of one base table.
#[derive(Debug, Clone, Serialize)]
pub struct TableSchema {
    pub qualified_name: String,
    pub ddl: String,
    pub columns: Vec<ColumnDescriptor>,
    pub sample_rows: Vec<SampleRow>,
}

impl TableSchema {
    pub fn new(
        catalog: &str,
        schema: &str,
        table: &str,
        columns: Vec<ColumnDescriptor>,
        mut sample_rows: Vec<SampleRow>,
    ) -> Self {
        sample_rows.truncate(SAMPLE_ROW_LIMIT);
        Self {
            qualified_name: format!("{catalog}.{schema}.{table}"),
            ddl: synthesize_ddl(schema, table, &columns),
            columns,
            sample_rows,
        }
    }
}

/// DDL-style text for the prompt. Never executed.
pub fn synthesize_ddl(schema: &str, table: &str, columns: &[ColumnDescriptor]) -> String {
    let defs: Vec<String> = columns
        .iter()
        .map(|c| format!("    {}", c.render()))
        .collect();
    format!("CREATE TABLE {schema}.{table} (\n{}\n);", defs.join(",\n"))
}

/// All tables found by one introspection pass, keyed by `catalog.schema.table`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchemaSnapshot {
    tables: BTreeMap<String, TableSchema>,
    current_catalog: Option<String>,
}

impl SchemaSnapshot {
    pub fn new() -> Self {
        Self {
            tables: BTreeMap::new(),
            current_catalog: None,
        }
    }

    /// Catalog the session sits in when statements run.
    pub fn current_catalog(&self) -> Option<&str> {
        self.current_catalog.as_deref()
    }

    pub fn set_current_catalog(&mut self, name: Option<String>) {
        self.current_catalog = name;
    }

    pub fn insert(&mut self, table: TableSchema) {
        self.tables.insert(table.qualified_name.clone(), table);
    }

    pub fn get(&self, qualified_name: &str) -> Option<&TableSchema> {
        self.tables.get(qualified_name)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableSchema> {
        self.tables.values()
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    /// Schema text handed to the model, headed by the current database when
    /// it is known.
    pub fn render(&self) -> String {
        let mut out = String::new();
        if let Some(catalog) = &self.current_catalog {
            let _ = writeln!(out, "-- Current database: {catalog}\n");
        }
        if self.tables.is_empty() {
            out.push_str("(no tables found)");
            return out;
        }
        for (idx, table) in self.tables.values().enumerate() {
            if idx > 0 {
                out.push('\n');
            }
            let _ = writeln!(out, "-- Table: {}", table.qualified_name);
            let _ = writeln!(out, "{}", table.ddl);
            if table.sample_rows.is_empty() {
                let _ = writeln!(out, "-- Sample rows: none");
                continue;
            }
            let _ = writeln!(out, "-- Sample rows:");
            for row in &table.sample_rows {
                let cells: Vec<String> = row
                    .iter()
                    .map(|(name, value)| format!("{name}={value}"))
                    .collect();
                let _ = writeln!(out, "--   {}", cells.join(", "));
            }
        }
        out
    }
}
