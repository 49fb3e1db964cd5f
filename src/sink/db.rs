// src/sink/db.rs

use rusqlite::{params_from_iter, types::Value as SqlValue, types::ValueRef, Connection};
use std::path::Path;
use tracing::{debug, instrument};

use crate::error::StoreError;
use crate::progress::{self, ProgressLog, Stage};
use crate::query::QueryResult;
use crate::table::{TransformedTable, Value};

/// Relational store the pipeline loads into and queries.
pub trait TableStore {
    /// Drop `table_name` if it exists, recreate it from `table`'s schema and
    /// insert every row. Returns the number of rows written.
    fn replace(&mut self, table_name: &str, table: &TransformedTable) -> Result<usize, StoreError>;

    /// Run a read-only statement.
    fn query(&self, sql: &str) -> Result<QueryResult, StoreError>;
}

/// SQLite-backed [`TableStore`]. The connection closes on drop or on
/// [`SqliteStore::close`].
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(|source| StoreError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "opened database");
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    pub fn close(self) -> Result<(), StoreError> {
        self.conn.close().map_err(|(_, e)| StoreError::Close(e))
    }
}

/// Quote an SQL identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Integer(v) => SqlValue::Integer(*v),
        Value::Real(v) => SqlValue::Real(*v),
        Value::Text(s) => SqlValue::Text(s.clone()),
    }
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::Integer(v),
        ValueRef::Real(v) => Value::Real(v),
        ValueRef::Text(b) | ValueRef::Blob(b) => {
            Value::Text(String::from_utf8_lossy(b).into_owned())
        }
    }
}

impl TableStore for SqliteStore {
    #[instrument(level = "debug", skip(self, table), fields(rows = table.len()))]
    fn replace(&mut self, table_name: &str, table: &TransformedTable) -> Result<usize, StoreError> {
        if table.columns().is_empty() {
            return Err(StoreError::EmptySchema {
                table: table_name.to_string(),
            });
        }
        let ident = quote_ident(table_name);
        let column_defs = table
            .columns()
            .iter()
            .map(|c| format!("{} {}", quote_ident(&c.name), c.kind.sql_type()))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = vec!["?"; table.columns().len()].join(", ");

        let tx = self.conn.transaction()?;
        tx.execute_batch(&format!(
            "DROP TABLE IF EXISTS {ident}; CREATE TABLE {ident} ({column_defs});"
        ))?;
        {
            let mut stmt = tx.prepare(&format!("INSERT INTO {ident} VALUES ({placeholders})"))?;
            for row in table.rows() {
                stmt.execute(params_from_iter(row.iter().map(to_sql)))?;
            }
        }
        tx.commit()?;

        debug!(table = table_name, "table replaced");
        Ok(table.len())
    }

    #[instrument(level = "debug", skip(self))]
    fn query(&self, sql: &str) -> Result<QueryResult, StoreError> {
        let mut stmt = self.conn.prepare(sql)?;
        if !stmt.readonly() {
            return Err(StoreError::NotReadOnly {
                query: sql.to_string(),
            });
        }
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let width = columns.len();

        let mut rows = Vec::new();
        let mut cursor = stmt.query([])?;
        while let Some(row) = cursor.next()? {
            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                values.push(from_sql(row.get_ref(i)?));
            }
            rows.push(values);
        }
        debug!(rows = rows.len(), "query finished");
        Ok(QueryResult { columns, rows })
    }
}

/// Database load stage.
pub fn write_table(
    table: &TransformedTable,
    store: &mut dyn TableStore,
    table_name: &str,
    log: &dyn ProgressLog,
) -> Result<usize, StoreError> {
    progress::stage(log, Stage::DbLoad, || store.replace(table_name, table))
}

/// Database load stage on a fresh connection: open `path`, then replace
/// `table_name`. The open counts as part of the stage, so a database that
/// cannot be opened still leaves a start/error pair in the trail.
pub fn load_table(
    table: &TransformedTable,
    path: &Path,
    table_name: &str,
    log: &dyn ProgressLog,
) -> Result<SqliteStore, StoreError> {
    progress::stage(log, Stage::DbLoad, || -> Result<_, StoreError> {
        let mut store = SqliteStore::open(path)?;
        progress::note(log, "SQL Connection initiated.");
        store.replace(table_name, table)?;
        Ok(store)
    })
}
