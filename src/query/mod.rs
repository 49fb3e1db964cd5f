// src/query/mod.rs

use serde::Serialize;
use std::fmt;
use tracing::info;

use crate::error::StoreError;
use crate::progress::{self, ProgressLog, Stage};
use crate::sink::TableStore;
use crate::table::Value;

/// Column names and rows returned by a verification query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Plain aligned table, one line per row.
impl fmt::Display for QueryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cells: Vec<Vec<String>> = self
            .rows
            .iter()
            .map(|r| r.iter().map(Value::to_string).collect())
            .collect();

        let mut widths: Vec<usize> = self.columns.iter().map(|c| c.chars().count()).collect();
        for row in &cells {
            for (w, cell) in widths.iter_mut().zip(row) {
                *w = (*w).max(cell.chars().count());
            }
        }

        write_line(f, &self.columns, &widths)?;
        let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
        write_line(f, &rule, &widths)?;
        for row in &cells {
            write_line(f, row, &widths)?;
        }
        write!(f, "({} rows)", self.rows.len())
    }
}

fn write_line(f: &mut fmt::Formatter<'_>, values: &[String], widths: &[usize]) -> fmt::Result {
    let padded: Vec<String> = values
        .iter()
        .zip(widths)
        .map(|(v, w)| format!("{:<w$}", v, w = *w))
        .collect();
    writeln!(f, "{}", padded.join("  ").trim_end())
}

/// Query stage: run `query` against `store` and echo the statement.
pub fn run_query(
    query: &str,
    store: &dyn TableStore,
    log: &dyn ProgressLog,
) -> Result<QueryResult, StoreError> {
    progress::stage(log, Stage::Query, || -> Result<_, StoreError> {
        info!(query, "running verification query");
        let result = store.query(query)?;
        info!(rows = result.len(), "query returned");
        Ok(result)
    })
}
