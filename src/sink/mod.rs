// src/sink/mod.rs
//! The two load targets. They commit independently: a run that fails in
//! the database load leaves the CSV file already written.

pub mod csv;
pub mod db;

pub use self::csv::write_csv;
pub use self::db::{load_table, write_table, SqliteStore, TableStore};
