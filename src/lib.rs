// src/lib.rs
//! Scrape a ranked HTML table, convert its metric with a rate table, store
//! the result as CSV and as an SQLite table, then run one verification query.

pub mod config;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod pipeline;
pub mod progress;
pub mod query;
pub mod rates;
pub mod sink;
pub mod table;
pub mod transform;

pub use config::{Overrides, PipelineConfig};
pub use error::{EtlError, Result};
pub use pipeline::{Pipeline, RunReport, RunState};
pub use progress::{FileProgressLog, MemoryProgressLog, ProgressLog};
pub use query::QueryResult;
