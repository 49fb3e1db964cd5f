// src/error.rs
//! Error taxonomy for the ETL pipeline.
//!
//! Every stage has its own error enum so callers can match on what went
//! wrong. [`EtlError`] is the umbrella the orchestrator returns.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, EtlError>;

/// Failures while obtaining the source document or locating the table in it.
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("invalid source URL `{url}`: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("request to {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} answered with HTTP {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("cannot read document {}: {source}", path.display())]
    ReadDocument {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid table selector `{selector}`: {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("table not found: no match #{index} for selector `{selector}`")]
    TableNotFound { selector: String, index: usize },

    #[error("table has no header row")]
    EmptyHeader,

    #[error("attribute `{attribute}` is not a column of the table (columns: {available:?})")]
    MissingAttribute {
        attribute: String,
        available: Vec<String>,
    },

    #[error("row has {actual} values but the table has {expected} columns")]
    InvalidRow { expected: usize, actual: usize },
}

/// Failures while normalizing the metric column.
#[derive(Error, Debug)]
pub enum TransformError {
    #[error("column `{column}` is missing from the extracted table")]
    MissingColumn { column: String },

    #[error("row {row}: cannot parse `{value}` in column `{column}` as a number")]
    UnparsableMetric {
        row: usize,
        column: String,
        value: String,
    },

    #[error("no conversion rate for unit `{unit}`")]
    MissingRate { unit: String },

    #[error("output column `{column}` would appear twice")]
    DuplicateColumn { column: String },
}

/// Failures while writing the flat-file sink.
#[derive(Error, Debug)]
pub enum IoError {
    #[error("cannot create {}: {source}", path.display())]
    Create {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("cannot write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// Failures of the relational store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("cannot open database {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("cannot create table `{table}` without columns")]
    EmptySchema { table: String },

    #[error("refusing to run a statement that modifies the database: `{query}`")]
    NotReadOnly { query: String },

    #[error("failed to close database: {0}")]
    Close(#[source] rusqlite::Error),
}

/// Failures of configuration inputs: the pipeline file and the rate file.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML in {}: {source}", path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("malformed rate file {}: {source}", path.display())]
    RateFile {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("rate file line {line}: factor `{value}` for unit `{unit}` is not a positive number")]
    InvalidFactor {
        line: u64,
        unit: String,
        value: String,
    },

    #[error("rate file line {line}: duplicate unit `{unit}`")]
    DuplicateUnit { line: u64, unit: String },

    #[error("rate file line {line}: empty unit code")]
    EmptyUnit { line: u64 },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Any failure of a pipeline run.
#[derive(Error, Debug)]
pub enum EtlError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Io(#[from] IoError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
