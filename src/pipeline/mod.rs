// src/pipeline/mod.rs
//! Linear extract → transform → load → verify run.
//!
//! Each step runs to completion before the next starts. The first failure
//! moves the run to [`RunState::Failed`] and is returned unchanged; sinks
//! that already committed are left in place.

use std::fmt;
use tracing::{info, instrument, warn};

use crate::config::PipelineConfig;
use crate::error::{ConfigError, EtlError, Result};
use crate::extract;
use crate::fetch::{Fetcher, Source};
use crate::progress::{self, ProgressLog, Stage};
use crate::query::{self, QueryResult};
use crate::sink;
use crate::table::TransformedTable;
use crate::transform;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Init,
    Extracting,
    Transforming,
    CsvWriting,
    DbWriting,
    Querying,
    Done,
    Failed { stage: Stage },
}

impl RunState {
    /// The logged stage this state runs, if any.
    pub fn stage(self) -> Option<Stage> {
        match self {
            RunState::Extracting => Some(Stage::Extraction),
            RunState::Transforming => Some(Stage::Transformation),
            RunState::CsvWriting => Some(Stage::CsvLoad),
            RunState::DbWriting => Some(Stage::DbLoad),
            RunState::Querying => Some(Stage::Query),
            RunState::Init | RunState::Done | RunState::Failed { .. } => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Done | RunState::Failed { .. })
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Init => f.write_str("init"),
            RunState::Extracting => f.write_str("extracting"),
            RunState::Transforming => f.write_str("transforming"),
            RunState::CsvWriting => f.write_str("csv writing"),
            RunState::DbWriting => f.write_str("db writing"),
            RunState::Querying => f.write_str("querying"),
            RunState::Done => f.write_str("done"),
            RunState::Failed { stage } => write!(f, "failed during {stage}"),
        }
    }
}

/// What a successful run hands back to its caller.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub extracted_rows: usize,
    pub table: TransformedTable,
    pub query: QueryResult,
}

/// One pipeline run over a validated [`PipelineConfig`].
pub struct Pipeline<'a> {
    config: PipelineConfig,
    source: Source,
    fetcher: Fetcher,
    log: &'a dyn ProgressLog,
    state: RunState,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: PipelineConfig, log: &'a dyn ProgressLog) -> Result<Self> {
        config.validate()?;
        let source = config
            .source()
            .ok_or_else(|| ConfigError::Invalid("no source: set `url` or `file`".into()))?;
        let fetcher = Fetcher::new(config.timeout())?;
        Ok(Self {
            config,
            source,
            fetcher,
            log,
            state: RunState::Init,
        })
    }

    /// Read the document from `source` instead of the configured URL or file.
    pub fn with_source(mut self, source: Source) -> Self {
        self.source = source;
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn enter(&mut self, next: RunState) {
        info!(from = %self.state, to = %next, "pipeline state");
        self.state = next;
    }

    /// Move to `Failed` when `result` is an error.
    fn check<T, E: Into<EtlError>>(&mut self, result: std::result::Result<T, E>) -> Result<T> {
        result.map_err(|e| {
            if let Some(stage) = self.state.stage() {
                self.state = RunState::Failed { stage };
            }
            e.into()
        })
    }

    fn note(&self, message: &str) {
        progress::note(self.log, message);
    }

    #[instrument(skip(self), fields(source = %self.source.describe(), table = %self.config.table_name))]
    pub fn run(&mut self) -> Result<RunReport> {
        if self.state != RunState::Init {
            warn!(state = %self.state, "pipeline already ran; starting over");
            self.state = RunState::Init;
        }
        let log = self.log;
        self.note("Preliminaries complete. Initiating ETL process");

        // 1) extract
        self.enter(RunState::Extracting);
        let rules = self.config.extract_rules();
        let raw = extract::extract(&self.fetcher, &self.source, &rules, log);
        let raw = self.check(raw)?;
        self.note("Data extraction complete. Initiating Transformation process");

        // 2) transform
        self.enter(RunState::Transforming);
        let table = transform::transform(&raw, &self.config.rates_path, &self.config.metric, log);
        let table = self.check(table)?;
        self.note("Data transformation complete. Initiating loading process");

        // 3) csv
        self.enter(RunState::CsvWriting);
        let written = sink::write_csv(&table, &self.config.csv_path, log);
        self.check(written)?;
        self.note("Data saved to CSV file");

        // 4) database, one connection for load and query
        self.enter(RunState::DbWriting);
        let loaded = sink::load_table(&table, &self.config.db_path, &self.config.table_name, log);
        let store = self.check(loaded)?;
        self.note("Data loaded to Database as table. Running the query");

        // 5) verify
        self.enter(RunState::Querying);
        let sql = self.config.resolved_query();
        let result = query::run_query(&sql, &store, log);
        let result = self.check(result)?;
        let closed = store.close().map_err(|e| {
            log.append(&format!("Error closing database: {e}"));
            e
        });
        self.check(closed)?;

        self.note("Process Complete.");
        self.enter(RunState::Done);
        Ok(RunReport {
            extracted_rows: raw.len(),
            table,
            query: result,
        })
    }
}

/// Validate `config`, run it once and return the report.
pub fn run(config: PipelineConfig, log: &dyn ProgressLog) -> Result<RunReport> {
    Pipeline::new(config, log)?.run()
}
