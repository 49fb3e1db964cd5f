// src/progress/mod.rs
//! Append-only progress trail written next to the pipeline run.
//!
//! Each event is one line, `"<YYYY-MM-DD HH:MM:SS> : <message>"`, local time.
//! The trail is separate from `tracing` diagnostics: it is meant to survive
//! the process and explain which stage failed and why.

use chrono::Local;
use std::{
    fmt,
    fs::{self, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};
use tracing::{error, info, warn};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const SEPARATOR: &str = " : ";

/// Sink for progress events.
pub trait ProgressLog: Send + Sync {
    /// Record `message` with the current timestamp.
    fn append(&self, message: &str);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub timestamp: String,
    pub message: String,
}

impl ProgressEvent {
    pub fn now(message: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now().format(TIMESTAMP_FORMAT).to_string(),
            message: message.into(),
        }
    }

    pub fn to_line(&self) -> String {
        format!("{}{}{}\n", self.timestamp, SEPARATOR, self.message)
    }

    /// Inverse of [`ProgressEvent::to_line`]; `None` for lines that don't
    /// carry a timestamp.
    pub fn parse_line(line: &str) -> Option<Self> {
        let (timestamp, message) = line.trim_end_matches(['\r', '\n']).split_once(SEPARATOR)?;
        chrono::NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT).ok()?;
        Some(Self {
            timestamp: timestamp.to_string(),
            message: message.to_string(),
        })
    }
}

/// Log file that is opened, appended to and closed on every event.
///
/// No handle is held between writes and nothing is locked, so two processes
/// writing the same file may interleave lines.
#[derive(Debug, Clone)]
pub struct FileProgressLog {
    path: PathBuf,
}

impl FileProgressLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_event(&self, event: &ProgressEvent) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(event.to_line().as_bytes())
    }
}

impl ProgressLog for FileProgressLog {
    fn append(&self, message: &str) {
        let event = ProgressEvent::now(message);
        if let Err(e) = self.write_event(&event) {
            warn!(path = %self.path.display(), error = %e, "could not write progress event");
        }
    }
}

/// In-memory trail, used where no file should be touched.
#[derive(Debug, Default)]
pub struct MemoryProgressLog {
    events: Mutex<Vec<ProgressEvent>>,
}

impl MemoryProgressLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.message).collect()
    }
}

impl ProgressLog for MemoryProgressLog {
    fn append(&self, message: &str) {
        if let Ok(mut events) = self.events.lock() {
            events.push(ProgressEvent::now(message));
        }
    }
}

/// Read a progress file back into events, skipping lines that don't parse.
pub fn read_events(path: impl AsRef<Path>) -> io::Result<Vec<ProgressEvent>> {
    let text = fs::read_to_string(path)?;
    Ok(text.lines().filter_map(ProgressEvent::parse_line).collect())
}

/// Write `message` to the trail and mirror it to `tracing`.
pub fn note(log: &dyn ProgressLog, message: &str) {
    info!(target: "progress", "{}", message);
    log.append(message);
}

/// The logged units of work of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Extraction,
    Transformation,
    CsvLoad,
    DbLoad,
    Query,
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Stage::Extraction => "extraction",
            Stage::Transformation => "transformation",
            Stage::CsvLoad => "load to CSV",
            Stage::DbLoad => "load to DB",
            Stage::Query => "query execution",
        }
    }

    pub fn start_message(self) -> &'static str {
        match self {
            Stage::Extraction => "Starting extraction process",
            Stage::Transformation => "Starting transformation process",
            Stage::CsvLoad => "Starting load to CSV process",
            Stage::DbLoad => "Starting load to DB process",
            Stage::Query => "Starting query execution process",
        }
    }

    pub fn done_message(self) -> &'static str {
        match self {
            Stage::Extraction => "Extraction process completed",
            Stage::Transformation => "Transformation process completed",
            Stage::CsvLoad => "Load to CSV process completed",
            Stage::DbLoad => "Load to DB process completed",
            Stage::Query => "Query execution process completed",
        }
    }

    pub fn error_message(self, err: &dyn fmt::Display) -> String {
        format!("Error during {}: {}", self.name(), err)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Run `work` as `stage`: start event, then either the completion event or
/// the error event. The error is handed back untouched.
pub fn stage<T, E, F>(log: &dyn ProgressLog, stage: Stage, work: F) -> Result<T, E>
where
    E: fmt::Display,
    F: FnOnce() -> Result<T, E>,
{
    note(log, stage.start_message());
    match work() {
        Ok(value) => {
            note(log, stage.done_message());
            Ok(value)
        }
        Err(e) => {
            error!(stage = %stage, error = %e, "stage failed");
            log.append(&stage.error_message(&e));
            Err(e)
        }
    }
}
