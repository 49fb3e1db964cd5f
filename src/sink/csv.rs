// src/sink/csv.rs

use ::csv::Writer;
use std::path::Path;
use tracing::{debug, instrument};

use crate::error::IoError;
use crate::progress::{self, ProgressLog, Stage};
use crate::table::TransformedTable;

/// Serialize `table` to `path`, replacing whatever is there.
#[instrument(level = "debug", skip(table), fields(path = %path.display(), rows = table.len()))]
pub fn write_table_csv(table: &TransformedTable, path: &Path) -> Result<(), IoError> {
    let write_err = |source| IoError::Write {
        path: path.to_path_buf(),
        source,
    };

    let mut wtr = Writer::from_path(path).map_err(|source| IoError::Create {
        path: path.to_path_buf(),
        source,
    })?;
    wtr.write_record(table.column_names()).map_err(write_err)?;
    for row in table.rows() {
        wtr.write_record(row.iter().map(|v| v.to_string()))
            .map_err(write_err)?;
    }
    wtr.flush()
        .map_err(|e| write_err(::csv::Error::from(e)))?;

    debug!("csv written");
    Ok(())
}

/// CSV load stage.
pub fn write_csv(
    table: &TransformedTable,
    path: &Path,
    log: &dyn ProgressLog,
) -> Result<(), IoError> {
    progress::stage(log, Stage::CsvLoad, || write_table_csv(table, path))
}
