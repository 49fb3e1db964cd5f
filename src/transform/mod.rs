// src/transform/mod.rs
//! Normalize the metric column and derive one converted column per unit.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, instrument, trace};

use crate::error::{EtlError, TransformError};
use crate::progress::{self, ProgressLog, Stage};
use crate::rates::RateTable;
use crate::table::{Column, RawTable, TransformedTable, Value};

/// `[1]`, `[a]`, `[note 3]`: reference markers copied along with the cell text.
static FOOTNOTE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[[^\]]*\]").expect("footnote regex should compile"));

/// Decimal places of every derived column.
pub const DERIVED_DECIMALS: u32 = 2;

/// How to read the metric column and which columns to derive from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricSpec {
    /// Raw metric attribute; dropped from the output.
    pub column: String,
    /// Name of the normalized numeric column.
    pub base_column: String,
    /// Unit symbols stripped from the front, first match wins.
    pub prefixes: Vec<String>,
    /// Magnitude markers stripped from the end, first match wins.
    pub suffixes: Vec<String>,
    pub thousands_separator: String,
    /// Parsed values are divided by this, e.g. 1000 to report millions as billions.
    pub scale: f64,
    /// Round the base value; `None` keeps full precision.
    pub decimals: Option<u32>,
    /// Units to derive. Empty means every unit of the rate table.
    pub units: Vec<String>,
    /// Derived column name, `{unit}` is replaced by the unit code.
    pub column_template: String,
}

impl Default for MetricSpec {
    fn default() -> Self {
        Self {
            column: "Market cap".to_string(),
            base_column: "base".to_string(),
            prefixes: vec!["US$".to_string(), "$".to_string()],
            suffixes: ["T", "B", "M", "K"].map(String::from).to_vec(),
            thousands_separator: ",".to_string(),
            scale: 1.0,
            decimals: Some(2),
            units: Vec::new(),
            column_template: "value_in_{unit}".to_string(),
        }
    }
}

impl MetricSpec {
    pub fn derived_column(&self, unit: &str) -> String {
        self.column_template.replace("{unit}", unit)
    }
}

/// Round half away from zero to `decimals` places.
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let p = 10f64.powi(decimals as i32);
    (value * p).round() / p
}

/// Strip symbols, magnitude marker and separators from `raw` and parse what
/// is left. Returns `None` when the remainder is not a finite number.
pub fn parse_metric(raw: &str, spec: &MetricSpec) -> Option<f64> {
    let cleaned = FOOTNOTE.replace_all(raw, "");
    let mut s = cleaned.trim();

    if let Some(rest) = spec
        .prefixes
        .iter()
        .filter(|p| !p.is_empty())
        .find_map(|p| s.strip_prefix(p.as_str()))
    {
        s = rest.trim_start();
    }
    if let Some(rest) = spec
        .suffixes
        .iter()
        .filter(|p| !p.is_empty())
        .find_map(|p| s.strip_suffix(p.as_str()))
    {
        s = rest.trim_end();
    }

    let digits = if spec.thousands_separator.is_empty() {
        s.to_string()
    } else {
        s.replace(spec.thousands_separator.as_str(), "")
    };
    trace!(raw, cleaned = %digits, "parsing metric");
    digits.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Units to derive with their factors, in output order.
fn resolve_units(spec: &MetricSpec, rates: &RateTable) -> Result<Vec<(String, f64)>, TransformError> {
    if spec.units.is_empty() {
        return Ok(rates
            .entries()
            .iter()
            .map(|e| (e.unit_code.clone(), e.factor))
            .collect());
    }
    spec.units
        .iter()
        .map(|unit| {
            rates
                .get(unit)
                .map(|f| (unit.clone(), f))
                .ok_or_else(|| TransformError::MissingRate { unit: unit.clone() })
        })
        .collect()
}

fn first_duplicate(columns: &[Column]) -> Option<String> {
    let mut seen = HashSet::new();
    columns
        .iter()
        .find(|c| !seen.insert(c.name.as_str()))
        .map(|c| c.name.clone())
}

/// Build the typed table. Row order and row count are preserved; any
/// unparsable metric fails the whole batch.
#[instrument(level = "debug", skip_all, fields(rows = raw.len(), column = %spec.column))]
pub fn transform_table(
    raw: &RawTable,
    rates: &RateTable,
    spec: &MetricSpec,
) -> Result<TransformedTable, TransformError> {
    let metric_idx = raw
        .column_index(&spec.column)
        .ok_or_else(|| TransformError::MissingColumn {
            column: spec.column.clone(),
        })?;
    let units = resolve_units(spec, rates)?;

    let mut columns: Vec<Column> = raw
        .columns()
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != metric_idx)
        .map(|(_, name)| Column::text(name.clone()))
        .collect();
    columns.push(Column::real(spec.base_column.clone()));
    columns.extend(units.iter().map(|(u, _)| Column::real(spec.derived_column(u))));
    if let Some(column) = first_duplicate(&columns) {
        return Err(TransformError::DuplicateColumn { column });
    }

    let mut rows = Vec::with_capacity(raw.len());
    for (n, row) in raw.rows().enumerate() {
        let values = row.values();
        let metric = &values[metric_idx];
        let parsed = parse_metric(metric, spec).ok_or_else(|| TransformError::UnparsableMetric {
            row: n + 1,
            column: spec.column.clone(),
            value: metric.clone(),
        })?;

        let scaled = parsed / spec.scale;
        let base = match spec.decimals {
            Some(d) => round_to(scaled, d),
            None => scaled,
        };

        let mut out: Vec<Value> = values
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != metric_idx)
            .map(|(_, v)| Value::Text(v.clone()))
            .collect();
        out.push(Value::Real(base));
        out.extend(
            units
                .iter()
                .map(|(_, factor)| Value::Real(round_to(base * factor, DERIVED_DECIMALS))),
        );
        rows.push(out);
    }

    debug!(rows = rows.len(), columns = columns.len(), "transformed table");
    Ok(TransformedTable::new(columns, rows))
}

/// Transformation stage: load the rate file, then transform, wrapped in the
/// progress trail. A malformed rate file fails the stage like a bad metric.
pub fn transform(
    raw: &RawTable,
    rates_path: &std::path::Path,
    spec: &MetricSpec,
    log: &dyn ProgressLog,
) -> Result<TransformedTable, EtlError> {
    progress::stage(log, Stage::Transformation, || -> Result<_, EtlError> {
        let rates = RateTable::load(rates_path)?;
        Ok(transform_table(raw, &rates, spec)?)
    })
}
