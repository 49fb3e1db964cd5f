// src/extract/mod.rs
//! Locate one HTML table and turn its data rows into a [`RawTable`].

use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, trace};

use crate::error::ExtractionError;
use crate::fetch::{Fetcher, Source};
use crate::progress::{self, ProgressLog, Stage};
use crate::table::RawTable;

static ROW: Lazy<Selector> = Lazy::new(|| Selector::parse("tr").expect("row selector should parse"));
static ANCHOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a").expect("anchor selector should parse"));

/// Cell text that marks "no data" in the source tables.
pub const MISSING_DATA: &str = "—";

/// Which table of the document to read: the `index`-th (zero-based) element
/// matching `selector`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableLocator {
    pub selector: String,
    #[serde(default)]
    pub index: usize,
}

impl TableLocator {
    pub fn new(selector: impl Into<String>, index: usize) -> Self {
        Self {
            selector: selector.into(),
            index,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractRules {
    pub locator: TableLocator,
    /// Attributes to keep, in output order.
    pub attributes: Vec<String>,
    /// Positional column names to use instead of the header row.
    pub columns: Option<Vec<String>>,
    /// Column whose cell must contain a link for the row to count as data.
    pub key_column: Option<String>,
    /// Column checked against `sentinel`. The missing-data rule only runs
    /// when this is set.
    pub metric_column: Option<String>,
    pub sentinel: String,
}

impl ExtractRules {
    /// Rules with no key or metric column. Sentinel rows are kept until
    /// [`ExtractRules::with_metric_column`] names the column to check.
    pub fn new(locator: TableLocator, attributes: Vec<String>) -> Self {
        Self {
            locator,
            attributes,
            columns: None,
            key_column: None,
            metric_column: None,
            sentinel: MISSING_DATA.to_string(),
        }
    }

    /// Drop rows whose `column` cell equals the sentinel.
    pub fn with_metric_column(mut self, column: impl Into<String>) -> Self {
        self.metric_column = Some(column.into());
        self
    }
}

/// Why a row was kept or dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowVerdict {
    Keep,
    /// Cell count differs from the header.
    WrongWidth,
    /// Key cell has no link: a note, footer or sub-header row.
    Unanchored,
    /// Metric cell holds the missing-data sentinel.
    MissingData,
}

/// Resolved form of the row rules: column positions instead of names.
#[derive(Debug, Clone, Copy)]
pub struct RowRules<'a> {
    pub width: usize,
    pub key: Option<usize>,
    pub metric: Option<usize>,
    pub sentinel: &'a str,
}

/// One data cell as seen by the row filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    pub text: String,
    pub has_anchor: bool,
}

/// Decide whether a data row makes it into the extracted table.
pub fn classify_row(cells: &[Cell], rules: &RowRules<'_>) -> RowVerdict {
    if cells.len() != rules.width {
        return RowVerdict::WrongWidth;
    }
    if let Some(k) = rules.key {
        if !cells[k].has_anchor {
            return RowVerdict::Unanchored;
        }
    }
    if let Some(m) = rules.metric {
        if cells[m].text == rules.sentinel {
            return RowVerdict::MissingData;
        }
    }
    RowVerdict::Keep
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SkipCounts {
    pub wrong_width: usize,
    pub unanchored: usize,
    pub missing_data: usize,
}

fn cells_of(row: ElementRef<'_>) -> Vec<Cell> {
    row.children()
        .filter_map(ElementRef::wrap)
        .filter(|el| matches!(el.value().name(), "td" | "th"))
        .map(|el| Cell {
            text: el.text().collect::<String>().trim().to_string(),
            has_anchor: el.select(&ANCHOR).next().is_some(),
        })
        .collect()
}

fn header_name(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn position_of(headers: &[String], name: &str) -> Result<usize, ExtractionError> {
    headers
        .iter()
        .position(|h| h == name)
        .ok_or_else(|| ExtractionError::MissingAttribute {
            attribute: name.to_string(),
            available: headers.to_vec(),
        })
}

/// Parse `document` and extract the table `rules` point at.
///
/// The first row of the table is the header. Every later row is classified
/// with [`classify_row`]; kept rows are projected onto `rules.attributes`.
#[instrument(level = "debug", skip(document, rules), fields(selector = %rules.locator.selector, index = rules.locator.index))]
pub fn extract_table(document: &str, rules: &ExtractRules) -> Result<RawTable, ExtractionError> {
    let selector = Selector::parse(&rules.locator.selector).map_err(|e| {
        ExtractionError::InvalidSelector {
            selector: rules.locator.selector.clone(),
            reason: format!("{e:?}"),
        }
    })?;

    let html = Html::parse_document(document);
    let table = html
        .select(&selector)
        .nth(rules.locator.index)
        .ok_or_else(|| ExtractionError::TableNotFound {
            selector: rules.locator.selector.clone(),
            index: rules.locator.index,
        })?;

    let mut rows = table.select(&ROW);
    let header_row = rows.next().ok_or(ExtractionError::EmptyHeader)?;
    let headers: Vec<String> = match &rules.columns {
        Some(cols) => cols.clone(),
        None => cells_of(header_row)
            .iter()
            .map(|c| header_name(&c.text))
            .collect(),
    };
    if headers.is_empty() {
        return Err(ExtractionError::EmptyHeader);
    }
    trace!(?headers, "table header");

    let projection = rules
        .attributes
        .iter()
        .map(|a| position_of(&headers, a))
        .collect::<Result<Vec<_>, _>>()?;
    let row_rules = RowRules {
        width: headers.len(),
        key: rules
            .key_column
            .as_deref()
            .map(|k| position_of(&headers, k))
            .transpose()?,
        metric: rules
            .metric_column
            .as_deref()
            .map(|m| position_of(&headers, m))
            .transpose()?,
        sentinel: &rules.sentinel,
    };

    let mut out = RawTable::new(rules.attributes.clone());
    let mut skipped = SkipCounts::default();
    for row in rows {
        let cells = cells_of(row);
        match classify_row(&cells, &row_rules) {
            RowVerdict::Keep => {
                let values = projection.iter().map(|&i| cells[i].text.clone()).collect();
                out.push_row(values)?;
            }
            RowVerdict::WrongWidth => skipped.wrong_width += 1,
            RowVerdict::Unanchored => skipped.unanchored += 1,
            RowVerdict::MissingData => skipped.missing_data += 1,
        }
    }

    debug!(
        kept = out.len(),
        wrong_width = skipped.wrong_width,
        unanchored = skipped.unanchored,
        missing_data = skipped.missing_data,
        "extracted table"
    );
    Ok(out)
}

/// Extraction stage: load the document from `source` and extract the table,
/// wrapped in the progress trail.
pub fn extract(
    fetcher: &Fetcher,
    source: &Source,
    rules: &ExtractRules,
    log: &dyn ProgressLog,
) -> Result<RawTable, ExtractionError> {
    progress::stage(log, Stage::Extraction, || -> Result<_, ExtractionError> {
        let document = fetcher.load(source)?;
        extract_table(&document, rules)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::MemoryProgressLog;

    const BANKS: &str = r#"
<html><body>
<table class="infobox"><tr><th>Not this one</th></tr></table>
<table class="wikitable sortable">
  <tbody>
    <tr><th>Rank</th><th>Bank
        name</th><th>Market cap</th></tr>
    <tr><td>1</td><td><a href="/wiki/Bank_A">Bank A</a></td><td> $150B </td></tr>
    <tr><td colspan="3">Note: figures as of 2023</td></tr>
    <tr><td>2</td><td>Unlinked Bank</td><td>$120B</td></tr>
    <tr><td>3</td><td><a href="/wiki/Bank_B">Bank B</a></td><td>$90B</td></tr>
    <tr><td>4</td><td><a href="/wiki/Bank_C">Bank C</a></td><td>—</td></tr>
  </tbody>
</table>
</body></html>"#;

    fn bank_rules() -> ExtractRules {
        let mut rules = ExtractRules::new(
            TableLocator::new("table.wikitable", 0),
            vec!["Bank name".into(), "Market cap".into()],
        )
        .with_metric_column("Market cap");
        rules.key_column = Some("Bank name".into());
        rules
    }

    fn cell(text: &str, has_anchor: bool) -> Cell {
        Cell {
            text: text.into(),
            has_anchor,
        }
    }

    #[test]
    fn extracts_projected_rows_in_document_order() {
        let table = extract_table(BANKS, &bank_rules()).unwrap();
        assert_eq!(table.columns(), ["Bank name", "Market cap"]);
        let rows: Vec<_> = table.rows().map(|r| r.values().to_vec()).collect();
        assert_eq!(
            rows,
            vec![
                vec!["Bank A".to_string(), "$150B".to_string()],
                vec!["Bank B".to_string(), "$90B".to_string()],
            ]
        );
    }

    #[test]
    fn extraction_is_deterministic() {
        let rules = bank_rules();
        assert_eq!(
            extract_table(BANKS, &rules).unwrap(),
            extract_table(BANKS, &rules).unwrap()
        );
    }

    #[test]
    fn sentinel_rows_never_reach_the_output() {
        let table = extract_table(BANKS, &bank_rules()).unwrap();
        assert!(table.rows().all(|r| r.get("Market cap") != Some(MISSING_DATA)));
        assert!(table.rows().all(|r| r.get("Bank name") != Some("Bank C")));
    }

    #[test]
    fn sentinel_rule_needs_a_metric_column() {
        let mut rules = bank_rules();
        rules.metric_column = None;
        let table = extract_table(BANKS, &rules).unwrap();
        assert_eq!(table.row(2).unwrap().get("Market cap"), Some(MISSING_DATA));
    }

    #[test]
    fn without_key_column_unlinked_rows_are_kept() {
        let mut rules = bank_rules();
        rules.key_column = None;
        let table = extract_table(BANKS, &rules).unwrap();
        let names: Vec<_> = table.rows().filter_map(|r| r.get("Bank name")).collect();
        assert_eq!(names, vec!["Bank A", "Unlinked Bank", "Bank B"]);
    }

    #[test]
    fn classify_row_covers_every_rule() {
        let rules = RowRules {
            width: 2,
            key: Some(0),
            metric: Some(1),
            sentinel: MISSING_DATA,
        };
        assert_eq!(
            classify_row(&[cell("A", true), cell("$1B", false)], &rules),
            RowVerdict::Keep
        );
        assert_eq!(
            classify_row(&[cell("A", true)], &rules),
            RowVerdict::WrongWidth
        );
        assert_eq!(
            classify_row(&[cell("A", false), cell("$1B", false)], &rules),
            RowVerdict::Unanchored
        );
        assert_eq!(
            classify_row(&[cell("A", true), cell(MISSING_DATA, false)], &rules),
            RowVerdict::MissingData
        );
    }

    #[test]
    fn tbody_index_locator_with_positional_columns() {
        let doc = r#"
<table><tbody><tr><td>first</td></tr></tbody></table>
<table><tbody>
  <tr><th>Country</th><th colspan="2">IMF</th></tr>
  <tr><td><a href="/us">United States</a></td><td>2023</td><td>26,854,599</td></tr>
  <tr><td><a href="/sy">Syria</a></td><td>—</td><td>—</td></tr>
</tbody></table>"#;
        let mut rules = ExtractRules::new(
            TableLocator::new("tbody", 1),
            vec!["Country".into(), "GDP_USD_millions".into()],
        );
        rules.columns = Some(vec![
            "Country".into(),
            "Year".into(),
            "GDP_USD_millions".into(),
        ]);
        rules.key_column = Some("Country".into());
        rules.metric_column = Some("GDP_USD_millions".into());

        let table = extract_table(doc, &rules).unwrap();
        assert_eq!(table.len(), 1);
        let row = table.row(0).unwrap();
        assert_eq!(row.get("Country"), Some("United States"));
        assert_eq!(row.get("GDP_USD_millions"), Some("26,854,599"));
    }

    #[test]
    fn missing_table_is_reported() {
        let rules = ExtractRules::new(
            TableLocator::new("table.does-not-exist", 0),
            vec!["Bank name".into()],
        );
        let err = extract_table(BANKS, &rules).unwrap_err();
        assert!(matches!(err, ExtractionError::TableNotFound { index: 0, .. }));
    }

    #[test]
    fn unknown_attribute_is_reported() {
        let rules = ExtractRules::new(
            TableLocator::new("table.wikitable", 0),
            vec!["Total assets".into()],
        );
        match extract_table(BANKS, &rules).unwrap_err() {
            ExtractionError::MissingAttribute {
                attribute,
                available,
            } => {
                assert_eq!(attribute, "Total assets");
                assert_eq!(available, vec!["Rank", "Bank name", "Market cap"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn bad_selector_is_reported() {
        let rules = ExtractRules::new(TableLocator::new("table[", 0), vec!["A".into()]);
        assert!(matches!(
            extract_table(BANKS, &rules).unwrap_err(),
            ExtractionError::InvalidSelector { .. }
        ));
    }

    #[test]
    fn missing_table_stage_leaves_a_trail() {
        let log = MemoryProgressLog::new();
        let fetcher = Fetcher::new(None).unwrap();
        let rules = ExtractRules::new(TableLocator::new("table.gone", 0), vec!["A".into()]);

        let err = extract(&fetcher, &Source::Inline(BANKS.into()), &rules, &log).unwrap_err();
        assert!(matches!(err, ExtractionError::TableNotFound { .. }));

        let messages = log.messages();
        assert_eq!(messages[0], "Starting extraction process");
        assert!(messages[1].starts_with("Error during extraction: table not found"));
        assert_eq!(messages.len(), 2);
    }

    #[test]
    fn successful_stage_logs_completion() {
        let log = MemoryProgressLog::new();
        let fetcher = Fetcher::new(None).unwrap();
        let table = extract(&fetcher, &Source::Inline(BANKS.into()), &bank_rules(), &log).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(
            log.messages(),
            vec!["Starting extraction process", "Extraction process completed"]
        );
    }
}
