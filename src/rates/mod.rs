// src/rates/mod.rs

use csv::ReaderBuilder;
use serde::Deserialize;
use std::{io::Read, path::Path};
use tracing::{debug, instrument};

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq)]
pub struct RateEntry {
    pub unit_code: String,
    pub factor: f64,
}

/// Conversion factors from the base unit, keyed by unit code.
///
/// Entries keep file order; derived columns are emitted in that order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateTable {
    entries: Vec<RateEntry>,
}

/// One line of the rate file before validation. Older exchange-rate files
/// use `Currency,Rate` headers.
#[derive(Debug, Deserialize)]
struct RateRecord {
    #[serde(alias = "Currency", alias = "currency")]
    unit_code: String,
    #[serde(alias = "Rate", alias = "rate")]
    factor: String,
}

impl RateTable {
    /// Build from `(unit, factor)` pairs; fails on duplicates like the file loader.
    pub fn from_pairs<I, S>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let mut table = Self::default();
        for (line, (unit, factor)) in (1u64..).zip(pairs) {
            table.insert(line, unit.into(), factor)?;
        }
        Ok(table)
    }

    #[instrument(level = "debug", skip(path), fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let table = Self::from_reader(file, path)?;
        debug!(units = table.len(), "loaded rate table");
        Ok(table)
    }

    fn from_reader<R: Read>(reader: R, path: &Path) -> Result<Self, ConfigError> {
        let malformed = |source| ConfigError::RateFile {
            path: path.to_path_buf(),
            source,
        };
        let mut rdr = ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let headers = rdr.headers().map_err(malformed)?.clone();
        let mut table = Self::default();

        for result in rdr.records() {
            let raw = result.map_err(malformed)?;
            // header is line 1
            let line = raw.position().map(|p| p.line()).unwrap_or_default();
            let record: RateRecord = raw.deserialize(Some(&headers)).map_err(malformed)?;
            let factor = parse_factor(&record.factor).ok_or_else(|| ConfigError::InvalidFactor {
                line,
                unit: record.unit_code.clone(),
                value: record.factor.clone(),
            })?;
            table.insert(line, record.unit_code, factor)?;
        }
        Ok(table)
    }

    fn insert(&mut self, line: u64, unit_code: String, factor: f64) -> Result<(), ConfigError> {
        if unit_code.is_empty() {
            return Err(ConfigError::EmptyUnit { line });
        }
        if !(factor.is_finite() && factor > 0.0) {
            return Err(ConfigError::InvalidFactor {
                line,
                value: factor.to_string(),
                unit: unit_code,
            });
        }
        if self.get(&unit_code).is_some() {
            return Err(ConfigError::DuplicateUnit {
                line,
                unit: unit_code,
            });
        }
        self.entries.push(RateEntry { unit_code, factor });
        Ok(())
    }

    pub fn get(&self, unit_code: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|e| e.unit_code == unit_code)
            .map(|e| e.factor)
    }

    pub fn entries(&self) -> &[RateEntry] {
        &self.entries
    }

    pub fn units(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.unit_code.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn parse_factor(raw: &str) -> Option<f64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite() && *f > 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn rate_file(contents: &str) -> NamedTempFile {
        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(contents.as_bytes()).unwrap();
        tmp
    }

    #[test]
    fn loads_units_in_file_order() {
        let tmp = rate_file("unit_code,factor\nEUR,0.93\nGBP,0.8\nINR,82.95\n");
        let rates = RateTable::load(tmp.path()).unwrap();
        assert_eq!(rates.units().collect::<Vec<_>>(), vec!["EUR", "GBP", "INR"]);
        assert_eq!(rates.get("GBP"), Some(0.8));
        assert_eq!(rates.get("JPY"), None);
    }

    #[test]
    fn accepts_currency_rate_headers() {
        let tmp = rate_file("Currency,Rate\nEUR, 0.93\n");
        let rates = RateTable::load(tmp.path()).unwrap();
        assert_eq!(rates.get("EUR"), Some(0.93));
    }

    #[test]
    fn non_numeric_factor_is_a_config_error() {
        let tmp = rate_file("unit_code,factor\nEUR,0.93\nGBP,abc\n");
        match RateTable::load(tmp.path()).unwrap_err() {
            ConfigError::InvalidFactor { line, unit, value } => {
                assert_eq!(line, 3);
                assert_eq!(unit, "GBP");
                assert_eq!(value, "abc");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn duplicate_units_are_rejected() {
        let tmp = rate_file("unit_code,factor\nEUR,0.93\nEUR,0.94\n");
        assert!(matches!(
            RateTable::load(tmp.path()).unwrap_err(),
            ConfigError::DuplicateUnit { .. }
        ));
    }

    #[test]
    fn missing_factor_column_is_rejected() {
        let tmp = rate_file("unit_code\nEUR\n");
        assert!(matches!(
            RateTable::load(tmp.path()).unwrap_err(),
            ConfigError::RateFile { .. }
        ));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        assert!(matches!(
            RateTable::load("/no/such/rates.csv").unwrap_err(),
            ConfigError::Read { .. }
        ));
    }

    #[test]
    fn from_pairs_rejects_zero_factor() {
        assert!(RateTable::from_pairs([("EUR", 0.93), ("GBP", 0.8)]).is_ok());
        assert!(matches!(
            RateTable::from_pairs([("EUR", 0.0)]).unwrap_err(),
            ConfigError::InvalidFactor { .. }
        ));
    }
}
