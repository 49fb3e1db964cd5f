// src/config/mod.rs
//! Run configuration, read from YAML and patched from the command line.

use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::debug;

use crate::error::ConfigError;
use crate::extract::{ExtractRules, TableLocator, MISSING_DATA};
use crate::fetch::Source;
use crate::transform::MetricSpec;

pub const DEFAULT_URL: &str =
    "https://web.archive.org/web/20230908091635/https://en.wikipedia.org/wiki/List_of_largest_banks";

/// Everything a run needs. Each field has a default, so an empty YAML
/// document describes the largest-banks run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Page to scrape. Ignored when `file` is set.
    pub url: Option<String>,
    /// Saved copy of the page.
    pub file: Option<PathBuf>,
    /// HTTP timeout in seconds; unset means wait forever.
    pub timeout_secs: Option<u64>,

    pub table: TableLocator,
    pub attributes: Vec<String>,
    /// Positional names for pages whose header row doesn't match the data cells.
    pub columns: Option<Vec<String>>,
    pub key_column: Option<String>,
    pub sentinel: String,
    pub metric: MetricSpec,

    pub rates_path: PathBuf,
    pub csv_path: PathBuf,
    pub db_path: PathBuf,
    pub table_name: String,
    pub log_path: PathBuf,
    /// Verification query; `{table}` expands to `table_name`.
    pub query: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            url: Some(DEFAULT_URL.to_string()),
            file: None,
            timeout_secs: None,
            table: TableLocator::new("table.wikitable", 0),
            attributes: vec!["Bank name".to_string(), "Market cap (US$ billion)".to_string()],
            columns: None,
            key_column: None,
            sentinel: MISSING_DATA.to_string(),
            metric: MetricSpec {
                column: "Market cap (US$ billion)".to_string(),
                base_column: "MC_USD_Billion".to_string(),
                column_template: "MC_{unit}_Billion".to_string(),
                ..MetricSpec::default()
            },
            rates_path: PathBuf::from("exchange_rate.csv"),
            csv_path: PathBuf::from("Largest_banks_data.csv"),
            db_path: PathBuf::from("Banks.db"),
            table_name: "Largest_banks".to_string(),
            log_path: PathBuf::from("code_log.txt"),
            query: "SELECT * FROM {table} WHERE MC_USD_Billion >= 100".to_string(),
        }
    }
}

/// Command-line replacements for single config fields.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub url: Option<String>,
    pub file: Option<PathBuf>,
    pub table_name: Option<String>,
    pub db_path: Option<PathBuf>,
    pub csv_path: Option<PathBuf>,
    pub rates_path: Option<PathBuf>,
    pub log_path: Option<PathBuf>,
    pub query: Option<String>,
    pub timeout_secs: Option<u64>,
}

impl PipelineConfig {
    pub fn from_yaml_str(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        // an empty document deserializes to unit, not to an empty map
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text).map_err(|source| ConfigError::Yaml {
            path: origin.to_path_buf(),
            source,
        })
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let cfg = Self::from_yaml_str(&text, path)?;
        debug!(path = %path.display(), "loaded config");
        Ok(cfg)
    }

    /// Apply command-line overrides. A URL replaces a configured file and
    /// the other way round.
    pub fn apply(&mut self, o: Overrides) {
        if let Some(url) = o.url {
            self.url = Some(url);
            self.file = None;
        }
        if let Some(file) = o.file {
            self.file = Some(file);
            self.url = None;
        }
        if let Some(v) = o.table_name {
            self.table_name = v;
        }
        if let Some(v) = o.db_path {
            self.db_path = v;
        }
        if let Some(v) = o.csv_path {
            self.csv_path = v;
        }
        if let Some(v) = o.rates_path {
            self.rates_path = v;
        }
        if let Some(v) = o.log_path {
            self.log_path = v;
        }
        if let Some(v) = o.query {
            self.query = v;
        }
        if o.timeout_secs.is_some() {
            self.timeout_secs = o.timeout_secs;
        }
    }

    /// Reject configurations that would fail halfway through a run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.url.is_none() && self.file.is_none() {
            return invalid("no source: set `url` or `file`".into());
        }
        if self.table.selector.trim().is_empty() {
            return invalid("table selector is empty".into());
        }
        if self.attributes.is_empty() {
            return invalid("`attributes` is empty".into());
        }
        let mut seen = HashSet::new();
        if let Some(dup) = self.attributes.iter().find(|a| !seen.insert(a.as_str())) {
            return invalid(format!("attribute `{dup}` is listed twice"));
        }
        if !self.attributes.contains(&self.metric.column) {
            return invalid(format!(
                "metric column `{}` is not among the attributes {:?}",
                self.metric.column, self.attributes
            ));
        }
        if self.attributes.contains(&self.metric.base_column) {
            return invalid(format!(
                "base column `{}` clashes with an attribute",
                self.metric.base_column
            ));
        }
        if !self.metric.column_template.contains("{unit}") {
            return invalid(format!(
                "column template `{}` lacks `{{unit}}`",
                self.metric.column_template
            ));
        }
        if !(self.metric.scale.is_finite() && self.metric.scale != 0.0) {
            return invalid(format!("scale must be finite and non-zero, got {}", self.metric.scale));
        }
        if self.table_name.trim().is_empty() {
            return invalid("`table_name` is empty".into());
        }
        if self.query.trim().is_empty() {
            return invalid("`query` is empty".into());
        }
        Ok(())
    }

    pub fn source(&self) -> Option<Source> {
        match (&self.file, &self.url) {
            (Some(file), _) => Some(Source::File(file.clone())),
            (None, Some(url)) => Some(Source::Url(url.clone())),
            (None, None) => None,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    pub fn extract_rules(&self) -> ExtractRules {
        ExtractRules {
            columns: self.columns.clone(),
            key_column: self.key_column.clone(),
            sentinel: self.sentinel.clone(),
            ..ExtractRules::new(self.table.clone(), self.attributes.clone())
                .with_metric_column(self.metric.column.as_str())
        }
    }

    /// The verification query with `{table}` filled in.
    pub fn resolved_query(&self) -> String {
        self.query.replace("{table}", &self.table_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn empty_document_is_the_default_run() {
        let cfg = PipelineConfig::from_yaml_str("", Path::new("empty.yaml")).unwrap();
        assert_eq!(cfg, PipelineConfig::default());
        cfg.validate().unwrap();
        assert_eq!(
            cfg.resolved_query(),
            "SELECT * FROM Largest_banks WHERE MC_USD_Billion >= 100"
        );
    }

    #[test]
    fn partial_yaml_keeps_other_defaults() {
        let mut tmp = NamedTempFile::new().unwrap();
        write!(
            tmp,
            "table_name: Top_banks\ntable:\n  selector: tbody\n  index: 2\n"
        )
        .unwrap();
        let cfg = PipelineConfig::from_yaml_file(tmp.path()).unwrap();
        assert_eq!(cfg.table_name, "Top_banks");
        assert_eq!(cfg.table, TableLocator::new("tbody", 2));
        assert_eq!(cfg.db_path, PathBuf::from("Banks.db"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = PipelineConfig::from_yaml_str("tabel_name: x\n", Path::new("c.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Yaml { .. }));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        assert!(matches!(
            PipelineConfig::from_yaml_file("/no/such/config.yaml").unwrap_err(),
            ConfigError::Read { .. }
        ));
    }

    #[test]
    fn file_override_replaces_url() {
        let mut cfg = PipelineConfig::default();
        cfg.apply(Overrides {
            file: Some("page.html".into()),
            table_name: Some("Banks".into()),
            ..Overrides::default()
        });
        assert_eq!(cfg.source(), Some(Source::File("page.html".into())));
        assert_eq!(cfg.url, None);
        assert_eq!(cfg.table_name, "Banks");
    }

    #[test]
    fn validate_catches_bad_metric_setup() {
        let mut cfg = PipelineConfig::default();
        cfg.metric.column = "GDP".into();
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));

        let mut cfg = PipelineConfig::default();
        cfg.metric.column_template = "converted".into();
        assert!(cfg.validate().is_err());

        let mut cfg = PipelineConfig::default();
        cfg.metric.scale = 0.0;
        assert!(cfg.validate().is_err());

        let mut cfg = PipelineConfig::default();
        cfg.url = None;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn duplicate_attributes_are_rejected() {
        let mut cfg = PipelineConfig::default();
        cfg.attributes.push("Bank name".into());
        match cfg.validate() {
            Err(ConfigError::Invalid(msg)) => assert!(msg.contains("Bank name")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn shipped_configs_are_valid() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("config");

        let banks = PipelineConfig::from_yaml_file(dir.join("largest_banks.yaml")).unwrap();
        banks.validate().unwrap();
        assert_eq!(banks.metric, PipelineConfig::default().metric);

        let gdp = PipelineConfig::from_yaml_file(dir.join("gdp.yaml")).unwrap();
        gdp.validate().unwrap();
        assert_eq!(gdp.table, TableLocator::new("tbody", 2));
        assert_eq!(gdp.metric.scale, 1000.0);
        assert_eq!(gdp.extract_rules().key_column.as_deref(), Some("Country"));
        assert_eq!(
            gdp.resolved_query(),
            "SELECT * FROM Countries_by_GDP WHERE GDP_USD_billions >= 100"
        );
    }

    #[test]
    fn extract_rules_check_the_metric_column() {
        let rules = PipelineConfig::default().extract_rules();
        assert_eq!(rules.metric_column.as_deref(), Some("Market cap (US$ billion)"));
        assert_eq!(rules.sentinel, MISSING_DATA);
        assert_eq!(rules.locator.selector, "table.wikitable");
    }
}
