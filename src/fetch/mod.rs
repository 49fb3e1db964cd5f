// src/fetch/mod.rs

use reqwest::blocking::Client;
use std::{fs, path::PathBuf, time::Duration};
use tracing::{debug, instrument};
use url::Url;

use crate::error::ExtractionError;

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Where the page holding the table comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// Fetched over HTTP(S).
    Url(String),
    /// A saved copy of the page.
    File(PathBuf),
    /// The document itself.
    Inline(String),
}

impl Source {
    pub fn describe(&self) -> String {
        match self {
            Source::Url(u) => u.clone(),
            Source::File(p) => p.display().to_string(),
            Source::Inline(s) => format!("<inline document, {} bytes>", s.len()),
        }
    }
}

/// Single-attempt document loader. No retries.
pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    /// `timeout: None` lets a hung request block forever.
    pub fn new(timeout: Option<Duration>) -> Result<Self, ExtractionError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|source| ExtractionError::Network {
                url: String::new(),
                source,
            })?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    #[instrument(level = "debug", skip(self), fields(source = %source.describe()))]
    pub fn load(&self, source: &Source) -> Result<String, ExtractionError> {
        match source {
            Source::Url(u) => self.get_text(u),
            Source::File(path) => {
                debug!("reading document from disk");
                fs::read_to_string(path).map_err(|source| ExtractionError::ReadDocument {
                    path: path.clone(),
                    source,
                })
            }
            Source::Inline(doc) => Ok(doc.clone()),
        }
    }

    fn get_text(&self, raw: &str) -> Result<String, ExtractionError> {
        let url = Url::parse(raw).map_err(|source| ExtractionError::InvalidUrl {
            url: raw.to_string(),
            source,
        })?;
        debug!(%url, "fetching document");

        let network = |source| ExtractionError::Network {
            url: url.to_string(),
            source,
        };
        let resp = self.client.get(url.clone()).send().map_err(network)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ExtractionError::Status {
                url: url.to_string(),
                status,
            });
        }
        let body = resp.text().map_err(network)?;
        debug!(%url, bytes = body.len(), "document received");
        Ok(body)
    }
}
