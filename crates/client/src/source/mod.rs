//! HTTP client for the remote document service.
//!
//! ### Endpoints
//!
//! - `GET {base}/documents?modifiedSince={ms}`: JSON array of
//!   `{ "docId": "...", "updateTime": <ms> }` for documents changed after
//!   `ms`.
//! - `GET {base}/documents/{docId}`: the raw document.
//!
//! Non-2xx responses become `SOURCE_FAILED`, timeouts `SOURCE_TIMEOUT`.

pub mod response;
pub mod url;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, header};

use doccache_core::{ChangedDocument, ConfigError, DocId, DocumentSource, EngineConfig, Error, Timestamp};

pub use response::{ChangedDocumentWire, parse_listing};
pub use self::url::{UrlError, base_url, endpoint};

/// Configuration for the document service client.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Base URL; endpoints are appended as path segments.
    pub base_url: String,

    /// User agent string (default: "doccache/0.1")
    pub user_agent: String,

    /// Request timeout (default: 20s)
    pub timeout: Duration,
}

impl SourceConfig {
    /// Build from the engine configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if no source URL is configured.
    pub fn from_engine_config(config: &EngineConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            base_url: config.require_source_url()?.to_string(),
            user_agent: config.user_agent.clone(),
            timeout: config.timeout(),
        })
    }
}

/// [`DocumentSource`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpSource {
    http: Client,
    base: ::url::Url,
}

fn request_error(what: &str, err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::SourceTimeout(format!("{what}: {err}"))
    } else {
        Error::SourceFailed(format!("{what}: network error: {err}"))
    }
}

impl HttpSource {
    /// Create a new client with the given configuration.
    pub fn new(config: SourceConfig) -> Result<Self, Error> {
        let base = base_url(&config.base_url).map_err(|e| Error::InvalidInput(format!("source_url: {e}")))?;

        let http = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .use_rustls_tls()
            .gzip(true)
            .build()
            .map_err(|e| Error::SourceFailed(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { http, base })
    }

    pub fn base(&self) -> &::url::Url {
        &self.base
    }

    async fn get(&self, url: ::url::Url, accept: &str) -> Result<Bytes, Error> {
        let what = url.to_string();
        let response = self
            .http
            .get(url)
            .header(header::ACCEPT, accept)
            .send()
            .await
            .map_err(|e| request_error(&what, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::SourceFailed(format!("{what}: status {}", status.as_u16())));
        }

        response.bytes().await.map_err(|e| request_error(&what, e))
    }
}

#[async_trait]
impl DocumentSource for HttpSource {
    async fn list_changed_since(&self, since: Timestamp) -> Result<Vec<ChangedDocument>, Error> {
        let start = Instant::now();
        let mut url = endpoint(&self.base, &["documents"]);
        url.query_pairs_mut()
            .append_pair("modifiedSince", &since.as_millis().to_string());

        let body = self.get(url, "application/json").await?;
        let listing = parse_listing(&body)?;

        tracing::debug!(
            since = %since,
            listed = listing.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "listed remote changes"
        );
        Ok(listing)
    }

    async fn fetch_document(&self, doc_id: &DocId) -> Result<Bytes, Error> {
        let url = endpoint(&self.base, &["documents", doc_id.as_str()]);
        let body = self.get(url, "*/*").await?;
        tracing::trace!(doc_id = %doc_id, bytes = body.len(), "fetched document");
        Ok(body)
    }
}
