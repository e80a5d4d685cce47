//! Form source trait and HTTP adapter
//!
//! A [`FormSource`] returns one page of submissions for a form type. The
//! [`HttpFormSource`] adapter talks to a paginated REST endpoint of the form
//! `GET <base>?xmlns=<id>&limit=<n>&offset=<m>` answering
//! `{"objects": [...], "meta": {"next": <url|null>}}`.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Url;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::config::{RetryConfig, SourceConfig};
use crate::error::FetchError;
use crate::models::{Page, SourceObject};
use crate::sync::http_client::RetryingHttpClient;

/// Paginated source of form submissions
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FormSource: Send + Sync {
    /// Fetch one page of records for a form type
    async fn fetch_page(&self, source_id: &str, limit: u32, offset: u64)
        -> Result<Page, FetchError>;
}

/// Page envelope returned by the REST endpoint
#[derive(Debug, Deserialize)]
struct Envelope {
    objects: Vec<SourceObject>,
    #[serde(default)]
    meta: Meta,
}

#[derive(Debug, Default, Deserialize)]
struct Meta {
    #[serde(default)]
    next: Option<Value>,
}

impl Envelope {
    fn into_page(self) -> Page {
        let has_next = matches!(&self.meta.next, Some(Value::String(s)) if !s.is_empty());
        Page {
            records: self.objects,
            has_next,
        }
    }
}

/// Parse a response body into a page
pub fn parse_page(body: &[u8]) -> Result<Page, FetchError> {
    serde_json::from_slice::<Envelope>(body)
        .map(Envelope::into_page)
        .map_err(|e| FetchError::InvalidData(format!("Unexpected page body: {}", e)))
}

/// Authorization header value for the source API
///
/// The value is marked sensitive so it never shows up in debug output.
pub fn api_key_header(username: &str, api_key: &str) -> Result<HeaderValue, FetchError> {
    let mut value = HeaderValue::from_str(&format!("ApiKey {}:{}", username, api_key))
        .map_err(|_| FetchError::InvalidData("Credentials contain invalid characters".to_string()))?;
    value.set_sensitive(true);
    Ok(value)
}

/// REST adapter for [`FormSource`]
#[derive(Debug, Clone)]
pub struct HttpFormSource {
    base_url: Url,
    client: RetryingHttpClient,
}

impl HttpFormSource {
    /// Build the adapter from configuration
    ///
    /// Credentials are kept in memory only, as a default request header.
    pub fn new(source: &SourceConfig, retry: RetryConfig) -> Result<Self, FetchError> {
        let base_url = source
            .base_url
            .as_deref()
            .ok_or_else(|| FetchError::InvalidData("Missing source base URL".to_string()))?;
        let username = source.username.as_deref().unwrap_or_default();
        let api_key = source.api_key.as_deref().unwrap_or_default();

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, api_key_header(username, api_key)?);

        let client = RetryingHttpClient::new(source, retry, headers)?;
        Self::with_client(base_url, client)
    }

    /// Create the adapter around an existing client
    pub fn with_client(base_url: &str, client: RetryingHttpClient) -> Result<Self, FetchError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| FetchError::InvalidData(format!("Invalid source base URL: {}", e)))?;
        Ok(Self { base_url, client })
    }

    /// URL of one page
    pub fn page_url(&self, source_id: &str, limit: u32, offset: u64) -> Url {
        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .append_pair("xmlns", source_id)
            .append_pair("limit", &limit.to_string())
            .append_pair("offset", &offset.to_string());
        url
    }
}

#[async_trait]
impl FormSource for HttpFormSource {
    async fn fetch_page(
        &self,
        source_id: &str,
        limit: u32,
        offset: u64,
    ) -> Result<Page, FetchError> {
        let url = self.page_url(source_id, limit, offset);
        let body = self.client.get(url.as_str()).await?;
        let page = parse_page(&body)?;

        debug!(
            source_id = source_id,
            offset = offset,
            records = page.records.len(),
            has_next = page.has_next,
            "Fetched page"
        );

        Ok(page)
    }
}
