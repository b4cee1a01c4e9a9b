//! Archive service client
//!
//! Thin HTTP layer over the two remote interfaces: paginated index queries
//! and byte-range fetches against raw storage. Every failure is classified
//! here (transient vs fatal vs integrity) so callers only deal with
//! [`FetchError`].

use reqwest::header::RANGE;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::warn;
use wharf_common::{Result, WharfError};

use crate::config::HarvestConfig;
use crate::error::{FetchError, RetryDecision, RetryPolicy};
use crate::record::{parse_ndjson, RawRecord};

/// Client for the index query and raw storage services.
#[derive(Debug, Clone)]
pub struct ArchiveClient {
    http: reqwest::Client,
    index_url: String,
    data_url: String,
    site_filter: String,
    retry_policy: RetryPolicy,
}

impl ArchiveClient {
    pub fn new(config: &HarvestConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("wharf/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| WharfError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            index_url: config.index_url.trim_end_matches('/').to_string(),
            data_url: config.data_url.trim_end_matches('/').to_string(),
            site_filter: config.site_filter.clone(),
            retry_policy: config.retry_policy(),
        })
    }

    /// Fully-formed query URL for one index page.
    pub fn index_page_url(&self, segment: &str, page: u32) -> String {
        format!(
            "{}/{}-index?url={}&output=json&page={}",
            self.index_url, segment, self.site_filter, page
        )
    }

    fn page_count_url(&self, segment: &str) -> String {
        format!(
            "{}/{}-index?url={}&output=json&showNumPages=true",
            self.index_url, segment, self.site_filter
        )
    }

    /// Fully-formed URL for a raw storage file.
    pub fn storage_url(&self, filename: &str) -> String {
        format!("{}/{}", self.data_url, filename.trim_start_matches('/'))
    }

    /// Number of result pages a segment's index holds for the configured
    /// site filter.
    ///
    /// Transient probe failures retry on the configured policy; a fatal
    /// response or a body with no parseable page count falls back to a
    /// single page immediately. Exhausting the retry budget falls back the
    /// same way, so enumeration proceeds conservatively rather than failing.
    pub async fn page_count(&self, segment: &str) -> u32 {
        let url = self.page_count_url(segment);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.probe_page_count(&url).await {
                Ok(Some(pages)) => return pages.max(1),
                Ok(None) => {
                    warn!(segment, "no parseable page count in probe response, assuming one page");
                    return 1;
                },
                Err(error) => match self.retry_policy.decide(attempt, &error) {
                    RetryDecision::Retry(delay) => {
                        warn!(
                            segment,
                            attempt,
                            error = %error,
                            "page-count probe failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    },
                    RetryDecision::GiveUp => {
                        warn!(
                            segment,
                            error = %error,
                            "page-count probe failed, assuming one page"
                        );
                        return 1;
                    },
                },
            }
        }
    }

    async fn probe_page_count(&self, url: &str) -> std::result::Result<Option<u32>, FetchError> {
        #[derive(Deserialize)]
        struct PageProbe {
            pages: u32,
        }

        let response = self.http.get(url).send().await.map_err(request_error)?;
        check_status(response.status(), url)?;
        let body = response.text().await.map_err(request_error)?;

        // The service sometimes prefixes the descriptor with blank or
        // non-JSON lines; scan for the first line that parses.
        for line in body.lines() {
            if let Ok(probe) = serde_json::from_str::<PageProbe>(line.trim()) {
                return Ok(Some(probe.pages));
            }
        }
        Ok(None)
    }

    /// Fetch one index page and parse its records.
    pub async fn fetch_index_page(
        &self,
        url: &str,
    ) -> std::result::Result<Vec<RawRecord>, FetchError> {
        let response = self.http.get(url).send().await.map_err(request_error)?;
        check_status(response.status(), url)?;
        let body = response.text().await.map_err(request_error)?;
        Ok(parse_ndjson(&body))
    }

    /// Fetch `length` bytes at `offset` from a raw storage file.
    ///
    /// The transferred byte count is verified against the request; a
    /// mismatch is an integrity error and will be retried by the caller.
    pub async fn fetch_range(
        &self,
        filename: &str,
        offset: u64,
        length: u64,
    ) -> std::result::Result<Vec<u8>, FetchError> {
        let url = self.storage_url(filename);
        let end = offset + length.saturating_sub(1);
        let response = self
            .http
            .get(&url)
            .header(RANGE, format!("bytes={offset}-{end}"))
            .send()
            .await
            .map_err(request_error)?;
        check_status(response.status(), &url)?;

        use futures::StreamExt;
        let mut bytes = Vec::with_capacity(length as usize);
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(request_error)?;
            bytes.extend_from_slice(&chunk);
        }

        if bytes.len() as u64 != length {
            return Err(FetchError::Integrity {
                expected: length,
                actual: bytes.len() as u64,
            });
        }
        Ok(bytes)
    }
}

/// Errors raised by the HTTP stack itself (timeouts, connection resets,
/// body truncation) are all transient.
fn request_error(error: reqwest::Error) -> FetchError {
    FetchError::Transient(error.to_string())
}

/// Map a non-success status to its failure class. 4xx means the target is
/// genuinely absent (no retry), except 429 which is the service shedding
/// load.
pub(crate) fn check_status(status: StatusCode, url: &str) -> std::result::Result<(), FetchError> {
    if status.is_success() {
        Ok(())
    } else if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
        Err(FetchError::Fatal {
            status: status.as_u16(),
            url: url.to_string(),
        })
    } else {
        Err(FetchError::Transient(format!("HTTP {status} for {url}")))
    }
}
