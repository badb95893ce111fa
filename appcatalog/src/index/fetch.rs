//! Index download.

use std::io::Read;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{CONTENT_LENGTH, ETAG, IF_NONE_MATCH};
use reqwest::StatusCode;
use tracing::debug;

use super::error::{UpdateError, UpdateResult};

/// Default timeout for index downloads.
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Read buffer size (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// Largest index archive accepted (256MB).
pub const MAX_INDEX_SIZE: u64 = 256 * 1024 * 1024;

/// Reports (bytes read, total bytes). Total is 0 when unknown.
pub type FetchProgress<'a> = &'a (dyn Fn(u64, u64) + Send + Sync);

/// Result of an index download.
#[derive(Debug, Clone, Default)]
pub struct FetchedIndex {
    /// Archive bytes. Empty when not modified.
    pub bytes: Vec<u8>,
    /// ETag reported by the server.
    pub etag: Option<String>,
    /// The server confirmed the stored ETag is current.
    pub not_modified: bool,
}

impl FetchedIndex {
    pub fn not_modified(etag: Option<String>) -> Self {
        Self {
            bytes: Vec::new(),
            etag,
            not_modified: true,
        }
    }

    pub fn downloaded(bytes: Vec<u8>, etag: Option<String>) -> Self {
        Self {
            bytes,
            etag,
            not_modified: false,
        }
    }
}

/// Downloads signed index archives.
pub trait IndexFetcher: Send + Sync {
    /// Fetch `url`, sending `etag` as a conditional request if present.
    fn fetch(
        &self,
        url: &str,
        etag: Option<&str>,
        progress: FetchProgress<'_>,
    ) -> UpdateResult<FetchedIndex>;
}

/// Blocking HTTP index fetcher.
#[derive(Debug)]
pub struct HttpIndexFetcher {
    client: Client,
    timeout: Duration,
}

impl HttpIndexFetcher {
    pub fn new() -> UpdateResult<Self> {
        Self::with_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(timeout: Duration) -> UpdateResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| UpdateError::Download {
                url: String::new(),
                reason: format!("Failed to create HTTP client: {}", e),
            })?;
        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl IndexFetcher for HttpIndexFetcher {
    fn fetch(
        &self,
        url: &str,
        etag: Option<&str>,
        progress: FetchProgress<'_>,
    ) -> UpdateResult<FetchedIndex> {
        let download_err = |reason: String| UpdateError::Download {
            url: url.to_string(),
            reason,
        };

        let mut request = self.client.get(url);
        if let Some(etag) = etag {
            request = request.header(IF_NONE_MATCH, etag);
        }

        let mut response = request.send().map_err(|e| {
            if e.is_timeout() {
                download_err(format!("timed out after {}s", self.timeout.as_secs()))
            } else {
                download_err(e.to_string())
            }
        })?;

        let new_etag = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if response.status() == StatusCode::NOT_MODIFIED {
            debug!(url, "Index not modified");
            return Ok(FetchedIndex::not_modified(
                new_etag.or_else(|| etag.map(str::to_string)),
            ));
        }
        if !response.status().is_success() {
            return Err(download_err(format!(
                "GET request failed with status {}",
                response.status()
            )));
        }

        let total = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0);

        if total > MAX_INDEX_SIZE {
            return Err(download_err(format!(
                "index is {} bytes, limit is {}",
                total, MAX_INDEX_SIZE
            )));
        }

        // The header is untrusted; cap the up-front allocation.
        let mut bytes = Vec::with_capacity(total.min(BUFFER_SIZE as u64 * 16) as usize);
        let mut buffer = vec![0u8; BUFFER_SIZE];
        loop {
            let read = response
                .read(&mut buffer)
                .map_err(|e| download_err(format!("Read error: {}", e)))?;
            if read == 0 {
                break;
            }
            if (bytes.len() + read) as u64 > MAX_INDEX_SIZE {
                return Err(download_err(format!(
                    "index exceeds limit of {} bytes",
                    MAX_INDEX_SIZE
                )));
            }
            bytes.extend_from_slice(&buffer[..read]);
            progress(bytes.len() as u64, total);
        }

        debug!(url, bytes = bytes.len(), "Downloaded index");
        Ok(FetchedIndex::downloaded(bytes, new_etag))
    }
}
