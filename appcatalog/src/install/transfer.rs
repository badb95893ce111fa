//! Package file transfers.
//!
//! The orchestrator consumes transfers only through [`TransferService`]:
//! it enqueues a request and listens for [`TransferEvent`]s under the
//! canonical URL. [`HttpTransferService`] runs each transfer on tokio's
//! blocking pool with a blocking `reqwest` client, resuming partial files
//! with HTTP Range requests.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use reqwest::blocking::{Client, Response};
use reqwest::header::{CONTENT_LENGTH, RANGE};
use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::events::{EventBus, TransferEvent};
use crate::repo::RepoId;

/// Read buffer size (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// One transfer to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    /// URL to fetch from, possibly on a mirror.
    pub mirror_url: String,
    /// Identity of the job; events are published under this key.
    pub canonical_url: String,
    pub repo_id: RepoId,
    pub dest: PathBuf,
    /// Connect timeout for this attempt.
    pub timeout: Duration,
}

/// Transfer collaborator.
pub trait TransferService: Send + Sync {
    /// Bus on which events are published, keyed by canonical URL.
    fn events(&self) -> &EventBus<TransferEvent>;

    /// Start a transfer, replacing any running one for the same URL.
    fn enqueue(&self, request: TransferRequest);

    /// Cancel the transfer for `canonical_url`, if any.
    ///
    /// The transfer reports `Interrupted { message: None }` once it stops.
    fn cancel(&self, canonical_url: &str);

    fn is_queued_or_active(&self, canonical_url: &str) -> bool;
}

/// How a transfer ended.
#[derive(Debug)]
enum Outcome {
    Complete,
    Cancelled,
    ConnectionFailed(String),
    Failed(String),
}

struct ActiveTransfer {
    generation: u64,
    token: CancellationToken,
}

/// HTTP implementation of [`TransferService`].
pub struct HttpTransferService {
    events: Arc<EventBus<TransferEvent>>,
    active: Arc<DashMap<String, ActiveTransfer>>,
    generation: AtomicU64,
}

impl Default for HttpTransferService {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpTransferService {
    pub fn new() -> Self {
        Self {
            events: Arc::new(EventBus::new()),
            active: Arc::new(DashMap::new()),
            generation: AtomicU64::new(0),
        }
    }
}

impl TransferService for HttpTransferService {
    fn events(&self) -> &EventBus<TransferEvent> {
        &self.events
    }

    fn enqueue(&self, request: TransferRequest) {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                warn!(url = %request.canonical_url, error = %e, "No runtime for transfer");
                self.events.publish(
                    &request.canonical_url,
                    TransferEvent::Interrupted {
                        message: Some(format!("Transfer could not start: {}", e)),
                    },
                );
                return;
            }
        };

        let generation = self.generation.fetch_add(1, Ordering::SeqCst);
        let token = CancellationToken::new();
        if let Some(previous) = self.active.insert(
            request.canonical_url.clone(),
            ActiveTransfer {
                generation,
                token: token.clone(),
            },
        ) {
            previous.token.cancel();
        }

        let events = Arc::clone(&self.events);
        let active = Arc::clone(&self.active);
        handle.spawn_blocking(move || {
            let url = request.canonical_url.clone();
            events.publish(&url, TransferEvent::Started);

            let outcome = run_transfer(&request, &token, &|bytes_read, total_bytes| {
                events.publish(
                    &url,
                    TransferEvent::Progress {
                        bytes_read,
                        total_bytes,
                    },
                );
            });

            // Deregister before the final event so listeners see a settled state.
            active.remove_if(&url, |_, a| a.generation == generation);

            let event = match outcome {
                Outcome::Complete => {
                    info!(url = %url, mirror = %request.mirror_url, "Transfer complete");
                    TransferEvent::Complete {
                        local_file: request.dest.clone(),
                    }
                }
                Outcome::Cancelled => {
                    debug!(url = %url, "Transfer cancelled");
                    TransferEvent::Interrupted { message: None }
                }
                Outcome::ConnectionFailed(message) => {
                    warn!(url = %url, mirror = %request.mirror_url, error = %message, "Connection failed");
                    TransferEvent::ConnectionFailed {
                        mirror_url: request.mirror_url.clone(),
                        message,
                    }
                }
                Outcome::Failed(message) => {
                    warn!(url = %url, error = %message, "Transfer failed");
                    TransferEvent::Interrupted {
                        message: Some(message),
                    }
                }
            };
            events.publish(&url, event);
        });
    }

    fn cancel(&self, canonical_url: &str) {
        if let Some((_, transfer)) = self.active.remove(canonical_url) {
            debug!(url = %canonical_url, "Cancelling transfer");
            transfer.token.cancel();
        }
    }

    fn is_queued_or_active(&self, canonical_url: &str) -> bool {
        self.active.contains_key(canonical_url)
    }
}

/// Download `request.mirror_url` into `request.dest`, resuming if possible.
fn run_transfer(
    request: &TransferRequest,
    token: &CancellationToken,
    progress: &dyn Fn(u64, u64),
) -> Outcome {
    let client = match Client::builder()
        .connect_timeout(request.timeout)
        .timeout(None)
        .build()
    {
        Ok(client) => client,
        Err(e) => return Outcome::Failed(format!("Failed to create HTTP client: {}", e)),
    };

    let existing = fs::metadata(&request.dest).map(|m| m.len()).unwrap_or(0);
    let mut get = client.get(&request.mirror_url);
    if existing > 0 {
        get = get.header(RANGE, format!("bytes={}-", existing));
    }

    let response = match get.send() {
        Ok(response) => response,
        Err(e) if e.is_connect() || e.is_timeout() => return Outcome::ConnectionFailed(e.to_string()),
        Err(e) => return Outcome::Failed(e.to_string()),
    };

    let status = response.status();
    if status.is_server_error() {
        return Outcome::ConnectionFailed(format!("Server returned {}", status));
    }
    if !status.is_success() {
        return Outcome::Failed(format!("GET request failed with status {}", status));
    }

    let start = if status == StatusCode::PARTIAL_CONTENT {
        existing
    } else {
        0
    };
    let file = match open_destination(&request.dest, start) {
        Ok(file) => file,
        Err(e) => return Outcome::Failed(format!("{}: {}", request.dest.display(), e)),
    };

    stream_to_file(response, file, start, token, progress)
}

fn open_destination(dest: &Path, start: u64) -> std::io::Result<File> {
    if start > 0 {
        return OpenOptions::new().append(true).open(dest);
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    File::create(dest)
}

fn stream_to_file(
    mut response: Response,
    file: File,
    start: u64,
    token: &CancellationToken,
    progress: &dyn Fn(u64, u64),
) -> Outcome {
    let total = response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
        .map(|len| len + start)
        .unwrap_or(0);

    let mut writer = BufWriter::new(file);
    let mut buffer = vec![0u8; BUFFER_SIZE];
    let mut downloaded = start;

    loop {
        if token.is_cancelled() {
            let _ = writer.flush();
            return Outcome::Cancelled;
        }

        let bytes_read = match response.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                let _ = writer.flush();
                return Outcome::ConnectionFailed(format!("Read timed out: {}", e));
            }
            Err(e) => return Outcome::Failed(format!("Read error: {}", e)),
        };

        if let Err(e) = writer.write_all(&buffer[..bytes_read]) {
            return Outcome::Failed(format!("Write error: {}", e));
        }
        downloaded += bytes_read as u64;
        progress(downloaded, total);
    }

    if let Err(e) = writer.flush() {
        return Outcome::Failed(format!("Write error: {}", e));
    }
    if token.is_cancelled() {
        return Outcome::Cancelled;
    }
    Outcome::Complete
}
