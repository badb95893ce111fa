//! User-facing notices.
//!
//! Presentation is out of scope for the library; components report what
//! the user should see through [`Notifier`] and a front end decides how.

use tracing::{error, info, warn};

use crate::sync::{SyncStatus, UpdateSummary};

/// Out-of-band notices raised by the coordinator and orchestrator.
pub trait Notifier: Send + Sync {
    fn download_progress(&self, url: &str, app_name: &str, bytes_read: u64, total_bytes: u64);

    /// A package is downloaded and waiting on the user to install it.
    fn download_ready(&self, url: &str, app_name: &str);

    /// Persistent, dismissable error for one job.
    fn install_error(&self, url: &str, app_name: &str, message: &str);

    /// Remove whatever notice is showing for `url`.
    fn clear(&self, url: &str);

    /// Short-lived message.
    fn transient(&self, message: &str);

    fn updates_available(&self, summary: &UpdateSummary);

    fn sync_status(&self, status: &SyncStatus);

    /// Whether the detail view of `package` is on screen.
    fn is_detail_visible(&self, _package: &str) -> bool {
        false
    }
}

/// [`Notifier`] that writes notices to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn download_progress(&self, url: &str, app_name: &str, bytes_read: u64, total_bytes: u64) {
        tracing::debug!(url = %url, app = %app_name, bytes_read, total_bytes, "Downloading");
    }

    fn download_ready(&self, url: &str, app_name: &str) {
        info!(url = %url, app = %app_name, "Ready to install");
    }

    fn install_error(&self, url: &str, app_name: &str, message: &str) {
        error!(url = %url, app = %app_name, error = %message, "Install failed");
    }

    fn clear(&self, _url: &str) {}

    fn transient(&self, message: &str) {
        warn!("{}", message);
    }

    fn updates_available(&self, summary: &UpdateSummary) {
        info!(count = summary.count, "{}", summary.title);
        for line in summary.lines.iter().chain(summary.more.iter()) {
            info!("  {}", line);
        }
    }

    fn sync_status(&self, status: &SyncStatus) {
        if status.is_error() {
            warn!(status = %status, "Repository update finished");
        } else {
            info!(status = %status, "Repository update finished");
        }
    }
}
