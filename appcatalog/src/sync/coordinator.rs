//! Repository sync runs.
//!
//! A run updates every enabled repository in priority order, one at a
//! time, and reports a single [`SyncStatus`].
//!
//! ```text
//! network? ──no──► NoNetwork
//!    │
//! scheduled? ──► interval disabled / too soon / metered ──► Skipped
//!    │
//! for each repository:
//!    IndexUpdater::update ──► changed ──► auto-download sweep (if enabled)
//!    │
//! record last run ──► status ──► updates-available notice
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::network::{NetworkMonitor, NetworkState};
use super::settings::SyncSettings;
use super::status::{SkipReason, SyncEvent, SyncStatus};
use super::summary::UpdateSummary;
use crate::catalog::CatalogStore;
use crate::index::{index_url, IndexUpdater, UpdateProgress};
use crate::install::{DurableMap, InstallError, InstallOrchestrator, LogNotifier, Notifier};
use crate::repo::{normalize_address, Repository};

/// Key under which the time of the last run is stored.
pub const LAST_UPDATE_CHECK_KEY: &str = "lastUpdateCheck";

/// Capacity of the event broadcast.
const EVENT_CAPACITY: usize = 64;

/// Failures that abort a whole run.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Update worker failed: {0}")]
    Worker(String),

    #[error("Failed to record last update check: {0}")]
    State(#[from] InstallError),
}

/// Parameters of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncRequest {
    /// Requested by the user rather than a schedule.
    pub manual: bool,
    /// Update only the repository at this address.
    pub address: Option<String>,
}

impl SyncRequest {
    pub fn manual() -> Self {
        Self {
            manual: true,
            address: None,
        }
    }

    pub fn scheduled() -> Self {
        Self::default()
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }
}

#[derive(Debug, Default)]
struct RunCounts {
    unchanged: usize,
    updated: usize,
    errors: Vec<String>,
}

impl RunCounts {
    fn status(self) -> SyncStatus {
        if self.errors.is_empty() {
            if self.updated > 0 {
                SyncStatus::CompleteWithChanges
            } else {
                SyncStatus::Unchanged
            }
        } else if self.updated + self.unchanged == 0 {
            SyncStatus::ErrorLocal {
                errors: self.errors,
            }
        } else {
            SyncStatus::ErrorLocalSmall {
                errors: self.errors,
            }
        }
    }
}

/// Runs repository updates.
pub struct RepoSyncCoordinator {
    catalog: Arc<dyn CatalogStore>,
    updater: Arc<IndexUpdater>,
    orchestrator: InstallOrchestrator,
    network: Arc<dyn NetworkMonitor>,
    state: Arc<dyn DurableMap>,
    notifier: Arc<dyn Notifier>,
    settings: SyncSettings,
    events: broadcast::Sender<SyncEvent>,
}

impl RepoSyncCoordinator {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        updater: Arc<IndexUpdater>,
        orchestrator: InstallOrchestrator,
        network: Arc<dyn NetworkMonitor>,
        state: Arc<dyn DurableMap>,
        settings: SyncSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            catalog,
            updater,
            orchestrator,
            network,
            state,
            notifier: Arc::new(LogNotifier),
            settings,
            events,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Receive progress and results of subsequent runs.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// When the last run finished, if ever.
    pub fn last_run(&self) -> Option<DateTime<Utc>> {
        self.state
            .get(LAST_UPDATE_CHECK_KEY)
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|t| t.with_timezone(&Utc))
    }

    /// Perform one run.
    pub async fn run_sync(&self, request: SyncRequest) -> SyncStatus {
        let status = match self.precheck(&request) {
            Some(status) => status,
            None => {
                info!(manual = request.manual, address = ?request.address, "Updating repositories");
                // Mirror escalation starts over with every run.
                self.orchestrator.mirrors().reset_all();

                let outcome = self.update_repositories(&request).await;
                let recorded = self.record_last_run();
                let status = match (outcome, recorded) {
                    (Ok(status), Ok(())) => status,
                    (Err(e), _) | (Ok(_), Err(e)) => {
                        error!(error = %e, "Repository update failed");
                        SyncStatus::ErrorGlobal(e.to_string())
                    }
                };
                self.notifier.sync_status(&status);
                status
            }
        };

        info!(status = ?status, "Repository update finished");
        let _ = self.events.send(SyncEvent::Finished(status.clone()));
        status
    }

    /// Reasons not to run at all.
    fn precheck(&self, request: &SyncRequest) -> Option<SyncStatus> {
        let network = self.network.state();
        if network == NetworkState::Unavailable {
            debug!("No network, not updating");
            if request.manual {
                self.notifier.transient("No network connection");
            }
            return Some(SyncStatus::NoNetwork {
                manual: request.manual,
            });
        }
        if request.manual {
            return None;
        }

        let Some(interval) = self.settings.interval() else {
            debug!("Scheduled updates disabled");
            return Some(SyncStatus::Skipped(SkipReason::Disabled));
        };
        if let Some(last) = self.last_run() {
            let next_due = last + interval;
            if Utc::now() < next_due {
                debug!(next_due = %next_due, "Not yet time for a scheduled update");
                return Some(SyncStatus::Skipped(SkipReason::TooSoon { next_due }));
            }
        }
        if network == NetworkState::Metered && self.settings.unmetered_only {
            debug!("Metered network, not updating");
            return Some(SyncStatus::Skipped(SkipReason::Metered));
        }
        None
    }

    async fn update_repositories(&self, request: &SyncRequest) -> Result<SyncStatus, SyncError> {
        let single = request.address.as_deref().map(normalize_address);
        let mut counts = RunCounts::default();

        for repo in self.catalog.repositories() {
            if !repo.in_use {
                continue;
            }
            match &single {
                Some(address) if repo.address != *address => {
                    counts.unchanged += 1;
                    continue;
                }
                None if repo.is_swap => continue,
                _ => {}
            }

            self.progress(format!("Connecting to {}", repo.address), None);
            let address = repo.address.clone();
            match self.update_one(repo).await? {
                Ok(true) => {
                    counts.updated += 1;
                    if self.settings.auto_download {
                        self.auto_download_sweep().await;
                    }
                }
                Ok(false) => counts.unchanged += 1,
                Err(message) => {
                    warn!(repo = %address, error = %message, "Error updating repository");
                    counts.errors.push(message);
                }
            }
        }

        if counts.updated > 0 && self.settings.update_notifications && !self.settings.auto_download
        {
            if let Some(summary) = UpdateSummary::from_apps(&self.catalog.updatable_apps()) {
                self.notifier.updates_available(&summary);
            }
        }

        info!(
            updated = counts.updated,
            unchanged = counts.unchanged,
            failed = counts.errors.len(),
            "Repositories processed"
        );
        Ok(counts.status())
    }

    /// Update one repository on the blocking pool.
    ///
    /// The outer error is a worker failure; the inner one is the
    /// repository's own error message.
    async fn update_one(&self, repo: Repository) -> Result<Result<bool, String>, SyncError> {
        let updater = Arc::clone(&self.updater);
        let events = self.events.clone();

        tokio::task::spawn_blocking(move || {
            let url = index_url(&repo);
            let report = move |progress: UpdateProgress| {
                let (message, percent) = describe_progress(&url, progress);
                let _ = events.send(SyncEvent::Progress { message, percent });
            };
            updater.update(&repo, &report).map_err(|e| e.to_string())
        })
        .await
        .map_err(|e| SyncError::Worker(e.to_string()))
    }

    /// Queue every available update, this client's own package last.
    ///
    /// Returns the packages queued, in order.
    pub async fn auto_download_sweep(&self) -> Vec<String> {
        let (own, others): (Vec<_>, Vec<_>) = self
            .catalog
            .updatable_apps()
            .into_iter()
            .partition(|app| app.package_name == self.settings.self_package);

        let mut queued = Vec::new();
        for app in others.into_iter().chain(own) {
            let url = app.suggested.canonical_url();
            if self.orchestrator.is_pending(&url) {
                debug!(url = %url, "Update already queued");
                continue;
            }
            match self.orchestrator.queue(&app.suggested, &app.name).await {
                Ok(_) => queued.push(app.package_name),
                Err(e) => warn!(package = %app.package_name, error = %e, "Failed to queue update"),
            }
        }
        if !queued.is_empty() {
            info!(count = queued.len(), "Queued automatic updates");
        }
        queued
    }

    fn record_last_run(&self) -> Result<(), SyncError> {
        self.state
            .put(LAST_UPDATE_CHECK_KEY, &Utc::now().to_rfc3339())?;
        Ok(())
    }

    fn progress(&self, message: String, percent: Option<u8>) {
        debug!("{}", message);
        let _ = self.events.send(SyncEvent::Progress { message, percent });
    }
}

fn percent(done: u64, total: u64) -> Option<u8> {
    (total > 0).then(|| (done.min(total) * 100 / total) as u8)
}

fn friendly_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

fn describe_progress(url: &str, progress: UpdateProgress) -> (String, Option<u8>) {
    match progress {
        UpdateProgress::Downloading {
            bytes_read,
            total_bytes,
        } => match percent(bytes_read, total_bytes) {
            Some(p) => (
                format!(
                    "Downloading {} ({} / {}, {}%)",
                    url,
                    friendly_size(bytes_read),
                    friendly_size(total_bytes),
                    p
                ),
                Some(p),
            ),
            None => (
                format!("Downloading {} ({})", url, friendly_size(bytes_read)),
                None,
            ),
        },
        UpdateProgress::ProcessingApps { done, total } => match percent(done, total) {
            Some(p) => (
                format!("Saving app details ({}/{}) from {}", done, total, url),
                Some(p),
            ),
            None => ("Saving app details".to_string(), None),
        },
        UpdateProgress::Committing => (format!("Saving repository {}", url), None),
    }
}
