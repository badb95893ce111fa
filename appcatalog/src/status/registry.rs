//! In-flight install job status, keyed by canonical URL.

use std::fmt;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::trace;

use crate::catalog::PackageVersion;

/// Capacity of the change broadcast.
const EVENT_CAPACITY: usize = 256;

/// Lifecycle state of an install job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    PendingInstall,
    Downloading,
    ReadyToInstall,
    Installing,
    Installed,
    Error,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Installed | JobState::Error)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::PendingInstall => "pending",
            JobState::Downloading => "downloading",
            JobState::ReadyToInstall => "ready to install",
            JobState::Installing => "installing",
            JobState::Installed => "installed",
            JobState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Action a UI can offer for a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FollowupAction {
    /// Cancel the running download.
    CancelDownload { url: String },
    /// The installer needs the user to confirm.
    ConfirmInstall { url: String },
}

/// Status of one job.
#[derive(Debug, Clone)]
pub struct AppUpdateStatus {
    pub url: String,
    pub app_name: String,
    pub version: PackageVersion,
    pub state: JobState,
    pub followup: Option<FollowupAction>,
    pub bytes_read: u64,
    pub total_bytes: u64,
    pub error: Option<String>,
}

impl AppUpdateStatus {
    pub fn package_name(&self) -> &str {
        &self.version.package_name
    }
}

/// A change to the registry. `state` is `None` when the entry was removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    pub url: String,
    pub state: Option<JobState>,
}

/// Concurrently readable status table.
///
/// Each entry is written only by the handler that owns its URL; readers
/// may take snapshots at any time or subscribe to changes.
#[derive(Debug)]
pub struct StatusRegistry {
    entries: DashMap<String, AppUpdateStatus>,
    events: broadcast::Sender<StatusEvent>,
}

impl Default for StatusRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusRegistry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            entries: DashMap::new(),
            events,
        }
    }

    /// Receive every subsequent change.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.events.subscribe()
    }

    /// Snapshot of every entry, ordered by URL.
    pub fn get_all(&self) -> Vec<AppUpdateStatus> {
        let mut all: Vec<AppUpdateStatus> = self.entries.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.url.cmp(&b.url));
        all
    }

    pub fn get(&self, url: &str) -> Option<AppUpdateStatus> {
        self.entries.get(url).map(|e| e.value().clone())
    }

    pub fn contains(&self, url: &str) -> bool {
        self.entries.contains_key(url)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert or replace the entry for `version`'s canonical URL.
    ///
    /// Progress is kept when an existing entry is updated.
    pub fn add_or_update(
        &self,
        version: &PackageVersion,
        app_name: &str,
        state: JobState,
        followup: Option<FollowupAction>,
    ) {
        let url = version.canonical_url();
        self.entries
            .entry(url.clone())
            .and_modify(|e| {
                e.state = state;
                e.followup = followup.clone();
                if state != JobState::Error {
                    e.error = None;
                }
            })
            .or_insert_with(|| AppUpdateStatus {
                url: url.clone(),
                app_name: app_name.to_string(),
                version: version.clone(),
                state,
                followup,
                bytes_read: 0,
                total_bytes: 0,
                error: None,
            });
        self.publish(url, Some(state));
    }

    /// Change the state of an existing entry. Returns false if absent.
    pub fn update(&self, url: &str, state: JobState, followup: Option<FollowupAction>) -> bool {
        let updated = match self.entries.get_mut(url) {
            Some(mut entry) => {
                entry.state = state;
                entry.followup = followup;
                if state != JobState::Error {
                    entry.error = None;
                }
                true
            }
            None => false,
        };
        if updated {
            self.publish(url.to_string(), Some(state));
        }
        updated
    }

    /// Record transfer progress for an existing entry.
    pub fn update_progress(&self, url: &str, bytes_read: u64, total_bytes: u64) {
        let state = self.entries.get_mut(url).map(|mut entry| {
            entry.bytes_read = bytes_read;
            entry.total_bytes = total_bytes;
            entry.state
        });
        if let Some(state) = state {
            self.publish(url.to_string(), Some(state));
        }
    }

    /// Move an existing entry to [`JobState::Error`] with a message.
    pub fn set_error(&self, url: &str, message: &str) -> bool {
        let updated = match self.entries.get_mut(url) {
            Some(mut entry) => {
                entry.state = JobState::Error;
                entry.followup = None;
                entry.error = Some(message.to_string());
                true
            }
            None => false,
        };
        if updated {
            self.publish(url.to_string(), Some(JobState::Error));
        }
        updated
    }

    pub fn remove_by_url(&self, url: &str) -> Option<AppUpdateStatus> {
        let removed = self.entries.remove(url).map(|(_, status)| status);
        if removed.is_some() {
            self.publish(url.to_string(), None);
        }
        removed
    }

    fn publish(&self, url: String, state: Option<JobState>) {
        trace!(url = %url, state = ?state, "Status changed");
        // No receivers is fine.
        let _ = self.events.send(StatusEvent { url, state });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::RepoId;

    fn version() -> PackageVersion {
        PackageVersion {
            package_name: "org.example.app".to_string(),
            version_code: 3,
            version_name: "1.3".to_string(),
            file_name: "app_3.apk".to_string(),
            hash: String::new(),
            size: 100,
            repo_id: RepoId(1),
            repo_address: "https://repo.example/fdroid".to_string(),
            expansions: Vec::new(),
        }
    }

    const URL: &str = "https://repo.example/fdroid/app_3.apk";

    #[test]
    fn test_add_then_update_keeps_progress() {
        let registry = StatusRegistry::new();
        registry.add_or_update(&version(), "App", JobState::PendingInstall, None);
        registry.update_progress(URL, 40, 100);
        registry.add_or_update(&version(), "App", JobState::Downloading, None);

        let status = registry.get(URL).unwrap();
        assert_eq!(status.state, JobState::Downloading);
        assert_eq!(status.bytes_read, 40);
        assert_eq!(status.package_name(), "org.example.app");
    }

    #[test]
    fn test_update_missing_entry_is_noop() {
        let registry = StatusRegistry::new();
        assert!(!registry.update(URL, JobState::Installing, None));
        assert!(!registry.set_error(URL, "boom"));
        registry.update_progress(URL, 1, 2);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_error_cleared_on_recovery() {
        let registry = StatusRegistry::new();
        registry.add_or_update(&version(), "App", JobState::Downloading, None);
        registry.set_error(URL, "disk full");
        assert_eq!(registry.get(URL).unwrap().error.as_deref(), Some("disk full"));

        registry.update(URL, JobState::Downloading, None);
        assert!(registry.get(URL).unwrap().error.is_none());
    }

    #[test]
    fn test_events_published_in_order() {
        let registry = StatusRegistry::new();
        let mut rx = registry.subscribe();

        registry.add_or_update(&version(), "App", JobState::PendingInstall, None);
        registry.update(
            URL,
            JobState::Downloading,
            Some(FollowupAction::CancelDownload {
                url: URL.to_string(),
            }),
        );
        registry.remove_by_url(URL);
        registry.remove_by_url(URL);

        let states: Vec<Option<JobState>> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| e.state)
            .collect();
        assert_eq!(
            states,
            vec![Some(JobState::PendingInstall), Some(JobState::Downloading), None]
        );
    }

    #[test]
    fn test_get_all_sorted() {
        let registry = StatusRegistry::new();
        let mut b = version();
        b.file_name = "b.apk".to_string();
        let mut a = version();
        a.file_name = "a.apk".to_string();
        registry.add_or_update(&b, "B", JobState::Downloading, None);
        registry.add_or_update(&a, "A", JobState::Downloading, None);

        let urls: Vec<String> = registry.get_all().into_iter().map(|s| s.url).collect();
        assert_eq!(
            urls,
            vec![
                "https://repo.example/fdroid/a.apk",
                "https://repo.example/fdroid/b.apk"
            ]
        );
        assert!(JobState::Installed.is_terminal());
        assert!(!JobState::Installing.is_terminal());
    }
}
