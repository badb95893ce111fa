//! Repository sync runs.
//!
//! [`RepoSyncCoordinator`] decides whether a run should happen, updates
//! each enabled repository through the [`IndexUpdater`](crate::index::IndexUpdater),
//! optionally queues every available update, and reports one [`SyncStatus`].

mod coordinator;
mod network;
mod settings;
mod status;
mod summary;

pub use coordinator::{RepoSyncCoordinator, SyncError, SyncRequest, LAST_UPDATE_CHECK_KEY};
pub use network::{NetworkMonitor, NetworkState, StaticNetwork};
pub use settings::SyncSettings;
pub use status::{SkipReason, SyncEvent, SyncStatus};
pub use summary::{UpdateSummary, MAX_UPDATES_TO_SHOW};
