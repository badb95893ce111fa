//! Package download and install.
//!
//! [`InstallOrchestrator`] drives one job per canonical URL through
//! download, verification and installation. Transfers and installs are
//! performed by the [`TransferService`] and [`Installer`] collaborators,
//! whose events arrive over per-URL [`EventBus`]es. Pending installs are
//! recorded in a [`DurableMap`] so they can be reconciled after a restart.

mod cache;
mod checksum;
mod durable;
mod error;
mod events;
mod expansion;
mod installer;
mod job;
mod notify;
mod orchestrator;
mod transfer;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{CacheState, DownloadCache};
pub use checksum::{calculate_file_checksum, file_matches_hash, verify_checksum, verify_download};
pub use durable::{DurableMap, JsonFileMap};
pub use error::{InstallError, InstallResult};
pub use events::{EventBus, InstallEvent, TransferEvent};
pub use expansion::{expansion_path, ExpansionFetcher};
pub use installer::{uninstall_key, DirectoryInstaller, Installer, DIRECTORY_INSTALLER_NAME};
pub use job::{InstallJob, JobEffect, JobEvent, MIRRORS_EXHAUSTED};
pub use notify::{LogNotifier, Notifier};
pub use orchestrator::{InstallOrchestrator, OrchestratorConfig, StartOutcome, StartRequest};
pub use transfer::{HttpTransferService, TransferRequest, TransferService};
