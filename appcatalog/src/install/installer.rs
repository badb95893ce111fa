//! Package installer collaborator.
//!
//! [`Installer`] reports progress as [`InstallEvent`]s keyed by canonical
//! URL; uninstalls are keyed by [`uninstall_key`]. [`DirectoryInstaller`]
//! places package files under `<install_dir>/<package>/` and records the
//! installed version.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info, warn};

use super::events::{EventBus, InstallEvent};
use crate::catalog::{InstalledPackages, PackageVersion};
use crate::status::FollowupAction;

/// Name this installer records as the installer of record.
pub const DIRECTORY_INSTALLER_NAME: &str = "appcatalog";

/// Event key for uninstalls of `package`.
pub fn uninstall_key(package: &str) -> String {
    format!("package:{}", package)
}

/// Installer collaborator.
pub trait Installer: Send + Sync {
    /// Bus on which events are published.
    fn events(&self) -> &EventBus<InstallEvent>;

    /// Install a downloaded package file.
    fn install(&self, local_file: &Path, canonical_url: &str, version: &PackageVersion);

    /// Remove an installed package.
    fn uninstall(&self, package: &str);

    /// Continue an install waiting on the user. Returns false if nothing
    /// was waiting on `action`.
    fn submit_followup(&self, _action: &FollowupAction) -> bool {
        false
    }

    /// Identity recorded against packages this installer installs.
    fn name(&self) -> &str;
}

#[derive(Debug, Clone)]
struct AwaitingConfirmation {
    local_file: PathBuf,
    version: PackageVersion,
}

/// What placing a file needs; cheap to move onto the blocking pool.
#[derive(Clone)]
struct Placement {
    install_dir: PathBuf,
    installed: Arc<dyn InstalledPackages>,
    events: Arc<EventBus<InstallEvent>>,
}

/// Installs packages by copying them into a directory.
pub struct DirectoryInstaller {
    placement: Placement,
    require_confirmation: bool,
    awaiting: DashMap<String, AwaitingConfirmation>,
}

impl DirectoryInstaller {
    pub fn new(install_dir: impl Into<PathBuf>, installed: Arc<dyn InstalledPackages>) -> Self {
        Self {
            placement: Placement {
                install_dir: install_dir.into(),
                installed,
                events: Arc::new(EventBus::new()),
            },
            require_confirmation: false,
            awaiting: DashMap::new(),
        }
    }

    /// Ask the user before placing each package.
    pub fn with_confirmation(mut self, require: bool) -> Self {
        self.require_confirmation = require;
        self
    }

    pub fn install_dir(&self) -> &Path {
        &self.placement.install_dir
    }

    /// URLs waiting for [`confirm`](Self::confirm) or [`decline`](Self::decline).
    pub fn awaiting_confirmation(&self) -> Vec<String> {
        let mut urls: Vec<String> = self.awaiting.iter().map(|e| e.key().clone()).collect();
        urls.sort();
        urls
    }

    /// Proceed with an install waiting on the user.
    ///
    /// Inside a tokio runtime the copy runs on the blocking pool and
    /// completion is reported through [`events`](Installer::events).
    pub fn confirm(&self, canonical_url: &str) -> bool {
        let Some((_, pending)) = self.awaiting.remove(canonical_url) else {
            return false;
        };
        let placement = self.placement.clone();
        let url = canonical_url.to_string();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || {
                    placement.place(&pending.local_file, &url, &pending.version)
                });
            }
            Err(_) => placement.place(&pending.local_file, &url, &pending.version),
        }
        true
    }

    /// Abandon an install waiting on the user.
    pub fn decline(&self, canonical_url: &str) -> bool {
        if self.awaiting.remove(canonical_url).is_none() {
            return false;
        }
        info!(url = %canonical_url, "Install declined");
        self.placement
            .events
            .publish(canonical_url, InstallEvent::Interrupted { message: None });
        true
    }
}

impl Placement {
    fn place(&self, local_file: &Path, canonical_url: &str, version: &PackageVersion) {
        match self.copy_into_place(local_file, version) {
            Ok(target) => {
                info!(
                    package = %version.package_name,
                    version = %version.version_name,
                    path = %target.display(),
                    "Package installed"
                );
                self.events.publish(canonical_url, InstallEvent::Completed);
            }
            Err(message) => {
                warn!(package = %version.package_name, error = %message, "Install failed");
                self.events.publish(
                    canonical_url,
                    InstallEvent::Interrupted {
                        message: Some(message),
                    },
                );
            }
        }
    }

    fn copy_into_place(&self, local_file: &Path, version: &PackageVersion) -> Result<PathBuf, String> {
        let dir = self.install_dir.join(&version.package_name);
        fs::create_dir_all(&dir).map_err(|e| format!("{}: {}", dir.display(), e))?;

        let target = dir.join(&version.file_name);
        let tmp = target.with_extension("part");
        fs::copy(local_file, &tmp).map_err(|e| format!("{}: {}", local_file.display(), e))?;
        fs::rename(&tmp, &target).map_err(|e| format!("{}: {}", target.display(), e))?;

        remove_other_files(&dir, &target);

        self.installed
            .record_installed(
                &version.package_name,
                version.version_code,
                &version.version_name,
            )
            .map_err(|e| e.to_string())?;
        Ok(target)
    }
}

/// Delete files in `dir` other than `keep`, logging failures.
fn remove_other_files(dir: &Path, keep: &Path) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path != keep && path.is_file() {
            if let Err(e) = fs::remove_file(&path) {
                debug!(path = %path.display(), error = %e, "Failed to remove old package file");
            }
        }
    }
}

impl Installer for DirectoryInstaller {
    fn events(&self) -> &EventBus<InstallEvent> {
        &self.placement.events
    }

    fn install(&self, local_file: &Path, canonical_url: &str, version: &PackageVersion) {
        debug!(url = %canonical_url, file = %local_file.display(), "Installing");
        self.placement.events.publish(canonical_url, InstallEvent::Started);

        if self.require_confirmation {
            self.awaiting.insert(
                canonical_url.to_string(),
                AwaitingConfirmation {
                    local_file: local_file.to_path_buf(),
                    version: version.clone(),
                },
            );
            self.placement.events.publish(
                canonical_url,
                InstallEvent::UserInteractionRequired(FollowupAction::ConfirmInstall {
                    url: canonical_url.to_string(),
                }),
            );
            return;
        }

        self.placement.place(local_file, canonical_url, version);
    }

    fn uninstall(&self, package: &str) {
        let key = uninstall_key(package);
        self.placement.events.publish(&key, InstallEvent::Started);

        let dir = self.placement.install_dir.join(package);
        let result = match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(format!("{}: {}", dir.display(), e)),
        }
        .and_then(|()| self.placement.installed.record_removed(package).map_err(|e| e.to_string()));

        match result {
            Ok(()) => {
                info!(package = %package, "Package removed");
                self.placement.events.publish(&key, InstallEvent::Completed);
            }
            Err(message) => {
                warn!(package = %package, error = %message, "Uninstall failed");
                self.placement.events.publish(
                    &key,
                    InstallEvent::Interrupted {
                        message: Some(message),
                    },
                );
            }
        }
    }

    fn submit_followup(&self, action: &FollowupAction) -> bool {
        match action {
            FollowupAction::ConfirmInstall { url } => self.confirm(url),
            FollowupAction::CancelDownload { .. } => false,
        }
    }

    fn name(&self) -> &str {
        DIRECTORY_INSTALLER_NAME
    }
}
