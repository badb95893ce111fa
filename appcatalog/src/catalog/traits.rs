//! Catalog collaborator interfaces.
//!
//! The catalog owns repository records and the app records parsed from
//! their indexes. Installed-package state is a separate interface because
//! it is owned by the platform, not by any repository.
//!
//! # Atomic Commits
//!
//! [`CatalogStore::commit_index`] applies everything learned from one
//! verified index in a single step:
//!
//! - repository metadata (timestamp, version, ETag, mirrors, description)
//! - the repository's complete set of app records
//! - the signing certificate, if this is the first one seen
//!
//! Either all of it is persisted or none of it is. Per-package preferences
//! are keyed by package name and are never touched by a commit.

use chrono::{DateTime, Utc};

use super::error::CatalogResult;
use super::model::{AppPrefs, AppRecord, InstalledPackage, PackageVersion, UpdatableApp};
use crate::repo::{RepoId, Repository};

/// Certificate to pin with a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinnedCertificate {
    /// Hex-encoded DER certificate.
    pub certificate: String,
    pub fingerprint: String,
}

/// Everything one verified index contributes to the catalog.
#[derive(Debug, Clone)]
pub struct IndexCommit {
    pub repo_id: RepoId,
    pub timestamp: u64,
    pub version: u32,
    pub description: Option<String>,
    pub mirrors: Vec<String>,
    pub etag: Option<String>,
    pub apps: Vec<AppRecord>,
    /// Set only when the repository had no pinned certificate.
    pub pin: Option<PinnedCertificate>,
    pub updated_at: DateTime<Utc>,
}

/// Persistent catalog of repositories and their apps.
pub trait CatalogStore: Send + Sync {
    /// All repositories, ordered by priority then id.
    fn repositories(&self) -> Vec<Repository>;

    fn repository(&self, id: RepoId) -> Option<Repository>;

    /// Look up a repository by normalized address.
    fn repository_by_address(&self, address: &str) -> Option<Repository>;

    /// Add a repository, assigning it a fresh id.
    fn add_repository(&self, repo: Repository) -> CatalogResult<Repository>;

    /// Replace a repository's user-editable settings.
    ///
    /// The pinned certificate is never changed through this call.
    fn update_repository(&self, repo: &Repository) -> CatalogResult<()>;

    /// Remove a repository together with its apps and pinned certificate.
    fn remove_repository(&self, id: RepoId) -> CatalogResult<()>;

    /// Atomically apply a verified index.
    fn commit_index(&self, commit: IndexCommit) -> CatalogResult<()>;

    /// Installed packages with an allowed, newer suggested version.
    fn updatable_apps(&self) -> Vec<UpdatableApp>;

    /// Best suggested version across enabled repositories.
    fn suggested_version(&self, package: &str) -> Option<PackageVersion>;

    /// Find the version whose canonical URL is `url`.
    fn version_by_url(&self, package: &str, url: &str) -> Option<PackageVersion>;

    fn app_prefs(&self, package: &str) -> AppPrefs;

    fn set_app_prefs(&self, package: &str, prefs: AppPrefs) -> CatalogResult<()>;

    /// Display name of a package, if any repository lists it.
    fn app_name(&self, package: &str) -> Option<String>;
}

/// Packages present on this device.
pub trait InstalledPackages: Send + Sync {
    fn installed_version(&self, package: &str) -> Option<InstalledPackage>;

    fn record_installed(
        &self,
        package: &str,
        version_code: u64,
        version_name: &str,
    ) -> CatalogResult<()>;

    fn record_removed(&self, package: &str) -> CatalogResult<()>;

    /// Attribute the package to an installer.
    fn set_installer_of_record(&self, package: &str, installer: &str) -> CatalogResult<()>;
}

