//! JSON-file catalog.
//!
//! The whole catalog is one JSON document. Every mutation is applied to a
//! copy, the copy is written to a temporary file and renamed over the
//! catalog, and only then does the in-memory state change. A crash leaves
//! either the old or the new document on disk.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::error::{CatalogError, CatalogResult};
use super::model::{AppPrefs, AppRecord, InstalledPackage, PackageVersion, UpdatableApp};
use super::traits::{CatalogStore, IndexCommit, InstalledPackages};
use crate::repo::{normalize_address, RepoId, Repository};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CatalogData {
    #[serde(default)]
    next_repo_id: u64,
    #[serde(default)]
    repositories: Vec<Repository>,
    #[serde(default)]
    apps: Vec<AppRecord>,
    #[serde(default)]
    prefs: BTreeMap<String, AppPrefs>,
    #[serde(default)]
    installed: BTreeMap<String, InstalledPackage>,
}

impl CatalogData {
    fn repo_mut(&mut self, id: RepoId) -> CatalogResult<&mut Repository> {
        self.repositories
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(CatalogError::UnknownRepository(id))
    }

    fn suggested_version(&self, package: &str) -> Option<PackageVersion> {
        let enabled: HashMap<RepoId, u32> = self
            .repositories
            .iter()
            .filter(|r| r.in_use)
            .map(|r| (r.id, r.priority))
            .collect();

        self.apps
            .iter()
            .filter(|a| a.package_name == package)
            .filter_map(|a| {
                let priority = enabled.get(&a.repo_id)?;
                a.suggested().map(|v| (*priority, v))
            })
            .max_by(|(pa, va), (pb, vb)| {
                va.version_code
                    .cmp(&vb.version_code)
                    .then_with(|| pb.cmp(pa))
            })
            .map(|(_, v)| v.clone())
    }

    fn app_name(&self, package: &str) -> Option<String> {
        self.apps
            .iter()
            .find(|a| a.package_name == package)
            .map(|a| a.name.clone())
    }
}

/// Catalog stored as a single JSON file, or held only in memory.
#[derive(Debug)]
pub struct JsonCatalog {
    path: Option<PathBuf>,
    data: Mutex<CatalogData>,
    writes: AtomicUsize,
}

impl JsonCatalog {
    /// Open the catalog at `path`, starting empty if the file does not exist.
    pub fn open(path: impl Into<PathBuf>) -> CatalogResult<Self> {
        let path = path.into();
        let data = if path.exists() {
            let content = fs::read_to_string(&path).map_err(|e| CatalogError::ReadFailed {
                path: path.clone(),
                source: e,
            })?;
            serde_json::from_str(&content).map_err(|e| CatalogError::Corrupt {
                path: path.clone(),
                reason: e.to_string(),
            })?
        } else {
            CatalogData::default()
        };

        debug!(path = %path.display(), repos = data.repositories.len(), "Opened catalog");

        Ok(Self {
            path: Some(path),
            data: Mutex::new(data),
            writes: AtomicUsize::new(0),
        })
    }

    /// Catalog that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            data: Mutex::new(CatalogData::default()),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Number of successful writes since this handle was created.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn read<T>(&self, f: impl FnOnce(&CatalogData) -> T) -> T {
        f(&self.data.lock())
    }

    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut CatalogData) -> CatalogResult<T>,
    ) -> CatalogResult<T> {
        let mut data = self.data.lock();
        let mut next = data.clone();
        let out = f(&mut next)?;
        if let Some(path) = &self.path {
            write_json_atomic(path, &next).map_err(|e| CatalogError::WriteFailed {
                path: path.clone(),
                source: e,
            })?;
        }
        *data = next;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(out)
    }
}

/// Serialize `value` to a temporary file, then rename it over `path`.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let temp_path = path.with_extension("tmp");
    let file = File::create(&temp_path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value).map_err(io::Error::other)?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    drop(writer);

    fs::rename(&temp_path, path)
}

impl CatalogStore for JsonCatalog {
    fn repositories(&self) -> Vec<Repository> {
        self.read(|data| {
            let mut repos = data.repositories.clone();
            repos.sort_by_key(|r| (r.priority, r.id));
            repos
        })
    }

    fn repository(&self, id: RepoId) -> Option<Repository> {
        self.read(|data| data.repositories.iter().find(|r| r.id == id).cloned())
    }

    fn repository_by_address(&self, address: &str) -> Option<Repository> {
        let address = normalize_address(address);
        self.read(|data| {
            data.repositories
                .iter()
                .find(|r| r.address == address)
                .cloned()
        })
    }

    fn add_repository(&self, mut repo: Repository) -> CatalogResult<Repository> {
        repo.address = normalize_address(&repo.address);
        let repo = self.mutate(|data| {
            if data.repositories.iter().any(|r| r.address == repo.address) {
                return Err(CatalogError::DuplicateRepository(repo.address.clone()));
            }
            data.next_repo_id += 1;
            repo.id = RepoId(data.next_repo_id);
            data.repositories.push(repo.clone());
            Ok(repo)
        })?;
        info!(repo = %repo.address, id = %repo.id, "Added repository");
        Ok(repo)
    }

    fn update_repository(&self, repo: &Repository) -> CatalogResult<()> {
        self.mutate(|data| {
            let existing = data.repo_mut(repo.id)?;
            let pinned = existing.signing_certificate.take();
            let fingerprint = if pinned.is_some() {
                existing.fingerprint.clone()
            } else {
                repo.fingerprint.clone()
            };
            *existing = repo.clone();
            existing.signing_certificate = pinned;
            existing.fingerprint = fingerprint;
            Ok(())
        })
    }

    fn remove_repository(&self, id: RepoId) -> CatalogResult<()> {
        self.mutate(|data| {
            let before = data.repositories.len();
            data.repositories.retain(|r| r.id != id);
            if data.repositories.len() == before {
                return Err(CatalogError::UnknownRepository(id));
            }
            data.apps.retain(|a| a.repo_id != id);
            Ok(())
        })?;
        info!(id = %id, "Removed repository");
        Ok(())
    }

    fn commit_index(&self, commit: IndexCommit) -> CatalogResult<()> {
        let repo_id = commit.repo_id;
        let app_count = commit.apps.len();

        self.mutate(move |data| {
            let repo = data.repo_mut(repo_id)?;
            if let Some(pin) = &commit.pin {
                match &repo.signing_certificate {
                    Some(existing) if *existing != pin.certificate => {
                        warn!(repo = %repo.address, "Refusing index signed by another certificate");
                        return Err(CatalogError::CertificateMismatch(repo_id));
                    }
                    Some(_) => {}
                    None => {
                        repo.signing_certificate = Some(pin.certificate.clone());
                        repo.fingerprint = Some(pin.fingerprint.clone());
                    }
                }
            }

            repo.timestamp = commit.timestamp;
            repo.version = commit.version;
            if let Some(description) = commit.description {
                repo.description = description;
            }
            if !commit.mirrors.is_empty() {
                repo.mirrors = repo.clone().with_mirrors(&commit.mirrors).mirrors;
            }
            repo.etag = commit.etag;
            repo.last_updated = Some(commit.updated_at);

            data.apps.retain(|a| a.repo_id != repo_id);
            data.apps.extend(commit.apps);
            Ok(())
        })?;

        debug!(id = %repo_id, apps = app_count, "Committed index");
        Ok(())
    }

    fn updatable_apps(&self) -> Vec<UpdatableApp> {
        self.read(|data| {
            let mut updates: Vec<UpdatableApp> = data
                .installed
                .values()
                .filter_map(|installed| {
                    let suggested = data.suggested_version(&installed.package_name)?;
                    let prefs = data
                        .prefs
                        .get(&installed.package_name)
                        .copied()
                        .unwrap_or_default();
                    if suggested.version_code <= installed.version_code
                        || !prefs.allows(suggested.version_code)
                    {
                        return None;
                    }
                    Some(UpdatableApp {
                        package_name: installed.package_name.clone(),
                        name: data
                            .app_name(&installed.package_name)
                            .unwrap_or_else(|| installed.package_name.clone()),
                        installed_version_name: installed.version_name.clone(),
                        suggested,
                    })
                })
                .collect();
            updates.sort_by(|a, b| a.name.cmp(&b.name));
            updates
        })
    }

    fn suggested_version(&self, package: &str) -> Option<PackageVersion> {
        self.read(|data| data.suggested_version(package))
    }

    fn version_by_url(&self, package: &str, url: &str) -> Option<PackageVersion> {
        self.read(|data| {
            data.apps
                .iter()
                .filter(|a| a.package_name == package)
                .flat_map(|a| a.versions.iter())
                .find(|v| v.canonical_url() == url)
                .cloned()
        })
    }

    fn app_prefs(&self, package: &str) -> AppPrefs {
        self.read(|data| data.prefs.get(package).copied().unwrap_or_default())
    }

    fn set_app_prefs(&self, package: &str, prefs: AppPrefs) -> CatalogResult<()> {
        self.mutate(|data| {
            data.prefs.insert(package.to_string(), prefs);
            Ok(())
        })
    }

    fn app_name(&self, package: &str) -> Option<String> {
        self.read(|data| data.app_name(package))
    }
}

impl InstalledPackages for JsonCatalog {
    fn installed_version(&self, package: &str) -> Option<InstalledPackage> {
        self.read(|data| data.installed.get(package).cloned())
    }

    fn record_installed(
        &self,
        package: &str,
        version_code: u64,
        version_name: &str,
    ) -> CatalogResult<()> {
        self.mutate(|data| {
            let installer = data
                .installed
                .get(package)
                .and_then(|p| p.installer.clone());
            data.installed.insert(
                package.to_string(),
                InstalledPackage {
                    package_name: package.to_string(),
                    version_code,
                    version_name: version_name.to_string(),
                    installer,
                },
            );
            Ok(())
        })
    }

    fn record_removed(&self, package: &str) -> CatalogResult<()> {
        self.mutate(|data| {
            data.installed.remove(package);
            Ok(())
        })
    }

    fn set_installer_of_record(&self, package: &str, installer: &str) -> CatalogResult<()> {
        self.mutate(|data| {
            if let Some(installed) = data.installed.get_mut(package) {
                installed.installer = Some(installer.to_string());
            }
            Ok(())
        })
    }
}
