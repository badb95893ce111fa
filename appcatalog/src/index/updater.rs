//! Single-repository index update.
//!
//! ```text
//! fetch index.jar ──► verify ──► read header ──► parse ──► commit
//!      │ 304              │ trust error     │ same timestamp
//!      ▼                  ▼                 ▼
//!   unchanged          UpdateError       unchanged
//! ```
//!
//! Nothing is written unless every step succeeds, and then everything is
//! written in one catalog commit.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use super::error::{SigningError, SigningFailure, UpdateError, UpdateResult};
use super::fetch::IndexFetcher;
use super::parser::IndexParser;
use super::verifier::IndexVerifier;
use crate::catalog::{CatalogError, CatalogStore, IndexCommit, PinnedCertificate};
use crate::repo::Repository;

/// File name of the signed index under a repository address.
pub const INDEX_FILE: &str = "index.jar";

/// Progress of one repository update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateProgress {
    Downloading { bytes_read: u64, total_bytes: u64 },
    ProcessingApps { done: u64, total: u64 },
    Committing,
}

/// Progress sink for [`IndexUpdater::update`].
pub type UpdateProgressFn<'a> = &'a (dyn Fn(UpdateProgress) + Send + Sync);

/// Index URL for a repository.
pub fn index_url(repo: &Repository) -> String {
    format!("{}/{}", repo.address, INDEX_FILE)
}

/// Drives one repository's update.
pub struct IndexUpdater {
    fetcher: Arc<dyn IndexFetcher>,
    parser: Arc<dyn IndexParser>,
    catalog: Arc<dyn CatalogStore>,
    verifier: IndexVerifier,
}

impl IndexUpdater {
    pub fn new(
        fetcher: Arc<dyn IndexFetcher>,
        parser: Arc<dyn IndexParser>,
        catalog: Arc<dyn CatalogStore>,
    ) -> Self {
        Self {
            fetcher,
            parser,
            catalog,
            verifier: IndexVerifier::new(),
        }
    }

    /// Update `repo` from its index.
    ///
    /// Returns whether the catalog changed.
    ///
    /// # Errors
    ///
    /// Trust failures surface as [`UpdateError::Signing`]. No catalog state
    /// is modified on any error.
    pub fn update(&self, repo: &Repository, progress: UpdateProgressFn<'_>) -> UpdateResult<bool> {
        let url = index_url(repo);
        debug!(repo = %repo.address, url = %url, "Updating repository");

        let on_download = |bytes_read: u64, total_bytes: u64| {
            progress(UpdateProgress::Downloading {
                bytes_read,
                total_bytes,
            })
        };
        let fetched = self
            .fetcher
            .fetch(&url, repo.etag.as_deref(), &on_download)?;

        if fetched.not_modified {
            info!(repo = %repo.address, "Repository index not modified");
            return Ok(false);
        }

        let verified = self.verifier.verify(&fetched.bytes, repo)?;
        let header = self.parser.read_header(&verified.entry)?;

        if repo.last_updated.is_some() {
            if header.timestamp < repo.timestamp {
                return Err(UpdateError::IndexOlder {
                    new: header.timestamp,
                    stored: repo.timestamp,
                });
            }
            if header.timestamp == repo.timestamp {
                info!(repo = %repo.address, timestamp = header.timestamp, "Repository index unchanged");
                return Ok(false);
            }
        }

        let on_apps = |done: u64, total: u64| progress(UpdateProgress::ProcessingApps { done, total });
        let parsed = self.parser.parse(&verified.entry, repo, &on_apps)?;

        progress(UpdateProgress::Committing);
        let app_count = parsed.apps.len();
        let pin = verified.newly_pinned.then(|| PinnedCertificate {
            certificate: verified.certificate.clone(),
            fingerprint: verified.fingerprint.clone(),
        });

        self.catalog.commit_index(IndexCommit {
            repo_id: repo.id,
            timestamp: parsed.header.timestamp,
            version: parsed.header.version,
            description: parsed.header.description,
            mirrors: parsed.header.mirrors,
            etag: fetched.etag,
            apps: parsed.apps,
            pin,
            updated_at: Utc::now(),
        })
        .map_err(|e| match e {
            // Another update pinned a different certificate since verification.
            CatalogError::CertificateMismatch(_) => UpdateError::Signing(SigningError::for_repo(
                SigningFailure::CertificateMismatch,
                repo.name.clone(),
            )),
            other => UpdateError::Catalog(other),
        })?;

        info!(
            repo = %repo.address,
            timestamp = parsed.header.timestamp,
            apps = app_count,
            pinned = verified.newly_pinned,
            "Repository updated"
        );
        Ok(true)
    }
}
