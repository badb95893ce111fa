//! Repository record as stored in the catalog.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Catalog-assigned repository identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepoId(pub u64);

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Trim whitespace and trailing slashes so addresses compare reliably.
pub fn normalize_address(address: &str) -> String {
    address.trim().trim_end_matches('/').to_string()
}

/// A signed package repository.
///
/// The signing certificate is pinned on first use and never replaced by a
/// later update; only explicit removal of the repository clears it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    /// Catalog identifier.
    pub id: RepoId,

    /// Base URL, without trailing slash.
    pub address: String,

    /// Display name.
    pub name: String,

    /// Description from the most recent index.
    #[serde(default)]
    pub description: String,

    /// Hex-encoded DER certificate pinned for this repository.
    #[serde(default)]
    pub signing_certificate: Option<String>,

    /// Lowercase hex SHA-256 of the certificate.
    ///
    /// May be supplied before the certificate is known, in which case the
    /// first certificate seen must match it.
    #[serde(default)]
    pub fingerprint: Option<String>,

    /// Whether the repository takes part in syncs.
    pub in_use: bool,

    /// Lower values sync first.
    pub priority: u32,

    /// Mirror base URLs, excluding the primary address.
    #[serde(default)]
    pub mirrors: Vec<String>,

    /// Timestamp (ms) of the last applied index.
    #[serde(default)]
    pub timestamp: u64,

    /// Index format version of the last applied index.
    #[serde(default)]
    pub version: u32,

    /// ETag of the last downloaded index.
    #[serde(default)]
    pub etag: Option<String>,

    /// Wall-clock time of the last successful update.
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,

    /// Ephemeral repository from a local swap session.
    #[serde(default)]
    pub is_swap: bool,
}

impl Repository {
    /// Create a new, enabled repository with no pinned certificate.
    pub fn new(id: RepoId, address: &str, name: impl Into<String>) -> Self {
        Self {
            id,
            address: normalize_address(address),
            name: name.into(),
            description: String::new(),
            signing_certificate: None,
            fingerprint: None,
            in_use: true,
            priority: 10,
            mirrors: Vec::new(),
            timestamp: 0,
            version: 0,
            etag: None,
            last_updated: None,
            is_swap: false,
        }
    }

    /// Set mirrors, normalizing addresses and dropping the primary address.
    pub fn with_mirrors<I, S>(mut self, mirrors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.mirrors.clear();
        for mirror in mirrors {
            let mirror = normalize_address(mirror.as_ref());
            if mirror != self.address && !self.mirrors.contains(&mirror) {
                self.mirrors.push(mirror);
            }
        }
        self
    }

    /// Set an expected fingerprint for the first certificate.
    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into().to_lowercase());
        self
    }

    /// Set the sync priority.
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Number of configured mirrors, excluding the primary address.
    pub fn mirror_count(&self) -> usize {
        self.mirrors.len()
    }

    /// Whether any mirror besides the primary address is configured.
    pub fn has_mirrors(&self) -> bool {
        !self.mirrors.is_empty()
    }

    /// Primary address followed by every mirror, in rotation order.
    pub fn mirror_rotation(&self) -> Vec<&str> {
        std::iter::once(self.address.as_str())
            .chain(self.mirrors.iter().map(String::as_str))
            .collect()
    }

    /// Whether a certificate has been pinned.
    pub fn is_pinned(&self) -> bool {
        self.signing_certificate.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_normalizes_address() {
        let repo = Repository::new(RepoId(1), " https://f.example.org/repo/ ", "Example");
        assert_eq!(repo.address, "https://f.example.org/repo");
        assert!(repo.in_use);
        assert!(!repo.is_pinned());
    }

    #[test]
    fn test_with_mirrors_drops_primary_and_duplicates() {
        let repo = Repository::new(RepoId(1), "https://a.example/repo", "A").with_mirrors([
            "https://a.example/repo/",
            "https://b.example/repo",
            "https://b.example/repo/",
            "https://c.example/repo",
        ]);
        assert_eq!(repo.mirror_count(), 2);
        assert_eq!(
            repo.mirror_rotation(),
            vec![
                "https://a.example/repo",
                "https://b.example/repo",
                "https://c.example/repo"
            ]
        );
    }

    #[test]
    fn test_fingerprint_is_lowercased() {
        let repo = Repository::new(RepoId(1), "https://a.example", "A").with_fingerprint("ABCDEF");
        assert_eq!(repo.fingerprint.as_deref(), Some("abcdef"));
    }
}
