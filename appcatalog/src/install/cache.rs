//! Download cache.
//!
//! One file per canonical URL, named `<sha256(url)[..16]>-<file name>` so
//! files from different repositories never collide.

use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::debug;

use super::checksum::file_matches_hash;

/// What the cache holds for a download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// Nothing downloaded yet.
    Missing,
    /// A shorter file that can be resumed.
    Partial(u64),
    /// Full size and matching hash.
    Complete,
    /// Full size or larger but wrong content. Must be re-downloaded.
    Corrupt,
}

/// Directory of downloaded package and expansion files.
#[derive(Debug, Clone)]
pub struct DownloadCache {
    dir: PathBuf,
}

impl DownloadCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Cache location for `url`.
    pub fn path_for(&self, url: &str) -> PathBuf {
        let digest = hex::encode(Sha256::digest(url.as_bytes()));
        let name = url
            .rsplit('/')
            .next()
            .filter(|n| !n.is_empty())
            .unwrap_or("download");
        self.dir.join(format!("{}-{}", &digest[..16], name))
    }

    /// Classify the cached file against the expected size and hash.
    pub fn check(&self, path: &Path, expected_size: u64, expected_hash: &str) -> CacheState {
        let Ok(metadata) = fs::metadata(path) else {
            return CacheState::Missing;
        };
        let len = metadata.len();
        if len < expected_size {
            return CacheState::Partial(len);
        }
        if len == expected_size && file_matches_hash(path, expected_hash) {
            return CacheState::Complete;
        }
        CacheState::Corrupt
    }

    /// Delete a cached file, ignoring absence.
    pub fn discard(&self, path: &Path) {
        match fs::remove_file(path) {
            Ok(()) => debug!(path = %path.display(), "Discarded cached file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => debug!(path = %path.display(), error = %e, "Failed to discard cached file"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::install::checksum::calculate_file_checksum;
    use tempfile::TempDir;

    #[test]
    fn test_path_for_is_stable_and_distinct() {
        let cache = DownloadCache::new("/cache");
        let a = cache.path_for("https://a.example/repo/app_1.apk");
        let b = cache.path_for("https://b.example/repo/app_1.apk");

        assert_eq!(a, cache.path_for("https://a.example/repo/app_1.apk"));
        assert_ne!(a, b);
        let name = a.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.ends_with("-app_1.apk"));
        assert_eq!(name.len(), 16 + 1 + "app_1.apk".len());
    }

    #[test]
    fn test_check_states() {
        let temp = TempDir::new().unwrap();
        let cache = DownloadCache::new(temp.path());
        let path = cache.path_for("https://a.example/repo/app.apk");

        assert_eq!(cache.check(&path, 5, ""), CacheState::Missing);

        fs::write(&path, b"hel").unwrap();
        assert_eq!(cache.check(&path, 5, ""), CacheState::Partial(3));

        fs::write(&path, b"hello").unwrap();
        let hash = calculate_file_checksum(&path).unwrap();
        assert_eq!(cache.check(&path, 5, &hash), CacheState::Complete);
        assert_eq!(cache.check(&path, 5, "00"), CacheState::Corrupt);

        fs::write(&path, b"hello world").unwrap();
        assert_eq!(cache.check(&path, 5, &hash), CacheState::Corrupt);

        cache.discard(&path);
        cache.discard(&path);
        assert!(!path.exists());
    }
}
