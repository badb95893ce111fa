//! Expansion file retrieval.
//!
//! Expansion files are fetched alongside the main package but never block
//! it: a failure here is logged and the main install carries on.
//!
//! Verified files are placed at
//! `<expansion_dir>/<package>/<main|patch>.<version code>.<package>.obb`.
//! Older files of the same kind in that directory are deleted.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::cache::DownloadCache;
use super::checksum::verify_checksum;
use super::events::TransferEvent;
use super::transfer::{TransferRequest, TransferService};
use crate::catalog::{CatalogStore, ExpansionFile, ExpansionKind, PackageVersion};
use crate::repo::MirrorSelector;

/// Installed location of an expansion file.
pub fn expansion_path(
    expansion_dir: &Path,
    package: &str,
    kind: ExpansionKind,
    version_code: u64,
) -> PathBuf {
    expansion_dir
        .join(package)
        .join(format!("{}.{}.{}.obb", kind, version_code, package))
}

/// Downloads and places expansion files.
#[derive(Clone)]
pub struct ExpansionFetcher {
    transfer: Arc<dyn TransferService>,
    mirrors: Arc<MirrorSelector>,
    catalog: Arc<dyn CatalogStore>,
    cache: DownloadCache,
    expansion_dir: PathBuf,
}

impl ExpansionFetcher {
    pub fn new(
        transfer: Arc<dyn TransferService>,
        mirrors: Arc<MirrorSelector>,
        catalog: Arc<dyn CatalogStore>,
        cache: DownloadCache,
        expansion_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            transfer,
            mirrors,
            catalog,
            cache,
            expansion_dir: expansion_dir.into(),
        }
    }

    pub fn destination(&self, version: &PackageVersion, file: &ExpansionFile) -> PathBuf {
        expansion_path(
            &self.expansion_dir,
            &version.package_name,
            file.kind,
            version.version_code,
        )
    }

    /// Start fetching `file`, unless it is already in place.
    pub fn start(
        &self,
        version: &PackageVersion,
        file: &ExpansionFile,
        token: CancellationToken,
    ) -> Option<JoinHandle<()>> {
        let destination = self.destination(version, file);
        if destination.exists() {
            debug!(path = %destination.display(), "Expansion file already present");
            return None;
        }

        let fetcher = self.clone();
        let version = version.clone();
        let file = file.clone();
        Some(tokio::spawn(async move {
            fetcher.run(version, file, destination, token).await;
        }))
    }

    async fn run(
        &self,
        version: PackageVersion,
        file: ExpansionFile,
        destination: PathBuf,
        token: CancellationToken,
    ) {
        let url = version.expansion_url(&file);
        let cached = self.cache.path_for(&url);

        if cached.exists() {
            match verify_and_place(cached.clone(), destination.clone(), file.clone()).await {
                Ok(()) => return,
                Err(e) => debug!(url = %url, error = %e, "Cached expansion file unusable"),
            }
        }
        self.cache.discard(&cached);

        let mut events = self.transfer.events().subscribe(&url);
        self.transfer.enqueue(TransferRequest {
            mirror_url: url.clone(),
            canonical_url: url.clone(),
            repo_id: version.repo_id,
            dest: cached.clone(),
            timeout: self.mirrors.current_timeout(version.repo_id),
        });

        loop {
            let event = tokio::select! {
                _ = token.cancelled() => {
                    self.transfer.cancel(&url);
                    return;
                }
                event = events.recv() => event,
            };
            let Some(event) = event else {
                return;
            };

            match event {
                TransferEvent::Started | TransferEvent::Progress { .. } => {}
                TransferEvent::Complete { local_file } => {
                    let placed =
                        verify_and_place(local_file.clone(), destination.clone(), file.clone()).await;
                    if let Err(e) = placed {
                        warn!(url = %url, error = %e, "Expansion file failed verification");
                        self.cache.discard(&local_file);
                    }
                    return;
                }
                TransferEvent::Interrupted { message } => {
                    match message {
                        Some(message) => warn!(url = %url, error = %message, "Expansion download failed"),
                        None => debug!(url = %url, "Expansion download cancelled"),
                    }
                    return;
                }
                TransferEvent::ConnectionFailed { mirror_url, .. } => {
                    let Some(repo) = self.catalog.repository(version.repo_id) else {
                        warn!(url = %url, "Repository of expansion file is gone");
                        return;
                    };
                    match self.mirrors.next_mirror(&repo, &mirror_url) {
                        Ok(choice) => self.transfer.enqueue(TransferRequest {
                            mirror_url: choice.url,
                            canonical_url: url.clone(),
                            repo_id: version.repo_id,
                            dest: cached.clone(),
                            timeout: choice.timeout,
                        }),
                        Err(e) => {
                            warn!(url = %url, error = %e, "Giving up on expansion file");
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// Verify `source` against the index hash, then copy it into place.
///
/// Hashing and copying run on the blocking pool.
async fn verify_and_place(
    source: PathBuf,
    destination: PathBuf,
    file: ExpansionFile,
) -> Result<(), String> {
    tokio::task::spawn_blocking(move || {
        verify_checksum(&source, &file.sha256).map_err(|e| e.to_string())?;
        place(&source, &destination, file.kind)
            .map_err(|e| format!("{}: {}", destination.display(), e))
    })
    .await
    .map_err(|e| format!("Expansion task failed: {}", e))?
}

/// Copy a verified file into place and delete obsolete ones of its kind.
fn place(source: &Path, destination: &Path, kind: ExpansionKind) -> std::io::Result<()> {
    let Some(dir) = destination.parent() else {
        return Ok(());
    };
    fs::create_dir_all(dir)?;
    let tmp = destination.with_extension("part");
    fs::copy(source, &tmp)?;
    fs::rename(&tmp, destination)?;
    info!(path = %destination.display(), "Expansion file installed");

    let prefix = format!("{}.", kind);
    for entry in fs::read_dir(dir)?.flatten() {
        let path = entry.path();
        let obsolete =
            path != destination && entry.file_name().to_string_lossy().starts_with(&prefix);
        if obsolete {
            match fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "Removed obsolete expansion file"),
                Err(e) => debug!(path = %path.display(), error = %e, "Failed to remove obsolete expansion file"),
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::JsonCatalog;
    use crate::install::checksum::calculate_file_checksum;
    use crate::install::testing::FakeTransfer;
    use crate::repo::{RepoId, Repository};
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        temp: TempDir,
        transfer: Arc<FakeTransfer>,
        fetcher: ExpansionFetcher,
        version: PackageVersion,
        file: ExpansionFile,
    }

    fn fixture(content: &[u8], mirrors: Vec<String>) -> Fixture {
        let temp = TempDir::new().unwrap();
        let sample = temp.path().join("sample");
        fs::write(&sample, content).unwrap();
        let sha256 = calculate_file_checksum(&sample).unwrap();

        let catalog = Arc::new(JsonCatalog::in_memory());
        let repo = catalog
            .add_repository(
                Repository::new(RepoId(0), "https://repo.example/fdroid", "Example")
                    .with_mirrors(mirrors),
            )
            .unwrap();
        let transfer = Arc::new(FakeTransfer::new());
        let fetcher = ExpansionFetcher::new(
            transfer.clone(),
            Arc::new(MirrorSelector::new()),
            catalog,
            DownloadCache::new(temp.path().join("cache")),
            temp.path().join("obb"),
        );
        let file = ExpansionFile {
            kind: ExpansionKind::Main,
            file_name: "main.5.org.example.game.obb".to_string(),
            sha256,
        };
        let version = PackageVersion {
            package_name: "org.example.game".to_string(),
            version_code: 5,
            version_name: "5.0".to_string(),
            file_name: "game_5.apk".to_string(),
            hash: String::new(),
            size: 1,
            repo_id: repo.id,
            repo_address: repo.address.clone(),
            expansions: vec![file.clone()],
        };
        Fixture {
            temp,
            transfer,
            fetcher,
            version,
            file,
        }
    }

    async fn finish(handle: JoinHandle<()>) {
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_expansion_path_layout() {
        let path = expansion_path(Path::new("/obb"), "org.example.game", ExpansionKind::Patch, 7);
        assert_eq!(
            path,
            PathBuf::from("/obb/org.example.game/patch.7.org.example.game.obb")
        );
    }

    #[tokio::test]
    async fn test_verified_file_installed_and_obsolete_removed() {
        let fx = fixture(b"obb-data", Vec::new());
        let destination = fx.fetcher.destination(&fx.version, &fx.file);
        let dir = destination.parent().unwrap().to_path_buf();
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("main.4.org.example.game.obb"), b"old").unwrap();
        fs::write(dir.join("patch.4.org.example.game.obb"), b"patch").unwrap();

        let handle = fx
            .fetcher
            .start(&fx.version, &fx.file, CancellationToken::new())
            .unwrap();
        let request = fx.transfer.wait_for_request(0).await;
        fs::create_dir_all(request.dest.parent().unwrap()).unwrap();
        fs::write(&request.dest, b"obb-data").unwrap();
        fx.transfer.publish(
            &request.canonical_url,
            TransferEvent::Complete {
                local_file: request.dest.clone(),
            },
        );
        finish(handle).await;

        assert_eq!(fs::read(&destination).unwrap(), b"obb-data");
        assert!(!dir.join("main.4.org.example.game.obb").exists());
        assert!(dir.join("patch.4.org.example.game.obb").exists());
        assert!(fx.fetcher.start(&fx.version, &fx.file, CancellationToken::new()).is_none());
    }

    #[tokio::test]
    async fn test_cached_file_placed_without_transfer() {
        let fx = fixture(b"obb-data", Vec::new());
        let cache = DownloadCache::new(fx.temp.path().join("cache"));
        let cached = cache.path_for(&fx.version.expansion_url(&fx.file));
        fs::create_dir_all(cache.dir()).unwrap();
        fs::write(&cached, b"obb-data").unwrap();

        let handle = fx
            .fetcher
            .start(&fx.version, &fx.file, CancellationToken::new())
            .unwrap();
        finish(handle).await;

        let destination = fx.fetcher.destination(&fx.version, &fx.file);
        assert_eq!(fs::read(destination).unwrap(), b"obb-data");
        assert!(fx.transfer.requests().is_empty());
    }

    #[tokio::test]
    async fn test_hash_mismatch_discarded() {
        let fx = fixture(b"obb-data", Vec::new());
        let handle = fx
            .fetcher
            .start(&fx.version, &fx.file, CancellationToken::new())
            .unwrap();
        let request = fx.transfer.wait_for_request(0).await;
        fs::create_dir_all(request.dest.parent().unwrap()).unwrap();
        fs::write(&request.dest, b"tampered").unwrap();
        fx.transfer.publish(
            &request.canonical_url,
            TransferEvent::Complete {
                local_file: request.dest.clone(),
            },
        );
        finish(handle).await;

        assert!(!fx.fetcher.destination(&fx.version, &fx.file).exists());
        assert!(!request.dest.exists());
    }

    #[tokio::test]
    async fn test_connection_failure_retries_on_mirror() {
        let fx = fixture(b"obb-data", vec!["https://mirror.example/fdroid".to_string()]);
        let handle = fx
            .fetcher
            .start(&fx.version, &fx.file, CancellationToken::new())
            .unwrap();
        let first = fx.transfer.wait_for_request(0).await;
        fx.transfer.publish(
            &first.canonical_url,
            TransferEvent::ConnectionFailed {
                mirror_url: first.mirror_url.clone(),
                message: "refused".to_string(),
            },
        );

        let second = fx.transfer.wait_for_request(1).await;
        assert_eq!(
            second.mirror_url,
            "https://mirror.example/fdroid/main.5.org.example.game.obb"
        );
        assert_eq!(second.canonical_url, first.canonical_url);

        fx.transfer.publish(
            &second.canonical_url,
            TransferEvent::Interrupted {
                message: Some("gone".to_string()),
            },
        );
        finish(handle).await;
    }

    #[tokio::test]
    async fn test_cancel_stops_transfer() {
        let fx = fixture(b"obb-data", Vec::new());
        let token = CancellationToken::new();
        let handle = fx.fetcher.start(&fx.version, &fx.file, token.clone()).unwrap();
        let request = fx.transfer.wait_for_request(0).await;

        token.cancel();
        finish(handle).await;
        assert!(fx.transfer.cancelled().contains(&request.canonical_url));
    }
}
