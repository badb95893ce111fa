//! End-to-end tests over a local HTTP server.
//!
//! These exercise the real HTTP fetcher and transfer service together with
//! the JSON catalog, the directory installer and the sync coordinator.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use appcatalog::catalog::{CatalogStore, InstalledPackages, JsonCatalog};
use appcatalog::index::{
    ArchiveWriter, HttpIndexFetcher, IndexUpdater, JsonIndexParser, UpdateError,
};
use appcatalog::install::{
    DirectoryInstaller, DurableMap, HttpTransferService, InstallOrchestrator, JsonFileMap,
    OrchestratorConfig, StartOutcome, DIRECTORY_INSTALLER_NAME,
};
use appcatalog::repo::{RepoId, Repository};
use appcatalog::status::{JobState, StatusRegistry};
use appcatalog::sync::{
    NetworkState, RepoSyncCoordinator, StaticNetwork, SyncRequest, SyncSettings, SyncStatus,
};
use parking_lot::Mutex;
use rsa::RsaPrivateKey;
use sha2::{Digest, Sha256};
use tempfile::TempDir;

const PACKAGE: &str = "org.example.notes";
const APK: &[u8] = b"notes version two";

fn key(slot: usize) -> &'static RsaPrivateKey {
    static KEYS: OnceLock<Vec<RsaPrivateKey>> = OnceLock::new();
    &KEYS.get_or_init(|| {
        let mut rng = rsa::rand_core::OsRng;
        (0..2)
            .map(|_| RsaPrivateKey::new(&mut rng, 1024).unwrap())
            .collect()
    })[slot]
}

type Routes = Arc<Mutex<HashMap<String, Vec<u8>>>>;

/// Serve `routes` over HTTP until the test process exits.
///
/// Paths listed in `hang` accept the request and never answer.
fn serve(routes: Routes, hang: &'static [&'static str]) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    std::thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { continue };
            let routes = routes.clone();
            std::thread::spawn(move || {
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let mut request_line = String::new();
                if reader.read_line(&mut request_line).is_err() {
                    return;
                }
                let mut line = String::new();
                while reader.read_line(&mut line).unwrap_or(0) > 0 {
                    if line == "\r\n" {
                        break;
                    }
                    line.clear();
                }
                let path = request_line
                    .split_whitespace()
                    .nth(1)
                    .unwrap_or("/")
                    .to_string();
                if hang.contains(&path.as_str()) {
                    std::thread::sleep(Duration::from_secs(10));
                    return;
                }

                let mut stream = stream;
                let body = routes.lock().get(&path).cloned();
                let (status, body) = match body {
                    Some(body) => ("HTTP/1.1 200 OK", body),
                    None => ("HTTP/1.1 404 Not Found", Vec::new()),
                };
                let head = format!(
                    "{}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    status,
                    body.len()
                );
                let _ = stream.write_all(head.as_bytes());
                let _ = stream.write_all(&body);
            });
        }
    });
    format!("http://{}", addr)
}

fn signed_index(timestamp: u64, signer: usize, version_code: u64) -> Vec<u8> {
    let hash = hex::encode(Sha256::digest(APK));
    let json = format!(
        r#"{{"repo": {{"timestamp": {timestamp}, "version": 21}},
            "apps": [{{"packageName": "{PACKAGE}", "name": "Notes"}}],
            "packages": {{"{PACKAGE}": [
                {{"versionCode": {version_code}, "versionName": "{version_code}.0",
                  "apkName": "notes_{version_code}.apk", "hash": "{hash}",
                  "hashType": "sha256", "size": {size}}}]}}}}"#,
        size = APK.len()
    );
    ArchiveWriter::new(json.into_bytes())
        .sign("RELEASE", key(signer))
        .unwrap()
        .finish()
        .unwrap()
}

fn no_progress(_: appcatalog::index::UpdateProgress) {}

async fn wait_for_state(registry: &StatusRegistry, url: &str, state: JobState) {
    for _ in 0..200 {
        if registry.get(url).map(|s| s.state) == Some(state) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("{} never reached {:?}: {:?}", url, state, registry.get(url));
}

#[test]
fn test_first_use_pins_certificate_and_rejects_other_signer() {
    let routes: Routes = Arc::default();
    let base = serve(routes.clone(), &[]);
    routes
        .lock()
        .insert("/repo/index.jar".to_string(), signed_index(100, 0, 1));

    let catalog = Arc::new(JsonCatalog::in_memory());
    let repo = catalog
        .add_repository(Repository::new(RepoId(0), &format!("{}/repo", base), "Local"))
        .unwrap();
    let updater = IndexUpdater::new(
        Arc::new(HttpIndexFetcher::new().unwrap()),
        Arc::new(JsonIndexParser::new()),
        catalog.clone(),
    );

    assert!(updater.update(&repo, &no_progress).unwrap());
    let pinned = catalog.repository(repo.id).unwrap();
    assert!(pinned.is_pinned());
    assert_eq!(pinned.timestamp, 100);

    // A newer index from a different signer is refused and changes nothing.
    routes
        .lock()
        .insert("/repo/index.jar".to_string(), signed_index(200, 1, 2));
    let result = updater.update(&pinned, &no_progress);
    assert!(matches!(result, Err(UpdateError::Signing(_))), "{result:?}");

    let after = catalog.repository(repo.id).unwrap();
    assert_eq!(after.timestamp, 100);
    assert_eq!(after.signing_certificate, pinned.signing_certificate);
    assert_eq!(catalog.suggested_version(PACKAGE).unwrap().version_code, 1);
}

struct Stack {
    temp: TempDir,
    catalog: Arc<JsonCatalog>,
    pending: Arc<JsonFileMap>,
    orchestrator: InstallOrchestrator,
    coordinator: RepoSyncCoordinator,
}

fn stack(base: &str, auto_download: bool) -> Stack {
    let temp = TempDir::new().unwrap();
    let catalog = Arc::new(JsonCatalog::in_memory());
    catalog
        .add_repository(Repository::new(RepoId(0), &format!("{}/repo", base), "Local"))
        .unwrap();
    let pending = Arc::new(JsonFileMap::open(temp.path().join("pending.json")).unwrap());

    let orchestrator = InstallOrchestrator::new(
        catalog.clone(),
        catalog.clone(),
        pending.clone(),
        Arc::new(HttpTransferService::new()),
        Arc::new(DirectoryInstaller::new(temp.path().join("installed"), catalog.clone())),
        Arc::new(StatusRegistry::new()),
        OrchestratorConfig::new(temp.path().join("cache"), temp.path().join("obb")),
    );
    let updater = Arc::new(IndexUpdater::new(
        Arc::new(HttpIndexFetcher::new().unwrap()),
        Arc::new(JsonIndexParser::new()),
        catalog.clone(),
    ));
    let settings = SyncSettings {
        auto_download,
        ..SyncSettings::default()
    };
    let coordinator = RepoSyncCoordinator::new(
        catalog.clone(),
        updater,
        orchestrator.clone(),
        Arc::new(StaticNetwork(NetworkState::Unmetered)),
        Arc::new(JsonFileMap::in_memory()),
        settings,
    );

    Stack {
        temp,
        catalog,
        pending,
        orchestrator,
        coordinator,
    }
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
}

#[test]
fn test_sync_downloads_and_installs_update() {
    let routes: Routes = Arc::default();
    let base = serve(routes.clone(), &[]);
    routes
        .lock()
        .insert("/repo/index.jar".to_string(), signed_index(100, 0, 2));
    routes
        .lock()
        .insert("/repo/notes_2.apk".to_string(), APK.to_vec());

    let stack = stack(&base, true);
    stack.catalog.record_installed(PACKAGE, 1, "1.0").unwrap();
    let url = format!("{}/repo/notes_2.apk", base);

    runtime().block_on(async {
        let status = stack.coordinator.run_sync(SyncRequest::manual()).await;
        assert_eq!(status, SyncStatus::CompleteWithChanges);

        wait_for_state(stack.orchestrator.status(), &url, JobState::Installed).await;
    });

    let placed = stack.temp.path().join("installed").join(PACKAGE).join("notes_2.apk");
    assert_eq!(std::fs::read(placed).unwrap(), APK);

    let installed = stack.catalog.installed_version(PACKAGE).unwrap();
    assert_eq!(installed.version_code, 2);
    assert_eq!(installed.installer.as_deref(), Some(DIRECTORY_INSTALLER_NAME));
    assert!(!stack.pending.contains(&url));
    assert!(stack.catalog.updatable_apps().is_empty());
}

#[test]
fn test_pending_install_without_transfer_is_cleaned_up_on_restart() {
    let routes: Routes = Arc::default();
    let base = serve(routes.clone(), &[]);
    routes
        .lock()
        .insert("/repo/index.jar".to_string(), signed_index(100, 0, 2));

    let stack = stack(&base, false);
    let url = format!("{}/repo/notes_2.apk", base);
    let gone = format!("{}/repo/removed_1.apk", base);

    runtime().block_on(async {
        assert_eq!(
            stack.coordinator.run_sync(SyncRequest::manual()).await,
            SyncStatus::CompleteWithChanges
        );

        // Records left behind by a previous process.
        stack.pending.put(&url, PACKAGE).unwrap();
        stack.pending.put(&gone, "org.example.removed").unwrap();

        let mut outcomes = stack.orchestrator.resume_pending().await;
        outcomes.sort_by(|a, b| a.0.cmp(&b.0));
        let mut expected = vec![
            (url.clone(), StartOutcome::CleanedUp),
            (gone.clone(), StartOutcome::Unknown),
        ];
        expected.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(outcomes, expected);
    });

    assert!(stack.pending.entries().is_empty());
    assert!(stack.orchestrator.status().get(&url).is_none());
}

#[test]
fn test_cancel_stops_download_and_forgets_job() {
    let routes: Routes = Arc::default();
    let base = serve(routes.clone(), &["/repo/notes_2.apk"]);
    routes
        .lock()
        .insert("/repo/index.jar".to_string(), signed_index(100, 0, 2));

    let stack = stack(&base, false);
    let url = format!("{}/repo/notes_2.apk", base);

    let rt = runtime();
    rt.block_on(async {
        stack.coordinator.run_sync(SyncRequest::manual()).await;
        let version = stack.catalog.suggested_version(PACKAGE).unwrap();

        let outcome = stack.orchestrator.queue(&version, "Notes").await.unwrap();
        assert_eq!(outcome, StartOutcome::Started);
        wait_for_state(stack.orchestrator.status(), &url, JobState::Downloading).await;

        assert!(stack.orchestrator.cancel(&url));
        assert!(stack.orchestrator.status().get(&url).is_none());
        assert!(!stack.pending.contains(&url));

        // Nothing resurrects the job once the transfer winds down.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(stack.orchestrator.status().get(&url).is_none());
        assert!(!stack.orchestrator.is_running(&url));
    });
    // The hung request still holds a blocking thread.
    rt.shutdown_background();

    assert!(!stack
        .temp
        .path()
        .join("installed")
        .join(PACKAGE)
        .exists());
}
