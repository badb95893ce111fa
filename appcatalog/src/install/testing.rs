//! In-crate fakes for install tests.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::Mutex;

use super::events::{EventBus, InstallEvent, TransferEvent};
use super::installer::Installer;
use super::notify::Notifier;
use super::transfer::{TransferRequest, TransferService};
use crate::catalog::PackageVersion;
use crate::sync::{SyncStatus, UpdateSummary};

/// Transfer service driven by the test.
#[derive(Default)]
pub(crate) struct FakeTransfer {
    events: EventBus<TransferEvent>,
    requests: Mutex<Vec<TransferRequest>>,
    active: Mutex<HashSet<String>>,
    cancelled: Mutex<Vec<String>>,
}

impl FakeTransfer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<TransferRequest> {
        self.requests.lock().clone()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().clone()
    }

    /// Publish an event, retiring the transfer if it is a final one.
    pub fn publish(&self, url: &str, event: TransferEvent) {
        if !matches!(event, TransferEvent::Started | TransferEvent::Progress { .. }) {
            self.active.lock().remove(url);
        }
        self.events.publish(url, event);
    }

    /// Wait until request `index` has been enqueued.
    pub async fn wait_for_request(&self, index: usize) -> TransferRequest {
        for _ in 0..500 {
            if let Some(request) = self.requests.lock().get(index) {
                return request.clone();
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("transfer request {index} never arrived");
    }
}

impl TransferService for FakeTransfer {
    fn events(&self) -> &EventBus<TransferEvent> {
        &self.events
    }

    fn enqueue(&self, request: TransferRequest) {
        self.active.lock().insert(request.canonical_url.clone());
        self.requests.lock().push(request);
    }

    fn cancel(&self, canonical_url: &str) {
        self.cancelled.lock().push(canonical_url.to_string());
        if self.active.lock().remove(canonical_url) {
            self.events
                .publish(canonical_url, TransferEvent::Interrupted { message: None });
        }
    }

    fn is_queued_or_active(&self, canonical_url: &str) -> bool {
        self.active.lock().contains(canonical_url)
    }
}

/// Installer that records requests and lets the test reply.
#[derive(Default)]
pub(crate) struct FakeInstaller {
    events: EventBus<InstallEvent>,
    installs: Mutex<Vec<(PathBuf, String)>>,
}

impl FakeInstaller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn installs(&self) -> Vec<(PathBuf, String)> {
        self.installs.lock().clone()
    }

    pub fn publish(&self, url: &str, event: InstallEvent) {
        self.events.publish(url, event);
    }

    pub async fn wait_for_install(&self, index: usize) -> (PathBuf, String) {
        for _ in 0..500 {
            if let Some(install) = self.installs.lock().get(index) {
                return install.clone();
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("install {index} never requested");
    }
}

impl Installer for FakeInstaller {
    fn events(&self) -> &EventBus<InstallEvent> {
        &self.events
    }

    fn install(&self, local_file: &Path, canonical_url: &str, _version: &PackageVersion) {
        self.installs
            .lock()
            .push((local_file.to_path_buf(), canonical_url.to_string()));
    }

    fn uninstall(&self, _package: &str) {}

    fn name(&self) -> &str {
        "fake-installer"
    }
}

/// Notifier that records every call.
#[derive(Default)]
pub(crate) struct RecordingNotifier {
    calls: Mutex<Vec<String>>,
    visible: Mutex<HashSet<String>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn show_detail(&self, package: &str) {
        self.visible.lock().insert(package.to_string());
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }
}

impl Notifier for RecordingNotifier {
    fn download_progress(&self, url: &str, _app_name: &str, bytes_read: u64, total_bytes: u64) {
        self.record(format!("progress {url} {bytes_read}/{total_bytes}"));
    }

    fn download_ready(&self, url: &str, _app_name: &str) {
        self.record(format!("ready {url}"));
    }

    fn install_error(&self, url: &str, _app_name: &str, message: &str) {
        self.record(format!("error {url} {message}"));
    }

    fn clear(&self, url: &str) {
        self.record(format!("clear {url}"));
    }

    fn transient(&self, message: &str) {
        self.record(format!("transient {message}"));
    }

    fn updates_available(&self, summary: &UpdateSummary) {
        self.record(format!("updates {}", summary.title));
    }

    fn sync_status(&self, status: &SyncStatus) {
        self.record(format!("status {status}"));
    }

    fn is_detail_visible(&self, package: &str) -> bool {
        self.visible.lock().contains(package)
    }
}
