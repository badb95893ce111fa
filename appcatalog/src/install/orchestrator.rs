//! Install orchestration.
//!
//! [`InstallOrchestrator`] runs one job per canonical URL. Each job is a
//! tokio task that owns an [`InstallJob`] state machine and is the only
//! writer of that URL's durable record and status entry. Jobs for
//! different URLs run concurrently without a shared lock.
//!
//! # Lifecycle
//!
//! ```text
//! queue ──► durable record ──► status PendingInstall ──► start
//!                                                          │
//!          ┌───────────────────────────────────────────────┤
//!          ▼                                               ▼
//!   expansion files                       cache hit? ──► synthesized Complete
//!   (independent tasks)                       │
//!                                             └──► TransferService.enqueue
//!
//! job task:  transfer events ─┐
//!            install events ──┼──► InstallJob::handle ──► effects
//!            cancellation ────┘
//! ```
//!
//! # Restart
//!
//! [`InstallOrchestrator::resume_pending`] redelivers a start request for
//! every durable record. A redelivered request whose transfer is no longer
//! running is treated as finished while the process was down and cleaned
//! up; one whose version is already installed is dropped. A job that ends
//! in error drops its record, so the next sweep or `install` queues it
//! afresh.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::cache::{CacheState, DownloadCache};
use super::checksum::verify_download;
use super::durable::DurableMap;
use super::error::InstallResult;
use super::events::{InstallEvent, TransferEvent};
use super::expansion::ExpansionFetcher;
use super::installer::Installer;
use super::job::{InstallJob, JobEffect, JobEvent};
use super::notify::{LogNotifier, Notifier};
use super::transfer::{TransferRequest, TransferService};
use crate::catalog::{CatalogStore, InstalledPackages, PackageVersion};
use crate::config::ConfigFile;
use crate::repo::MirrorSelector;
use crate::status::{FollowupAction, JobState, StatusRegistry};

/// Directories used by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Downloaded package and expansion files.
    pub cache_dir: PathBuf,
    /// Installed expansion files.
    pub expansion_dir: PathBuf,
}

impl OrchestratorConfig {
    pub fn new(cache_dir: impl Into<PathBuf>, expansion_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            expansion_dir: expansion_dir.into(),
        }
    }

    /// Build from the `[install]` section of the configuration file.
    pub fn from_config_file(config: &ConfigFile) -> Self {
        Self::new(
            config.install.cache_dir.clone(),
            config.install.expansion_dir.clone(),
        )
    }
}

/// A request to start (or restart) the job for one URL.
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub url: String,
    pub version: PackageVersion,
    pub app_name: String,
    /// Set when the request is replayed after a restart.
    pub redelivery: bool,
}

/// What [`InstallOrchestrator::start`] did with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A job is running for the URL.
    Started,
    /// A redelivered job whose transfer is still running was reattached.
    Reattached,
    /// No durable record exists; the request is stale or foreign.
    Ignored,
    /// The transfer finished while the process was down.
    CleanedUp,
    /// The requested version is already installed.
    AlreadyInstalled,
    /// The catalog no longer knows the requested version.
    Unknown,
}

struct JobHandle {
    generation: u64,
    token: CancellationToken,
    expansion_urls: Vec<String>,
}

/// Drives install jobs from queueing to a terminal state.
#[derive(Clone)]
pub struct InstallOrchestrator {
    catalog: Arc<dyn CatalogStore>,
    installed: Arc<dyn InstalledPackages>,
    pending: Arc<dyn DurableMap>,
    transfer: Arc<dyn TransferService>,
    installer: Arc<dyn Installer>,
    status: Arc<StatusRegistry>,
    mirrors: Arc<MirrorSelector>,
    notifier: Arc<dyn Notifier>,
    cache: DownloadCache,
    expansion_dir: PathBuf,
    jobs: Arc<DashMap<String, JobHandle>>,
    generation: Arc<AtomicU64>,
}

impl InstallOrchestrator {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        installed: Arc<dyn InstalledPackages>,
        pending: Arc<dyn DurableMap>,
        transfer: Arc<dyn TransferService>,
        installer: Arc<dyn Installer>,
        status: Arc<StatusRegistry>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            catalog,
            installed,
            pending,
            transfer,
            installer,
            status,
            mirrors: Arc::new(MirrorSelector::new()),
            notifier: Arc::new(LogNotifier),
            cache: DownloadCache::new(config.cache_dir),
            expansion_dir: config.expansion_dir,
            jobs: Arc::new(DashMap::new()),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Share a mirror selector with other components.
    pub fn with_mirrors(mut self, mirrors: Arc<MirrorSelector>) -> Self {
        self.mirrors = mirrors;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn status(&self) -> &Arc<StatusRegistry> {
        &self.status
    }

    pub fn mirrors(&self) -> &Arc<MirrorSelector> {
        &self.mirrors
    }

    /// Whether a durable record exists for `url`.
    pub fn is_pending(&self, url: &str) -> bool {
        self.pending.contains(url)
    }

    /// Whether a job task is running for `url`.
    pub fn is_running(&self, url: &str) -> bool {
        self.jobs.contains_key(url)
    }

    /// Queue `version` for download and install.
    ///
    /// The durable record is written before any network activity.
    pub async fn queue(
        &self,
        version: &PackageVersion,
        app_name: &str,
    ) -> InstallResult<StartOutcome> {
        let url = version.canonical_url();
        self.pending.put(&url, &version.package_name)?;
        if self.is_running(&url) {
            debug!(url = %url, "Install already running");
            return Ok(StartOutcome::Started);
        }
        self.status
            .add_or_update(version, app_name, JobState::PendingInstall, None);
        info!(
            url = %url,
            package = %version.package_name,
            version = %version.version_name,
            "Queued install"
        );

        Ok(self
            .start(StartRequest {
                url,
                version: version.clone(),
                app_name: app_name.to_string(),
                redelivery: false,
            })
            .await)
    }

    /// Validate and act on a start request.
    pub async fn start(&self, request: StartRequest) -> StartOutcome {
        let StartRequest {
            url,
            version,
            app_name,
            redelivery,
        } = request;

        if !self.pending.contains(&url) {
            debug!(url = %url, "No pending install, ignoring start request");
            return StartOutcome::Ignored;
        }

        // The live job keeps its transfer; enqueueing again would supersede it.
        if self.is_running(&url) {
            debug!(url = %url, "Job already running for start request");
            return if redelivery {
                StartOutcome::Reattached
            } else {
                StartOutcome::Started
            };
        }

        let transfer_active = self.transfer.is_queued_or_active(&url);
        if redelivery {
            if !transfer_active {
                info!(url = %url, "Transfer finished while stopped, cleaning up");
                self.status.remove_by_url(&url);
                self.remove_pending(&url);
                self.notifier.clear(&url);
                return StartOutcome::CleanedUp;
            }
            let installed = self
                .installed
                .installed_version(&version.package_name)
                .map(|p| p.version_code);
            if installed == Some(version.version_code) {
                warn!(url = %url, "Stale redelivery, version already installed");
                self.remove_pending(&url);
                return StartOutcome::AlreadyInstalled;
            }
        }

        let followup = Some(FollowupAction::CancelDownload { url: url.clone() });
        self.status
            .add_or_update(&version, &app_name, JobState::Downloading, followup);

        let (generation, token) = self.register_job(&url, &version);
        let transfer_rx = self.transfer.events().subscribe(&url);
        let install_rx = self.installer.events().subscribe(&url);

        let expansions = self.expansion_fetcher();
        for file in &version.expansions {
            expansions.start(&version, file, token.child_token());
        }

        let task = JobTask {
            orchestrator: self.clone(),
            job: InstallJob::new(url.clone(), JobState::Downloading),
            version: version.clone(),
            app_name,
            generation,
            token,
        };
        tokio::spawn(task.run(transfer_rx, install_rx));

        if redelivery && transfer_active {
            debug!(url = %url, "Reattached to running transfer");
            return StartOutcome::Reattached;
        }

        self.mirrors.reset(version.repo_id);
        let dest = self.cache.path_for(&url);
        match self.cache.check(&dest, version.size, &version.hash) {
            CacheState::Complete => {
                debug!(url = %url, path = %dest.display(), "Using cached download");
                let events = self.transfer.events();
                events.publish(&url, TransferEvent::Started);
                events.publish(&url, TransferEvent::Complete { local_file: dest });
            }
            state => {
                if state == CacheState::Corrupt {
                    warn!(url = %url, "Cached download is corrupt, downloading again");
                    self.cache.discard(&dest);
                }
                self.transfer.enqueue(TransferRequest {
                    mirror_url: url.clone(),
                    canonical_url: url,
                    repo_id: version.repo_id,
                    dest,
                    timeout: self.mirrors.current_timeout(version.repo_id),
                });
            }
        }
        StartOutcome::Started
    }

    /// Cancel the job for `url` regardless of its state.
    ///
    /// Returns false if nothing was known about `url`.
    pub fn cancel(&self, url: &str) -> bool {
        let had_pending = self.remove_pending(url);

        let mut expansion_urls = Vec::new();
        let had_job = match self.jobs.remove(url) {
            Some((_, job)) => {
                job.token.cancel();
                expansion_urls = job.expansion_urls;
                true
            }
            None => false,
        };

        self.transfer.cancel(url);
        let removed = self.status.remove_by_url(url);
        if let Some(status) = &removed {
            for expansion in status.version.expansion_urls() {
                if !expansion_urls.contains(&expansion) {
                    expansion_urls.push(expansion);
                }
            }
        }
        for expansion in &expansion_urls {
            self.transfer.cancel(expansion);
        }
        self.notifier.clear(url);

        info!(url = %url, "Cancelled install");
        had_pending || had_job || removed.is_some()
    }

    /// Redeliver a start request for every durable record.
    pub async fn resume_pending(&self) -> Vec<(String, StartOutcome)> {
        let mut outcomes = Vec::new();
        for (url, package) in self.pending.entries() {
            let Some(version) = self.catalog.version_by_url(&package, &url) else {
                warn!(url = %url, package = %package, "Pending install no longer in catalog");
                self.remove_pending(&url);
                outcomes.push((url, StartOutcome::Unknown));
                continue;
            };
            let app_name = self.catalog.app_name(&package).unwrap_or(package);
            let outcome = self
                .start(StartRequest {
                    url: url.clone(),
                    version,
                    app_name,
                    redelivery: true,
                })
                .await;
            outcomes.push((url, outcome));
        }
        outcomes
    }

    /// Resubmit a follow-up action offered through the status registry.
    pub fn submit_followup(&self, action: &FollowupAction) -> bool {
        match action {
            FollowupAction::CancelDownload { url } => self.cancel(url),
            FollowupAction::ConfirmInstall { .. } => self.installer.submit_followup(action),
        }
    }

    fn register_job(&self, url: &str, version: &PackageVersion) -> (u64, CancellationToken) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst);
        let token = CancellationToken::new();
        let handle = JobHandle {
            generation,
            token: token.clone(),
            expansion_urls: version.expansion_urls(),
        };
        if let Some(previous) = self.jobs.insert(url.to_string(), handle) {
            debug!(url = %url, "Replacing running job");
            previous.token.cancel();
        }
        (generation, token)
    }

    fn expansion_fetcher(&self) -> ExpansionFetcher {
        ExpansionFetcher::new(
            Arc::clone(&self.transfer),
            Arc::clone(&self.mirrors),
            Arc::clone(&self.catalog),
            self.cache.clone(),
            self.expansion_dir.clone(),
        )
    }

    fn remove_pending(&self, url: &str) -> bool {
        match self.pending.remove(url) {
            Ok(previous) => previous.is_some(),
            Err(e) => {
                warn!(url = %url, error = %e, "Failed to remove pending install");
                false
            }
        }
    }
}

/// The task that owns one job.
struct JobTask {
    orchestrator: InstallOrchestrator,
    job: InstallJob,
    version: PackageVersion,
    app_name: String,
    generation: u64,
    token: CancellationToken,
}

impl JobTask {
    async fn run(
        mut self,
        mut transfers: mpsc::UnboundedReceiver<TransferEvent>,
        mut installs: mpsc::UnboundedReceiver<InstallEvent>,
    ) {
        loop {
            let event = tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                Some(event) = transfers.recv() => JobEvent::Transfer(event),
                Some(event) = installs.recv() => JobEvent::Install(event),
                else => break,
            };
            let effects = self.job.handle(event);
            if self.apply(effects) {
                break;
            }
        }

        let url = self.job.url();
        let generation = self.generation;
        self.orchestrator
            .jobs
            .remove_if(url, |_, handle| handle.generation == generation);
        debug!(url = %url, state = ?self.job.state(), "Job task stopped");
    }

    /// Apply effects in order. Returns true when the job is finished.
    fn apply(&mut self, effects: Vec<JobEffect>) -> bool {
        let o = self.orchestrator.clone();
        let url = self.job.url().to_string();
        let package = self.version.package_name.as_str();

        for effect in effects {
            if self.token.is_cancelled() {
                return true;
            }
            match effect {
                JobEffect::SetStatus { state, followup } => {
                    o.status.update(&url, state, followup);
                }
                JobEffect::Progress {
                    bytes_read,
                    total_bytes,
                } => {
                    o.status.update_progress(&url, bytes_read, total_bytes);
                    o.notifier
                        .download_progress(&url, &self.app_name, bytes_read, total_bytes);
                }
                JobEffect::SetError { message } => {
                    o.status.set_error(&url, &message);
                }
                JobEffect::NotifyError { message } => {
                    if o.notifier.is_detail_visible(package) {
                        debug!(url = %url, "Detail view visible, not raising error notice");
                    } else {
                        o.notifier.install_error(&url, &self.app_name, &message);
                    }
                }
                JobEffect::NotifyReadyToInstall => {
                    if !o.notifier.is_detail_visible(package) {
                        o.notifier.download_ready(&url, &self.app_name);
                    }
                }
                JobEffect::ClearNotification => o.notifier.clear(&url),
                JobEffect::RetryWithMirror { failed_url } => {
                    if let Some(message) = self.retry(&failed_url) {
                        let effects = self.job.handle(JobEvent::MirrorsExhausted { message });
                        return self.apply(effects);
                    }
                }
                JobEffect::Install { local_file } => {
                    let installer = Arc::clone(&o.installer);
                    let cache = o.cache.clone();
                    let version = self.version.clone();
                    let url = url.clone();
                    tokio::task::spawn_blocking(move || {
                        // Mirrors are untrusted; only the signed index vouches for the bytes.
                        if let Err(e) = verify_download(&local_file, version.size, &version.hash) {
                            warn!(url = %url, error = %e, "Downloaded package failed verification");
                            cache.discard(&local_file);
                            installer.events().publish(
                                &url,
                                InstallEvent::Interrupted {
                                    message: Some(e.to_string()),
                                },
                            );
                            return;
                        }
                        installer.install(&local_file, &url, &version);
                    });
                }
                JobEffect::AttributeInstaller => {
                    if let Err(e) = o
                        .installed
                        .set_installer_of_record(package, o.installer.name())
                    {
                        warn!(package = %package, error = %e, "Failed to record installer");
                    }
                }
                JobEffect::ClearPending => {
                    o.remove_pending(&url);
                }
                JobEffect::RemoveStatus => {
                    o.status.remove_by_url(&url);
                }
                JobEffect::Transient { message } => o.notifier.transient(&message),
                JobEffect::Finish => {
                    info!(url = %url, state = ?self.job.state(), "Install job finished");
                    return true;
                }
            }
        }
        false
    }

    /// Resubmit on the next mirror. Returns the error message when none is left.
    fn retry(&self, failed_url: &str) -> Option<String> {
        let o = &self.orchestrator;
        let url = self.job.url();
        let Some(repo) = o.catalog.repository(self.version.repo_id) else {
            return Some(format!("Repository {} no longer exists", self.version.repo_id));
        };
        match o.mirrors.next_mirror(&repo, failed_url) {
            Ok(choice) => {
                warn!(url = %url, mirror = %choice.mirror, "Retrying on next mirror");
                o.transfer.enqueue(TransferRequest {
                    mirror_url: choice.url,
                    canonical_url: url.to_string(),
                    repo_id: self.version.repo_id,
                    dest: o.cache.path_for(url),
                    timeout: choice.timeout,
                });
                None
            }
            Err(e) => Some(e.to_string()),
        }
    }
}
