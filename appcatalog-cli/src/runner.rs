//! Shared setup for commands that touch the catalog.

use std::fs;
use std::sync::Arc;

use appcatalog::catalog::JsonCatalog;
use appcatalog::config::ConfigFile;
use appcatalog::index::{HttpIndexFetcher, IndexUpdater, JsonIndexParser};
use appcatalog::install::{
    DirectoryInstaller, HttpTransferService, InstallOrchestrator, JsonFileMap, OrchestratorConfig,
};
use appcatalog::logging::{init_logging, LoggingConfig, LoggingGuard};
use appcatalog::status::StatusRegistry;
use appcatalog::sync::{RepoSyncCoordinator, StaticNetwork, SyncSettings};
use tracing::info;

use crate::error::CliError;

/// Loads configuration, initializes logging and builds components.
pub struct CliRunner {
    config: ConfigFile,
    _logging: LoggingGuard,
}

/// Components wired to the configured storage.
pub struct Services {
    pub catalog: Arc<JsonCatalog>,
    pub installer: Arc<DirectoryInstaller>,
    pub orchestrator: InstallOrchestrator,
    pub coordinator: RepoSyncCoordinator,
}

impl CliRunner {
    pub fn new(verbose: bool) -> Result<Self, CliError> {
        let config = ConfigFile::load()?;
        let mut logging = LoggingConfig::from_config_file(&config);
        if verbose {
            logging = logging.with_level("debug");
        }
        let guard = init_logging(&logging)?;
        Ok(Self {
            config,
            _logging: guard,
        })
    }

    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    pub fn log_startup(&self, command: &str) {
        info!(
            version = env!("CARGO_PKG_VERSION"),
            command,
            data_dir = %self.config.storage.data_dir.display(),
            "appcatalog starting"
        );
    }

    /// Open the catalog on its own, for commands that do no network work.
    pub fn open_catalog(&self) -> Result<Arc<JsonCatalog>, CliError> {
        fs::create_dir_all(&self.config.storage.data_dir)?;
        Ok(Arc::new(JsonCatalog::open(
            self.config.storage.catalog_path(),
        )?))
    }

    /// Build every component.
    ///
    /// Call outside the runtime; the blocking HTTP client cannot be built
    /// from async code.
    pub fn services(&self) -> Result<Services, CliError> {
        let config = &self.config;
        let catalog = self.open_catalog()?;
        let pending = Arc::new(JsonFileMap::open(
            config.storage.pending_installs_path(),
        )?);
        let sync_state = Arc::new(JsonFileMap::open(config.storage.sync_state_path())?);

        let installer = Arc::new(
            DirectoryInstaller::new(config.install.install_dir.clone(), catalog.clone())
                .with_confirmation(config.install.require_confirmation),
        );
        let orchestrator = InstallOrchestrator::new(
            catalog.clone(),
            catalog.clone(),
            pending,
            Arc::new(HttpTransferService::new()),
            installer.clone(),
            Arc::new(StatusRegistry::new()),
            OrchestratorConfig::from_config_file(config),
        );

        let updater = Arc::new(IndexUpdater::new(
            Arc::new(HttpIndexFetcher::new()?),
            Arc::new(JsonIndexParser::new()),
            catalog.clone(),
        ));
        let coordinator = RepoSyncCoordinator::new(
            catalog.clone(),
            updater,
            orchestrator.clone(),
            Arc::new(StaticNetwork::from_config_file(config)),
            sync_state,
            SyncSettings::from_config_file(config),
        );

        Ok(Services {
            catalog,
            installer,
            orchestrator,
            coordinator,
        })
    }

    /// Multi-threaded runtime for commands that download.
    pub fn runtime(&self) -> Result<tokio::runtime::Runtime, CliError> {
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|e| CliError::Setup(format!("Failed to start runtime: {}", e)))
    }
}
