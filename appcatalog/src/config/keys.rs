//! Addressable configuration keys for `config get/set/list`.

use std::fmt;
use std::str::FromStr;

use tracing_subscriber::EnvFilter;

use super::file::{expand_path, parse_bool, parse_u32, ConfigError, ConfigFile};

/// A `section.key` setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKey {
    SyncUpdateIntervalHours,
    SyncUnmeteredOnly,
    SyncAutoDownload,
    SyncUpdateNotifications,
    SyncMetered,
    InstallCacheDir,
    InstallInstallDir,
    InstallExpansionDir,
    InstallSelfPackage,
    InstallRequireConfirmation,
    StorageDataDir,
    LoggingLevel,
    LoggingFile,
}

/// Returned when parsing an unknown key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownKey(pub String);

impl fmt::Display for UnknownKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unknown configuration key '{}'", self.0)
    }
}

impl std::error::Error for UnknownKey {}

const ALL: [ConfigKey; 13] = [
    ConfigKey::SyncUpdateIntervalHours,
    ConfigKey::SyncUnmeteredOnly,
    ConfigKey::SyncAutoDownload,
    ConfigKey::SyncUpdateNotifications,
    ConfigKey::SyncMetered,
    ConfigKey::InstallCacheDir,
    ConfigKey::InstallInstallDir,
    ConfigKey::InstallExpansionDir,
    ConfigKey::InstallSelfPackage,
    ConfigKey::InstallRequireConfirmation,
    ConfigKey::StorageDataDir,
    ConfigKey::LoggingLevel,
    ConfigKey::LoggingFile,
];

impl ConfigKey {
    /// Every key, grouped by section.
    pub fn all() -> &'static [ConfigKey] {
        &ALL
    }

    /// Full `section.key` name.
    pub fn name(&self) -> &'static str {
        match self {
            ConfigKey::SyncUpdateIntervalHours => "sync.update_interval_hours",
            ConfigKey::SyncUnmeteredOnly => "sync.unmetered_only",
            ConfigKey::SyncAutoDownload => "sync.auto_download",
            ConfigKey::SyncUpdateNotifications => "sync.update_notifications",
            ConfigKey::SyncMetered => "sync.metered",
            ConfigKey::InstallCacheDir => "install.cache_dir",
            ConfigKey::InstallInstallDir => "install.install_dir",
            ConfigKey::InstallExpansionDir => "install.expansion_dir",
            ConfigKey::InstallSelfPackage => "install.self_package",
            ConfigKey::InstallRequireConfirmation => "install.require_confirmation",
            ConfigKey::StorageDataDir => "storage.data_dir",
            ConfigKey::LoggingLevel => "logging.level",
            ConfigKey::LoggingFile => "logging.file",
        }
    }

    /// One-line help shown by `config list`.
    pub fn description(&self) -> &'static str {
        match self {
            ConfigKey::SyncUpdateIntervalHours => "hours between scheduled syncs, 0 disables them",
            ConfigKey::SyncUnmeteredOnly => "skip scheduled syncs on metered networks",
            ConfigKey::SyncAutoDownload => "queue available updates after each sync",
            ConfigKey::SyncUpdateNotifications => "announce available updates",
            ConfigKey::SyncMetered => "treat the current network as metered",
            ConfigKey::InstallCacheDir => "downloaded package and expansion files",
            ConfigKey::InstallInstallDir => "where installed packages are placed",
            ConfigKey::InstallExpansionDir => "where expansion files are placed",
            ConfigKey::InstallSelfPackage => "this client's package, updated last",
            ConfigKey::InstallRequireConfirmation => "ask before placing each package",
            ConfigKey::StorageDataDir => "catalog, pending installs and sync state",
            ConfigKey::LoggingLevel => "log filter directive, RUST_LOG overrides it",
            ConfigKey::LoggingFile => "also write daily log files",
        }
    }

    /// Value in a configuration with nothing set.
    pub fn default_value(&self) -> String {
        self.get(&ConfigFile::default())
    }

    /// Whether `config` holds something other than the default.
    pub fn is_default(&self, config: &ConfigFile) -> bool {
        self.get(config) == self.default_value()
    }

    /// Restore the default value.
    pub fn reset(&self, config: &mut ConfigFile) {
        let d = ConfigFile::default();
        match self {
            ConfigKey::SyncUpdateIntervalHours => {
                config.sync.update_interval_hours = d.sync.update_interval_hours
            }
            ConfigKey::SyncUnmeteredOnly => config.sync.unmetered_only = d.sync.unmetered_only,
            ConfigKey::SyncAutoDownload => config.sync.auto_download = d.sync.auto_download,
            ConfigKey::SyncUpdateNotifications => {
                config.sync.update_notifications = d.sync.update_notifications
            }
            ConfigKey::SyncMetered => config.sync.metered = d.sync.metered,
            ConfigKey::InstallCacheDir => config.install.cache_dir = d.install.cache_dir,
            ConfigKey::InstallInstallDir => config.install.install_dir = d.install.install_dir,
            ConfigKey::InstallExpansionDir => {
                config.install.expansion_dir = d.install.expansion_dir
            }
            ConfigKey::InstallSelfPackage => config.install.self_package = d.install.self_package,
            ConfigKey::InstallRequireConfirmation => {
                config.install.require_confirmation = d.install.require_confirmation
            }
            ConfigKey::StorageDataDir => config.storage.data_dir = d.storage.data_dir,
            ConfigKey::LoggingLevel => config.logging.level = d.logging.level,
            ConfigKey::LoggingFile => config.logging.file = d.logging.file,
        }
    }

    pub fn section(&self) -> &'static str {
        self.name().split_once('.').map(|(s, _)| s).unwrap_or("")
    }

    pub fn key_name(&self) -> &'static str {
        self.name().split_once('.').map(|(_, k)| k).unwrap_or("")
    }

    /// Current value as written in the file.
    pub fn get(&self, config: &ConfigFile) -> String {
        match self {
            ConfigKey::SyncUpdateIntervalHours => config.sync.update_interval_hours.to_string(),
            ConfigKey::SyncUnmeteredOnly => config.sync.unmetered_only.to_string(),
            ConfigKey::SyncAutoDownload => config.sync.auto_download.to_string(),
            ConfigKey::SyncUpdateNotifications => config.sync.update_notifications.to_string(),
            ConfigKey::SyncMetered => config.sync.metered.to_string(),
            ConfigKey::InstallCacheDir => config.install.cache_dir.display().to_string(),
            ConfigKey::InstallInstallDir => config.install.install_dir.display().to_string(),
            ConfigKey::InstallExpansionDir => config.install.expansion_dir.display().to_string(),
            ConfigKey::InstallSelfPackage => config.install.self_package.clone(),
            ConfigKey::InstallRequireConfirmation => {
                config.install.require_confirmation.to_string()
            }
            ConfigKey::StorageDataDir => config.storage.data_dir.display().to_string(),
            ConfigKey::LoggingLevel => config.logging.level.clone(),
            ConfigKey::LoggingFile => config.logging.file.to_string(),
        }
    }

    /// Validate and apply `value`.
    pub fn set(&self, config: &mut ConfigFile, value: &str) -> Result<(), ConfigError> {
        let name = self.name();
        match self {
            ConfigKey::SyncUpdateIntervalHours => {
                config.sync.update_interval_hours = parse_u32(name, value)?
            }
            ConfigKey::SyncUnmeteredOnly => config.sync.unmetered_only = parse_bool(name, value)?,
            ConfigKey::SyncAutoDownload => config.sync.auto_download = parse_bool(name, value)?,
            ConfigKey::SyncUpdateNotifications => {
                config.sync.update_notifications = parse_bool(name, value)?
            }
            ConfigKey::SyncMetered => config.sync.metered = parse_bool(name, value)?,
            ConfigKey::InstallCacheDir => config.install.cache_dir = non_empty_path(name, value)?,
            ConfigKey::InstallInstallDir => {
                config.install.install_dir = non_empty_path(name, value)?
            }
            ConfigKey::InstallExpansionDir => {
                config.install.expansion_dir = non_empty_path(name, value)?
            }
            ConfigKey::InstallSelfPackage => config.install.self_package = package_name(name, value)?,
            ConfigKey::InstallRequireConfirmation => {
                config.install.require_confirmation = parse_bool(name, value)?
            }
            ConfigKey::StorageDataDir => config.storage.data_dir = non_empty_path(name, value)?,
            ConfigKey::LoggingLevel => config.logging.level = log_filter(name, value)?,
            ConfigKey::LoggingFile => config.logging.file = parse_bool(name, value)?,
        }
        Ok(())
    }
}

fn non_empty_path(key: &str, value: &str) -> Result<std::path::PathBuf, ConfigError> {
    if value.trim().is_empty() {
        return Err(invalid(key, value, "path must not be empty"));
    }
    Ok(expand_path(value))
}

fn invalid(key: &str, value: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

/// Dotted package name such as `org.example.app`.
fn package_name(key: &str, value: &str) -> Result<String, ConfigError> {
    let value = value.trim();
    let valid = value.contains('.')
        && value.split('.').all(|part| {
            !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        });
    if !valid {
        return Err(invalid(key, value, "expected a package name like org.example.app"));
    }
    Ok(value.to_string())
}

fn log_filter(key: &str, value: &str) -> Result<String, ConfigError> {
    let value = value.trim();
    EnvFilter::try_new(value).map_err(|e| invalid(key, value, e.to_string()))?;
    Ok(value.to_string())
}

impl FromStr for ConfigKey {
    type Err = UnknownKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        ALL.iter()
            .copied()
            .find(|key| key.name() == wanted)
            .ok_or_else(|| UnknownKey(s.to_string()))
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
