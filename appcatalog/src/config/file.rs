//! INI configuration file.
//!
//! ```ini
//! [sync]
//! update_interval_hours = 24
//! unmetered_only = true
//! auto_download = false
//! update_notifications = true
//! metered = false
//!
//! [install]
//! cache_dir = ~/.cache/appcatalog/downloads
//! install_dir = ~/.local/share/appcatalog/apps
//! expansion_dir = ~/.local/share/appcatalog/obb
//! self_package = org.appcatalog.client
//! require_confirmation = false
//!
//! [storage]
//! data_dir = ~/.local/share/appcatalog
//!
//! [logging]
//! level = info
//! file = false
//! ```
//!
//! Missing keys take their defaults; a missing file is the default
//! configuration.

use std::fs;
use std::path::{Path, PathBuf};

use ini::{Ini, Properties};
use thiserror::Error;

/// Configuration file errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

/// `[sync]` settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSection {
    /// Hours between scheduled runs. 0 disables scheduled runs.
    pub update_interval_hours: u32,
    pub unmetered_only: bool,
    pub auto_download: bool,
    pub update_notifications: bool,
    /// Whether the active network should be treated as metered.
    pub metered: bool,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            update_interval_hours: 24,
            unmetered_only: true,
            auto_download: false,
            update_notifications: true,
            metered: false,
        }
    }
}

/// `[install]` settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallSection {
    pub cache_dir: PathBuf,
    pub install_dir: PathBuf,
    pub expansion_dir: PathBuf,
    /// This client's own package, updated last.
    pub self_package: String,
    pub require_confirmation: bool,
}

impl Default for InstallSection {
    fn default() -> Self {
        let data = default_data_dir();
        Self {
            cache_dir: dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("appcatalog")
                .join("downloads"),
            install_dir: data.join("apps"),
            expansion_dir: data.join("obb"),
            self_package: "org.appcatalog.client".to_string(),
            require_confirmation: false,
        }
    }
}

/// `[storage]` settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageSection {
    /// Holds `catalog.json`, `pending-installs.json` and `sync-state.json`.
    pub data_dir: PathBuf,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl StorageSection {
    pub fn catalog_path(&self) -> PathBuf {
        self.data_dir.join("catalog.json")
    }

    pub fn pending_installs_path(&self) -> PathBuf {
        self.data_dir.join("pending-installs.json")
    }

    pub fn sync_state_path(&self) -> PathBuf {
        self.data_dir.join("sync-state.json")
    }
}

/// `[logging]` settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingSection {
    /// Default filter directive, overridden by `RUST_LOG`.
    pub level: String,
    /// Also write a daily log file under `<data_dir>/logs`.
    pub file: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: false,
        }
    }
}

/// Parsed configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigFile {
    pub sync: SyncSection,
    pub install: InstallSection,
    pub storage: StorageSection,
    pub logging: LoggingSection,
}

/// Location of the configuration file.
pub fn config_file_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("appcatalog")
        .join("config.ini")
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("appcatalog")
}

impl ConfigFile {
    /// Load from [`config_file_path`].
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&config_file_path())
    }

    /// Load from `path`, returning defaults if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let ini = Ini::load_from_file(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let mut config = Self::default();
        if let Some(section) = ini.section(Some("sync")) {
            let sync = &mut config.sync;
            read_parsed(section, "sync", "update_interval_hours", &mut sync.update_interval_hours)?;
            read_bool(section, "sync", "unmetered_only", &mut sync.unmetered_only)?;
            read_bool(section, "sync", "auto_download", &mut sync.auto_download)?;
            read_bool(section, "sync", "update_notifications", &mut sync.update_notifications)?;
            read_bool(section, "sync", "metered", &mut sync.metered)?;
        }
        if let Some(section) = ini.section(Some("install")) {
            let install = &mut config.install;
            read_path(section, "cache_dir", &mut install.cache_dir);
            read_path(section, "install_dir", &mut install.install_dir);
            read_path(section, "expansion_dir", &mut install.expansion_dir);
            if let Some(value) = section.get("self_package") {
                install.self_package = value.trim().to_string();
            }
            read_bool(section, "install", "require_confirmation", &mut install.require_confirmation)?;
        }
        if let Some(section) = ini.section(Some("storage")) {
            read_path(section, "data_dir", &mut config.storage.data_dir);
        }
        if let Some(section) = ini.section(Some("logging")) {
            if let Some(value) = section.get("level") {
                config.logging.level = value.trim().to_string();
            }
            read_bool(section, "logging", "file", &mut config.logging.file)?;
        }
        Ok(config)
    }

    /// Save to [`config_file_path`].
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&config_file_path())
    }

    /// Write every setting to `path`, replacing it atomically.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }

        let mut ini = Ini::new();
        ini.with_section(Some("sync"))
            .set("update_interval_hours", self.sync.update_interval_hours.to_string())
            .set("unmetered_only", self.sync.unmetered_only.to_string())
            .set("auto_download", self.sync.auto_download.to_string())
            .set("update_notifications", self.sync.update_notifications.to_string())
            .set("metered", self.sync.metered.to_string());
        ini.with_section(Some("install"))
            .set("cache_dir", self.install.cache_dir.display().to_string())
            .set("install_dir", self.install.install_dir.display().to_string())
            .set("expansion_dir", self.install.expansion_dir.display().to_string())
            .set("self_package", self.install.self_package.as_str())
            .set("require_confirmation", self.install.require_confirmation.to_string());
        ini.with_section(Some("storage"))
            .set("data_dir", self.storage.data_dir.display().to_string());
        ini.with_section(Some("logging"))
            .set("level", self.logging.level.as_str())
            .set("file", self.logging.file.to_string());

        let tmp = path.with_extension("ini.tmp");
        ini.write_to_file(&tmp).map_err(write_err)?;
        fs::rename(&tmp, path).map_err(write_err)
    }
}

/// Parse a boolean setting. Accepts true/false, yes/no, on/off and 1/0.
pub(crate) fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: "expected true or false".to_string(),
        }),
    }
}

/// Parse a non-negative integer setting.
pub(crate) fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: "expected a non-negative integer".to_string(),
    })
}

/// Expand a leading `~` to the home directory.
pub(crate) fn expand_path(value: &str) -> PathBuf {
    let value = value.trim();
    match value.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(value)),
        None => PathBuf::from(value),
    }
}

fn read_bool(
    section: &Properties,
    section_name: &str,
    key: &str,
    target: &mut bool,
) -> Result<(), ConfigError> {
    if let Some(value) = section.get(key) {
        *target = parse_bool(&format!("{}.{}", section_name, key), value)?;
    }
    Ok(())
}

fn read_parsed(
    section: &Properties,
    section_name: &str,
    key: &str,
    target: &mut u32,
) -> Result<(), ConfigError> {
    if let Some(value) = section.get(key) {
        *target = parse_u32(&format!("{}.{}", section_name, key), value)?;
    }
    Ok(())
}

fn read_path(section: &Properties, key: &str, target: &mut PathBuf) {
    if let Some(value) = section.get(key).filter(|v| !v.trim().is_empty()) {
        *target = expand_path(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_default() {
        let temp = TempDir::new().unwrap();
        let config = ConfigFile::load_from(&temp.path().join("config.ini")).unwrap();
        assert_eq!(config, ConfigFile::default());
        assert_eq!(config.sync.update_interval_hours, 24);
        assert!(config.sync.unmetered_only);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.ini");
        fs::write(
            &path,
            "[sync]\nauto_download = yes\nupdate_interval_hours = 0\n\n[storage]\ndata_dir = /var/lib/appcatalog\n",
        )
        .unwrap();

        let config = ConfigFile::load_from(&path).unwrap();
        assert!(config.sync.auto_download);
        assert_eq!(config.sync.update_interval_hours, 0);
        assert!(config.sync.update_notifications);
        assert_eq!(config.storage.data_dir, PathBuf::from("/var/lib/appcatalog"));
        assert_eq!(
            config.storage.catalog_path(),
            PathBuf::from("/var/lib/appcatalog/catalog.json")
        );
    }

    #[test]
    fn test_invalid_value_reported_with_key() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.ini");
        fs::write(&path, "[sync]\nmetered = sometimes\n").unwrap();

        let err = ConfigFile::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("sync.metered"));
    }

    #[test]
    fn test_save_then_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("config.ini");
        let mut config = ConfigFile::default();
        config.sync.auto_download = true;
        config.install.self_package = "org.example.self".to_string();
        config.install.cache_dir = temp.path().join("cache");
        config.logging.level = "debug".to_string();

        config.save_to(&path).unwrap();
        assert_eq!(ConfigFile::load_from(&path).unwrap(), config);
        assert!(!path.with_extension("ini.tmp").exists());
    }

    #[test]
    fn test_expand_home() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_path("~/cache"), home.join("cache"));
        }
        assert_eq!(expand_path("/abs"), PathBuf::from("/abs"));
    }
}
