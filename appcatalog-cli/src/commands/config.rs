//! Config command - inspect and edit `config.ini`.
//!
//! Values are validated by [`ConfigKey::set`] before anything is written,
//! so a rejected value leaves the file untouched.

use std::fmt::Write as _;
use std::path::Path;

use appcatalog::config::{config_file_path, ConfigFile, ConfigKey};
use clap::Subcommand;

use crate::error::CliError;

#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Print one setting
    Get {
        /// Setting name, e.g. sync.auto_download
        key: String,
    },

    /// Change one setting
    Set { key: String, value: String },

    /// Restore one setting to its default
    Reset { key: String },

    /// Print every setting by section
    List {
        /// Only settings that differ from the defaults
        #[arg(long)]
        changed: bool,
    },

    /// Print the configuration file and data file locations
    Path,
}

pub fn run(command: ConfigCommands) -> Result<(), CliError> {
    let path = config_file_path();
    match command {
        ConfigCommands::Get { key } => {
            let config = ConfigFile::load_from(&path)?;
            println!("{}", parse_key(&key)?.get(&config));
        }
        ConfigCommands::Set { key, value } => {
            let key = parse_key(&key)?;
            let shown = update(&path, key, |config| key.set(config, &value))?;
            println!("{} = {}", key, shown);
        }
        ConfigCommands::Reset { key } => {
            let key = parse_key(&key)?;
            let shown = update(&path, key, |config| {
                key.reset(config);
                Ok(())
            })?;
            println!("{} = {} (default)", key, shown);
        }
        ConfigCommands::List { changed } => {
            let config = ConfigFile::load_from(&path)?;
            print!("{}", render(&config, changed));
        }
        ConfigCommands::Path => {
            let config = ConfigFile::load_from(&path)?;
            println!("config:           {}", path.display());
            println!("catalog:          {}", config.storage.catalog_path().display());
            println!("pending installs: {}", config.storage.pending_installs_path().display());
            println!("sync state:       {}", config.storage.sync_state_path().display());
        }
    }
    Ok(())
}

fn parse_key(name: &str) -> Result<ConfigKey, CliError> {
    name.parse::<ConfigKey>()
        .map_err(|e| CliError::Config(format!("{} (see `appcatalog config list`)", e)))
}

/// Load, apply `change`, and save. Returns the stored value of `key`.
fn update<F>(path: &Path, key: ConfigKey, change: F) -> Result<String, CliError>
where
    F: FnOnce(&mut ConfigFile) -> Result<(), appcatalog::config::ConfigError>,
{
    let mut config = ConfigFile::load_from(path)?;
    change(&mut config)?;
    config.save_to(path)?;
    Ok(key.get(&config))
}

/// Settings grouped by section, with their help text.
fn render(config: &ConfigFile, changed_only: bool) -> String {
    let mut out = String::new();
    let mut section = "";
    for key in ConfigKey::all() {
        if changed_only && key.is_default(config) {
            continue;
        }
        if key.section() != section {
            if !section.is_empty() {
                out.push('\n');
            }
            section = key.section();
            let _ = writeln!(out, "[{}]", section);
        }
        let value = key.get(config);
        let marker = if key.is_default(config) { "" } else { " *" };
        let _ = writeln!(
            out,
            "{} = {}{}\n    ; {}",
            key.key_name(),
            if value.is_empty() { "(empty)" } else { value.as_str() },
            marker,
            key.description()
        );
    }
    if out.is_empty() {
        out.push_str("All settings have their default values.\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_unknown_key_names_the_key() {
        let err = parse_key("sync.autodownload").unwrap_err();
        assert!(err.to_string().contains("'sync.autodownload'"));
        assert_eq!(parse_key("SYNC.METERED").unwrap(), ConfigKey::SyncMetered);
    }

    #[test]
    fn test_set_and_reset_round_through_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.ini");

        let shown = update(&path, ConfigKey::SyncUpdateIntervalHours, |c| {
            ConfigKey::SyncUpdateIntervalHours.set(c, "6")
        })
        .unwrap();
        assert_eq!(shown, "6");
        assert_eq!(ConfigFile::load_from(&path).unwrap().sync.update_interval_hours, 6);

        update(&path, ConfigKey::SyncUpdateIntervalHours, |c| {
            ConfigKey::SyncUpdateIntervalHours.reset(c);
            Ok(())
        })
        .unwrap();
        assert_eq!(
            ConfigFile::load_from(&path).unwrap().sync,
            ConfigFile::default().sync
        );
    }

    #[test]
    fn test_rejected_value_leaves_file_untouched() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.ini");

        let err = update(&path, ConfigKey::SyncMetered, |c| {
            ConfigKey::SyncMetered.set(c, "sometimes")
        })
        .unwrap_err();
        assert!(err.to_string().contains("sync.metered"));
        assert!(!path.exists());
    }

    #[test]
    fn test_render_marks_changed_settings() {
        let mut config = ConfigFile::default();
        ConfigKey::SyncAutoDownload.set(&mut config, "true").unwrap();

        let all = render(&config, false);
        assert!(all.starts_with("[sync]\n"));
        assert!(all.contains("auto_download = true *\n"));
        assert!(all.contains("[logging]"));

        let changed = render(&config, true);
        assert_eq!(changed.lines().filter(|l| l.starts_with('[')).count(), 1);
        assert!(changed.contains("auto_download = true *"));

        assert_eq!(
            render(&ConfigFile::default(), true),
            "All settings have their default values.\n"
        );
    }
}
