//! Init command - write the configuration file and create directories.

use std::fs;

use appcatalog::config::{config_file_path, ConfigFile};

use crate::error::CliError;

/// Run the init command.
pub fn run() -> Result<(), CliError> {
    // Keep existing settings, filling in anything missing.
    let config = ConfigFile::load()?;
    config.save()?;

    for dir in [
        &config.storage.data_dir,
        &config.install.cache_dir,
        &config.install.install_dir,
        &config.install.expansion_dir,
    ] {
        fs::create_dir_all(dir)?;
    }

    println!("Configuration file: {}", config_file_path().display());
    println!("Data directory:     {}", config.storage.data_dir.display());
    println!("Install directory:  {}", config.install.install_dir.display());
    println!();
    println!("Add a repository with 'appcatalog repo add <address>', then run 'appcatalog sync'.");
    Ok(())
}
