//! Configuration file handling.
//!
//! Settings live in an INI file at [`config_file_path`]. Components never
//! read it directly; typed settings are built from a loaded [`ConfigFile`]
//! through `from_config_file` factories.

mod file;
mod keys;

pub use file::{
    config_file_path, ConfigError, ConfigFile, InstallSection, LoggingSection, StorageSection,
    SyncSection,
};
pub use keys::{ConfigKey, UnknownKey};
