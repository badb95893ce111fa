//! CLI error type.

use std::fmt;
use std::process::ExitCode;

use appcatalog::catalog::CatalogError;
use appcatalog::config::ConfigError;
use appcatalog::index::UpdateError;
use appcatalog::install::InstallError;
use appcatalog::logging::LoggingError;

/// Errors surfaced to the user by CLI commands.
#[derive(Debug)]
pub enum CliError {
    Config(String),
    Logging(LoggingError),
    Catalog(CatalogError),
    Install(InstallError),
    Setup(String),
    /// A named repository or package is not known.
    NotFound(String),
    /// The repository update finished with errors.
    Sync(String),
    /// The install job ended in error.
    InstallFailed(String),
}

impl CliError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            CliError::NotFound(_) => ExitCode::from(2),
            _ => ExitCode::FAILURE,
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::Logging(e) => write!(f, "Failed to initialize logging: {}", e),
            CliError::Catalog(e) => write!(f, "Catalog error: {}", e),
            CliError::Install(e) => write!(f, "{}", e),
            CliError::Setup(msg) => write!(f, "Setup failed: {}", msg),
            CliError::NotFound(msg) => write!(f, "{}", msg),
            CliError::Sync(msg) => write!(f, "Repository update failed: {}", msg),
            CliError::InstallFailed(msg) => write!(f, "Install failed: {}", msg),
        }
    }
}

impl std::error::Error for CliError {}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Config(e.to_string())
    }
}

impl From<LoggingError> for CliError {
    fn from(e: LoggingError) -> Self {
        CliError::Logging(e)
    }
}

impl From<CatalogError> for CliError {
    fn from(e: CatalogError) -> Self {
        CliError::Catalog(e)
    }
}

impl From<InstallError> for CliError {
    fn from(e: InstallError) -> Self {
        CliError::Install(e)
    }
}

impl From<UpdateError> for CliError {
    fn from(e: UpdateError) -> Self {
        CliError::Setup(e.to_string())
    }
}

impl From<std::io::Error> for CliError {
    fn from(e: std::io::Error) -> Self {
        CliError::Setup(e.to_string())
    }
}
