//! AppCatalog CLI - command-line interface
//!
//! Manages signed repositories and installs packages from them using the
//! appcatalog library.

mod commands;
mod error;
mod runner;

use std::process::ExitCode;

use clap::{Parser, Subcommand};

use commands::config::ConfigCommands;
use commands::install::{IgnoreArgs, InstallArgs};
use commands::repo::RepoCommands;
use commands::sync::SyncArgs;
use error::CliError;
use runner::CliRunner;

#[derive(Debug, Parser)]
#[command(name = "appcatalog", version, about)]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create the configuration file and data directories
    Init,

    /// View or change configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Manage repositories
    Repo {
        #[command(subcommand)]
        command: RepoCommands,
    },

    /// Update repository indexes
    Sync {
        /// Only update the repository at this address
        #[arg(long)]
        repo: Option<String>,

        /// Honor the update interval and metered-network settings
        #[arg(long)]
        scheduled: bool,
    },

    /// List installed packages with updates available
    Updates,

    /// Download and install a package
    Install {
        /// Package name (e.g., org.example.app)
        package: String,

        /// Install without asking for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Resume installs interrupted by an earlier run
    Resume {
        #[arg(short, long)]
        yes: bool,
    },

    /// Cancel a pending install by its download URL
    Cancel { url: String },

    /// Ignore updates to a package
    Ignore {
        package: String,

        /// Ignore every future update, not just the current one
        #[arg(long, conflicts_with = "clear")]
        all: bool,

        /// Stop ignoring updates
        #[arg(long)]
        clear: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Commands::Init => commands::init::run(),
        Commands::Config { command } => commands::config::run(command),
        command => {
            let runner = CliRunner::new(cli.verbose)?;
            dispatch(command, &runner)
        }
    }
}

fn dispatch(command: Commands, runner: &CliRunner) -> Result<(), CliError> {
    match command {
        Commands::Repo { command } => {
            runner.log_startup("repo");
            commands::repo::run(command, runner)
        }
        Commands::Sync { repo, scheduled } => {
            runner.log_startup("sync");
            commands::sync::run(SyncArgs { repo, scheduled }, runner)
        }
        Commands::Updates => commands::install::run_updates(runner),
        Commands::Install { package, yes } => {
            runner.log_startup("install");
            commands::install::run_install(InstallArgs { package, yes }, runner)
        }
        Commands::Resume { yes } => {
            runner.log_startup("resume");
            commands::install::run_resume(yes, runner)
        }
        Commands::Cancel { url } => commands::install::run_cancel(&url, runner),
        Commands::Ignore {
            package,
            all,
            clear,
        } => commands::install::run_ignore(IgnoreArgs { package, all, clear }, runner),
        Commands::Init | Commands::Config { .. } => Ok(()),
    }
}
