//! Repository management commands.

use appcatalog::catalog::{CatalogStore, JsonCatalog};
use appcatalog::repo::{normalize_address, RepoId, Repository};
use clap::Subcommand;

use crate::error::CliError;
use crate::runner::CliRunner;

/// Repo subcommands.
#[derive(Debug, Subcommand)]
pub enum RepoCommands {
    /// Add a repository
    Add {
        /// Repository address (e.g., https://f-droid.org/repo)
        address: String,

        /// Display name (defaults to the address)
        #[arg(long)]
        name: Option<String>,

        /// Expected SHA-256 fingerprint of the signing certificate
        #[arg(long)]
        fingerprint: Option<String>,

        /// Additional mirror address (may be repeated)
        #[arg(long = "mirror")]
        mirrors: Vec<String>,

        /// Lower values are updated first
        #[arg(long, default_value_t = 10)]
        priority: u32,
    },

    /// List repositories
    List,

    /// Remove a repository and its pinned certificate
    Remove { address: String },

    /// Include a repository in updates
    Enable { address: String },

    /// Exclude a repository from updates
    Disable { address: String },
}

/// Run a repo subcommand.
pub fn run(command: RepoCommands, runner: &CliRunner) -> Result<(), CliError> {
    let catalog = runner.open_catalog()?;

    match command {
        RepoCommands::Add {
            address,
            name,
            fingerprint,
            mirrors,
            priority,
        } => {
            let name = name.unwrap_or_else(|| normalize_address(&address));
            let mut repo = Repository::new(RepoId(0), &address, name)
                .with_mirrors(mirrors)
                .with_priority(priority);
            if let Some(fingerprint) = fingerprint {
                repo = repo.with_fingerprint(fingerprint);
            }
            let repo = catalog.add_repository(repo)?;
            println!("Added repository {} ({})", repo.name, repo.address);
            println!("Run 'appcatalog sync --repo {}' to fetch its index.", repo.address);
            Ok(())
        }
        RepoCommands::List => {
            list(&catalog);
            Ok(())
        }
        RepoCommands::Remove { address } => {
            let repo = find(&catalog, &address)?;
            catalog.remove_repository(repo.id)?;
            println!("Removed repository {}", repo.address);
            Ok(())
        }
        RepoCommands::Enable { address } => set_in_use(&catalog, &address, true),
        RepoCommands::Disable { address } => set_in_use(&catalog, &address, false),
    }
}

fn find(catalog: &JsonCatalog, address: &str) -> Result<Repository, CliError> {
    catalog
        .repository_by_address(address)
        .ok_or_else(|| CliError::NotFound(format!("No repository at {}", normalize_address(address))))
}

fn set_in_use(catalog: &JsonCatalog, address: &str, in_use: bool) -> Result<(), CliError> {
    let mut repo = find(catalog, address)?;
    repo.in_use = in_use;
    catalog.update_repository(&repo)?;
    println!(
        "{} repository {}",
        if in_use { "Enabled" } else { "Disabled" },
        repo.address
    );
    Ok(())
}

fn list(catalog: &JsonCatalog) {
    let repos = catalog.repositories();
    if repos.is_empty() {
        println!("No repositories configured.");
        return;
    }

    for repo in repos {
        let state = if repo.in_use { "enabled" } else { "disabled" };
        println!("{} [{}]", repo.address, state);
        println!("  Name:        {}", repo.name);
        println!("  Priority:    {}", repo.priority);
        match &repo.fingerprint {
            Some(fp) => println!("  Fingerprint: {}", fp),
            None => println!("  Fingerprint: (not pinned)"),
        }
        if !repo.mirrors.is_empty() {
            println!("  Mirrors:     {}", repo.mirrors.join(", "));
        }
        match repo.last_updated {
            Some(at) => println!("  Updated:     {} (index {})", at.format("%Y-%m-%d %H:%M"), repo.timestamp),
            None => println!("  Updated:     never"),
        }
    }
}
