//! Install, update and pending-job commands.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use appcatalog::catalog::{AppPrefs, CatalogStore, InstalledPackages};
use appcatalog::install::StartOutcome;
use appcatalog::status::{FollowupAction, JobState, StatusEvent};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::broadcast::error::RecvError;

use crate::error::CliError;
use crate::runner::{CliRunner, Services};

/// Arguments for the install command.
pub struct InstallArgs {
    pub package: String,
    pub yes: bool,
}

/// Arguments for the ignore command.
pub struct IgnoreArgs {
    pub package: String,
    pub all: bool,
    pub clear: bool,
}

/// Download and install the suggested version of a package.
pub fn run_install(args: InstallArgs, runner: &CliRunner) -> Result<(), CliError> {
    let interrupted = shutdown_flag()?;
    let services = runner.services()?;
    let runtime = runner.runtime()?;
    runtime.block_on(async {
        let version = services
            .catalog
            .suggested_version(&args.package)
            .ok_or_else(|| CliError::NotFound(format!("Package {} is not in any repository", args.package)))?;
        let app_name = services
            .catalog
            .app_name(&args.package)
            .unwrap_or_else(|| args.package.clone());

        if let Some(installed) = services.catalog.installed_version(&args.package) {
            if installed.version_code >= version.version_code {
                println!("{} {} is already installed", app_name, installed.version_name);
                return Ok(());
            }
        }

        println!("Installing {} {}", style(&app_name).bold(), version.version_name);
        let url = version.canonical_url();
        match services.orchestrator.queue(&version, &app_name).await? {
            StartOutcome::Started | StartOutcome::Reattached => {
                follow(&services, &url, args.yes, &interrupted).await
            }
            other => Err(CliError::InstallFailed(format!("install did not start ({:?})", other))),
        }
    })
}

/// Restart every install left pending by an earlier run.
pub fn run_resume(yes: bool, runner: &CliRunner) -> Result<(), CliError> {
    let interrupted = shutdown_flag()?;
    let services = runner.services()?;
    let runtime = runner.runtime()?;
    runtime.block_on(async {
        let outcomes = services.orchestrator.resume_pending().await;
        if outcomes.is_empty() {
            println!("No pending installs.");
            return Ok(());
        }

        let mut resumed = Vec::new();
        for (url, outcome) in outcomes {
            println!("{}: {:?}", url, outcome);
            if matches!(outcome, StartOutcome::Started | StartOutcome::Reattached) {
                resumed.push(url);
            }
        }
        for url in resumed {
            follow(&services, &url, yes, &interrupted).await?;
        }
        Ok::<(), CliError>(())
    })
}

/// Forget a pending install.
pub fn run_cancel(url: &str, runner: &CliRunner) -> Result<(), CliError> {
    let services = runner.services()?;
    let runtime = runner.runtime()?;
    runtime.block_on(async {
        if services.orchestrator.cancel(url) {
            println!("Cancelled {}", url);
            Ok(())
        } else {
            Err(CliError::NotFound(format!("No pending install for {}", url)))
        }
    })
}

/// List installed packages with an update available.
pub fn run_updates(runner: &CliRunner) -> Result<(), CliError> {
    let catalog = runner.open_catalog()?;
    let updates = catalog.updatable_apps();
    if updates.is_empty() {
        println!("All installed packages are up to date.");
        return Ok(());
    }
    for app in updates {
        println!(
            "{} ({}): {} → {}",
            app.name, app.package_name, app.installed_version_name, app.suggested.version_name
        );
    }
    Ok(())
}

/// Ignore updates to a package, or clear its ignore settings.
pub fn run_ignore(args: IgnoreArgs, runner: &CliRunner) -> Result<(), CliError> {
    let catalog = runner.open_catalog()?;
    let prefs = if args.clear {
        AppPrefs::default()
    } else if args.all {
        AppPrefs {
            ignore_all_updates: true,
            ..catalog.app_prefs(&args.package)
        }
    } else {
        let version = catalog
            .suggested_version(&args.package)
            .ok_or_else(|| CliError::NotFound(format!("Package {} is not in any repository", args.package)))?;
        AppPrefs {
            ignore_this_update: Some(version.version_code),
            ..catalog.app_prefs(&args.package)
        }
    };
    catalog.set_app_prefs(&args.package, prefs)?;
    println!("Updated preferences for {}", args.package);
    Ok(())
}

fn shutdown_flag() -> Result<Arc<AtomicBool>, CliError> {
    let flag = Arc::new(AtomicBool::new(false));
    let handler_flag = flag.clone();
    ctrlc::set_handler(move || handler_flag.store(true, Ordering::SeqCst))
        .map_err(|e| CliError::Setup(format!("Failed to set signal handler: {}", e)))?;
    Ok(flag)
}

/// Follow one job until it leaves the registry or reaches a terminal state.
async fn follow(
    services: &Services,
    url: &str,
    yes: bool,
    interrupted: &AtomicBool,
) -> Result<(), CliError> {
    let registry = services.orchestrator.status().clone();
    let mut changes = registry.subscribe();
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template("{msg} [{bar:30}] {bytes}/{total_bytes} ({bytes_per_sec})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    let mut tick = tokio::time::interval(Duration::from_millis(100));

    loop {
        let Some(entry) = registry.get(url) else {
            bar.finish_and_clear();
            println!("Install of {} was cancelled", url);
            return Ok(());
        };
        match entry.state {
            JobState::PendingInstall | JobState::Downloading => {
                bar.set_message(format!("Downloading {}", entry.app_name));
                bar.set_length(entry.total_bytes);
                bar.set_position(entry.bytes_read);
            }
            JobState::Installing => bar.set_message(format!("Installing {}", entry.app_name)),
            JobState::ReadyToInstall => {
                if let Some(action @ FollowupAction::ConfirmInstall { .. }) = &entry.followup {
                    bar.suspend(|| confirm_or_decline(services, url, action, &entry.app_name, yes));
                }
            }
            JobState::Installed => {
                bar.finish_and_clear();
                println!(
                    "{} {} {}",
                    style("Installed").green(),
                    entry.app_name,
                    entry.version.version_name
                );
                return Ok(());
            }
            JobState::Error => {
                bar.abandon();
                return Err(CliError::InstallFailed(
                    entry.error.unwrap_or_else(|| "unknown error".to_string()),
                ));
            }
        }

        // Wait for the next change to this job.
        loop {
            tokio::select! {
                change = changes.recv() => match change {
                    Ok(StatusEvent { url: changed, .. }) if changed != url => {}
                    Ok(_) | Err(RecvError::Lagged(_)) => break,
                    Err(RecvError::Closed) => return Ok(()),
                },
                _ = tick.tick() => {
                    if interrupted.swap(false, Ordering::SeqCst) {
                        services.orchestrator.cancel(url);
                        bar.abandon_with_message("Cancelled");
                        return Err(CliError::InstallFailed("cancelled".to_string()));
                    }
                }
            }
        }
    }
}

fn confirm_or_decline(
    services: &Services,
    url: &str,
    action: &FollowupAction,
    app_name: &str,
    yes: bool,
) {
    let proceed = yes || {
        let prompt = format!("Install {}? [y/N] ", app_name);
        let term = console::Term::stdout();
        term.write_str(&prompt).is_ok()
            && term
                .read_line()
                .map(|answer| answer.trim().eq_ignore_ascii_case("y"))
                .unwrap_or(false)
    };
    if proceed {
        services.orchestrator.submit_followup(action);
    } else {
        services.installer.decline(url);
    }
}
