//! Sync command - update repository indexes.

use appcatalog::status::JobState;
use appcatalog::sync::{SyncEvent, SyncRequest};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::broadcast::error::RecvError;

use crate::error::CliError;
use crate::runner::CliRunner;

/// Arguments for the sync command.
pub struct SyncArgs {
    pub repo: Option<String>,
    pub scheduled: bool,
}

/// Run the sync command.
pub fn run(args: SyncArgs, runner: &CliRunner) -> Result<(), CliError> {
    let services = runner.services()?;
    let runtime = runner.runtime()?;
    let status = runtime.block_on(async {
        let coordinator = &services.coordinator;

        let mut request = if args.scheduled {
            SyncRequest::scheduled()
        } else {
            SyncRequest::manual()
        };
        if let Some(address) = args.repo {
            request = request.with_address(address);
        }

        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(120));

        let mut events = coordinator.subscribe();
        let progress = spinner.clone();
        let listener = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(SyncEvent::Progress { message, .. }) => progress.set_message(message),
                    Ok(SyncEvent::Finished(_)) | Err(RecvError::Closed) => break,
                    Err(RecvError::Lagged(_)) => continue,
                }
            }
        });

        let status = coordinator.run_sync(request).await;
        let _ = listener.await;
        spinner.finish_and_clear();

        // Queued automatic updates run to completion before exiting.
        let orchestrator = &services.orchestrator;
        for entry in orchestrator.status().get_all() {
            println!("Queued update: {} {}", entry.app_name, entry.version.version_name);
        }
        while orchestrator.status().get_all().iter().any(|e| {
            matches!(
                e.state,
                JobState::PendingInstall | JobState::Downloading | JobState::Installing
            )
        }) {
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        }

        status
    });

    println!("{}", status);
    if status.is_error() {
        return Err(CliError::Sync(status.to_string()));
    }
    Ok(())
}
