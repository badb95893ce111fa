//! Install job state machine.
//!
//! One [`InstallJob`] exists per canonical URL. It consumes typed events
//! from the transfer service and installer and returns the effects the
//! orchestrator must apply. It performs no I/O itself.
//!
//! ```text
//! PendingInstall ─► Downloading ─► ReadyToInstall ─► Installing ─► Installed
//!        │               │                │               │
//!        └───────────────┴────────────────┴───────────────┴──► Error
//!
//! Cancel or a message-less interruption removes the job from any
//! non-terminal state.
//! ```

use std::path::PathBuf;

use tracing::trace;

use super::events::{InstallEvent, TransferEvent};
use crate::status::{FollowupAction, JobState};

/// Message shown when every mirror has failed.
pub const MIRRORS_EXHAUSTED: &str = "Ran out of mirrors";

/// Input to an [`InstallJob`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
    Transfer(TransferEvent),
    Install(InstallEvent),
    /// The mirror selector has nothing left to try.
    MirrorsExhausted { message: String },
    /// The user cancelled the job.
    Cancel,
}

/// Work the orchestrator performs in response to an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEffect {
    SetStatus {
        state: JobState,
        followup: Option<FollowupAction>,
    },
    Progress {
        bytes_read: u64,
        total_bytes: u64,
    },
    SetError {
        message: String,
    },
    /// Raise an error notice unless the package is on screen.
    NotifyError {
        message: String,
    },
    /// Tell the user the download waits on them.
    NotifyReadyToInstall,
    ClearNotification,
    /// Ask the mirror selector for another mirror and resubmit.
    RetryWithMirror {
        failed_url: String,
    },
    Install {
        local_file: PathBuf,
    },
    /// Record the installer as the package's installer of record.
    AttributeInstaller,
    /// Delete the durable pending-install record.
    ClearPending,
    RemoveStatus,
    Transient {
        message: String,
    },
    /// Stop handling events for this URL.
    Finish,
}

/// State of one install job.
#[derive(Debug, Clone)]
pub struct InstallJob {
    url: String,
    /// `None` once the job has been removed.
    state: Option<JobState>,
}

impl InstallJob {
    pub fn new(url: impl Into<String>, state: JobState) -> Self {
        Self {
            url: url.into(),
            state: Some(state),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Current state, or `None` if the job was removed.
    pub fn state(&self) -> Option<JobState> {
        self.state
    }

    /// Whether further events can change this job.
    pub fn is_live(&self) -> bool {
        matches!(self.state, Some(state) if !state.is_terminal())
    }

    /// Advance on `event`, returning the effects to apply in order.
    pub fn handle(&mut self, event: JobEvent) -> Vec<JobEffect> {
        let Some(state) = self.state.filter(|s| !s.is_terminal()) else {
            trace!(url = %self.url, event = ?event, "Ignoring event for finished job");
            return Vec::new();
        };

        match event {
            JobEvent::Cancel => self.remove(),
            JobEvent::MirrorsExhausted { message } => {
                let mut effects = vec![JobEffect::Transient {
                    message: MIRRORS_EXHAUSTED.to_string(),
                }];
                effects.extend(self.fail(message));
                effects
            }
            JobEvent::Transfer(event) if is_downloading(state) => self.on_transfer(event),
            JobEvent::Install(event) if is_installing(state) => self.on_install(event),
            other => {
                trace!(url = %self.url, state = %state, event = ?other, "Ignoring out-of-phase event");
                Vec::new()
            }
        }
    }

    fn on_transfer(&mut self, event: TransferEvent) -> Vec<JobEffect> {
        match event {
            TransferEvent::Started => self.transition(
                JobState::Downloading,
                Some(FollowupAction::CancelDownload {
                    url: self.url.clone(),
                }),
            ),
            TransferEvent::Progress {
                bytes_read,
                total_bytes,
            } => vec![JobEffect::Progress {
                bytes_read,
                total_bytes,
            }],
            TransferEvent::Complete { local_file } => {
                let mut effects = self.transition(JobState::ReadyToInstall, None);
                effects.push(JobEffect::Install { local_file });
                effects
            }
            TransferEvent::Interrupted { message: None } => self.remove(),
            TransferEvent::Interrupted {
                message: Some(message),
            } => self.fail(message),
            TransferEvent::ConnectionFailed { mirror_url, .. } => {
                vec![JobEffect::RetryWithMirror {
                    failed_url: mirror_url,
                }]
            }
        }
    }

    fn on_install(&mut self, event: InstallEvent) -> Vec<JobEffect> {
        match event {
            InstallEvent::Started => self.transition(JobState::Installing, None),
            InstallEvent::UserInteractionRequired(action) => {
                let mut effects = self.transition(JobState::ReadyToInstall, Some(action));
                effects.push(JobEffect::NotifyReadyToInstall);
                effects
            }
            InstallEvent::Completed => {
                let mut effects = self.transition(JobState::Installed, None);
                effects.extend([
                    JobEffect::AttributeInstaller,
                    JobEffect::ClearPending,
                    JobEffect::ClearNotification,
                    JobEffect::Finish,
                ]);
                effects
            }
            InstallEvent::Interrupted { message: None } => self.remove(),
            InstallEvent::Interrupted {
                message: Some(message),
            } => self.fail(message),
        }
    }

    fn transition(&mut self, state: JobState, followup: Option<FollowupAction>) -> Vec<JobEffect> {
        self.state = Some(state);
        vec![JobEffect::SetStatus { state, followup }]
    }

    fn fail(&mut self, message: String) -> Vec<JobEffect> {
        self.state = Some(JobState::Error);
        vec![
            JobEffect::SetError {
                message: message.clone(),
            },
            JobEffect::NotifyError { message },
            JobEffect::ClearPending,
            JobEffect::Finish,
        ]
    }

    fn remove(&mut self) -> Vec<JobEffect> {
        self.state = None;
        vec![
            JobEffect::RemoveStatus,
            JobEffect::ClearPending,
            JobEffect::ClearNotification,
            JobEffect::Finish,
        ]
    }
}

fn is_downloading(state: JobState) -> bool {
    matches!(state, JobState::PendingInstall | JobState::Downloading)
}

fn is_installing(state: JobState) -> bool {
    matches!(state, JobState::ReadyToInstall | JobState::Installing)
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "https://repo.example/fdroid/app.apk";

    fn job() -> InstallJob {
        InstallJob::new(URL, JobState::PendingInstall)
    }

    fn transfer(event: TransferEvent) -> JobEvent {
        JobEvent::Transfer(event)
    }

    #[test]
    fn test_happy_path() {
        let mut job = job();

        let effects = job.handle(transfer(TransferEvent::Started));
        assert_eq!(
            effects,
            vec![JobEffect::SetStatus {
                state: JobState::Downloading,
                followup: Some(FollowupAction::CancelDownload {
                    url: URL.to_string()
                }),
            }]
        );

        let effects = job.handle(transfer(TransferEvent::Complete {
            local_file: PathBuf::from("/cache/app.apk"),
        }));
        assert_eq!(
            effects[1],
            JobEffect::Install {
                local_file: PathBuf::from("/cache/app.apk")
            }
        );
        assert_eq!(job.state(), Some(JobState::ReadyToInstall));

        job.handle(JobEvent::Install(InstallEvent::Started));
        assert_eq!(job.state(), Some(JobState::Installing));

        let effects = job.handle(JobEvent::Install(InstallEvent::Completed));
        assert!(effects.contains(&JobEffect::AttributeInstaller));
        assert!(effects.contains(&JobEffect::ClearPending));
        assert_eq!(effects.last(), Some(&JobEffect::Finish));
        assert_eq!(job.state(), Some(JobState::Installed));
        assert!(!job.is_live());
    }

    #[test]
    fn test_connection_failure_requests_retry() {
        let mut job = job();
        let effects = job.handle(transfer(TransferEvent::ConnectionFailed {
            mirror_url: "https://mirror.example/fdroid/app.apk".to_string(),
            message: "refused".to_string(),
        }));

        assert_eq!(
            effects,
            vec![JobEffect::RetryWithMirror {
                failed_url: "https://mirror.example/fdroid/app.apk".to_string()
            }]
        );
        assert_eq!(job.state(), Some(JobState::PendingInstall));
    }

    #[test]
    fn test_mirrors_exhausted_is_error() {
        let mut job = job();
        let effects = job.handle(JobEvent::MirrorsExhausted {
            message: "Ran out of mirrors (repository 1)".to_string(),
        });

        assert_eq!(
            effects[0],
            JobEffect::Transient {
                message: MIRRORS_EXHAUSTED.to_string()
            }
        );
        assert!(matches!(effects[1], JobEffect::SetError { .. }));
        assert_eq!(job.state(), Some(JobState::Error));
        assert!(effects.contains(&JobEffect::ClearPending));
        assert!(!effects.contains(&JobEffect::RemoveStatus));
    }

    #[test]
    fn test_silent_interruption_is_cancellation() {
        let mut job = job();
        job.handle(transfer(TransferEvent::Started));

        let effects = job.handle(transfer(TransferEvent::Interrupted { message: None }));
        assert_eq!(effects[0], JobEffect::RemoveStatus);
        assert!(!effects
            .iter()
            .any(|e| matches!(e, JobEffect::NotifyError { .. })));
        assert_eq!(job.state(), None);
    }

    #[test]
    fn test_install_interrupted_with_message_is_error() {
        let mut job = InstallJob::new(URL, JobState::ReadyToInstall);
        job.handle(JobEvent::Install(InstallEvent::Started));

        let effects = job.handle(JobEvent::Install(InstallEvent::Interrupted {
            message: Some("disk full".to_string()),
        }));
        assert_eq!(
            effects,
            vec![
                JobEffect::SetError {
                    message: "disk full".to_string()
                },
                JobEffect::NotifyError {
                    message: "disk full".to_string()
                },
                JobEffect::ClearPending,
                JobEffect::Finish,
            ]
        );
    }

    #[test]
    fn test_user_interaction_keeps_job_waiting() {
        let mut job = InstallJob::new(URL, JobState::ReadyToInstall);
        let action = FollowupAction::ConfirmInstall {
            url: URL.to_string(),
        };
        let effects = job.handle(JobEvent::Install(InstallEvent::UserInteractionRequired(
            action.clone(),
        )));

        assert_eq!(
            effects,
            vec![
                JobEffect::SetStatus {
                    state: JobState::ReadyToInstall,
                    followup: Some(action)
                },
                JobEffect::NotifyReadyToInstall
            ]
        );
        assert!(job.is_live());
    }

    #[test]
    fn test_no_transitions_after_cancel() {
        let mut job = job();
        job.handle(transfer(TransferEvent::Started));
        job.handle(JobEvent::Cancel);

        let late = job.handle(transfer(TransferEvent::Progress {
            bytes_read: 10,
            total_bytes: 100,
        }));
        assert!(late.is_empty());
        assert!(job.handle(JobEvent::Cancel).is_empty());
    }

    #[test]
    fn test_out_of_phase_events_ignored() {
        let mut job = InstallJob::new(URL, JobState::Installing);
        assert!(job.handle(transfer(TransferEvent::Started)).is_empty());

        let mut job = self::job();
        assert!(job
            .handle(JobEvent::Install(InstallEvent::Completed))
            .is_empty());
        assert_eq!(job.state(), Some(JobState::PendingInstall));
    }
}
