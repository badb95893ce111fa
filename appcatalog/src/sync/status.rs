//! Sync run outcomes and progress events.

use std::fmt;

use chrono::{DateTime, Utc};

/// Why a scheduled run did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Scheduled runs are turned off.
    Disabled,
    /// The last run was too recent.
    TooSoon { next_due: DateTime<Utc> },
    /// The network is metered and only unmetered updates are allowed.
    Metered,
}

/// Overall result of a sync run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    /// At least one repository changed and none failed.
    CompleteWithChanges,
    /// No repository changed and none failed.
    Unchanged,
    /// Every repository that was contacted failed.
    ErrorLocal { errors: Vec<String> },
    /// Some repositories failed; the others are fine.
    ErrorLocalSmall { errors: Vec<String> },
    /// The run itself failed.
    ErrorGlobal(String),
    NoNetwork { manual: bool },
    Skipped(SkipReason),
}

impl SyncStatus {
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            SyncStatus::ErrorLocal { .. }
                | SyncStatus::ErrorLocalSmall { .. }
                | SyncStatus::ErrorGlobal(_)
        )
    }

    /// Whether the run contacted any repository.
    pub fn ran(&self) -> bool {
        !matches!(self, SyncStatus::NoNetwork { .. } | SyncStatus::Skipped(_))
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStatus::CompleteWithChanges => f.write_str("Repositories updated"),
            SyncStatus::Unchanged => f.write_str("All repositories are up to date"),
            SyncStatus::ErrorLocal { errors } => f.write_str(&errors.join("\n")),
            SyncStatus::ErrorLocalSmall { errors } => {
                write!(f, "{}\nAll other repositories are fine", errors.join("\n"))
            }
            SyncStatus::ErrorGlobal(message) => write!(f, "Error during update: {}", message),
            SyncStatus::NoNetwork { .. } => f.write_str("No network connection"),
            SyncStatus::Skipped(SkipReason::Disabled) => {
                f.write_str("Scheduled updates are disabled")
            }
            SyncStatus::Skipped(SkipReason::TooSoon { next_due }) => {
                write!(f, "Next scheduled update is due at {}", next_due.to_rfc3339())
            }
            SyncStatus::Skipped(SkipReason::Metered) => {
                f.write_str("Skipping update on a metered network")
            }
        }
    }
}

/// Published on the coordinator's broadcast channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    Progress {
        message: String,
        /// `None` when the total is unknown.
        percent: Option<u8>,
    },
    Finished(SyncStatus),
}
