//! "Updates available" summary.

use crate::catalog::UpdatableApp;

/// Apps listed by name before the rest are folded into "+K more".
pub const MAX_UPDATES_TO_SHOW: usize = 5;

/// Text of an "updates available" notice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateSummary {
    pub count: usize,
    pub title: String,
    /// One line per app, at most [`MAX_UPDATES_TO_SHOW`].
    pub lines: Vec<String>,
    /// "+K more" when apps were left out.
    pub more: Option<String>,
}

impl UpdateSummary {
    /// Summarize `apps`, or `None` if there are no updates.
    pub fn from_apps(apps: &[UpdatableApp]) -> Option<Self> {
        if apps.is_empty() {
            return None;
        }
        let count = apps.len();
        let title = if count == 1 {
            "1 update available".to_string()
        } else {
            format!("{} updates available", count)
        };
        let lines = apps
            .iter()
            .take(MAX_UPDATES_TO_SHOW)
            .map(|app| {
                format!(
                    "{} ({} → {})",
                    app.name, app.installed_version_name, app.suggested.version_name
                )
            })
            .collect();
        let more = (count > MAX_UPDATES_TO_SHOW)
            .then(|| format!("+{} more", count - MAX_UPDATES_TO_SHOW));

        Some(Self {
            count,
            title,
            lines,
            more,
        })
    }
}
