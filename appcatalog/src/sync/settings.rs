//! Sync settings.

use chrono::Duration;

use crate::config::ConfigFile;

/// Settings read by [`RepoSyncCoordinator`](super::RepoSyncCoordinator).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    /// Hours between scheduled runs. 0 disables them.
    pub update_interval_hours: u32,
    pub unmetered_only: bool,
    pub auto_download: bool,
    pub update_notifications: bool,
    /// Package of this client, queued after every other update.
    pub self_package: String,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self::from_config_file(&ConfigFile::default())
    }
}

impl SyncSettings {
    pub fn from_config_file(config: &ConfigFile) -> Self {
        Self {
            update_interval_hours: config.sync.update_interval_hours,
            unmetered_only: config.sync.unmetered_only,
            auto_download: config.sync.auto_download,
            update_notifications: config.sync.update_notifications,
            self_package: config.install.self_package.clone(),
        }
    }

    /// Interval between scheduled runs, or `None` if they are disabled.
    pub fn interval(&self) -> Option<Duration> {
        (self.update_interval_hours > 0).then(|| Duration::hours(i64::from(self.update_interval_hours)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval() {
        let mut settings = SyncSettings::default();
        assert_eq!(settings.interval(), Some(Duration::hours(24)));
        settings.update_interval_hours = 0;
        assert_eq!(settings.interval(), None);
    }
}
