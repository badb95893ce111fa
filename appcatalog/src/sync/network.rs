//! Network availability.

use crate::config::ConfigFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkState {
    Unavailable,
    Metered,
    Unmetered,
}

/// Reports the active network.
pub trait NetworkMonitor: Send + Sync {
    fn state(&self) -> NetworkState;
}

/// A network whose state is fixed at construction.
#[derive(Debug, Clone, Copy)]
pub struct StaticNetwork(pub NetworkState);

impl StaticNetwork {
    /// Connected, metered according to `sync.metered`.
    pub fn from_config_file(config: &ConfigFile) -> Self {
        if config.sync.metered {
            Self(NetworkState::Metered)
        } else {
            Self(NetworkState::Unmetered)
        }
    }
}

impl NetworkMonitor for StaticNetwork {
    fn state(&self) -> NetworkState {
        self.0
    }
}
