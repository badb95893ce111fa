//! Per-URL publish/subscribe for transfer and installer events.
//!
//! Any number of subscribers may listen to the same key. Delivery to one
//! subscriber is FIFO per key; there is no ordering across keys. Dropped
//! receivers are pruned on the next publish.

use std::path::PathBuf;

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::status::FollowupAction;

/// Events from the transfer service, keyed by canonical URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    Started,
    Progress { bytes_read: u64, total_bytes: u64 },
    Complete { local_file: PathBuf },
    /// `None` means the transfer was cancelled, not that it failed.
    Interrupted { message: Option<String> },
    /// The mirror could not be reached; another mirror may work.
    ConnectionFailed { mirror_url: String, message: String },
}

/// Events from the installer, keyed by canonical URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallEvent {
    Started,
    /// The caller must resubmit `FollowupAction` to continue.
    UserInteractionRequired(FollowupAction),
    Completed,
    /// `None` means the user cancelled, not that the install failed.
    Interrupted { message: Option<String> },
}

/// Fan-out channel keyed by string.
#[derive(Debug)]
pub struct EventBus<E> {
    subscribers: DashMap<String, Vec<mpsc::UnboundedSender<E>>>,
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self {
            subscribers: DashMap::new(),
        }
    }
}

impl<E: Clone> EventBus<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive every event subsequently published under `key`.
    pub fn subscribe(&self, key: &str) -> mpsc::UnboundedReceiver<E> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.entry(key.to_string()).or_default().push(tx);
        rx
    }

    /// Deliver `event` to every live subscriber of `key`.
    ///
    /// Returns the number of subscribers that received it.
    pub fn publish(&self, key: &str, event: E) -> usize {
        let delivered = match self.subscribers.get_mut(key) {
            Some(mut senders) => {
                senders.retain(|tx| tx.send(event.clone()).is_ok());
                senders.len()
            }
            None => 0,
        };
        if delivered == 0 {
            self.subscribers.remove_if(key, |_, senders| senders.is_empty());
        }
        delivered
    }

    /// Live subscribers of `key`.
    pub fn subscriber_count(&self, key: &str) -> usize {
        self.subscribers
            .get(key)
            .map(|senders| senders.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fan_out_to_all_subscribers() {
        let bus: EventBus<TransferEvent> = EventBus::new();
        let mut a = bus.subscribe("u1");
        let mut b = bus.subscribe("u1");
        let mut other = bus.subscribe("u2");

        assert_eq!(bus.publish("u1", TransferEvent::Started), 2);
        assert_eq!(a.recv().await, Some(TransferEvent::Started));
        assert_eq!(b.recv().await, Some(TransferEvent::Started));
        assert!(other.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_fifo_per_key() {
        let bus: EventBus<TransferEvent> = EventBus::new();
        let mut rx = bus.subscribe("u1");
        for i in 0..5 {
            bus.publish(
                "u1",
                TransferEvent::Progress {
                    bytes_read: i,
                    total_bytes: 5,
                },
            );
        }
        for i in 0..5 {
            assert_eq!(
                rx.recv().await,
                Some(TransferEvent::Progress {
                    bytes_read: i,
                    total_bytes: 5
                })
            );
        }
    }

    #[test]
    fn test_dropped_subscribers_pruned() {
        let bus: EventBus<InstallEvent> = EventBus::new();
        let rx = bus.subscribe("u1");
        let _kept = bus.subscribe("u1");
        drop(rx);

        assert_eq!(bus.subscriber_count("u1"), 1);
        assert_eq!(bus.publish("u1", InstallEvent::Started), 1);
        drop(_kept);
        assert_eq!(bus.publish("u1", InstallEvent::Completed), 0);
        assert_eq!(bus.publish("nobody", InstallEvent::Completed), 0);
        assert_eq!(bus.subscriber_count("u1"), 0);
    }
}
