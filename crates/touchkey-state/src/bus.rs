//! Publication of the aggregate signal to any number of subscribers.
//!
//! `publish` and `subscribe` take the same mutex, so a subscriber's snapshot
//! and its receiver are consistent: every change published after the snapshot
//! is delivered, none before it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;
use touchkey_core::PresenceState;

/// Default number of buffered changes per subscriber.
pub const DEFAULT_BUS_CAPACITY: usize = 32;

#[derive(Debug)]
struct BusInner {
    current: PresenceState,
    tx: broadcast::Sender<PresenceState>,
}

/// Shared handle to the aggregate signal.
///
/// Cloning is cheap; all clones share the same state.
#[derive(Debug, Clone)]
pub struct StateBus {
    inner: Arc<Mutex<BusInner>>,
}

impl StateBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUS_CAPACITY)
    }

    /// Create a bus buffering up to `capacity` changes per lagging subscriber.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(Mutex::new(BusInner {
                current: PresenceState::Idle,
                tx,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BusInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Latest published state.
    pub fn current(&self) -> PresenceState {
        self.lock().current
    }

    /// Publish a new aggregate state.
    ///
    /// Returns `false` without notifying anyone if the state is unchanged.
    pub fn publish(&self, state: PresenceState) -> bool {
        let mut inner = self.lock();
        if inner.current == state {
            return false;
        }
        inner.current = state;
        // No receivers is not an error: clients come and go.
        let _ = inner.tx.send(state);
        true
    }

    /// Snapshot the current state and subscribe to later changes.
    pub fn subscribe(&self) -> (PresenceState, broadcast::Receiver<PresenceState>) {
        let inner = self.lock();
        (inner.current, inner.tx.subscribe())
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.lock().tx.receiver_count()
    }
}

impl Default for StateBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::{RecvError, TryRecvError};

    #[test]
    fn test_initial_state_is_idle() {
        let bus = StateBus::new();
        assert_eq!(bus.current(), PresenceState::Idle);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_publish_deduplicates() {
        let bus = StateBus::new();
        assert!(!bus.publish(PresenceState::Idle));
        assert!(bus.publish(PresenceState::NeedsTouch));
        assert!(!bus.publish(PresenceState::NeedsTouch));
        assert_eq!(bus.current(), PresenceState::NeedsTouch);
    }

    #[tokio::test]
    async fn test_subscriber_sees_snapshot_then_changes() {
        let bus = StateBus::new();
        bus.publish(PresenceState::NeedsTouch);

        let (snapshot, mut rx) = bus.subscribe();
        assert_eq!(snapshot, PresenceState::NeedsTouch);
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));

        bus.publish(PresenceState::Idle);
        assert_eq!(rx.recv().await.unwrap(), PresenceState::Idle);
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let bus = StateBus::new();
        let other = bus.clone();
        let (_, mut rx) = other.subscribe();

        bus.publish(PresenceState::NeedsTouch);
        assert_eq!(other.current(), PresenceState::NeedsTouch);
        assert_eq!(rx.recv().await.unwrap(), PresenceState::NeedsTouch);
    }

    #[tokio::test]
    async fn test_lagging_subscriber_is_told() {
        let bus = StateBus::with_capacity(2);
        let (_, mut rx) = bus.subscribe();

        for _ in 0..3 {
            bus.publish(PresenceState::NeedsTouch);
            bus.publish(PresenceState::Idle);
        }

        assert!(matches!(rx.recv().await, Err(RecvError::Lagged(_))));
        assert_eq!(bus.current(), PresenceState::Idle);
    }
}
