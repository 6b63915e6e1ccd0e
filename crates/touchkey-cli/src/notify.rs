//! Per-device touch notifications.
//!
//! Rendering desktop notifications is left to the session; this collaborator
//! resolves the heading, message and image for each device that starts or
//! stops waiting for a touch and reports them through `tracing`.

use std::collections::HashSet;

use tokio::sync::mpsc;
use touchkey_core::{Config, DeviceKey, PresenceState, ResolvedNotification};
use touchkey_state::DeviceChanged;
use tracing::{debug, info};

/// What to do in response to a device change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyAction {
    Show {
        key: DeviceKey,
        notification: ResolvedNotification,
    },
    Close {
        key: DeviceKey,
    },
}

/// Tracks which devices currently have a notification open.
#[derive(Debug)]
pub struct Notifier {
    config: Config,
    active: HashSet<DeviceKey>,
}

impl Notifier {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            active: HashSet::new(),
        }
    }

    /// Apply one device change. Repeated states produce no action.
    pub fn handle(&mut self, change: DeviceChanged) -> Option<NotifyAction> {
        match change.state {
            PresenceState::NeedsTouch => {
                if !self.active.insert(change.key.clone()) {
                    return None;
                }
                let notification = self
                    .config
                    .resolve_notification(change.serial.as_deref());
                Some(NotifyAction::Show {
                    key: change.key,
                    notification,
                })
            }
            PresenceState::Idle => self
                .active
                .remove(&change.key)
                .then_some(NotifyAction::Close { key: change.key }),
        }
    }

    /// Consume device changes until the sender side closes.
    pub async fn run(mut self, mut changes: mpsc::Receiver<DeviceChanged>) {
        while let Some(change) = changes.recv().await {
            match self.handle(change) {
                Some(NotifyAction::Show { key, notification }) => {
                    info!(
                        device = %key,
                        heading = %notification.heading,
                        message = %notification.message,
                        image = ?notification.image,
                        "touch notification"
                    );
                }
                Some(NotifyAction::Close { key }) => {
                    info!(device = %key, "touch notification closed");
                }
                None => {}
            }
        }
        debug!("notifier stopped");
    }
}
