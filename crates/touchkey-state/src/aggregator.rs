//! System-wide presence aggregation.
//!
//! The aggregator tracks the stable state of every open device node and
//! derives two views from it: the aggregate signal (NeedsTouch iff any node
//! needs a touch) and a per-device map keyed by [`DeviceKey`], where nodes
//! sharing a serial number are merged under [`IdentityMode::Serial`].
//!
//! It holds no lock of its own. The device manager owns the only instance
//! and applies every mutation from a single task.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, warn};
use touchkey_core::{DeviceInfo, DeviceKey, DevicePath, IdentityMode, PresenceState};

/// The aggregate signal changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregateChanged(pub PresenceState);

/// A logical device changed state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceChanged {
    pub key: DeviceKey,
    pub serial: Option<String>,
    pub state: PresenceState,
}

/// Result of one aggregator mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Update {
    /// Set when the aggregate flipped.
    pub aggregate: Option<AggregateChanged>,

    /// Set when the logical device owning the node flipped.
    pub device: Option<DeviceChanged>,
}

impl Update {
    pub fn is_empty(&self) -> bool {
        self.aggregate.is_none() && self.device.is_none()
    }
}

#[derive(Debug, Clone)]
struct Entry {
    key: DeviceKey,
    serial: Option<String>,
    state: PresenceState,
}

/// Per-device stable states and their OR.
#[derive(Debug, Clone)]
pub struct Aggregator {
    mode: IdentityMode,
    devices: HashMap<DevicePath, Entry>,
    aggregate: PresenceState,
}

impl Aggregator {
    pub fn new(mode: IdentityMode) -> Self {
        Self {
            mode,
            devices: HashMap::new(),
            aggregate: PresenceState::Idle,
        }
    }

    pub fn identity_mode(&self) -> IdentityMode {
        self.mode
    }

    /// Current aggregate signal.
    pub fn aggregate(&self) -> PresenceState {
        self.aggregate
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn contains(&self, path: &DevicePath) -> bool {
        self.devices.contains_key(path)
    }

    /// Start tracking a device node as Idle.
    ///
    /// Re-inserting a tracked node replaces its entry and behaves like a
    /// removal followed by an insert.
    pub fn insert(&mut self, info: &DeviceInfo) -> Update {
        let update = if self.devices.contains_key(&info.path) {
            self.remove(&info.path)
        } else {
            Update::default()
        };

        let key = info.key(self.mode);
        debug!(device.path = %info.path, device.key = %key, "tracking device");

        self.devices.insert(
            info.path.clone(),
            Entry {
                key,
                serial: info.serial_number.clone(),
                state: PresenceState::Idle,
            },
        );

        update
    }

    /// Record a stable-state transition of one node.
    ///
    /// Unknown nodes are ignored.
    pub fn apply(&mut self, path: &DevicePath, state: PresenceState) -> Update {
        let Some(entry) = self.devices.get(path) else {
            warn!(device.path = %path, %state, "state change for untracked device");
            return Update::default();
        };
        if entry.state == state {
            return Update::default();
        }

        let key = entry.key.clone();
        let serial = entry.serial.clone();
        let before = self.key_state(&key);

        if let Some(entry) = self.devices.get_mut(path) {
            entry.state = state;
        }

        self.finish(key, serial, before)
    }

    /// Stop tracking a node, dropping its contribution.
    pub fn remove(&mut self, path: &DevicePath) -> Update {
        let Some(entry) = self.devices.get(path) else {
            return Update::default();
        };

        let key = entry.key.clone();
        let serial = entry.serial.clone();
        let before = self.key_state(&key);

        self.devices.remove(path);
        debug!(device.path = %path, device.key = %key, "untracking device");

        self.finish(key, serial, before)
    }

    /// Per logical device state.
    pub fn by_key(&self) -> BTreeMap<DeviceKey, PresenceState> {
        let mut map = BTreeMap::new();
        for entry in self.devices.values() {
            let state = map.entry(entry.key.clone()).or_insert(PresenceState::Idle);
            if entry.state.needs_touch() {
                *state = PresenceState::NeedsTouch;
            }
        }
        map
    }

    /// Per serial number state, for devices that report a serial.
    pub fn by_serial(&self) -> BTreeMap<String, PresenceState> {
        let mut map = BTreeMap::new();
        for entry in self.devices.values() {
            let Some(serial) = &entry.serial else {
                continue;
            };
            let state = map.entry(serial.clone()).or_insert(PresenceState::Idle);
            if entry.state.needs_touch() {
                *state = PresenceState::NeedsTouch;
            }
        }
        map
    }

    fn key_state(&self, key: &DeviceKey) -> PresenceState {
        PresenceState::from_needed(
            self.devices
                .values()
                .any(|entry| &entry.key == key && entry.state.needs_touch()),
        )
    }

    fn finish(&mut self, key: DeviceKey, serial: Option<String>, before: PresenceState) -> Update {
        let mut update = Update::default();

        let after = self.key_state(&key);
        if after != before {
            update.device = Some(DeviceChanged {
                key,
                serial,
                state: after,
            });
        }

        let aggregate = PresenceState::from_needed(
            self.devices.values().any(|entry| entry.state.needs_touch()),
        );
        if aggregate != self.aggregate {
            self.aggregate = aggregate;
            update.aggregate = Some(AggregateChanged(aggregate));
        }

        update
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new(IdentityMode::default())
    }
}
