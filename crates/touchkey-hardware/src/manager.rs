//! Device manager.
//!
//! The manager owns the registry of open nodes and the [`Aggregator`]. It
//! runs as a single task: hotplug events open and close readers, reader
//! events update the aggregator, and aggregate changes are published on the
//! [`StateBus`].
//!
//! ```text
//! ┌──────────┐        ┌───────────────┐        ┌──────────┐
//! │ Hotplug  │───────►│               │───────►│ StateBus │──► clients
//! │ thread   │        │  Manager task │        └──────────┘
//! └──────────┘        │  (registry +  │
//! ┌──────────┐        │   aggregator) │───────► device changes
//! │ Readers  │───────►│               │         (notifier)
//! │ (1/node) │        └───────────────┘
//! └──────────┘
//! ```
//!
//! # Examples
//!
//! ```no_run
//! use tokio::sync::mpsc;
//! use touchkey_hardware::devices::AnyBackend;
//! use touchkey_hardware::manager::{DeviceManager, ManagerConfig};
//! use touchkey_hardware::mock::MockBackend;
//! use touchkey_state::StateBus;
//!
//! #[tokio::main]
//! async fn main() -> touchkey_hardware::Result<()> {
//!     let bus = StateBus::new();
//!     let (_hotplug_tx, hotplug_rx) = mpsc::channel(16);
//!
//!     let manager = DeviceManager::new(
//!         AnyBackend::Mock(MockBackend::new()),
//!         ManagerConfig::default(),
//!         bus.clone(),
//!     );
//!     let handle = manager.start(hotplug_rx);
//!
//!     let (state, _changes) = bus.subscribe();
//!     println!("touch needed: {}", state.needs_touch());
//!
//!     handle.shutdown().await
//! }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, trace, warn};
use touchkey_core::constants::READ_POLL_INTERVAL_MS;
use touchkey_core::{Config, DeviceInfo, DevicePath, HysteresisConfig, IdentityMode};
use touchkey_state::{AggregateChanged, Aggregator, DeviceChanged, StateBus, Update};

use crate::Result;
use crate::devices::AnyBackend;
use crate::hotplug::HotplugEvent;
use crate::reader::{DeviceReader, ReaderEvent, StopFlag};

/// Capacity of the reader-to-manager channel.
const READER_EVENT_CAPACITY: usize = 100;

/// Configuration for the device manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Debounce timings applied to every node.
    pub hysteresis: HysteresisConfig,

    /// Grouping of nodes in the per-device map.
    pub identity: IdentityMode,

    /// Upper bound on a single blocking read.
    pub poll_interval: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            hysteresis: HysteresisConfig::default(),
            identity: IdentityMode::default(),
            poll_interval: Duration::from_millis(READ_POLL_INTERVAL_MS),
        }
    }
}

impl From<&Config> for ManagerConfig {
    fn from(config: &Config) -> Self {
        Self {
            hysteresis: config.hysteresis,
            identity: config.tracking.identity,
            ..Self::default()
        }
    }
}

/// Handle to a running device manager.
pub struct DeviceManagerHandle {
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl DeviceManagerHandle {
    /// Stop every reader and wait for the manager to finish.
    ///
    /// Reader failures are logged, not returned.
    ///
    /// # Errors
    ///
    /// Returns an error only if the manager task itself panicked.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown_tx.send(());
        self.task.await.map_err(|e| {
            crate::HardwareError::Io(std::io::Error::other(format!(
                "device manager task failed: {e}"
            )))
        })
    }

    /// Whether the manager task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Task termination classification for reader bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskTermination {
    /// Reader stopped on request or because the manager went away.
    Success,
    /// Reader returned an error (already reported as an event).
    Error,
    /// Reader task was cancelled.
    Cancelled,
    /// Reader panicked.
    Panic,
}

fn classify_task_result(
    result: std::result::Result<Result<()>, tokio::task::JoinError>,
) -> TaskTermination {
    match result {
        Ok(Ok(())) => TaskTermination::Success,
        Ok(Err(_)) => TaskTermination::Error,
        Err(e) if e.is_cancelled() => TaskTermination::Cancelled,
        Err(_) => TaskTermination::Panic,
    }
}

/// Registry entry for an open node.
#[derive(Debug)]
struct ActiveReader {
    generation: u64,
    stop: StopFlag,
}

/// Tracks FIDO nodes and publishes the aggregate presence signal.
///
/// # Lifecycle
///
/// 1. Create the manager with a backend, configuration and bus
/// 2. Optionally attach a channel for per-device changes
/// 3. Call `start()` with the hotplug event stream
/// 4. Call `shutdown()` on the handle to stop every reader
pub struct DeviceManager {
    backend: Arc<AnyBackend>,
    config: ManagerConfig,
    bus: StateBus,
    device_tx: Option<mpsc::Sender<DeviceChanged>>,
}

impl DeviceManager {
    pub fn new(backend: AnyBackend, config: ManagerConfig, bus: StateBus) -> Self {
        Self {
            backend: Arc::new(backend),
            config,
            bus,
            device_tx: None,
        }
    }

    /// Forward per-device changes to `tx`.
    ///
    /// Changes are dropped when the receiver falls behind; the aggregate on
    /// the bus is never affected.
    pub fn with_device_changes(mut self, tx: mpsc::Sender<DeviceChanged>) -> Self {
        self.device_tx = Some(tx);
        self
    }

    /// Spawn the manager task.
    pub fn start(self, hotplug: mpsc::Receiver<HotplugEvent>) -> DeviceManagerHandle {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (events_tx, events_rx) = mpsc::channel(READER_EVENT_CAPACITY);

        let task = ManagerTask {
            aggregator: Aggregator::new(self.config.identity),
            backend: self.backend,
            config: self.config,
            bus: self.bus,
            device_tx: self.device_tx,
            readers: HashMap::new(),
            tasks: JoinSet::new(),
            events_tx,
            next_generation: 0,
        };

        DeviceManagerHandle {
            shutdown_tx,
            task: tokio::spawn(task.run(hotplug, events_rx, shutdown_rx)),
        }
    }
}

struct ManagerTask {
    backend: Arc<AnyBackend>,
    config: ManagerConfig,
    bus: StateBus,
    device_tx: Option<mpsc::Sender<DeviceChanged>>,
    aggregator: Aggregator,
    readers: HashMap<DevicePath, ActiveReader>,
    tasks: JoinSet<Result<()>>,
    events_tx: mpsc::Sender<ReaderEvent>,
    next_generation: u64,
}

impl ManagerTask {
    async fn run(
        mut self,
        mut hotplug: mpsc::Receiver<HotplugEvent>,
        mut events: mpsc::Receiver<ReaderEvent>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        let mut hotplug_open = true;

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                event = hotplug.recv(), if hotplug_open => match event {
                    Some(HotplugEvent::Arrived(info)) => self.arrive(info),
                    Some(HotplugEvent::Departed(path)) => self.depart(&path),
                    None => {
                        warn!("hotplug stream ended, device set frozen");
                        hotplug_open = false;
                    }
                },
                Some(event) = events.recv() => self.handle_reader_event(event),
                Some(result) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    if classify_task_result(result) == TaskTermination::Panic {
                        error!("device reader panicked");
                    }
                }
            }
        }

        self.stop_all().await;
    }

    fn arrive(&mut self, info: DeviceInfo) {
        if self.readers.contains_key(&info.path) {
            trace!(device.path = %info.path, "already tracked");
            return;
        }

        self.next_generation += 1;
        let generation = self.next_generation;

        let (reader, stop) = DeviceReader::new(
            info.clone(),
            generation,
            &self.config.hysteresis,
            self.events_tx.clone(),
        );
        let reader = reader.with_poll_interval(self.config.poll_interval);
        let backend = Arc::clone(&self.backend);
        self.tasks
            .spawn_blocking(move || reader.run(backend.as_ref()));
        self.readers
            .insert(info.path.clone(), ActiveReader { generation, stop });

        info!(
            device.path = %info.path,
            device.usb_id = %info.usb_id(),
            device.serial = info.serial_number.as_deref().unwrap_or("-"),
            device.product = info.product.as_deref().unwrap_or("-"),
            "device arrived"
        );
        let update = self.aggregator.insert(&info);
        self.apply(update);
    }

    fn depart(&mut self, path: &DevicePath) {
        let Some(reader) = self.readers.remove(path) else {
            trace!(device.path = %path, "departure of untracked node");
            return;
        };
        reader.stop.stop();
        info!(device.path = %path, "device departed");

        let update = self.aggregator.remove(path);
        self.apply(update);
    }

    fn handle_reader_event(&mut self, event: ReaderEvent) {
        match event {
            ReaderEvent::Transition {
                path,
                generation,
                transition,
            } => {
                if !self.is_current(&path, generation) {
                    trace!(device.path = %path, generation, "stale transition");
                    return;
                }
                let update = self.aggregator.apply(&path, transition.to);
                self.apply(update);
            }
            ReaderEvent::Failed {
                path,
                generation,
                error,
            } => {
                if !self.is_current(&path, generation) {
                    return;
                }
                warn!(device.path = %path, %error, "device dropped");
                self.readers.remove(&path);
                let update = self.aggregator.remove(&path);
                self.apply(update);
            }
        }
    }

    fn is_current(&self, path: &DevicePath, generation: u64) -> bool {
        self.readers
            .get(path)
            .is_some_and(|reader| reader.generation == generation)
    }

    fn apply(&mut self, update: Update) {
        if let Some(AggregateChanged(state)) = update.aggregate
            && self.bus.publish(state)
        {
            info!(%state, "aggregate presence changed");
        }

        if let Some(change) = update.device {
            debug!(device.key = %change.key, state = %change.state, "device presence changed");
            if let Some(tx) = &self.device_tx
                && tx.try_send(change).is_err()
            {
                debug!("device change not delivered");
            }
        }
    }

    async fn stop_all(mut self) {
        for reader in self.readers.values() {
            reader.stop.stop();
        }

        let mut error_count = 0;
        let mut panic_count = 0;

        while let Some(result) = self.tasks.join_next().await {
            match classify_task_result(result) {
                TaskTermination::Success | TaskTermination::Cancelled => {}
                TaskTermination::Error => error_count += 1,
                TaskTermination::Panic => panic_count += 1,
            }
        }

        debug!(
            readers = self.readers.len(),
            error_count, panic_count, "device manager stopped"
        );
    }
}
