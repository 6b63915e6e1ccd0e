//! Per-device report reader.
//!
//! One reader runs on a blocking thread for every open node. It decodes
//! keep-alives into raw presence, debounces them with its own
//! [`HysteresisEngine`] and forwards stable transitions to the device
//! manager. Reads are bounded by the poll interval and by the engine's next
//! deadline so timers fire on time and a stop request is noticed promptly.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, debug_span, trace};
use touchkey_core::constants::{CTAPHID_REPORT_SIZE, READ_POLL_INTERVAL_MS};
use touchkey_core::{DeviceInfo, DevicePath, HysteresisConfig, PresenceState};
use touchkey_protocol::{Channel, FrameDecoder, Packet, Signal};
use touchkey_state::{HysteresisEngine, StateTransition};

use crate::Result;
use crate::traits::{DeviceBackend, ReportSource};

/// Message from a reader to the device manager.
///
/// `generation` identifies the reader instance; the manager ignores messages
/// from readers it has already replaced.
#[derive(Debug, Clone)]
pub enum ReaderEvent {
    /// The debounced state of the node changed.
    Transition {
        path: DevicePath,
        generation: u64,
        transition: StateTransition,
    },

    /// The node could not be opened or read and the reader stopped.
    Failed {
        path: DevicePath,
        generation: u64,
        error: String,
    },
}

/// Cooperative stop flag shared between a reader and its owner.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Reader for one device node.
#[derive(Debug)]
pub struct DeviceReader {
    info: DeviceInfo,
    generation: u64,
    engine: HysteresisEngine,
    stop: StopFlag,
    events: mpsc::Sender<ReaderEvent>,
    poll_interval: Duration,
    /// Channel of the request that last asked for presence.
    requester: Option<Channel>,
}

impl DeviceReader {
    /// Create a reader and the flag that stops it.
    pub fn new(
        info: DeviceInfo,
        generation: u64,
        hysteresis: &HysteresisConfig,
        events: mpsc::Sender<ReaderEvent>,
    ) -> (Self, StopFlag) {
        let stop = StopFlag::default();
        let reader = Self {
            info,
            generation,
            engine: HysteresisEngine::new(hysteresis),
            stop: stop.clone(),
            events,
            poll_interval: Duration::from_millis(READ_POLL_INTERVAL_MS),
            requester: None,
        };
        (reader, stop)
    }

    /// Upper bound on a single blocking read.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval.max(Duration::from_millis(1));
        self
    }

    /// Open the node and read until stopped, disconnected or failed.
    ///
    /// Blocks the calling thread. Returns `Ok(())` when stopped through the
    /// [`StopFlag`] or when the manager is gone.
    ///
    /// # Errors
    ///
    /// Returns the open or read error after reporting it as
    /// [`ReaderEvent::Failed`].
    pub fn run<B: DeviceBackend>(mut self, backend: &B) -> Result<()> {
        let span = debug_span!(
            "reader",
            device.path = %self.info.path,
            backend = backend.name(),
            generation = self.generation,
        );
        let _entered = span.enter();

        let result = backend
            .open(&self.info)
            .and_then(|source| self.read_loop(source));

        match &result {
            Ok(()) => debug!("reader stopped"),
            Err(error) if self.stop.is_stopped() => {
                debug!(%error, "reader stopped with error");
            }
            Err(error) => {
                debug!(%error, "reader failed");
                let _ = self.events.blocking_send(ReaderEvent::Failed {
                    path: self.info.path.clone(),
                    generation: self.generation,
                    error: error.to_string(),
                });
            }
        }

        result
    }

    fn read_loop<S: ReportSource>(&mut self, mut source: S) -> Result<()> {
        debug!("reading reports");
        let mut report = [0u8; CTAPHID_REPORT_SIZE];

        while !self.stop.is_stopped() {
            let timeout = self.read_timeout(Instant::now());
            let read = source.read_report(&mut report, timeout)?;
            let now = Instant::now();

            let raw = if read > 0 {
                self.classify(&report[..read])
            } else {
                None
            };
            let transitions = match raw {
                Some(raw) => self.engine.observe(raw, now),
                None => self.engine.poll(now),
            };

            for transition in transitions {
                debug!(from = %transition.from, to = %transition.to, "stable state changed");
                let event = ReaderEvent::Transition {
                    path: self.info.path.clone(),
                    generation: self.generation,
                    transition,
                };
                if self.events.blocking_send(event).is_err() {
                    debug!("manager gone");
                    return Ok(());
                }
            }
        }

        Ok(())
    }

    fn read_timeout(&self, now: Instant) -> Duration {
        match self.engine.next_deadline() {
            Some(deadline) => deadline
                .saturating_duration_since(now)
                .min(self.poll_interval),
            None => self.poll_interval,
        }
    }

    /// Raw presence carried by a report, if any.
    ///
    /// A response on the channel that asked for presence ends the request,
    /// so it counts as Idle without waiting for keep-alives to lapse.
    fn classify(&mut self, report: &[u8]) -> Option<PresenceState> {
        let Some(packet) = Packet::parse(report) else {
            trace!(len = report.len(), "short report");
            return None;
        };
        trace!(?packet, "report");

        match FrameDecoder::decode_packet(&packet) {
            Signal::NeedsTouch => {
                self.requester = Some(packet.channel());
                Some(PresenceState::NeedsTouch)
            }
            Signal::Idle => Some(PresenceState::Idle),
            Signal::Unrelated => {
                let Packet::Init(init) = packet else {
                    return None;
                };
                if init.command.is_response() && self.requester == Some(init.channel) {
                    trace!(channel = %init.channel, "request answered");
                    self.requester = None;
                    Some(PresenceState::Idle)
                } else {
                    None
                }
            }
        }
    }
}
