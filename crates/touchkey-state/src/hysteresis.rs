//! Per-device debounce state machine.
//!
//! Keep-alives arrive in bursts, with jitter, and some authenticators
//! alternate between the `UPNEEDED` and `PROCESSING` statuses inside a single
//! transaction. The [`HysteresisEngine`] turns that raw signal into a stable
//! one by holding every raw change for a configurable delay before promoting
//! it.
//!
//! # States
//!
//! - `Idle`: stable Idle, raw Idle
//! - `PendingAssert`: stable Idle, raw NeedsTouch held until the deadline
//! - `NeedsTouch`: stable NeedsTouch, raw NeedsTouch
//! - `PendingRelease`: stable NeedsTouch, raw Idle held until the deadline
//!
//! # Valid Transitions
//!
//! - Idle → PendingAssert → NeedsTouch (or Idle → NeedsTouch with no delay)
//! - PendingAssert → Idle when the raw signal reverts in time
//! - NeedsTouch → PendingRelease → Idle (or NeedsTouch → Idle with no delay)
//! - PendingRelease → NeedsTouch when the raw signal reverts in time
//!
//! # Keep-alive lapse
//!
//! A device that stops sending keep-alives without a response (for example
//! because the host gave up on the request) would otherwise stay in
//! NeedsTouch forever. While the raw state is NeedsTouch, the engine treats
//! `keepalive_timeout` without a fresh `UPNEEDED` as a raw Idle observed at
//! `last_seen + keepalive_timeout`.
//!
//! # Time
//!
//! The engine never reads the clock. Every operation takes the current
//! [`Instant`] from the caller, so tests drive it with simulated time.
//!
//! # Examples
//!
//! ```
//! use std::time::{Duration, Instant};
//! use touchkey_core::PresenceState;
//! use touchkey_state::HysteresisEngine;
//!
//! let mut engine = HysteresisEngine::builder()
//!     .assert_delay(Duration::ZERO)
//!     .release_delay(Duration::from_millis(400))
//!     .build();
//!
//! let t0 = Instant::now();
//! let up = engine.observe(PresenceState::NeedsTouch, t0);
//! assert_eq!(up[0].to, PresenceState::NeedsTouch);
//!
//! assert!(engine.observe(PresenceState::Idle, t0 + Duration::from_millis(50)).is_empty());
//! let down = engine.poll(t0 + Duration::from_millis(450));
//! assert_eq!(down[0].to, PresenceState::Idle);
//! ```

use std::fmt;
use std::time::{Duration, Instant};

use touchkey_core::{
    HysteresisConfig, PresenceState,
    constants::{DEFAULT_ASSERT_DELAY_MS, DEFAULT_KEEPALIVE_TIMEOUT_MS, DEFAULT_RELEASE_DELAY_MS},
};

/// Internal phase of the debounce state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Stable Idle.
    Idle,

    /// Raw NeedsTouch waiting for the assert delay to elapse.
    PendingAssert { deadline: Instant },

    /// Stable NeedsTouch.
    NeedsTouch,

    /// Raw Idle waiting for the release delay to elapse.
    PendingRelease { deadline: Instant },
}

impl Phase {
    /// Stable state reported while in this phase.
    pub fn stable(self) -> PresenceState {
        match self {
            Phase::Idle | Phase::PendingAssert { .. } => PresenceState::Idle,
            Phase::NeedsTouch | Phase::PendingRelease { .. } => PresenceState::NeedsTouch,
        }
    }

    /// Deadline of the running timer, if any.
    pub fn deadline(self) -> Option<Instant> {
        match self {
            Phase::PendingAssert { deadline } | Phase::PendingRelease { deadline } => {
                Some(deadline)
            }
            Phase::Idle | Phase::NeedsTouch => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "Idle",
            Phase::PendingAssert { .. } => "PendingAssert",
            Phase::NeedsTouch => "NeedsTouch",
            Phase::PendingRelease { .. } => "PendingRelease",
        };
        write!(f, "{name}")
    }
}

/// A change of the stable state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransition {
    /// The stable state before the change.
    pub from: PresenceState,

    /// The stable state after the change.
    pub to: PresenceState,

    /// When the change took effect.
    ///
    /// For timer-driven changes this is the timer deadline, which may be
    /// earlier than the instant passed to `poll`.
    pub at: Instant,
}

/// Debounce state machine for one device.
///
/// # Thread Safety
///
/// Not synchronised. Each engine is owned by exactly one device reader.
#[derive(Debug, Clone)]
pub struct HysteresisEngine {
    assert_delay: Duration,
    release_delay: Duration,
    keepalive_timeout: Duration,

    phase: Phase,

    /// Latest raw state, after keep-alive lapse.
    raw: PresenceState,

    /// When the latest raw NeedsTouch was observed.
    last_needed: Option<Instant>,

    /// Stable changes made during the current call.
    flips: Vec<StateTransition>,
}

impl HysteresisEngine {
    /// Create an engine from the `[hysteresis]` configuration.
    pub fn new(config: &HysteresisConfig) -> Self {
        Self::builder()
            .assert_delay(config.assert_delay())
            .release_delay(config.release_delay())
            .keepalive_timeout(config.keepalive_timeout())
            .build()
    }

    /// Create a builder with the default delays.
    pub fn builder() -> HysteresisEngineBuilder {
        HysteresisEngineBuilder::default()
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Current stable state.
    pub fn stable(&self) -> PresenceState {
        self.phase.stable()
    }

    /// Latest raw state seen by the engine.
    pub fn raw(&self) -> PresenceState {
        self.raw
    }

    /// Feed one raw observation.
    ///
    /// Overdue timers are settled first, so the order in which callers
    /// interleave `observe` and `poll` does not matter.
    ///
    /// # Arguments
    ///
    /// * `raw` - Raw state decoded from a report
    /// * `now` - Time of the observation
    ///
    /// # Returns
    ///
    /// Every stable change caused by the call, oldest first. A release that
    /// fell due before `now` is reported even when the observation
    /// re-asserts right after it, so consecutive transitions always
    /// alternate.
    pub fn observe(&mut self, raw: PresenceState, now: Instant) -> Vec<StateTransition> {
        self.settle(now);

        if raw.needs_touch() {
            self.last_needed = Some(now);
        } else {
            self.last_needed = None;
        }
        self.raw = raw;
        self.apply_raw(raw, now);

        std::mem::take(&mut self.flips)
    }

    /// Advance time without a new observation.
    ///
    /// Fires the pending timer and the keep-alive lapse if they are due, and
    /// returns the resulting stable changes, oldest first.
    pub fn poll(&mut self, now: Instant) -> Vec<StateTransition> {
        self.settle(now);
        std::mem::take(&mut self.flips)
    }

    /// Earliest instant at which `poll` may change the state.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.phase.deadline(), self.lapse_deadline()) {
            (Some(timer), Some(lapse)) => Some(timer.min(lapse)),
            (timer, lapse) => timer.or(lapse),
        }
    }

    fn lapse_deadline(&self) -> Option<Instant> {
        if !self.raw.needs_touch() {
            return None;
        }
        self.last_needed.map(|seen| seen + self.keepalive_timeout)
    }

    /// Apply every timer and lapse due at or before `now`, in time order.
    fn settle(&mut self, now: Instant) {
        loop {
            let timer = self.phase.deadline().filter(|deadline| *deadline <= now);
            let lapse = self.lapse_deadline().filter(|deadline| *deadline <= now);

            match (timer, lapse) {
                (Some(timer), Some(lapse)) if lapse < timer => self.lapse(lapse),
                (Some(timer), _) => self.fire(timer),
                (None, Some(lapse)) => self.lapse(lapse),
                (None, None) => break,
            }
        }
    }

    fn lapse(&mut self, at: Instant) {
        self.raw = PresenceState::Idle;
        self.last_needed = None;
        self.apply_raw(PresenceState::Idle, at);
    }

    fn fire(&mut self, at: Instant) {
        match self.phase {
            Phase::PendingAssert { .. } => self.enter(Phase::NeedsTouch, at),
            Phase::PendingRelease { .. } => self.enter(Phase::Idle, at),
            Phase::Idle | Phase::NeedsTouch => {}
        }
    }

    fn apply_raw(&mut self, raw: PresenceState, at: Instant) {
        match (self.phase, raw) {
            (Phase::Idle, PresenceState::NeedsTouch) => {
                if self.assert_delay.is_zero() {
                    self.enter(Phase::NeedsTouch, at);
                } else {
                    self.enter(
                        Phase::PendingAssert {
                            deadline: at + self.assert_delay,
                        },
                        at,
                    );
                }
            }
            (Phase::NeedsTouch, PresenceState::Idle) => {
                if self.release_delay.is_zero() {
                    self.enter(Phase::Idle, at);
                } else {
                    self.enter(
                        Phase::PendingRelease {
                            deadline: at + self.release_delay,
                        },
                        at,
                    );
                }
            }
            (Phase::PendingAssert { .. }, PresenceState::Idle) => self.enter(Phase::Idle, at),
            (Phase::PendingRelease { .. }, PresenceState::NeedsTouch) => {
                self.enter(Phase::NeedsTouch, at)
            }
            // Raw agrees with the direction already taken; a running timer
            // keeps its original deadline.
            _ => {}
        }
    }

    fn enter(&mut self, phase: Phase, at: Instant) {
        let (from, to) = (self.phase.stable(), phase.stable());
        if from != to {
            self.flips.push(StateTransition { from, to, at });
        }
        self.phase = phase;
    }
}

impl Default for HysteresisEngine {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Builder for [`HysteresisEngine`].
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use touchkey_state::{HysteresisEngine, Phase};
///
/// let engine = HysteresisEngine::builder()
///     .assert_delay(Duration::from_millis(20))
///     .release_delay(Duration::from_millis(500))
///     .keepalive_timeout(Duration::from_millis(300))
///     .build();
///
/// assert_eq!(engine.phase(), Phase::Idle);
/// ```
#[derive(Debug, Clone)]
pub struct HysteresisEngineBuilder {
    assert_delay: Duration,
    release_delay: Duration,
    keepalive_timeout: Duration,
}

impl Default for HysteresisEngineBuilder {
    fn default() -> Self {
        Self {
            assert_delay: Duration::from_millis(DEFAULT_ASSERT_DELAY_MS),
            release_delay: Duration::from_millis(DEFAULT_RELEASE_DELAY_MS),
            keepalive_timeout: Duration::from_millis(DEFAULT_KEEPALIVE_TIMEOUT_MS),
        }
    }
}

impl HysteresisEngineBuilder {
    /// Hold time before a raw NeedsTouch becomes stable.
    pub fn assert_delay(mut self, delay: Duration) -> Self {
        self.assert_delay = delay;
        self
    }

    /// Hold time before a raw Idle becomes stable.
    pub fn release_delay(mut self, delay: Duration) -> Self {
        self.release_delay = delay;
        self
    }

    /// Silence after the last `UPNEEDED` that counts as a raw Idle.
    pub fn keepalive_timeout(mut self, timeout: Duration) -> Self {
        self.keepalive_timeout = timeout;
        self
    }

    pub fn build(self) -> HysteresisEngine {
        HysteresisEngine {
            assert_delay: self.assert_delay,
            release_delay: self.release_delay,
            keepalive_timeout: self.keepalive_timeout,
            phase: Phase::Idle,
            raw: PresenceState::Idle,
            last_needed: None,
            flips: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PresenceState::{Idle, NeedsTouch};

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    /// The only transition of a call.
    fn single(transitions: Vec<StateTransition>) -> StateTransition {
        assert_eq!(transitions.len(), 1, "expected one transition: {transitions:?}");
        transitions[0]
    }

    /// Engine with a long keep-alive timeout so lapse does not interfere.
    fn engine(assert_ms: u64, release_ms: u64) -> HysteresisEngine {
        HysteresisEngine::builder()
            .assert_delay(ms(assert_ms))
            .release_delay(ms(release_ms))
            .keepalive_timeout(ms(60_000))
            .build()
    }

    #[test]
    fn test_initial_state_is_idle() {
        let engine = HysteresisEngine::default();
        assert_eq!(engine.phase(), Phase::Idle);
        assert_eq!(engine.stable(), Idle);
        assert_eq!(engine.raw(), Idle);
        assert_eq!(engine.next_deadline(), None);
    }

    #[test]
    fn test_new_uses_config() {
        let config = HysteresisConfig {
            assert_delay_ms: 10,
            release_delay_ms: 20,
            keepalive_timeout_ms: 30,
        };
        let mut engine = HysteresisEngine::new(&config);
        let t0 = Instant::now();

        assert!(engine.observe(NeedsTouch, t0).is_empty());
        assert_eq!(engine.next_deadline(), Some(t0 + ms(10)));
    }

    #[test]
    fn test_zero_assert_delay_promotes_immediately() {
        let mut engine = engine(0, 400);
        let t0 = Instant::now();

        let transition = single(engine.observe(NeedsTouch, t0));
        assert_eq!(transition.from, Idle);
        assert_eq!(transition.to, NeedsTouch);
        assert_eq!(transition.at, t0);
        assert_eq!(engine.phase(), Phase::NeedsTouch);
    }

    #[test]
    fn test_assert_delay_then_poll() {
        let mut engine = engine(50, 400);
        let t0 = Instant::now();

        assert!(engine.observe(NeedsTouch, t0).is_empty());
        assert_eq!(
            engine.phase(),
            Phase::PendingAssert {
                deadline: t0 + ms(50)
            }
        );
        assert!(engine.poll(t0 + ms(49)).is_empty());

        let transition = single(engine.poll(t0 + ms(80)));
        assert_eq!(transition.to, NeedsTouch);
        assert_eq!(transition.at, t0 + ms(50));
        assert!(engine.poll(t0 + ms(100)).is_empty());
    }

    #[test]
    fn test_raw_revert_cancels_assert() {
        let mut engine = engine(50, 400);
        let t0 = Instant::now();

        engine.observe(NeedsTouch, t0);
        assert!(engine.observe(Idle, t0 + ms(10)).is_empty());
        assert_eq!(engine.phase(), Phase::Idle);
        assert!(engine.poll(t0 + ms(100)).is_empty());
    }

    #[test]
    fn test_repeated_raw_does_not_restart_timer() {
        let mut engine = engine(0, 400);
        let t0 = Instant::now();

        engine.observe(NeedsTouch, t0);
        engine.observe(Idle, t0 + ms(100));
        engine.observe(Idle, t0 + ms(300));
        engine.observe(Idle, t0 + ms(450));

        // Deadline set by the first Idle at 100ms.
        let transition = single(engine.poll(t0 + ms(500)));
        assert_eq!(transition.to, Idle);
        assert_eq!(transition.at, t0 + ms(500));
    }

    #[test]
    fn test_release_flicker_is_suppressed() {
        let mut engine = engine(0, 400);
        let t0 = Instant::now();

        assert_eq!(engine.observe(NeedsTouch, t0).len(), 1);
        assert!(engine.observe(Idle, t0 + ms(100)).is_empty());
        assert!(engine.observe(NeedsTouch, t0 + ms(200)).is_empty());
        assert_eq!(engine.phase(), Phase::NeedsTouch);
        assert!(engine.poll(t0 + ms(700)).is_empty());
    }

    #[test]
    fn test_zero_release_delay() {
        let mut engine = engine(0, 0);
        let t0 = Instant::now();

        engine.observe(NeedsTouch, t0);
        let transition = single(engine.observe(Idle, t0 + ms(5)));
        assert_eq!(transition.to, Idle);
    }

    #[test]
    fn test_keepalive_lapse_releases() {
        let mut engine = HysteresisEngine::builder()
            .assert_delay(ms(0))
            .release_delay(ms(400))
            .keepalive_timeout(ms(250))
            .build();
        let t0 = Instant::now();

        engine.observe(NeedsTouch, t0);
        assert_eq!(engine.next_deadline(), Some(t0 + ms(250)));

        // Lapse at 250ms starts the release timer, due at 650ms.
        assert!(engine.poll(t0 + ms(300)).is_empty());
        assert_eq!(engine.raw(), Idle);
        assert_eq!(
            engine.phase(),
            Phase::PendingRelease {
                deadline: t0 + ms(650)
            }
        );

        let transition = single(engine.poll(t0 + ms(650)));
        assert_eq!(transition.to, Idle);
    }

    #[test]
    fn test_keepalives_keep_state_asserted() {
        let mut engine = HysteresisEngine::builder()
            .assert_delay(ms(0))
            .release_delay(ms(400))
            .keepalive_timeout(ms(250))
            .build();
        let t0 = Instant::now();

        engine.observe(NeedsTouch, t0);
        for step in 1..=20 {
            assert!(engine.observe(NeedsTouch, t0 + ms(step * 100)).is_empty());
        }
        assert_eq!(engine.stable(), NeedsTouch);
    }

    #[test]
    fn test_overdue_timer_settles_before_observation() {
        let mut engine = engine(0, 400);
        let t0 = Instant::now();

        engine.observe(NeedsTouch, t0);
        engine.observe(Idle, t0 + ms(10));

        // Release was due at 410ms but nobody polled; the new NeedsTouch
        // re-asserts at once. Both changes are reported, in order.
        let transitions = engine.observe(NeedsTouch, t0 + ms(1000));
        assert_eq!(
            transitions,
            vec![
                StateTransition {
                    from: NeedsTouch,
                    to: Idle,
                    at: t0 + ms(410),
                },
                StateTransition {
                    from: Idle,
                    to: NeedsTouch,
                    at: t0 + ms(1000),
                },
            ]
        );
        assert_eq!(engine.stable(), NeedsTouch);
    }

    #[test]
    fn test_overdue_timer_settles_with_delayed_assert() {
        let mut engine = engine(50, 400);
        let t0 = Instant::now();

        engine.observe(NeedsTouch, t0);
        engine.poll(t0 + ms(50));
        engine.observe(Idle, t0 + ms(100));

        let transition = single(engine.observe(NeedsTouch, t0 + ms(1000)));
        assert_eq!(transition.to, Idle);
        assert_eq!(transition.at, t0 + ms(500));
        assert!(matches!(engine.phase(), Phase::PendingAssert { .. }));
    }

    #[test]
    fn test_poll_reports_assert_and_lapse_release() {
        let mut engine = HysteresisEngine::builder()
            .assert_delay(ms(10))
            .release_delay(ms(0))
            .keepalive_timeout(ms(50))
            .build();
        let t0 = Instant::now();

        engine.observe(NeedsTouch, t0);
        let transitions = engine.poll(t0 + ms(100));
        let states: Vec<_> = transitions.iter().map(|t| (t.to, t.at)).collect();
        assert_eq!(states, vec![(NeedsTouch, t0 + ms(10)), (Idle, t0 + ms(50))]);
        assert_eq!(engine.stable(), Idle);
    }

    #[test]
    fn test_drop_with_pending_timer_emits_nothing() {
        let mut engine = engine(0, 400);
        let t0 = Instant::now();

        engine.observe(NeedsTouch, t0);
        engine.observe(Idle, t0 + ms(10));
        assert!(engine.next_deadline().is_some());
        drop(engine);
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(Phase::Idle.to_string(), "Idle");
        assert_eq!(
            Phase::PendingRelease {
                deadline: Instant::now()
            }
            .to_string(),
            "PendingRelease"
        );
    }
}
