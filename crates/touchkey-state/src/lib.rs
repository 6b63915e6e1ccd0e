//! Presence state handling: per-device debounce, aggregation across devices
//! and publication of the aggregate to subscribers.

pub mod aggregator;
pub mod bus;
pub mod hysteresis;

pub use aggregator::{AggregateChanged, Aggregator, DeviceChanged, Update};
pub use bus::{DEFAULT_BUS_CAPACITY, StateBus};
pub use hysteresis::{HysteresisEngine, HysteresisEngineBuilder, Phase, StateTransition};
