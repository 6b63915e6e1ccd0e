//! Device discovery and reading for FIDO security keys.
//!
//! This crate finds FIDO HID interfaces, reads their CTAPHID reports and
//! turns keep-alives into a debounced, system-wide presence signal.
//!
//! # Components
//!
//! - [`hotplug::HotplugMonitor`] subscribes to udev `hidraw` events and
//!   enumerates attached nodes, keeping only those whose report descriptor
//!   declares the FIDO usage page.
//! - [`reader::DeviceReader`] owns one open node on a blocking thread and
//!   debounces its keep-alives.
//! - [`manager::DeviceManager`] ties both together, aggregates per-node
//!   states and publishes the aggregate on a [`touchkey_state::StateBus`].
//!
//! Backends sit behind the synchronous [`traits::DeviceBackend`] and
//! [`traits::ReportSource`] traits, dispatched through the enums in
//! [`devices`]. The [`mock`] backend replaces hidraw in tests.
//!
//! # Error Handling
//!
//! All operations return [`Result<T>`][error::Result] with
//! [`HardwareError`]. Only a failed hotplug subscription is fatal; open and
//! read failures drop the affected node until it is announced again.

pub mod devices;
pub mod error;
pub mod hid;
pub mod hotplug;
pub mod manager;
pub mod mock;
pub mod reader;
pub mod traits;

pub use devices::{AnyBackend, AnyReportSource};
pub use error::{HardwareError, Result};
pub use hotplug::{HotplugEvent, HotplugMonitor};
pub use manager::{DeviceManager, DeviceManagerHandle, ManagerConfig};
pub use reader::{DeviceReader, ReaderEvent, StopFlag};
