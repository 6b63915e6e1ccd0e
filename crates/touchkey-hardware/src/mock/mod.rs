//! Mock device implementations for testing and development.
//!
//! A [`MockBackend`] hands out scripted report sources in place of hidraw
//! nodes. Tests feed CTAPHID packets through a [`MockDeviceHandle`].

pub mod device;

pub use device::{MockBackend, MockDeviceHandle, MockReportSource};
