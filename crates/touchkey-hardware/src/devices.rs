//! Enum wrappers for backend dispatch.
//!
//! The device manager is not generic: it holds an [`AnyBackend`] and its
//! readers own [`AnyReportSource`]s, so the real and the mock backend are
//! selected at runtime without trait objects.
//!
//! # Examples
//!
//! ```
//! use touchkey_hardware::devices::AnyBackend;
//! use touchkey_hardware::mock::MockBackend;
//! use touchkey_hardware::traits::DeviceBackend;
//!
//! let backend = AnyBackend::Mock(MockBackend::new());
//! assert_eq!(backend.name(), "mock");
//! ```

use std::time::Duration;

use touchkey_core::DeviceInfo;

use crate::hid::{HidBackend, HidReportSource};
use crate::mock::{MockBackend, MockReportSource};
use crate::traits::{DeviceBackend, ReportSource};
use crate::Result;

/// Enum wrapper for backend dispatch.
#[derive(Debug)]
#[non_exhaustive]
pub enum AnyBackend {
    /// Real hidraw nodes through hidapi.
    Hid(HidBackend),

    /// Scripted nodes for development and testing.
    Mock(MockBackend),
}

impl DeviceBackend for AnyBackend {
    type Source = AnyReportSource;

    fn name(&self) -> &'static str {
        match self {
            Self::Hid(backend) => backend.name(),
            Self::Mock(backend) => backend.name(),
        }
    }

    fn open(&self, info: &DeviceInfo) -> Result<AnyReportSource> {
        match self {
            Self::Hid(backend) => backend.open(info).map(AnyReportSource::Hid),
            Self::Mock(backend) => backend.open(info).map(AnyReportSource::Mock),
        }
    }
}

/// Enum wrapper for open nodes.
#[derive(Debug)]
#[non_exhaustive]
pub enum AnyReportSource {
    Hid(HidReportSource),

    Mock(MockReportSource),
}

impl ReportSource for AnyReportSource {
    fn read_report(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<usize> {
        match self {
            Self::Hid(source) => source.read_report(buffer, timeout),
            Self::Mock(source) => source.read_report(buffer, timeout),
        }
    }
}
