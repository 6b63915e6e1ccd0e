//! Device access trait definitions.
//!
//! Readers run on blocking threads, so both traits are synchronous. A
//! [`DeviceBackend`] opens device nodes; each open node is a
//! [`ReportSource`] owned by exactly one reader.
//!
//! For dynamic dispatch between the real and the mock backend, use the enum
//! wrappers from the [`devices`](crate::devices) module.

use std::time::Duration;

use touchkey_core::DeviceInfo;

use crate::error::Result;

/// An open HID node producing fixed-size reports.
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
/// use touchkey_hardware::traits::ReportSource;
///
/// fn drain<S: ReportSource>(source: &mut S) -> touchkey_hardware::Result<usize> {
///     let mut buffer = [0u8; 64];
///     let mut reports = 0;
///     while source.read_report(&mut buffer, Duration::from_millis(10))? > 0 {
///         reports += 1;
///     }
///     Ok(reports)
/// }
/// ```
pub trait ReportSource: Send + 'static {
    /// Read one report, waiting at most `timeout`.
    ///
    /// # Returns
    ///
    /// The number of bytes written to `buffer`; `0` when the timeout
    /// elapsed without a report.
    ///
    /// # Errors
    ///
    /// Returns `DeviceReadFailed` or `Disconnected` once the node can no
    /// longer be read. The reader treats both as a departure.
    fn read_report(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<usize>;
}

/// Opens device nodes announced by hotplug.
pub trait DeviceBackend: Send + Sync + 'static {
    type Source: ReportSource;

    /// Short backend name for log fields.
    fn name(&self) -> &'static str;

    /// Open the node described by `info`.
    ///
    /// # Errors
    ///
    /// Returns `DeviceBusyOrGone` when the node cannot be opened.
    fn open(&self, info: &DeviceInfo) -> Result<Self::Source>;
}
