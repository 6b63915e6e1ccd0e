//! Scripted HID nodes.

use std::collections::HashMap;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use touchkey_core::constants::{
    CTAPHID_CMD_KEEPALIVE, CTAPHID_REPORT_SIZE, KEEPALIVE_STATUS_PROCESSING,
    KEEPALIVE_STATUS_UPNEEDED,
};
use touchkey_core::{DeviceInfo, DevicePath};
use touchkey_protocol::Channel;

use crate::error::{HardwareError, Result};
use crate::traits::{DeviceBackend, ReportSource};

#[derive(Debug)]
enum MockReport {
    Report(Vec<u8>),
    Fail(String),
}

/// Mock HID node fed through a [`MockDeviceHandle`].
///
/// Dropping every handle ends the stream: the next read returns
/// `Disconnected`, which is how an unplug looks to a reader.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use touchkey_core::DevicePath;
/// use touchkey_hardware::mock::MockReportSource;
/// use touchkey_hardware::traits::ReportSource;
/// use touchkey_protocol::Channel;
///
/// let path: DevicePath = "/dev/hidraw0".parse().unwrap();
/// let (mut source, handle) = MockReportSource::new(path);
/// handle.touch_needed(Channel::new([0, 0, 0, 1])).unwrap();
///
/// let mut buffer = [0u8; 64];
/// let read = source.read_report(&mut buffer, Duration::from_millis(10)).unwrap();
/// assert_eq!(read, 64);
/// assert_eq!(buffer[4], 0xBB);
/// ```
#[derive(Debug)]
pub struct MockReportSource {
    path: DevicePath,
    reports: mpsc::Receiver<MockReport>,
}

impl MockReportSource {
    pub fn new(path: DevicePath) -> (Self, MockDeviceHandle) {
        let (tx, reports) = mpsc::channel();
        let handle = MockDeviceHandle {
            path: path.clone(),
            tx,
        };
        (Self { path, reports }, handle)
    }

    pub fn path(&self) -> &DevicePath {
        &self.path
    }
}

impl ReportSource for MockReportSource {
    fn read_report(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<usize> {
        match self.reports.recv_timeout(timeout) {
            Ok(MockReport::Report(bytes)) => {
                let len = bytes.len().min(buffer.len());
                buffer[..len].copy_from_slice(&bytes[..len]);
                Ok(len)
            }
            Ok(MockReport::Fail(message)) => {
                Err(HardwareError::read_failed(self.path.to_string(), message))
            }
            Err(RecvTimeoutError::Timeout) => Ok(0),
            Err(RecvTimeoutError::Disconnected) => {
                Err(HardwareError::disconnected(self.path.to_string()))
            }
        }
    }
}

/// Handle for scripting a mock HID node.
#[derive(Debug, Clone)]
pub struct MockDeviceHandle {
    path: DevicePath,
    tx: mpsc::Sender<MockReport>,
}

impl MockDeviceHandle {
    pub fn path(&self) -> &DevicePath {
        &self.path
    }

    /// Queue a raw report.
    ///
    /// # Errors
    ///
    /// Returns `Disconnected` if the source has been dropped.
    pub fn send_report(&self, report: &[u8]) -> Result<()> {
        self.send(MockReport::Report(report.to_vec()))
    }

    /// Queue an initialisation packet with the given command and payload.
    pub fn send_init(&self, channel: Channel, command: u8, payload: &[u8]) -> Result<()> {
        self.send_report(&init_report(channel, command, payload))
    }

    /// Queue a keep-alive carrying `status`.
    pub fn keepalive(&self, channel: Channel, status: u8) -> Result<()> {
        self.send_init(channel, CTAPHID_CMD_KEEPALIVE, &[status])
    }

    /// Queue a keep-alive announcing that user presence is needed.
    pub fn touch_needed(&self, channel: Channel) -> Result<()> {
        self.keepalive(channel, KEEPALIVE_STATUS_UPNEEDED)
    }

    /// Queue a keep-alive announcing that the request is being processed.
    pub fn processing(&self, channel: Channel) -> Result<()> {
        self.keepalive(channel, KEEPALIVE_STATUS_PROCESSING)
    }

    /// Make the next read fail with `message`.
    pub fn fail(&self, message: impl Into<String>) -> Result<()> {
        self.send(MockReport::Fail(message.into()))
    }

    fn send(&self, report: MockReport) -> Result<()> {
        self.tx
            .send(report)
            .map_err(|_| HardwareError::disconnected(self.path.to_string()))
    }
}

/// Build a 64-byte initialisation packet.
pub fn init_report(channel: Channel, command: u8, payload: &[u8]) -> [u8; CTAPHID_REPORT_SIZE] {
    let mut report = [0u8; CTAPHID_REPORT_SIZE];
    report[..4].copy_from_slice(channel.as_bytes());
    report[4] = command;
    let len = payload.len().min(CTAPHID_REPORT_SIZE - 7);
    report[5..7].copy_from_slice(&(payload.len() as u16).to_be_bytes());
    report[7..7 + len].copy_from_slice(&payload[..len]);
    report
}

/// Backend serving [`MockReportSource`]s for attached paths.
///
/// Each attached source can be opened once; attach again to simulate a
/// replug. Clones share the set of attached nodes, so a test can keep one
/// while the manager owns another.
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    pending: Arc<Mutex<HashMap<DevicePath, MockReportSource>>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepare a node at `path` for the next open.
    pub fn attach(&self, path: DevicePath) -> MockDeviceHandle {
        let (source, handle) = MockReportSource::new(path.clone());
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path, source);
        handle
    }
}

impl DeviceBackend for MockBackend {
    type Source = MockReportSource;

    fn name(&self) -> &'static str {
        "mock"
    }

    fn open(&self, info: &DeviceInfo) -> Result<MockReportSource> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&info.path)
            .ok_or_else(|| HardwareError::busy_or_gone(info.path.to_string(), "not attached"))
    }
}
