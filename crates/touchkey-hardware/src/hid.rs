//! hidapi backend.
//!
//! Nodes are opened by path through the hidraw driver. hidraw has no
//! exclusive-open mode; the device manager guarantees a single handle per
//! node inside this process.

use std::ffi::CString;
use std::fmt;
use std::os::unix::ffi::OsStrExt;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use hidapi::{HidApi, HidDevice};
use tracing::debug;
use touchkey_core::{DeviceInfo, DevicePath};

use crate::error::{HardwareError, Result};
use crate::traits::{DeviceBackend, ReportSource};

/// Backend opening real hidraw nodes.
pub struct HidBackend {
    api: Mutex<HidApi>,
}

impl HidBackend {
    /// Initialise hidapi without enumerating; discovery is udev's job.
    ///
    /// # Errors
    ///
    /// Returns `InvalidData` if the hidapi context cannot be created.
    pub fn new() -> Result<Self> {
        let api = HidApi::new_without_enumerate()
            .map_err(|e| HardwareError::invalid_data(format!("hidapi init failed: {e}")))?;
        Ok(Self {
            api: Mutex::new(api),
        })
    }
}

impl fmt::Debug for HidBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HidBackend").finish_non_exhaustive()
    }
}

impl DeviceBackend for HidBackend {
    type Source = HidReportSource;

    fn name(&self) -> &'static str {
        "hidraw"
    }

    fn open(&self, info: &DeviceInfo) -> Result<HidReportSource> {
        let path = CString::new(info.path.as_path().as_os_str().as_bytes())
            .map_err(|e| HardwareError::busy_or_gone(info.path.to_string(), e.to_string()))?;

        let device = {
            let api = self.api.lock().unwrap_or_else(PoisonError::into_inner);
            api.open_path(&path)
                .map_err(|e| HardwareError::busy_or_gone(info.path.to_string(), e.to_string()))?
        };

        if let Ok(Some(product)) = device.get_product_string() {
            debug!(device.path = %info.path, device.product = %product, "opened device");
        }

        Ok(HidReportSource {
            path: info.path.clone(),
            device,
        })
    }
}

/// One open hidraw node.
pub struct HidReportSource {
    path: DevicePath,
    device: HidDevice,
}

impl fmt::Debug for HidReportSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HidReportSource")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl ReportSource for HidReportSource {
    fn read_report(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<usize> {
        let millis = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
        self.device
            .read_timeout(buffer, millis)
            .map_err(|e| HardwareError::read_failed(self.path.to_string(), e.to_string()))
    }
}
