//! Device discovery through udev.
//!
//! The monitor subscribes to `hidraw` events first and enumerates the nodes
//! already present second, so nothing attached in between is missed. Both
//! feed the same channel. Arrivals are filtered on the FIDO usage in the
//! node's report descriptor; departures are emitted for every hidraw node and
//! the device manager ignores the ones it never tracked.
//!
//! `udev` handles are not `Send`, so everything lives on one dedicated
//! thread that waits on the monitor socket with `poll(2)`.

use std::fs;
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::thread;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, trace, warn};
use touchkey_core::{DeviceInfo, DevicePath};
use touchkey_protocol::is_fido_descriptor;

use crate::error::{HardwareError, Result};
use crate::reader::StopFlag;

const SUBSYSTEM: &str = "hidraw";

/// How long one `poll(2)` waits before the stop flag is checked again.
const MONITOR_POLL_TIMEOUT_MS: libc::c_int = 250;

/// A change in the set of attached FIDO nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HotplugEvent {
    Arrived(DeviceInfo),
    Departed(DevicePath),
}

/// Running udev monitor. Dropping it stops the monitor thread.
#[derive(Debug)]
pub struct HotplugMonitor {
    stop: StopFlag,
}

impl HotplugMonitor {
    /// Subscribe to hidraw events, then enumerate attached nodes.
    ///
    /// Returns once the subscription is in place. The initial enumeration
    /// and later events are delivered on `events`.
    ///
    /// # Errors
    ///
    /// Returns `HotplugSubscriptionFailed` if the udev monitor cannot be
    /// created. The daemon cannot run without it.
    pub async fn start(events: mpsc::Sender<HotplugEvent>) -> Result<Self> {
        let stop = StopFlag::default();
        let (ready_tx, ready_rx) = oneshot::channel();

        let thread_stop = stop.clone();
        thread::Builder::new()
            .name("touchkey-hotplug".to_string())
            .spawn(move || monitor_thread(events, thread_stop, ready_tx))
            .map_err(|e| HardwareError::hotplug_subscription_failed(e.to_string()))?;

        match ready_rx.await {
            Ok(Ok(())) => Ok(Self { stop }),
            Ok(Err(error)) => Err(error),
            Err(_) => Err(HardwareError::hotplug_subscription_failed(
                "monitor thread exited during startup",
            )),
        }
    }

    pub fn stop(&self) {
        self.stop.stop();
    }
}

impl Drop for HotplugMonitor {
    fn drop(&mut self) {
        self.stop.stop();
    }
}

fn subscribe() -> io::Result<udev::MonitorSocket> {
    udev::MonitorBuilder::new()?
        .match_subsystem(SUBSYSTEM)?
        .listen()
}

fn enumerate() -> io::Result<Vec<DeviceInfo>> {
    let mut enumerator = udev::Enumerator::new()?;
    enumerator.match_subsystem(SUBSYSTEM)?;
    Ok(enumerator
        .scan_devices()?
        .filter_map(|device| device_info(&device))
        .collect())
}

fn monitor_thread(
    events: mpsc::Sender<HotplugEvent>,
    stop: StopFlag,
    ready: oneshot::Sender<Result<()>>,
) {
    let socket = match subscribe() {
        Ok(socket) => socket,
        Err(e) => {
            let _ = ready.send(Err(HardwareError::hotplug_subscription_failed(
                e.to_string(),
            )));
            return;
        }
    };
    let _ = ready.send(Ok(()));
    debug!(subsystem = SUBSYSTEM, "hotplug subscription active");

    match enumerate() {
        Ok(devices) => {
            info!(count = devices.len(), "enumerated FIDO devices");
            for info in devices {
                if events.blocking_send(HotplugEvent::Arrived(info)).is_err() {
                    return;
                }
            }
        }
        Err(e) => warn!(error = %e, "initial enumeration failed"),
    }

    let fd = socket.as_raw_fd();
    while !stop.is_stopped() && !events.is_closed() {
        let mut poll_fd = libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        };

        // SAFETY: poll_fd is a valid pollfd for the lifetime of the call and
        // nfds matches its count.
        let ready = unsafe { libc::poll(&mut poll_fd, 1, MONITOR_POLL_TIMEOUT_MS) };
        if ready < 0 {
            let e = io::Error::last_os_error();
            if e.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            error!(error = %e, "hotplug poll failed, monitor stopped");
            return;
        }
        if ready == 0 {
            continue;
        }

        for event in socket.iter() {
            let Some(hotplug) = translate(&event) else {
                continue;
            };
            if events.blocking_send(hotplug).is_err() {
                return;
            }
        }
    }
    debug!("hotplug monitor stopped");
}

fn translate(event: &udev::Event) -> Option<HotplugEvent> {
    trace!(event = ?event.event_type(), syspath = %event.syspath().display(), "udev event");
    match event.event_type() {
        udev::EventType::Add => device_info(event).map(HotplugEvent::Arrived),
        udev::EventType::Remove => node_path(event).map(HotplugEvent::Departed),
        _ => None,
    }
}

/// Describe a hidraw node, or `None` if it is not a FIDO interface.
fn device_info(device: &udev::Device) -> Option<DeviceInfo> {
    let path = node_path(device)?;
    if !has_fido_descriptor(device.syspath()) {
        trace!(device.path = %path, "not a FIDO interface");
        return None;
    }

    let hid = device.parent_with_subsystem("hid").ok().flatten();
    let property = |name: &str| {
        hid.as_ref()
            .and_then(|hid| hid.property_value(name))
            .and_then(|value| value.to_str())
            .map(str::to_owned)
    };

    let (vendor_id, product_id) = property("HID_ID")
        .as_deref()
        .and_then(parse_hid_id)
        .unwrap_or_default();

    let mut info = DeviceInfo::new(path, vendor_id, product_id);
    if let Some(serial) = property("HID_UNIQ") {
        info = info.with_serial_number(serial);
    }
    if let Some(name) = property("HID_NAME") {
        info = info.with_product(name);
    }
    Some(info)
}

fn node_path(device: &udev::Device) -> Option<DevicePath> {
    let path = device
        .devnode()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("/dev").join(device.sysname()));
    DevicePath::new(path).ok()
}

/// Whether the report descriptor under a hidraw syspath declares the FIDO
/// CTAPHID usage.
fn has_fido_descriptor(syspath: &Path) -> bool {
    match fs::read(syspath.join("device").join("report_descriptor")) {
        Ok(descriptor) => is_fido_descriptor(&descriptor),
        Err(e) => {
            debug!(syspath = %syspath.display(), error = %e, "report descriptor unreadable");
            false
        }
    }
}

/// Parse the `bus:vendor:product` triple of a `HID_ID` property, e.g.
/// `0003:00001050:00000407`.
fn parse_hid_id(value: &str) -> Option<(u16, u16)> {
    let mut parts = value.split(':');
    let _bus = parts.next()?;
    let vendor = u32::from_str_radix(parts.next()?, 16).ok()?;
    let product = u32::from_str_radix(parts.next()?, 16).ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((u16::try_from(vendor).ok()?, u16::try_from(product).ok()?))
}
