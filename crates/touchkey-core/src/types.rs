use crate::{
    Result,
    constants::{WIRE_IDLE, WIRE_NEEDS_TOUCH},
    error::Error,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Whether a security key is waiting for a physical touch.
///
/// The same type is used at every granularity: the raw signal decoded from a
/// single report, the debounced per-device state and the system-wide
/// aggregate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceState {
    /// No touch is being requested.
    #[default]
    Idle,

    /// The authenticator is blocked waiting for user presence.
    NeedsTouch,
}

impl PresenceState {
    /// Returns `true` if this is [`PresenceState::NeedsTouch`].
    #[inline]
    #[must_use]
    pub fn needs_touch(self) -> bool {
        matches!(self, PresenceState::NeedsTouch)
    }

    /// Build a state from a boolean "touch needed" flag.
    #[inline]
    #[must_use]
    pub fn from_needed(needed: bool) -> Self {
        if needed {
            PresenceState::NeedsTouch
        } else {
            PresenceState::Idle
        }
    }

    /// The opposite state.
    #[inline]
    #[must_use]
    pub fn toggled(self) -> Self {
        match self {
            PresenceState::Idle => PresenceState::NeedsTouch,
            PresenceState::NeedsTouch => PresenceState::Idle,
        }
    }

    /// Exact bytes written to socket clients for this state.
    #[inline]
    #[must_use]
    pub fn wire_line(self) -> &'static [u8] {
        match self {
            PresenceState::Idle => WIRE_IDLE,
            PresenceState::NeedsTouch => WIRE_NEEDS_TOUCH,
        }
    }

    /// Parse a wire line, with or without its trailing newline.
    ///
    /// # Errors
    /// Returns `Error::UnknownLine` for anything other than `U2F_0`/`U2F_1`.
    pub fn from_wire_line(line: &[u8]) -> Result<Self> {
        let line = line.strip_suffix(b"\n").unwrap_or(line);
        match line {
            b"U2F_1" => Ok(PresenceState::NeedsTouch),
            b"U2F_0" => Ok(PresenceState::Idle),
            other => Err(Error::UnknownLine(
                String::from_utf8_lossy(other).into_owned(),
            )),
        }
    }
}

impl fmt::Display for PresenceState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PresenceState::Idle => write!(f, "Idle"),
            PresenceState::NeedsTouch => write!(f, "NeedsTouch"),
        }
    }
}

/// Device node of an attached HID interface (e.g. `/dev/hidraw3`).
///
/// Stable while the device is attached; the kernel may hand the same node to
/// a different device after a replug.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DevicePath(PathBuf);

impl DevicePath {
    /// Create a device path.
    ///
    /// # Errors
    /// Returns `Error::InvalidDevicePath` if the path is empty.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if path.as_os_str().is_empty() {
            return Err(Error::InvalidDevicePath("empty path".to_string()));
        }
        Ok(DevicePath(path))
    }

    /// Borrow the underlying path.
    #[must_use]
    pub fn as_path(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for DevicePath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl std::str::FromStr for DevicePath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        DevicePath::new(s)
    }
}

/// How devices are grouped into logical entries of the per-device map.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdentityMode {
    /// Group by serial number, falling back to the device node when the
    /// device reports no serial.
    #[default]
    Serial,

    /// Every device node is its own logical device.
    Path,
}

impl fmt::Display for IdentityMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            IdentityMode::Serial => write!(f, "serial"),
            IdentityMode::Path => write!(f, "path"),
        }
    }
}

impl std::str::FromStr for IdentityMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "serial" => Ok(IdentityMode::Serial),
            "path" => Ok(IdentityMode::Path),
            other => Err(Error::InvalidIdentityMode(other.to_string())),
        }
    }
}

/// Logical identity of a device in the per-device map.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKey {
    /// Keyed by the serial number reported by the device.
    Serial(String),

    /// Keyed by the device node.
    Path(DevicePath),
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DeviceKey::Serial(serial) => write!(f, "serial:{serial}"),
            DeviceKey::Path(path) => write!(f, "path:{path}"),
        }
    }
}

/// Descriptor of an eligible FIDO HID interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Device node used to open the interface.
    pub path: DevicePath,

    /// USB vendor id.
    pub vendor_id: u16,

    /// USB product id.
    pub product_id: u16,

    /// Serial number, when the device reports one.
    pub serial_number: Option<String>,

    /// Manufacturer string, when known.
    pub manufacturer: Option<String>,

    /// Product string, when known.
    pub product: Option<String>,
}

impl DeviceInfo {
    /// Create a DeviceInfo with required fields.
    pub fn new(path: DevicePath, vendor_id: u16, product_id: u16) -> Self {
        Self {
            path,
            vendor_id,
            product_id,
            serial_number: None,
            manufacturer: None,
            product: None,
        }
    }

    /// Set the serial number. Empty serials are treated as absent.
    pub fn with_serial_number(mut self, serial_number: impl Into<String>) -> Self {
        let serial_number = serial_number.into();
        self.serial_number = (!serial_number.is_empty()).then_some(serial_number);
        self
    }

    /// Set the manufacturer string.
    pub fn with_manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.manufacturer = Some(manufacturer.into());
        self
    }

    /// Set the product string.
    pub fn with_product(mut self, product: impl Into<String>) -> Self {
        self.product = Some(product.into());
        self
    }

    /// Logical key of this device under the given identity mode.
    #[must_use]
    pub fn key(&self, mode: IdentityMode) -> DeviceKey {
        match (mode, &self.serial_number) {
            (IdentityMode::Serial, Some(serial)) => DeviceKey::Serial(serial.clone()),
            _ => DeviceKey::Path(self.path.clone()),
        }
    }

    /// `vvvv:pppp` rendering of the USB ids, as used in log fields.
    #[must_use]
    pub fn usb_id(&self) -> String {
        format!("{:04x}:{:04x}", self.vendor_id, self.product_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn info(path: &str) -> DeviceInfo {
        DeviceInfo::new(DevicePath::new(path).unwrap(), 0x1050, 0x0407)
    }

    #[rstest]
    #[case(PresenceState::Idle, b"U2F_0\n")]
    #[case(PresenceState::NeedsTouch, b"U2F_1\n")]
    fn test_wire_line(#[case] state: PresenceState, #[case] expected: &[u8]) {
        assert_eq!(state.wire_line(), expected);
        assert_eq!(PresenceState::from_wire_line(expected).unwrap(), state);
    }

    #[rstest]
    #[case(b"U2F_2\n")]
    #[case(b"u2f_1\n")]
    #[case(b"")]
    fn test_unknown_wire_line(#[case] line: &[u8]) {
        assert!(matches!(
            PresenceState::from_wire_line(line),
            Err(Error::UnknownLine(_))
        ));
    }

    #[test]
    fn test_wire_line_without_newline() {
        assert_eq!(
            PresenceState::from_wire_line(b"U2F_1").unwrap(),
            PresenceState::NeedsTouch
        );
    }

    #[test]
    fn test_presence_helpers() {
        assert!(PresenceState::NeedsTouch.needs_touch());
        assert!(!PresenceState::Idle.needs_touch());
        assert_eq!(PresenceState::from_needed(true), PresenceState::NeedsTouch);
        assert_eq!(PresenceState::Idle.toggled(), PresenceState::NeedsTouch);
        assert_eq!(PresenceState::default(), PresenceState::Idle);
    }

    #[test]
    fn test_device_path_rejects_empty() {
        assert!(DevicePath::new("").is_err());
        assert_eq!(
            DevicePath::new("/dev/hidraw0").unwrap().to_string(),
            "/dev/hidraw0"
        );
    }

    #[test]
    fn test_identity_mode_from_str() {
        assert_eq!("serial".parse::<IdentityMode>().unwrap(), IdentityMode::Serial);
        assert_eq!("path".parse::<IdentityMode>().unwrap(), IdentityMode::Path);
        assert!("uuid".parse::<IdentityMode>().is_err());
    }

    #[test]
    fn test_key_prefers_serial() {
        let device = info("/dev/hidraw1").with_serial_number("12345678");
        assert_eq!(
            device.key(IdentityMode::Serial),
            DeviceKey::Serial("12345678".to_string())
        );
        assert_eq!(
            device.key(IdentityMode::Path),
            DeviceKey::Path(DevicePath::new("/dev/hidraw1").unwrap())
        );
    }

    #[test]
    fn test_key_falls_back_to_path_without_serial() {
        let device = info("/dev/hidraw2").with_serial_number("");
        assert_eq!(device.serial_number, None);
        assert_eq!(
            device.key(IdentityMode::Serial),
            DeviceKey::Path(DevicePath::new("/dev/hidraw2").unwrap())
        );
    }

    #[test]
    fn test_usb_id_format() {
        assert_eq!(info("/dev/hidraw0").usb_id(), "1050:0407");
    }
}
