//! Configuration schema.
//!
//! These structures describe the daemon configuration as already-parsed data.
//! Loading (file discovery, TOML parsing, command line overrides) happens in
//! the binary; library crates only ever receive a validated [`Config`].
//!
//! # Example
//!
//! ```toml
//! [notify]
//! enable = true
//! heading = "Touch your key"
//!
//! [devices."12345678"]
//! image = "/usr/share/icons/yubikey.png"
//!
//! [hysteresis]
//! release-delay-ms = 500
//! ```

use crate::{
    Result,
    constants::{
        DEFAULT_ASSERT_DELAY_MS, DEFAULT_KEEPALIVE_TIMEOUT_MS, DEFAULT_MAX_CONNECTIONS,
        DEFAULT_RELEASE_DELAY_MS, SOCKET_ACTIVATION_SENTINEL, SOCKET_SYSTEMD_SENTINEL,
    },
    error::Error,
    types::IdentityMode,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Default notification heading.
pub const DEFAULT_NOTIFY_HEADING: &str = "U2F Touch Required";

/// Complete daemon configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct Config {
    /// Desktop notification defaults.
    pub notify: NotifyConfig,

    /// Per-device overrides, indexed by device serial number.
    pub devices: BTreeMap<String, DeviceConfig>,

    /// Listening socket.
    pub socket: SocketConfig,

    /// Debounce timings.
    pub hysteresis: HysteresisConfig,

    /// Device identity handling.
    pub tracking: TrackingConfig,
}

impl Config {
    /// Check cross-field constraints that serde cannot express.
    ///
    /// # Errors
    /// Returns `Error::Config` if `max-connections` is zero or the keep-alive
    /// timeout is zero.
    pub fn validate(&self) -> Result<()> {
        if self.socket.max_connections == 0 {
            return Err(Error::Config(
                "socket.max-connections must be at least 1".to_string(),
            ));
        }
        if self.hysteresis.keepalive_timeout_ms == 0 {
            return Err(Error::Config(
                "hysteresis.keepalive-timeout-ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Notification contents for a device, applying its overrides.
    ///
    /// Per-device values win over the `[notify]` defaults. The message
    /// defaults to `Device <serial>`.
    #[must_use]
    pub fn resolve_notification(&self, serial: Option<&str>) -> ResolvedNotification {
        let device = serial.and_then(|serial| self.devices.get(serial));

        let heading = device
            .and_then(|d| d.heading.clone())
            .unwrap_or_else(|| self.notify.heading.clone());

        let message = device
            .and_then(|d| d.message.clone())
            .or_else(|| self.notify.message.clone())
            .unwrap_or_else(|| format!("Device {}", serial.unwrap_or("unknown")));

        let image = device
            .and_then(|d| d.image.clone())
            .or_else(|| self.notify.image.clone());

        ResolvedNotification {
            heading,
            message,
            image,
        }
    }
}

/// `[notify]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct NotifyConfig {
    /// Whether the notification collaborator is started.
    pub enable: bool,

    /// Notification heading.
    pub heading: String,

    /// Notification message; `Device <serial>` when unset.
    pub message: Option<String>,

    /// Notification image.
    pub image: Option<PathBuf>,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            enable: false,
            heading: DEFAULT_NOTIFY_HEADING.to_string(),
            message: None,
            image: None,
        }
    }
}

/// `[devices."<serial>"]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct DeviceConfig {
    /// Override notification heading for this device.
    pub heading: Option<String>,

    /// Override notification message for this device.
    pub message: Option<String>,

    /// Override notification image for this device.
    pub image: Option<PathBuf>,
}

/// Notification contents after applying per-device overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedNotification {
    pub heading: String,
    pub message: String,
    pub image: Option<PathBuf>,
}

/// Where the listening socket comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SocketSource {
    /// Bind (and later unlink) a socket at this path.
    Path(PathBuf),

    /// Take the first descriptor passed through socket activation.
    Activation,
}

impl std::str::FromStr for SocketSource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "" => Err(Error::Config("socket path must not be empty".to_string())),
            SOCKET_ACTIVATION_SENTINEL | SOCKET_SYSTEMD_SENTINEL => Ok(SocketSource::Activation),
            path => Ok(SocketSource::Path(PathBuf::from(path))),
        }
    }
}

impl TryFrom<String> for SocketSource {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<SocketSource> for String {
    fn from(value: SocketSource) -> Self {
        value.to_string()
    }
}

impl fmt::Display for SocketSource {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SocketSource::Path(path) => write!(f, "{}", path.display()),
            SocketSource::Activation => f.write_str(SOCKET_ACTIVATION_SENTINEL),
        }
    }
}

/// `[socket]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct SocketConfig {
    /// Socket path, or `@activation` (alias `@systemd`); the runtime directory default applies
    /// when unset.
    pub path: Option<SocketSource>,

    /// Maximum number of simultaneously connected clients.
    pub max_connections: usize,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

/// `[hysteresis]` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct HysteresisConfig {
    /// Hold time before a raw NeedsTouch becomes stable.
    pub assert_delay_ms: u64,

    /// Hold time before a raw Idle becomes stable.
    pub release_delay_ms: u64,

    /// Silence after the last `UPNEEDED` keep-alive that counts as Idle.
    pub keepalive_timeout_ms: u64,
}

impl HysteresisConfig {
    pub fn assert_delay(&self) -> Duration {
        Duration::from_millis(self.assert_delay_ms)
    }

    pub fn release_delay(&self) -> Duration {
        Duration::from_millis(self.release_delay_ms)
    }

    pub fn keepalive_timeout(&self) -> Duration {
        Duration::from_millis(self.keepalive_timeout_ms)
    }
}

impl Default for HysteresisConfig {
    fn default() -> Self {
        Self {
            assert_delay_ms: DEFAULT_ASSERT_DELAY_MS,
            release_delay_ms: DEFAULT_RELEASE_DELAY_MS,
            keepalive_timeout_ms: DEFAULT_KEEPALIVE_TIMEOUT_MS,
        }
    }
}

/// `[tracking]` section.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct TrackingConfig {
    /// How interfaces are grouped into logical devices.
    pub identity: IdentityMode,
}
