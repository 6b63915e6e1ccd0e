//! Error types for hardware operations.
//!
//! Only [`HardwareError::HotplugSubscriptionFailed`] is fatal. Every other
//! variant affects a single device, which is dropped until hotplug announces
//! it again.

/// Result type alias for hardware operations.
pub type Result<T> = std::result::Result<T, HardwareError>;

/// Errors that can occur while discovering or reading devices.
#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    /// The kernel device-event subscription could not be set up.
    #[error("Hotplug subscription failed: {message}")]
    HotplugSubscriptionFailed { message: String },

    /// The device node could not be opened: it is held elsewhere or it went
    /// away between discovery and open.
    #[error("Device busy or gone: {device}: {message}")]
    DeviceBusyOrGone { device: String, message: String },

    /// Reading a report failed.
    #[error("Device read failed: {device}: {message}")]
    DeviceReadFailed { device: String, message: String },

    /// The device stopped producing reports (end of stream).
    #[error("Device disconnected: {device}")]
    Disconnected { device: String },

    /// A device attribute could not be interpreted.
    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HardwareError {
    pub fn hotplug_subscription_failed(message: impl Into<String>) -> Self {
        Self::HotplugSubscriptionFailed {
            message: message.into(),
        }
    }

    pub fn busy_or_gone(device: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DeviceBusyOrGone {
            device: device.into(),
            message: message.into(),
        }
    }

    pub fn read_failed(device: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DeviceReadFailed {
            device: device.into(),
            message: message.into(),
        }
    }

    pub fn disconnected(device: impl Into<String>) -> Self {
        Self::Disconnected {
            device: device.into(),
        }
    }

    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }

    /// Whether the daemon cannot continue after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::HotplugSubscriptionFailed { .. })
    }
}
