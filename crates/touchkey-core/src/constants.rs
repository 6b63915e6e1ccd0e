//! Core constants for FIDO CTAPHID presence detection.
//!
//! This module gathers the protocol-level values the daemon depends on: the
//! HID usage that identifies a FIDO authenticator, the CTAPHID packet layout,
//! the keep-alive status codes, the wire lines sent to socket clients and the
//! default debounce timings.
//!
//! # Packet Structure
//!
//! Every CTAPHID report is a fixed-size 64 byte packet. Initialisation packets
//! start a message, continuation packets carry the remainder:
//!
//! ```text
//! init:         | CID (4) | CMD (1, bit 7 set) | BCNTH | BCNTL | DATA (57) |
//! continuation: | CID (4) | SEQ (1, bit 7 clear) | DATA (59)              |
//! ```
//!
//! A keep-alive is an initialisation packet with command `0x80 | 0x3B` and a
//! single status byte as payload.
//!
//! # Usage
//!
//! ```
//! use touchkey_core::constants::*;
//!
//! assert_eq!(CTAPHID_CMD_KEEPALIVE, 0xBB);
//! assert_eq!(WIRE_NEEDS_TOUCH, b"U2F_1\n");
//! ```

// ============================================================================
// HID discovery
// ============================================================================

/// HID usage page assigned to the FIDO Alliance.
///
/// A device node is eligible when its report descriptor declares this usage
/// page together with [`FIDO_USAGE_CTAPHID`].
pub const FIDO_USAGE_PAGE: u16 = 0xF1D0;

/// HID usage of the CTAPHID application collection.
pub const FIDO_USAGE_CTAPHID: u16 = 0x01;

// ============================================================================
// CTAPHID packet layout
// ============================================================================

/// Size of a single CTAPHID report in bytes.
pub const CTAPHID_REPORT_SIZE: usize = 64;

/// Length of the channel identifier at the start of every packet.
pub const CTAPHID_CHANNEL_SIZE: usize = 4;

/// Header length of an initialisation packet (CID + CMD + BCNT).
pub const CTAPHID_INIT_HEADER_SIZE: usize = 7;

/// Header length of a continuation packet (CID + SEQ).
pub const CTAPHID_CONT_HEADER_SIZE: usize = 5;

/// Bit set on the command byte of an initialisation packet.
pub const CTAPHID_INIT_FLAG: u8 = 0x80;

/// Keep-alive command sent while a request is being processed.
pub const CTAPHID_CMD_KEEPALIVE: u8 = CTAPHID_INIT_FLAG | 0x3B;

/// U2F raw message command.
pub const CTAPHID_CMD_MSG: u8 = CTAPHID_INIT_FLAG | 0x03;

/// CTAP2 CBOR message command.
pub const CTAPHID_CMD_CBOR: u8 = CTAPHID_INIT_FLAG | 0x10;

/// Channel initialisation command.
pub const CTAPHID_CMD_INIT: u8 = CTAPHID_INIT_FLAG | 0x06;

/// Echo command.
pub const CTAPHID_CMD_PING: u8 = CTAPHID_INIT_FLAG | 0x01;

/// Request cancellation command.
pub const CTAPHID_CMD_CANCEL: u8 = CTAPHID_INIT_FLAG | 0x11;

/// Error response command.
pub const CTAPHID_CMD_ERROR: u8 = CTAPHID_INIT_FLAG | 0x3F;

/// Wink (identify) command.
pub const CTAPHID_CMD_WINK: u8 = CTAPHID_INIT_FLAG | 0x08;

/// Channel lock command.
pub const CTAPHID_CMD_LOCK: u8 = CTAPHID_INIT_FLAG | 0x04;

/// Keep-alive status: the authenticator is still processing.
pub const KEEPALIVE_STATUS_PROCESSING: u8 = 1;

/// Keep-alive status: the authenticator is waiting for user presence.
pub const KEEPALIVE_STATUS_UPNEEDED: u8 = 2;

// ============================================================================
// Wire protocol
// ============================================================================

/// Line sent to socket clients while at least one key needs a touch.
pub const WIRE_NEEDS_TOUCH: &[u8] = b"U2F_1\n";

/// Line sent to socket clients while no key needs a touch.
pub const WIRE_IDLE: &[u8] = b"U2F_0\n";

/// Longest line the client-side decoder buffers before giving up.
pub const WIRE_MAX_LINE_LENGTH: usize = 64;

/// File name of the listening socket inside the runtime directory.
pub const DEFAULT_SOCKET_NAME: &str = "touchkey.socket";

/// Sentinel accepted wherever a socket path is configured to request a
/// descriptor inherited through socket activation.
pub const SOCKET_ACTIVATION_SENTINEL: &str = "@activation";

/// Alias of [`SOCKET_ACTIVATION_SENTINEL`] used by yubikey-touch-detector
/// style configurations.
pub const SOCKET_SYSTEMD_SENTINEL: &str = "@systemd";

/// Default cap on simultaneously connected socket clients.
pub const DEFAULT_MAX_CONNECTIONS: usize = 64;

// ============================================================================
// Debounce timings
// ============================================================================

/// Default delay before a raw NeedsTouch is promoted to stable (milliseconds).
///
/// Zero promotes on the first keep-alive so a short touch window is never
/// missed.
pub const DEFAULT_ASSERT_DELAY_MS: u64 = 0;

/// Default delay before a raw Idle is promoted to stable (milliseconds).
///
/// Keep-alives are specified at 100ms intervals but some keys have been
/// observed to go 300ms+ between them and to alternate between the
/// `UPNEEDED` and `PROCESSING` statuses during a single transaction.
pub const DEFAULT_RELEASE_DELAY_MS: u64 = 400;

/// Default time without a `UPNEEDED` keep-alive after which the raw state
/// lapses to Idle (milliseconds).
pub const DEFAULT_KEEPALIVE_TIMEOUT_MS: u64 = 250;

/// Upper bound on a single blocking HID read so readers notice cancellation.
pub const READ_POLL_INTERVAL_MS: u64 = 100;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keepalive_command_value() {
        assert_eq!(CTAPHID_CMD_KEEPALIVE, 0xBB);
        assert_eq!(CTAPHID_CMD_CBOR, 0x90);
        assert_eq!(CTAPHID_CMD_ERROR, 0xBF);
    }

    #[test]
    fn test_header_sizes_fit_report() {
        assert!(CTAPHID_INIT_HEADER_SIZE < CTAPHID_REPORT_SIZE);
        assert_eq!(CTAPHID_CONT_HEADER_SIZE, CTAPHID_CHANNEL_SIZE + 1);
    }

    #[test]
    fn test_wire_lines_are_newline_terminated() {
        assert_eq!(WIRE_NEEDS_TOUCH.last(), Some(&b'\n'));
        assert_eq!(WIRE_IDLE.last(), Some(&b'\n'));
        assert_eq!(WIRE_NEEDS_TOUCH.len(), WIRE_IDLE.len());
    }
}
