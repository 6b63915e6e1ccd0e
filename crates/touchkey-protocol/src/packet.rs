//! CTAPHID packet parsing.
//!
//! A HID report read from a FIDO authenticator is one CTAPHID packet. The
//! first byte after the channel id tells the two kinds apart: initialisation
//! packets carry a command with bit 7 set, continuation packets carry a
//! sequence number with bit 7 clear.
//!
//! ```text
//! init:         | CID (4) | CMD (1) | BCNTH | BCNTL | DATA ... |
//! continuation: | CID (4) | SEQ (1) | DATA ...                 |
//! ```
//!
//! Parsing borrows from the report buffer and never allocates.
//!
//! # Example
//!
//! ```
//! use touchkey_protocol::{Command, Packet, Status};
//!
//! let mut report = [0u8; 64];
//! report[..8].copy_from_slice(&[0x01, 0x02, 0x03, 0x04, 0xBB, 0x00, 0x01, 0x02]);
//!
//! let Some(Packet::Init(init)) = Packet::parse(&report) else {
//!     panic!("expected an init packet");
//! };
//! assert_eq!(init.command, Command::KEEPALIVE);
//! assert_eq!(init.keepalive_status(), Some(Status::UPNEEDED));
//! ```

use std::fmt;
use touchkey_core::constants::{
    CTAPHID_CHANNEL_SIZE, CTAPHID_CMD_CANCEL, CTAPHID_CMD_CBOR, CTAPHID_CMD_ERROR,
    CTAPHID_CMD_INIT, CTAPHID_CMD_KEEPALIVE, CTAPHID_CMD_LOCK, CTAPHID_CMD_MSG, CTAPHID_CMD_PING,
    CTAPHID_CMD_WINK, CTAPHID_CONT_HEADER_SIZE, CTAPHID_INIT_FLAG, CTAPHID_INIT_HEADER_SIZE,
    KEEPALIVE_STATUS_PROCESSING, KEEPALIVE_STATUS_UPNEEDED,
};

/// Channel identifier allocated by the host for one client.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Channel([u8; CTAPHID_CHANNEL_SIZE]);

impl Channel {
    /// Broadcast channel used for `INIT` before a channel is allocated.
    pub const BROADCAST: Self = Self([0xFF; CTAPHID_CHANNEL_SIZE]);

    pub const fn new(bytes: [u8; CTAPHID_CHANNEL_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; CTAPHID_CHANNEL_SIZE] {
        &self.0
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Command byte of an initialisation packet, including the init flag.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Command(u8);

impl Command {
    pub const KEEPALIVE: Self = Self(CTAPHID_CMD_KEEPALIVE);
    pub const MSG: Self = Self(CTAPHID_CMD_MSG);
    pub const CBOR: Self = Self(CTAPHID_CMD_CBOR);
    pub const INIT: Self = Self(CTAPHID_CMD_INIT);
    pub const PING: Self = Self(CTAPHID_CMD_PING);
    pub const CANCEL: Self = Self(CTAPHID_CMD_CANCEL);
    pub const ERROR: Self = Self(CTAPHID_CMD_ERROR);
    pub const WINK: Self = Self(CTAPHID_CMD_WINK);
    pub const LOCK: Self = Self(CTAPHID_CMD_LOCK);

    pub const fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    pub const fn as_u8(self) -> u8 {
        self.0
    }

    /// Whether this command carries the final answer to a request.
    ///
    /// A response on the channel that asked for user presence means the
    /// authenticator is no longer waiting.
    pub fn is_response(self) -> bool {
        matches!(self, Self::MSG | Self::CBOR | Self::ERROR)
    }

    fn name(self) -> &'static str {
        match self {
            Self::KEEPALIVE => "KeepAlive",
            Self::MSG => "Msg",
            Self::CBOR => "Cbor",
            Self::INIT => "Init",
            Self::PING => "Ping",
            Self::CANCEL => "Cancel",
            Self::ERROR => "Error",
            Self::WINK => "Wink",
            Self::LOCK => "Lock",
            _ => "Unknown",
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 & CTAPHID_INIT_FLAG == 0 {
            return write!(f, "NotACommand({:#04x})", self.0);
        }
        write!(f, "{}({:#04x})", self.name(), self.0 & !CTAPHID_INIT_FLAG)
    }
}

/// Status byte of a keep-alive.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status(u8);

impl Status {
    /// The authenticator is still processing the current request.
    pub const PROCESSING: Self = Self(KEEPALIVE_STATUS_PROCESSING);

    /// The authenticator is waiting for user presence.
    pub const UPNEEDED: Self = Self(KEEPALIVE_STATUS_UPNEEDED);

    pub const fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    pub const fn as_u8(self) -> u8 {
        self.0
    }
}

impl fmt::Debug for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            Self::PROCESSING => "Processing",
            Self::UPNEEDED => "UserPresenceNeeded",
            _ => "Unknown",
        };
        write!(f, "{name}({})", self.0)
    }
}

/// First packet of a CTAPHID message.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct InitPacket<'a> {
    pub channel: Channel,
    pub command: Command,
    /// Total message length declared by `BCNTH`/`BCNTL`.
    pub length: u16,
    /// Data bytes carried by this packet (may include padding).
    pub payload: &'a [u8],
}

impl InitPacket<'_> {
    /// Status byte when this is a keep-alive with a non-empty payload.
    pub fn keepalive_status(&self) -> Option<Status> {
        if self.command != Command::KEEPALIVE || self.length == 0 {
            return None;
        }
        self.payload.first().copied().map(Status::from_byte)
    }
}

impl fmt::Debug for InitPacket<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let declared = usize::from(self.length).min(self.payload.len());
        f.debug_struct("Init")
            .field("channel", &self.channel)
            .field("command", &self.command)
            .field("length", &self.length)
            .field("payload", &HexSlice(&self.payload[..declared]))
            .finish()
    }
}

/// Follow-up packet carrying the rest of a message.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ContinuationPacket<'a> {
    pub channel: Channel,
    pub sequence: u8,
    pub payload: &'a [u8],
}

impl fmt::Debug for ContinuationPacket<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Continuation")
            .field("channel", &self.channel)
            .field("sequence", &self.sequence)
            .field("payload", &HexSlice(self.payload))
            .finish()
    }
}

/// A parsed CTAPHID packet.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Packet<'a> {
    Init(InitPacket<'a>),
    Continuation(ContinuationPacket<'a>),
}

impl<'a> Packet<'a> {
    /// Classify a raw report.
    ///
    /// Returns `None` when the report is too short to hold the header of
    /// the packet kind its fifth byte announces.
    pub fn parse(report: &'a [u8]) -> Option<Self> {
        if report.len() < CTAPHID_CONT_HEADER_SIZE {
            return None;
        }

        let mut cid = [0u8; CTAPHID_CHANNEL_SIZE];
        cid.copy_from_slice(&report[..CTAPHID_CHANNEL_SIZE]);
        let channel = Channel(cid);
        let marker = report[CTAPHID_CHANNEL_SIZE];

        if marker & CTAPHID_INIT_FLAG == 0 {
            return Some(Packet::Continuation(ContinuationPacket {
                channel,
                sequence: marker,
                payload: &report[CTAPHID_CONT_HEADER_SIZE..],
            }));
        }

        if report.len() < CTAPHID_INIT_HEADER_SIZE {
            return None;
        }

        Some(Packet::Init(InitPacket {
            channel,
            command: Command(marker),
            length: u16::from_be_bytes([report[5], report[6]]),
            payload: &report[CTAPHID_INIT_HEADER_SIZE..],
        }))
    }

    pub fn channel(&self) -> Channel {
        match self {
            Packet::Init(init) => init.channel,
            Packet::Continuation(cont) => cont.channel,
        }
    }
}

impl fmt::Debug for Packet<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Packet::Init(init) => init.fmt(f),
            Packet::Continuation(cont) => cont.fmt(f),
        }
    }
}

struct HexSlice<'a>(&'a [u8]);

impl fmt::Debug for HexSlice<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}
