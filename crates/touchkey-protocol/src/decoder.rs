//! Keep-alive decoding.
//!
//! Turns a raw HID report into the presence signal it carries. The decoder is
//! total: any byte sequence, including truncated or garbage reports, yields a
//! [`Signal`] and never an error.

use crate::packet::{Packet, Status};
use touchkey_core::PresenceState;

/// Presence information carried by a single report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    /// Keep-alive with status `UPNEEDED`.
    NeedsTouch,

    /// Keep-alive with any other status.
    Idle,

    /// Anything that is not a keep-alive.
    Unrelated,
}

impl Signal {
    /// Raw presence state to forward, or `None` for unrelated reports.
    pub fn presence(self) -> Option<PresenceState> {
        match self {
            Signal::NeedsTouch => Some(PresenceState::NeedsTouch),
            Signal::Idle => Some(PresenceState::Idle),
            Signal::Unrelated => None,
        }
    }
}

/// Stateless CTAPHID keep-alive decoder.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameDecoder;

impl FrameDecoder {
    /// Decode one raw report.
    ///
    /// ```
    /// use touchkey_protocol::{FrameDecoder, Signal};
    ///
    /// let mut report = [0u8; 64];
    /// report[4..8].copy_from_slice(&[0xBB, 0x00, 0x01, 0x02]);
    /// assert_eq!(FrameDecoder::decode(&report), Signal::NeedsTouch);
    ///
    /// assert_eq!(FrameDecoder::decode(&[0xFF; 3]), Signal::Unrelated);
    /// ```
    pub fn decode(report: &[u8]) -> Signal {
        match Packet::parse(report) {
            Some(packet) => Self::decode_packet(&packet),
            None => Signal::Unrelated,
        }
    }

    /// Decode an already parsed packet.
    pub fn decode_packet(packet: &Packet<'_>) -> Signal {
        let Packet::Init(init) = packet else {
            return Signal::Unrelated;
        };

        match init.keepalive_status() {
            Some(Status::UPNEEDED) => Signal::NeedsTouch,
            Some(_) => Signal::Idle,
            None => Signal::Unrelated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn report(header: &[u8]) -> Vec<u8> {
        let mut report = vec![0u8; 64];
        report[..header.len()].copy_from_slice(header);
        report
    }

    #[rstest]
    #[case::upneeded(&[0, 0, 0, 1, 0xBB, 0x00, 0x01, 0x02], Signal::NeedsTouch)]
    #[case::processing(&[0, 0, 0, 1, 0xBB, 0x00, 0x01, 0x01], Signal::Idle)]
    #[case::unknown_status(&[0, 0, 0, 1, 0xBB, 0x00, 0x01, 0x7F], Signal::Idle)]
    #[case::zero_length(&[0, 0, 0, 1, 0xBB, 0x00, 0x00, 0x02], Signal::Unrelated)]
    #[case::cbor_response(&[0, 0, 0, 1, 0x90, 0x00, 0x01, 0x00], Signal::Unrelated)]
    #[case::ping(&[0, 0, 0, 1, 0x81, 0x00, 0x01, 0x02], Signal::Unrelated)]
    #[case::continuation(&[0, 0, 0, 1, 0x3B, 0x02], Signal::Unrelated)]
    fn test_decode_full_reports(#[case] header: &[u8], #[case] expected: Signal) {
        assert_eq!(FrameDecoder::decode(&report(header)), expected);
    }

    #[rstest]
    #[case::empty(&[])]
    #[case::channel_only(&[0, 0, 0, 1])]
    #[case::init_without_length(&[0, 0, 0, 1, 0xBB, 0x00])]
    #[case::header_without_status(&[0, 0, 0, 1, 0xBB, 0x00, 0x01])]
    fn test_decode_short_reports(#[case] bytes: &[u8]) {
        assert_eq!(FrameDecoder::decode(bytes), Signal::Unrelated);
    }

    #[test]
    fn test_minimal_keepalive() {
        let bytes = [0, 0, 0, 1, 0xBB, 0x00, 0x01, 0x02];
        assert_eq!(FrameDecoder::decode(&bytes), Signal::NeedsTouch);
    }

    #[test]
    fn test_signal_presence() {
        assert_eq!(
            Signal::NeedsTouch.presence(),
            Some(PresenceState::NeedsTouch)
        );
        assert_eq!(Signal::Idle.presence(), Some(PresenceState::Idle));
        assert_eq!(Signal::Unrelated.presence(), None);
    }
}
