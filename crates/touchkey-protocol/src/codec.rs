//! Tokio codec for the presence line protocol.
//!
//! Every message on the socket is a single newline-terminated line:
//!
//! ```text
//! U2F_1\n    at least one key needs a touch
//! U2F_0\n    no key needs a touch
//! ```
//!
//! The server only ever encodes; the decoder is used by clients such as
//! `touchkey watch` and by tests.
//!
//! # Usage with Tokio Framed
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use tokio::net::UnixStream;
//! use tokio_util::codec::FramedRead;
//! use touchkey_protocol::PresenceCodec;
//!
//! # async fn example() -> touchkey_core::Result<()> {
//! let stream = UnixStream::connect("/run/user/1000/touchkey.socket").await?;
//! let mut lines = FramedRead::new(stream, PresenceCodec::new());
//!
//! while let Some(state) = lines.next().await {
//!     println!("{}", state?);
//! }
//! # Ok(())
//! # }
//! ```

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};
use touchkey_core::{Error, PresenceState, Result, constants::WIRE_MAX_LINE_LENGTH};

/// Codec translating between [`PresenceState`] and its wire line.
#[derive(Debug, Clone)]
pub struct PresenceCodec {
    /// Longest line buffered while waiting for a newline.
    max_line_length: usize,
}

impl PresenceCodec {
    pub fn new() -> Self {
        Self {
            max_line_length: WIRE_MAX_LINE_LENGTH,
        }
    }

    /// Create a codec with a custom line length limit.
    pub fn with_max_line_length(max_line_length: usize) -> Self {
        Self { max_line_length }
    }

    pub fn max_line_length(&self) -> usize {
        self.max_line_length
    }
}

impl Default for PresenceCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for PresenceCodec {
    type Item = PresenceState;
    type Error = Error;

    /// Decode one line.
    ///
    /// # Errors
    ///
    /// - `Error::LineTooLong` if no newline appears within the limit
    /// - `Error::UnknownLine` for any line other than `U2F_0`/`U2F_1`
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let Some(newline) = src.iter().position(|&b| b == b'\n') else {
            if src.len() > self.max_line_length {
                return Err(Error::LineTooLong {
                    length: src.len(),
                    max_length: self.max_line_length,
                });
            }
            return Ok(None);
        };

        let line = src.split_to(newline + 1);
        PresenceState::from_wire_line(&line).map(Some)
    }
}

impl Encoder<PresenceState> for PresenceCodec {
    type Error = Error;

    fn encode(&mut self, item: PresenceState, dst: &mut BytesMut) -> Result<()> {
        dst.extend_from_slice(item.wire_line());
        Ok(())
    }
}
