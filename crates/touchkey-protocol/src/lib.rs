//! CTAPHID decoding and the presence wire protocol.

pub mod codec;
pub mod decoder;
pub mod descriptor;
pub mod packet;

pub use codec::PresenceCodec;
pub use decoder::{FrameDecoder, Signal};
pub use descriptor::{Usage, is_fido_descriptor};
pub use packet::{Channel, Command, ContinuationPacket, InitPacket, Packet, Status};
