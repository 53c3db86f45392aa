//! Minecraft Java Edition wire format: the primitive codec, the packets
//! exchanged during the handshake and login states, and the vanilla
//! framing layer.

/// Protocol version sent in the Handshake unless configured otherwise.
pub const DEFAULT_PROTOCOL_VERSION: i32 = 758; // 1.18.2

mod decoder;
mod encoder;
pub mod packet;
pub mod packet_id;
pub mod vanilla_codec;

pub use decoder::{Decode, DecodeError, Decoder};
pub use encoder::{var_int_size, Encode, Encoder};
pub use packet::{RawPacket, UnknownPacket};

/// Limit to avoid out-of-memory DOS.
const BUFFER_LIMIT: usize = 2 * 1024 * 1024; // 2 MiB
