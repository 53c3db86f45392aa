//! Enumerates the packet types of the handshake and login states.
//!
//! Packets a client never needs to interpret (the body of a plugin request,
//! the properties trailing Login Success) keep the rest of their bytes as
//! a `Vec<u8>`, so they survive a decode/encode pass unchanged. IDs this
//! crate does not know about decode into [`UnknownPacket`].

use crate::protocol::{Decode, DecodeError, Decoder, Encode, Encoder};
use std::fmt::Debug;

pub mod client;
pub mod server;

/// Type encoding for a side (client or server).
pub trait Side: Send + Sync + 'static + Copy + Clone {
    type SendPacket<State: ProtocolState>: Encode + Debug + AsRef<str> + Send + 'static;
    type RecvPacket<State: ProtocolState>: Decode + Debug + AsRef<str> + Send + 'static;
}

pub mod side {
    use super::*;

    #[derive(Debug, Copy, Clone)]
    pub struct Server;
    impl Side for Server {
        type SendPacket<State: ProtocolState> = State::ServerPacket;
        type RecvPacket<State: ProtocolState> = State::ClientPacket;
    }

    #[derive(Debug, Copy, Clone)]
    pub struct Client;
    impl Side for Client {
        type SendPacket<State: ProtocolState> = State::ClientPacket;
        type RecvPacket<State: ProtocolState> = State::ServerPacket;
    }
}

/// Type encoding for a protocol state.
pub trait ProtocolState: Send + Sync + 'static {
    /// Packet type sent by the server in this state.
    type ServerPacket: Encode + Decode + Debug + AsRef<str> + Send + 'static;
    /// Packet type sent by the client in this state.
    type ClientPacket: Encode + Decode + Debug + AsRef<str> + Send + 'static;
}

pub mod state {
    use super::*;
    use minecraft_proxy_login_macros::{Decode, Encode};

    #[derive(Debug, Copy, Clone)]
    pub struct Handshake;
    impl ProtocolState for Handshake {
        type ServerPacket = EmptyPacket;
        type ClientPacket = client::handshake::Packet;
    }

    /// The server never speaks in the Handshake state.
    #[derive(Encode, Decode, Debug, Clone)]
    pub struct EmptyPacket;

    impl AsRef<str> for EmptyPacket {
        fn as_ref(&self) -> &str {
            ""
        }
    }

    #[derive(Debug, Copy, Clone)]
    pub struct Login;
    impl ProtocolState for Login {
        type ServerPacket = server::login::Packet;
        type ClientPacket = client::login::Packet;
    }
}

/// A packet whose ID is not known in the current state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownPacket {
    pub id: i32,
    pub data: Vec<u8>,
}

impl UnknownPacket {
    /// Takes the rest of the decoder as the packet body.
    pub fn decode_body(id: i32, decoder: &mut Decoder) -> Self {
        Self {
            id,
            data: decoder.consume_remaining().to_vec(),
        }
    }
}

impl Encode for UnknownPacket {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_var_int(self.id);
        encoder.write_slice(&self.data);
    }
}

/// A complete packet as it came off the wire, after decompression
/// and decryption but before it is interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPacket {
    id: i32,
    /// Packet ID followed by the body.
    data: Vec<u8>,
}

impl RawPacket {
    pub fn new(data: Vec<u8>) -> Result<Self, DecodeError> {
        let id = Decoder::new(&data).read_var_int()?;
        Ok(Self { id, data })
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Interprets the packet as `P`, which is expected to read the ID itself.
    pub fn decode<P: Decode>(&self) -> Result<P, DecodeError> {
        P::decode(&mut Decoder::new(&self.data))
    }
}
