//! Packets sent by the client.

pub mod handshake;
pub mod login;
