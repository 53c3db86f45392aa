//! Packets sent by the server.

pub mod login;
