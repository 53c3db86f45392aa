use crate::protocol::packet_id::login::serverbound;
use minecraft_proxy_login_macros::{Decode, Encode, FromVariants};

#[derive(Debug, Clone, Encode, Decode, FromVariants, strum::AsRefStr)]
#[encoding(discriminant = "varint")]
pub enum Packet {
    #[encoding(id = serverbound::LOGIN_START)]
    LoginStart(LoginStart),
    #[encoding(id = serverbound::ENCRYPTION_RESPONSE)]
    EncryptionResponse(EncryptionResponse),
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct LoginStart {
    pub name: String,
}

/// Shared secret and verify token, both encrypted with the server's public key.
#[derive(Debug, Clone, Encode, Decode)]
pub struct EncryptionResponse {
    #[encoding(length_prefix = "varint")]
    pub shared_secret: Vec<u8>,
    #[encoding(length_prefix = "varint")]
    pub verify_token: Vec<u8>,
}
