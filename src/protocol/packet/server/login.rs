use crate::{
    chat::ChatMessage,
    protocol::{packet_id::login::clientbound, UnknownPacket},
};
use minecraft_proxy_login_macros::{Decode, Encode, FromVariants};
use uuid::Uuid;

#[derive(Debug, Clone, Encode, Decode, FromVariants, strum::AsRefStr)]
#[encoding(discriminant = "varint")]
pub enum Packet {
    #[encoding(id = clientbound::DISCONNECT)]
    Disconnect(Disconnect),
    #[encoding(id = clientbound::ENCRYPTION_REQUEST)]
    EncryptionRequest(EncryptionRequest),
    #[encoding(id = clientbound::LOGIN_SUCCESS)]
    LoginSuccess(LoginSuccess),
    #[encoding(id = clientbound::SET_COMPRESSION)]
    SetCompression(SetCompression),
    #[encoding(id = clientbound::LOGIN_PLUGIN_REQUEST)]
    LoginPluginRequest(LoginPluginRequest),
    #[encoding(unknown)]
    Unknown(UnknownPacket),
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct Disconnect {
    /// JSON text component.
    pub reason: String,
}

impl Disconnect {
    pub fn new(reason: &ChatMessage) -> Self {
        Self {
            reason: reason.to_json(),
        }
    }

    pub fn reason(&self) -> Result<ChatMessage, serde_json::Error> {
        serde_json::from_str(&self.reason)
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct EncryptionRequest {
    /// Empty on vanilla servers.
    pub server_id: String,
    /// DER-encoded SubjectPublicKeyInfo.
    #[encoding(length_prefix = "varint")]
    pub public_key: Vec<u8>,
    #[encoding(length_prefix = "varint")]
    pub verify_token: Vec<u8>,
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct LoginSuccess {
    pub uuid: Uuid,
    pub username: String,
    /// Profile properties on newer protocol versions. Not interpreted.
    #[encoding(length_prefix = "inferred")]
    pub properties: Vec<u8>,
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct SetCompression {
    /// Negative disables compression.
    #[encoding(varint)]
    pub threshold: i32,
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct LoginPluginRequest {
    #[encoding(varint)]
    pub message_id: i32,
    pub channel: String,
    #[encoding(length_prefix = "inferred")]
    pub data: Vec<u8>,
}
