use crate::{
    chat::ChatMessage, encryption::EncryptionError, protocol::DecodeError,
    resolver::ResolveError, transport::TransportError, tunnel::TunnelError,
};
use std::time::Duration;

/// Where in the login sequence something went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum LoginStage {
    Resolution,
    ProxyConnect,
    ProxyHandshake,
    HandshakeSend,
    LoginStartSend,
    PacketReceive,
    Disconnect,
    Encryption,
    LoginSuccessDecode,
    CompressionDecode,
}

#[derive(Debug, thiserror::Error)]
pub enum LoginError {
    /// The server ended the login with a Disconnect packet.
    #[error("disconnected by server: {reason}")]
    Disconnected { reason: ChatMessage },
    #[error("login failed during {stage}: {source}")]
    Failed {
        stage: LoginStage,
        #[source]
        source: LoginFailure,
    },
    #[error("login cancelled during {stage}")]
    Cancelled { stage: LoginStage },
}

impl LoginError {
    pub fn failed(stage: LoginStage, source: impl Into<LoginFailure>) -> Self {
        Self::Failed {
            stage,
            source: source.into(),
        }
    }

    /// The stage the login stopped at.
    pub fn stage(&self) -> LoginStage {
        match self {
            Self::Disconnected { .. } => LoginStage::Disconnect,
            Self::Failed { stage, .. } | Self::Cancelled { stage } => *stage,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoginFailure {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Tunnel(#[from] TunnelError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("invalid chat message: {0}")]
    Chat(#[from] serde_json::Error),
    #[error(transparent)]
    Encryption(#[from] EncryptionError),
    #[error("timed out after {}", humanize(.0))]
    TimedOut(Duration),
}

fn humanize(duration: &Duration) -> humantime::FormattedDuration {
    humantime::format_duration(*duration)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_names_are_kebab_case() {
        assert_eq!(LoginStage::ProxyHandshake.to_string(), "proxy-handshake");
        assert_eq!(LoginStage::LoginSuccessDecode.as_ref(), "login-success-decode");
    }

    #[test]
    fn messages_carry_stage() {
        let err = LoginError::failed(
            LoginStage::PacketReceive,
            LoginFailure::TimedOut(Duration::from_secs(30)),
        );
        assert_eq!(err.stage(), LoginStage::PacketReceive);
        assert_eq!(
            err.to_string(),
            "login failed during packet-receive: timed out after 30s"
        );

        let err = LoginError::Disconnected {
            reason: ChatMessage::text("Server full"),
        };
        assert_eq!(err.stage(), LoginStage::Disconnect);
        assert_eq!(err.to_string(), "disconnected by server: Server full");
    }
}
