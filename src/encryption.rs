//! Answers an Encryption Request: picks a shared secret, registers the join
//! with the session server, and encrypts the secret for the game server.

use crate::{
    auth::{Auth, SessionService},
    protocol::{
        packet::{client::login::EncryptionResponse, server::login::EncryptionRequest},
        vanilla_codec::EncryptionKey,
    },
};
use num_bigint::BigInt;
use rand::{rngs::OsRng, RngCore};
use rsa::{pkcs8::DecodePublicKey, Pkcs1v15Encrypt, RsaPublicKey};
use sha1::{Digest, Sha1};

#[derive(Debug, thiserror::Error)]
pub enum EncryptionError {
    #[error("server sent an invalid public key: {0}")]
    PublicKey(#[from] rsa::pkcs8::spki::Error),
    #[error("RSA encryption failed: {0}")]
    Rsa(#[from] rsa::Error),
    #[error("session server join failed: {0}")]
    SessionJoin(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// The hash sent to the session server: SHA-1 over the server ID, the
/// shared secret and the public key, printed as a signed hex integer.
pub fn server_hash(server_id: &str, shared_secret: &[u8], public_key: &[u8]) -> String {
    let digest = Sha1::new()
        .chain_update(server_id.as_bytes())
        .chain_update(shared_secret)
        .chain_update(public_key)
        .finalize();
    BigInt::from_signed_bytes_be(&digest).to_str_radix(16)
}

/// Builds the Encryption Response for `request`, returning it with the key
/// the connection must switch to once the response has been sent.
///
/// The session server is only contacted when `auth` carries an access token.
pub async fn negotiate(
    request: &EncryptionRequest,
    auth: &Auth,
    sessions: &impl SessionService,
) -> Result<(EncryptionResponse, EncryptionKey), EncryptionError> {
    let mut secret = [0u8; 16];
    OsRng.fill_bytes(&mut secret);

    let public_key = RsaPublicKey::from_public_key_der(&request.public_key)?;

    if auth.is_online() {
        let hash = server_hash(&request.server_id, &secret, &request.public_key);
        tracing::debug!("Joining session with server hash {hash}");
        sessions
            .join_server(auth, &hash)
            .await
            .map_err(|e| EncryptionError::SessionJoin(e.into()))?;
    } else {
        tracing::debug!("No access token, skipping session join");
    }

    let shared_secret = public_key.encrypt(&mut OsRng, Pkcs1v15Encrypt, &secret)?;
    let verify_token = public_key.encrypt(&mut OsRng, Pkcs1v15Encrypt, &request.verify_token)?;

    Ok((
        EncryptionResponse {
            shared_secret,
            verify_token,
        },
        EncryptionKey::new(secret),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::OfflineSession;
    use rsa::{pkcs8::EncodePublicKey, RsaPrivateKey};
    use std::sync::Mutex;

    fn name_hash(name: &str) -> String {
        server_hash(name, &[], &[])
    }

    #[test]
    fn known_hashes() {
        assert_eq!(name_hash("Notch"), "4ed1f46bbe04bc756bcb17c0c7ce3e4632f06a48");
        assert_eq!(name_hash("jeb_"), "-7c9d5b0044c130109a5d7b5fb5c317c02b4e28c1");
        assert_eq!(name_hash("simon"), "88e16a1019277b15d58faf0541e11910eb756f6");
    }

    #[test]
    fn hash_covers_all_inputs() {
        assert_eq!(server_hash("", b"No", b"tch"), name_hash("Notch"));
        assert_ne!(server_hash("", b"Notch", b"!"), name_hash("Notch"));
    }

    fn request(key: &RsaPrivateKey) -> EncryptionRequest {
        EncryptionRequest {
            server_id: String::new(),
            public_key: RsaPublicKey::from(key)
                .to_public_key_der()
                .unwrap()
                .as_bytes()
                .to_vec(),
            verify_token: vec![9, 8, 7, 6],
        }
    }

    #[derive(Default)]
    struct RecordingSession(Mutex<Vec<String>>);

    impl SessionService for RecordingSession {
        async fn join_server(&self, _auth: &Auth, server_hash: &str) -> anyhow::Result<()> {
            self.0.lock().unwrap().push(server_hash.to_owned());
            Ok(())
        }
    }

    struct FailingSession;

    impl SessionService for FailingSession {
        async fn join_server(&self, _auth: &Auth, _server_hash: &str) -> anyhow::Result<()> {
            anyhow::bail!("invalid session")
        }
    }

    #[tokio::test]
    async fn server_can_decrypt_response() {
        let key = RsaPrivateKey::new(&mut OsRng, 1024).unwrap();
        let request = request(&key);
        let (response, shared) = negotiate(&request, &Auth::offline("Alice"), &RecordingSession::default())
            .await
            .unwrap();

        let secret = key.decrypt(Pkcs1v15Encrypt, &response.shared_secret).unwrap();
        let token = key.decrypt(Pkcs1v15Encrypt, &response.verify_token).unwrap();
        assert_eq!(secret, shared.as_bytes());
        assert_eq!(token, request.verify_token);
    }

    #[tokio::test]
    async fn online_mode_joins_with_matching_hash() {
        let key = RsaPrivateKey::new(&mut OsRng, 1024).unwrap();
        let request = request(&key);
        let auth = Auth {
            name: "Alice".into(),
            uuid: Some(uuid::Uuid::from_u128(7)),
            access_token: Some("token".into()),
        };
        let sessions = RecordingSession::default();
        let (_, shared) = negotiate(&request, &auth, &sessions).await.unwrap();

        let joined = sessions.0.lock().unwrap().clone();
        assert_eq!(
            joined,
            [server_hash("", shared.as_bytes(), &request.public_key)]
        );
    }

    #[tokio::test]
    async fn offline_mode_skips_session_server() {
        let key = RsaPrivateKey::new(&mut OsRng, 1024).unwrap();
        negotiate(&request(&key), &Auth::offline("Alice"), &FailingSession)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn join_failure_is_reported() {
        let key = RsaPrivateKey::new(&mut OsRng, 1024).unwrap();
        let auth = Auth {
            name: "Alice".into(),
            uuid: None,
            access_token: Some("token".into()),
        };
        assert!(matches!(
            negotiate(&request(&key), &auth, &FailingSession).await,
            Err(EncryptionError::SessionJoin(_))
        ));
    }

    #[tokio::test]
    async fn garbage_public_key() {
        let request = EncryptionRequest {
            server_id: String::new(),
            public_key: vec![1, 2, 3],
            verify_token: vec![],
        };
        assert!(matches!(
            negotiate(&request, &Auth::offline("Alice"), &OfflineSession).await,
            Err(EncryptionError::PublicKey(_))
        ));
    }
}
