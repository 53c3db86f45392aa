//! The client side of the login sequence.
//!
//! A [`ClientSession`] resolves the server address, opens a tunnel through
//! the HTTP proxy, sends Handshake and Login Start, then handles server
//! packets until Login Success or Disconnect:
//!
//! * Encryption Request is answered and the connection switches to AES/CFB8.
//! * Set Compression changes the transport's threshold.
//! * Login Plugin Requests and unknown packets are logged and otherwise
//!   ignored; servers that require an answer will eventually time out.

use crate::{
    auth::{Auth, OfflineSession, SessionService},
    encryption,
    error::{LoginError, LoginFailure, LoginStage},
    protocol::{
        packet::{client, client::handshake::NextState, server, side, state},
        packet_id::login::clientbound,
        DEFAULT_PROTOCOL_VERSION,
    },
    resolver::{Resolve, ServerAddress, SrvResolver},
    transport::PacketTransport,
    tunnel::{self, ProxyCredential, TunnelRequest, TunnelStream},
};
use std::{future::Future, time::Duration};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
    time::timeout,
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Tunables for a login attempt.
#[derive(Debug, Clone)]
pub struct LoginConfig {
    /// Sent in the Handshake. Login Start is encoded in the form this
    /// version expects (name only).
    pub protocol_version: i32,
    /// Bounds address resolution and the TCP connect to the proxy.
    pub connect_timeout: Duration,
    /// Bounds every other read or write, one at a time.
    pub io_timeout: Duration,
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            protocol_version: DEFAULT_PROTOCOL_VERSION,
            connect_timeout: Duration::from_secs(10),
            io_timeout: Duration::from_secs(30),
        }
    }
}

/// The identity the server assigned in Login Success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedIn {
    pub uuid: Uuid,
    pub name: String,
}

pub type LoginOutcome = Result<LoggedIn, LoginError>;

/// Transport left over after a successful login through a proxy.
pub type LoginTransport<S = TunnelStream<TcpStream>> =
    PacketTransport<S, side::Client, state::Login>;

/// One player's login attempts.
///
/// The session exclusively owns its connection: after a successful login
/// the transport is kept until taken with [`take_transport`](Self::take_transport),
/// and any failure drops it.
pub struct ClientSession<R = SrvResolver, A = OfflineSession> {
    config: LoginConfig,
    auth: Auth,
    resolver: R,
    sessions: A,
    cancel: CancellationToken,
    uuid: Option<Uuid>,
    name: Option<String>,
    transport: Option<LoginTransport>,
}

impl ClientSession {
    /// A session using SRV lookups and offline mode.
    pub fn new(auth: Auth) -> Self {
        Self::with_parts(auth, SrvResolver::new(), OfflineSession)
    }
}

impl<R, A> ClientSession<R, A>
where
    R: Resolve,
    A: SessionService,
{
    pub fn with_parts(auth: Auth, resolver: R, sessions: A) -> Self {
        Self {
            config: LoginConfig::default(),
            auth,
            resolver,
            sessions,
            cancel: CancellationToken::new(),
            uuid: None,
            name: None,
            transport: None,
        }
    }

    pub fn with_config(mut self, config: LoginConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_resolver<R2: Resolve>(self, resolver: R2) -> ClientSession<R2, A> {
        ClientSession {
            config: self.config,
            auth: self.auth,
            resolver,
            sessions: self.sessions,
            cancel: self.cancel,
            uuid: self.uuid,
            name: self.name,
            transport: self.transport,
        }
    }

    pub fn with_session_service<A2: SessionService>(self, sessions: A2) -> ClientSession<R, A2> {
        ClientSession {
            config: self.config,
            auth: self.auth,
            resolver: self.resolver,
            sessions,
            cancel: self.cancel,
            uuid: self.uuid,
            name: self.name,
            transport: self.transport,
        }
    }

    /// Cancelling `token` aborts the current blocking step with
    /// [`LoginError::Cancelled`].
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn config(&self) -> &LoginConfig {
        &self.config
    }

    pub fn auth(&self) -> &Auth {
        &self.auth
    }

    /// Set by a successful login.
    pub fn uuid(&self) -> Option<Uuid> {
        self.uuid
    }

    /// Set by a successful login.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn transport(&self) -> Option<&LoginTransport> {
        self.transport.as_ref()
    }

    pub fn transport_mut(&mut self) -> Option<&mut LoginTransport> {
        self.transport.as_mut()
    }

    pub fn take_transport(&mut self) -> Option<LoginTransport> {
        self.transport.take()
    }

    /// Logs in to `server` through the HTTP proxy at `proxy`.
    ///
    /// `credential` is `user:password` for Basic proxy authentication;
    /// a blank string sends no credentials.
    pub async fn join_server_with_proxy(
        &mut self,
        server: &str,
        proxy: &str,
        credential: &str,
    ) -> Result<(), LoginError> {
        self.login_with_proxy(server, proxy, credential)
            .await
            .map(|_| ())
    }

    /// Like [`join_server_with_proxy`](Self::join_server_with_proxy),
    /// returning the identity the server assigned.
    pub async fn login_with_proxy(
        &mut self,
        server: &str,
        proxy: &str,
        credential: &str,
    ) -> LoginOutcome {
        self.transport = None;
        self.uuid = None;
        self.name = None;
        let cancel = self.cancel.clone();

        let target = bounded(
            &cancel,
            LoginStage::Resolution,
            self.config.connect_timeout,
            self.resolver.resolve(server),
        )
        .await?;
        tracing::debug!("Resolved {server} to {target}");

        let request = TunnelRequest::new(proxy, target.clone(), ProxyCredential::new(credential))
            .map_err(|e| LoginError::failed(LoginStage::ProxyConnect, e))?;
        let stream = bounded(
            &cancel,
            LoginStage::ProxyConnect,
            self.config.connect_timeout,
            tunnel::connect_proxy(&request),
        )
        .await?;
        let stream = bounded(
            &cancel,
            LoginStage::ProxyHandshake,
            self.config.io_timeout,
            tunnel::open_tunnel(stream, &request),
        )
        .await?;
        tracing::info!("Tunnel to {target} established through {}", request.proxy());

        let (logged_in, transport) = self.login_over(stream, &target).await?;
        self.transport = Some(transport);
        Ok(logged_in)
    }

    /// Runs the handshake and login on an already-open stream to `target`.
    ///
    /// The stream is dropped on failure. On success the login-state
    /// transport is handed back to the caller.
    pub async fn login_over<S>(
        &mut self,
        stream: S,
        target: &ServerAddress,
    ) -> Result<(LoggedIn, LoginTransport<S>), LoginError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let cancel = self.cancel.clone();
        let io_timeout = self.config.io_timeout;

        let mut transport: PacketTransport<S, side::Client, state::Handshake> =
            PacketTransport::new(stream);
        bounded(
            &cancel,
            LoginStage::HandshakeSend,
            io_timeout,
            transport.send_packet(client::handshake::Handshake {
                protocol_version: self.config.protocol_version,
                server_address: target.host.clone(),
                server_port: target.port,
                next_state: NextState::Login,
            }),
        )
        .await?;

        tracing::debug!("Transition to Login state");
        let mut transport = transport.switch_state::<state::Login>();
        bounded(
            &cancel,
            LoginStage::LoginStartSend,
            io_timeout,
            transport.send_packet(client::login::LoginStart {
                name: self.auth.name.clone(),
            }),
        )
        .await?;

        loop {
            let raw = bounded(
                &cancel,
                LoginStage::PacketReceive,
                io_timeout,
                transport.recv_raw(),
            )
            .await?;
            let packet: server::login::Packet = raw
                .decode()
                .map_err(|e| LoginError::failed(decode_stage(raw.id()), e))?;

            match packet {
                server::login::Packet::Disconnect(disconnect) => {
                    let reason = disconnect
                        .reason()
                        .map_err(|e| LoginError::failed(LoginStage::Disconnect, e))?;
                    tracing::info!("Disconnected by server: {reason}");
                    return Err(LoginError::Disconnected { reason });
                }
                server::login::Packet::EncryptionRequest(request) => {
                    tracing::debug!("Server requested encryption");
                    let (response, key) = bounded(
                        &cancel,
                        LoginStage::Encryption,
                        io_timeout,
                        encryption::negotiate(&request, &self.auth, &self.sessions),
                    )
                    .await?;
                    bounded(
                        &cancel,
                        LoginStage::Encryption,
                        io_timeout,
                        transport.send_packet(response),
                    )
                    .await?;
                    transport
                        .enable_encryption(key)
                        .map_err(|e| LoginError::failed(LoginStage::Encryption, e))?;
                }
                server::login::Packet::SetCompression(packet) => {
                    transport.set_compression_threshold(packet.threshold);
                }
                server::login::Packet::LoginSuccess(success) => {
                    tracing::info!("Logged in as {} ({})", success.username, success.uuid);
                    self.uuid = Some(success.uuid);
                    self.name = Some(success.username.clone());
                    let logged_in = LoggedIn {
                        uuid: success.uuid,
                        name: success.username,
                    };
                    return Ok((logged_in, transport));
                }
                server::login::Packet::LoginPluginRequest(request) => {
                    tracing::debug!(
                        "Ignoring login plugin request {} on channel {}",
                        request.message_id,
                        request.channel
                    );
                }
                server::login::Packet::Unknown(packet) => {
                    tracing::debug!(
                        "Ignoring unknown login packet 0x{:02x} ({} bytes)",
                        packet.id,
                        packet.data.len()
                    );
                }
            }
        }
    }
}

/// Runs one blocking step, bounded by `limit` and by `cancel`.
async fn bounded<T, E>(
    cancel: &CancellationToken,
    stage: LoginStage,
    limit: Duration,
    fut: impl Future<Output = Result<T, E>>,
) -> Result<T, LoginError>
where
    E: Into<LoginFailure>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(LoginError::Cancelled { stage }),
        result = timeout(limit, fut) => match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(LoginError::failed(stage, e)),
            Err(_) => Err(LoginError::failed(stage, LoginFailure::TimedOut(limit))),
        },
    }
}

/// The stage blamed when a server packet with this ID fails to decode.
fn decode_stage(id: i32) -> LoginStage {
    match id {
        clientbound::DISCONNECT => LoginStage::Disconnect,
        clientbound::ENCRYPTION_REQUEST => LoginStage::Encryption,
        clientbound::LOGIN_SUCCESS => LoginStage::LoginSuccessDecode,
        clientbound::SET_COMPRESSION => LoginStage::CompressionDecode,
        _ => LoginStage::PacketReceive,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        chat::ChatMessage,
        protocol::{packet_id, vanilla_codec::EncryptionKey},
        resolver::StaticResolver,
    };
    use rand::rngs::OsRng;
    use rsa::{pkcs8::EncodePublicKey, Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
    use tokio::{
        io::{duplex, AsyncWriteExt, DuplexStream},
        task::JoinHandle,
    };

    type ServerSide<State> = PacketTransport<DuplexStream, side::Server, State>;

    fn session() -> ClientSession<StaticResolver, OfflineSession> {
        ClientSession::with_parts(
            Auth::offline("Alice"),
            StaticResolver::port_default(),
            OfflineSession,
        )
    }

    fn target() -> ServerAddress {
        ServerAddress::new("mc.example.com", 25565)
    }

    /// Reads Handshake and Login Start off a fresh connection.
    async fn accept_login(stream: DuplexStream) -> ServerSide<state::Login> {
        let mut server: ServerSide<state::Handshake> = PacketTransport::new(stream);
        let client::handshake::Packet::Handshake(handshake) = server.recv_packet().await.unwrap();
        assert_eq!(handshake.protocol_version, DEFAULT_PROTOCOL_VERSION);
        assert_eq!(handshake.server_address, "mc.example.com");
        assert_eq!(handshake.server_port, 25565);
        assert_eq!(handshake.next_state, NextState::Login);

        let mut server = server.switch_state::<state::Login>();
        match server.recv_packet().await.unwrap() {
            client::login::Packet::LoginStart(start) => assert_eq!(start.name, "Alice"),
            other => panic!("expected Login Start, got {other:?}"),
        }
        server
    }

    fn success(name: &str) -> server::login::LoginSuccess {
        server::login::LoginSuccess {
            uuid: Uuid::from_u128(0xabcdef),
            username: name.to_owned(),
            properties: Vec::new(),
        }
    }

    #[tokio::test]
    async fn compression_then_success() {
        let (client, server) = duplex(64 * 1024);
        let server = tokio::spawn(async move {
            let mut server = accept_login(server).await;
            server
                .send_packet(server::login::SetCompression { threshold: 256 })
                .await
                .unwrap();
            server.set_compression_threshold(256);
            server.send_packet(success("Alice_")).await.unwrap();
            server
        });

        let mut session = session();
        let (logged_in, transport) = session.login_over(client, &target()).await.unwrap();
        assert_eq!(logged_in.name, "Alice_");
        assert_eq!(logged_in.uuid, Uuid::from_u128(0xabcdef));
        assert_eq!(session.uuid(), Some(logged_in.uuid));
        assert_eq!(session.name(), Some("Alice_"));
        assert_eq!(transport.compression_threshold(), 256);
        assert!(!transport.is_encrypted());
        drop(server.await.unwrap());
    }

    #[tokio::test]
    async fn disconnect_reason_is_surfaced() {
        let (client, server) = duplex(64 * 1024);
        tokio::spawn(async move {
            let mut server = accept_login(server).await;
            server
                .send_packet(server::login::Disconnect::new(&ChatMessage::text("Server full")))
                .await
                .unwrap();
        });

        match session().login_over(client, &target()).await {
            Err(LoginError::Disconnected { reason }) => {
                assert_eq!(reason.to_plain_text(), "Server full")
            }
            other => panic!("expected disconnect, got {:?}", other.map(|(l, _)| l)),
        }
    }

    #[tokio::test]
    async fn outdated_client_disconnect_with_numeric_argument() {
        let (client, server) = duplex(64 * 1024);
        tokio::spawn(async move {
            let mut server = accept_login(server).await;
            server
                .send_packet(server::login::Disconnect {
                    reason: r#"{"translate":"multiplayer.disconnect.outdated_client","with":[758]}"#
                        .into(),
                })
                .await
                .unwrap();
        });

        match session().login_over(client, &target()).await {
            Err(LoginError::Disconnected { reason }) => assert_eq!(
                reason.to_plain_text(),
                "multiplayer.disconnect.outdated_client[758]"
            ),
            other => panic!("expected disconnect, got {:?}", other.map(|(l, _)| l)),
        }
    }

    #[tokio::test]
    async fn unreadable_disconnect_reason() {
        let (client, server) = duplex(64 * 1024);
        tokio::spawn(async move {
            let mut server = accept_login(server).await;
            server
                .send_packet(server::login::Disconnect {
                    reason: "{not json".into(),
                })
                .await
                .unwrap();
        });

        let err = session().login_over(client, &target()).await.err().unwrap();
        assert_eq!(err.stage(), LoginStage::Disconnect);
        assert!(matches!(
            err,
            LoginError::Failed {
                source: LoginFailure::Chat(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn unknown_and_plugin_packets_are_skipped() {
        let (client, server) = duplex(64 * 1024);
        let server = tokio::spawn(async move {
            let mut server = accept_login(server).await;
            server
                .send_packet(crate::protocol::UnknownPacket {
                    id: 0x2a,
                    data: vec![1, 2, 3],
                })
                .await
                .unwrap();
            server
                .send_packet(server::login::LoginPluginRequest {
                    message_id: 1,
                    channel: "velocity:player_info".into(),
                    data: vec![1],
                })
                .await
                .unwrap();
            server.send_packet(success("Alice")).await.unwrap();
            server
        });

        let (logged_in, _) = session().login_over(client, &target()).await.unwrap();
        assert_eq!(logged_in.name, "Alice");
        drop(server.await.unwrap());
    }

    #[tokio::test]
    async fn encryption_then_compression_then_success() {
        let key = RsaPrivateKey::new(&mut OsRng, 1024).unwrap();
        let public_key = RsaPublicKey::from(&key)
            .to_public_key_der()
            .unwrap()
            .as_bytes()
            .to_vec();

        let (client, server) = duplex(64 * 1024);
        let server = tokio::spawn(async move {
            let mut server = accept_login(server).await;
            server
                .send_packet(server::login::EncryptionRequest {
                    server_id: String::new(),
                    public_key,
                    verify_token: vec![1, 2, 3, 4],
                })
                .await
                .unwrap();
            let response = match server.recv_packet().await.unwrap() {
                client::login::Packet::EncryptionResponse(response) => response,
                other => panic!("expected Encryption Response, got {other:?}"),
            };
            let secret = key.decrypt(Pkcs1v15Encrypt, &response.shared_secret).unwrap();
            let token = key.decrypt(Pkcs1v15Encrypt, &response.verify_token).unwrap();
            assert_eq!(token, [1, 2, 3, 4]);

            let secret: [u8; 16] = secret.try_into().unwrap();
            server.enable_encryption(EncryptionKey::new(secret)).unwrap();
            server
                .send_packet(server::login::SetCompression { threshold: 64 })
                .await
                .unwrap();
            server.set_compression_threshold(64);
            server.send_packet(success(&"A".repeat(100))).await.unwrap();
            server
        });

        let (logged_in, transport) = session().login_over(client, &target()).await.unwrap();
        assert_eq!(logged_in.name, "A".repeat(100));
        assert!(transport.is_encrypted());
        assert_eq!(transport.compression_threshold(), 64);
        drop(server.await.unwrap());
    }

    #[tokio::test]
    async fn malformed_login_success() {
        let (client, server) = duplex(64 * 1024);
        tokio::spawn(async move {
            let server = accept_login(server).await;
            let mut stream = server.into_inner();
            // id 0x02 followed by a truncated UUID
            stream
                .write_all(&[3, packet_id::login::clientbound::LOGIN_SUCCESS as u8, 0x01, 0x02])
                .await
                .unwrap();
            stream
        });

        let err = session().login_over(client, &target()).await.err().unwrap();
        assert_eq!(err.stage(), LoginStage::LoginSuccessDecode);
    }

    #[tokio::test]
    async fn malformed_set_compression() {
        let (client, server) = duplex(64 * 1024);
        tokio::spawn(async move {
            let server = accept_login(server).await;
            let mut stream = server.into_inner();
            // varint with its continuation bit set and nothing after it
            stream
                .write_all(&[2, packet_id::login::clientbound::SET_COMPRESSION as u8, 0x80])
                .await
                .unwrap();
            stream
        });

        let err = session().login_over(client, &target()).await.err().unwrap();
        assert_eq!(err.stage(), LoginStage::CompressionDecode);
    }

    #[tokio::test]
    async fn closed_connection_fails_packet_receive() {
        let (client, server) = duplex(64 * 1024);
        tokio::spawn(async move {
            drop(accept_login(server).await);
        });

        let err = session().login_over(client, &target()).await.err().unwrap();
        assert_eq!(err.stage(), LoginStage::PacketReceive);
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let (client, server) = duplex(64 * 1024);
        let _server = tokio::spawn(async move { accept_login(server).await });

        let mut session = session().with_config(LoginConfig {
            io_timeout: Duration::from_millis(100),
            ..Default::default()
        });
        match session.login_over(client, &target()).await {
            Err(LoginError::Failed {
                stage: LoginStage::PacketReceive,
                source: LoginFailure::TimedOut(_),
            }) => {}
            other => panic!("expected timeout, got {:?}", other.map(|(l, _)| l)),
        }
    }

    #[tokio::test]
    async fn cancellation_stops_login() {
        let (client, _server) = duplex(64 * 1024);
        let token = CancellationToken::new();
        token.cancel();

        let mut session = session().with_cancellation(token);
        match session.login_over(client, &target()).await {
            Err(LoginError::Cancelled { stage }) => assert_eq!(stage, LoginStage::HandshakeSend),
            other => panic!("expected cancellation, got {:?}", other.map(|(l, _)| l)),
        }
    }

    #[tokio::test]
    async fn unreachable_proxy_fails_proxy_connect() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let mut session = session();
        let err = session
            .join_server_with_proxy("mc.example.com", &addr, "")
            .await
            .unwrap_err();
        assert_eq!(err.stage(), LoginStage::ProxyConnect);
        assert!(session.transport().is_none());
    }

    fn spawn_join<R, A>(
        mut session: ClientSession<R, A>,
        proxy: String,
    ) -> JoinHandle<Result<(), LoginError>>
    where
        R: Resolve + Send + Sync + 'static,
        A: SessionService + Send + Sync + 'static,
    {
        tokio::spawn(async move {
            session
                .join_server_with_proxy("mc.example.com", &proxy, "")
                .await
        })
    }

    #[tokio::test]
    async fn login_runs_on_spawned_task() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = spawn_join(session(), addr).await.unwrap().unwrap_err();
        assert_eq!(err.stage(), LoginStage::ProxyConnect);
    }

    #[tokio::test]
    async fn empty_proxy_address() {
        let err = session()
            .join_server_with_proxy("mc.example.com", "", "")
            .await
            .unwrap_err();
        assert_eq!(err.stage(), LoginStage::ProxyConnect);
    }

    #[tokio::test]
    async fn bad_server_address_fails_resolution() {
        let err = session()
            .join_server_with_proxy("a:b:c", "127.0.0.1:3128", "")
            .await
            .unwrap_err();
        assert_eq!(err.stage(), LoginStage::Resolution);
    }

    #[test]
    fn decode_failures_map_to_stages() {
        assert_eq!(decode_stage(0x00), LoginStage::Disconnect);
        assert_eq!(decode_stage(0x01), LoginStage::Encryption);
        assert_eq!(decode_stage(0x02), LoginStage::LoginSuccessDecode);
        assert_eq!(decode_stage(0x03), LoginStage::CompressionDecode);
        assert_eq!(decode_stage(0x04), LoginStage::PacketReceive);
    }
}
