//! Packet-level I/O over any byte stream.

use crate::protocol::{
    packet,
    packet::ProtocolState,
    vanilla_codec::{CodecError, EncryptionKey, ModeError, VanillaCodec},
    DecodeError, RawPacket,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const READ_CHUNK_SIZE: usize = 4096;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Mode(#[from] ModeError),
    #[error("connection closed by peer")]
    Closed,
}

/// Sends and receives vanilla-framed packets over `S`.
///
/// The transport owns its stream exclusively. Packets are read one frame
/// at a time; a frame is fully consumed before the next one is decoded.
pub struct PacketTransport<S, Side, State> {
    stream: S,
    codec: VanillaCodec<Side, State>,
    read_buffer: Box<[u8]>,
}

impl<S, Side, State> PacketTransport<S, Side, State>
where
    S: AsyncRead + AsyncWrite + Unpin,
    Side: packet::Side,
    State: ProtocolState,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            codec: VanillaCodec::new(),
            read_buffer: vec![0u8; READ_CHUNK_SIZE].into_boxed_slice(),
        }
    }

    pub async fn send_packet(
        &mut self,
        packet: impl Into<Side::SendPacket<State>>,
    ) -> Result<(), TransportError> {
        let packet = packet.into();
        let bytes = self.codec.encode_packet(&packet)?;
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        tracing::trace!("Sent {} ({} bytes)", packet.as_ref(), bytes.len());
        Ok(())
    }

    /// Reads the next complete frame without interpreting it.
    pub async fn recv_raw(&mut self) -> Result<RawPacket, TransportError> {
        loop {
            if let Some(packet) = self.codec.decode_frame()? {
                return Ok(packet);
            }

            let n = self.stream.read(&mut self.read_buffer).await?;
            if n == 0 {
                return Err(TransportError::Closed);
            }
            self.codec.give_data(&mut self.read_buffer[..n]);
        }
    }

    pub async fn recv_packet(&mut self) -> Result<Side::RecvPacket<State>, TransportError> {
        let raw = self.recv_raw().await?;
        Ok(raw.decode()?)
    }

    /// A negative threshold disables compression.
    pub fn set_compression_threshold(&mut self, threshold: i32) {
        self.codec.set_compression_threshold(threshold);
        tracing::debug!("Compression threshold set to {threshold}");
    }

    pub fn compression_threshold(&self) -> i32 {
        self.codec.compression_threshold()
    }

    /// Every read and write after this call passes through the cipher.
    pub fn enable_encryption(&mut self, key: EncryptionKey) -> Result<(), TransportError> {
        self.codec.enable_encryption(key)?;
        tracing::debug!("Encryption enabled");
        Ok(())
    }

    pub fn is_encrypted(&self) -> bool {
        self.codec.is_encrypted()
    }

    pub fn switch_state<NewState: ProtocolState>(self) -> PacketTransport<S, Side, NewState> {
        PacketTransport {
            stream: self.stream,
            codec: self.codec.switch_state(),
            read_buffer: self.read_buffer,
        }
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    /// Gives back the stream. Bytes that were received but not yet
    /// returned as packets are lost.
    pub fn into_inner(self) -> S {
        self.stream
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::packet::{client, server, side, state};
    use tokio::io::{duplex, DuplexStream};

    fn pair() -> (
        PacketTransport<DuplexStream, side::Client, state::Login>,
        PacketTransport<DuplexStream, side::Server, state::Login>,
    ) {
        let (a, b) = duplex(64 * 1024);
        (PacketTransport::new(a), PacketTransport::new(b))
    }

    #[tokio::test]
    async fn packets_cross_in_both_directions() {
        let (mut client, mut server) = pair();
        client
            .send_packet(client::login::LoginStart { name: "Alice".into() })
            .await
            .unwrap();
        match server.recv_packet().await.unwrap() {
            client::login::Packet::LoginStart(start) => assert_eq!(start.name, "Alice"),
            other => panic!("unexpected packet {other:?}"),
        }

        server
            .send_packet(server::login::SetCompression { threshold: 256 })
            .await
            .unwrap();
        let raw = client.recv_raw().await.unwrap();
        assert_eq!(raw.id(), 0x03);
    }

    #[tokio::test]
    async fn compressed_and_encrypted_session() {
        let (mut client, mut server) = pair();
        let key = EncryptionKey::new(*b"0123456789abcdef");
        client.enable_encryption(key).unwrap();
        server.enable_encryption(key).unwrap();
        client.set_compression_threshold(16);
        server.set_compression_threshold(16);
        assert!(client.is_encrypted());
        assert_eq!(client.compression_threshold(), 16);

        let name = "y".repeat(300);
        client
            .send_packet(client::login::LoginStart { name: name.clone() })
            .await
            .unwrap();
        match server.recv_packet().await.unwrap() {
            client::login::Packet::LoginStart(start) => assert_eq!(start.name, name),
            other => panic!("unexpected packet {other:?}"),
        }
    }

    #[tokio::test]
    async fn frames_split_across_reads() {
        let (a, mut b) = duplex(64);
        let mut client: PacketTransport<_, side::Client, state::Login> = PacketTransport::new(a);

        let mut codec = VanillaCodec::<side::Server, state::Login>::new();
        let bytes = codec
            .encode_packet(&server::login::SetCompression { threshold: 512 }.into())
            .unwrap();
        let writer = tokio::spawn(async move {
            for byte in bytes {
                b.write_all(&[byte]).await.unwrap();
                tokio::task::yield_now().await;
            }
            b
        });

        match client.recv_packet().await.unwrap() {
            server::login::Packet::SetCompression(p) => assert_eq!(p.threshold, 512),
            other => panic!("unexpected packet {other:?}"),
        }
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn eof_is_reported_as_closed() {
        let (mut client, server) = pair();
        drop(server);
        assert!(matches!(
            client.recv_raw().await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn encryption_after_compression_is_rejected() {
        let (mut client, _server) = pair();
        client.set_compression_threshold(256);
        assert!(matches!(
            client.enable_encryption(EncryptionKey::new([0; 16])),
            Err(TransportError::Mode(ModeError::EncryptionAfterCompression))
        ));
    }

    #[tokio::test]
    async fn switching_state_keeps_modes() {
        let (a, _b) = duplex(64);
        let mut transport: PacketTransport<_, side::Client, state::Handshake> =
            PacketTransport::new(a);
        transport
            .send_packet(client::handshake::Handshake {
                protocol_version: 758,
                server_address: "localhost".into(),
                server_port: 25565,
                next_state: client::handshake::NextState::Login,
            })
            .await
            .unwrap();
        transport.set_compression_threshold(64);
        let transport = transport.switch_state::<state::Login>();
        assert_eq!(transport.compression_threshold(), 64);
    }
}
