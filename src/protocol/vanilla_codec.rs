//! Codec implementation for the vanilla codec.
//! Supports zlib compression and CFB8 encryption.
//!
//! The two layers can only be switched on in the order the login
//! sequence does it: encryption (optional) first, then compression.

use super::BUFFER_LIMIT;
use crate::protocol::{
    packet, packet::ProtocolState, var_int_size, DecodeError, Decoder, Encode, Encoder, RawPacket,
};
use aes::{cipher::generic_array::GenericArray, Aes128};
use cfb8::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use flate2::Compression;
use std::{
    io::{Read, Write},
    marker::PhantomData,
    num::TryFromIntError,
    slice,
};

/// Almost everything a client sends during login is tiny,
/// so don't spend time on compression here.
const COMPRESSION_LEVEL: Compression = Compression::fast();

/// Key used for encryption. Doubles as the IV.
#[derive(Copy, Clone)]
pub struct EncryptionKey([u8; 16]);

impl EncryptionKey {
    pub fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}

/// Errors while framing or unframing packets.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("packet length of {0} exceeds maximum allowed")]
    PacketTooLarge(usize),
    #[error("decompressed {actual} bytes, but the packet claimed {expected}")]
    DataLengthMismatch { expected: usize, actual: usize },
    #[error("zlib: {0}")]
    Compression(#[from] std::io::Error),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    IntConversion(#[from] TryFromIntError),
}

/// Illegal transitions between codec modes.
#[derive(Debug, thiserror::Error)]
pub enum ModeError {
    #[error("encryption is already enabled")]
    EncryptionAlreadyEnabled,
    #[error("encryption cannot be enabled once compression is active")]
    EncryptionAfterCompression,
}

/// Codec state.
pub struct VanillaCodec<Side, State> {
    /// Buffered incoming bytes, already decrypted.
    read_buffer: Vec<u8>,
    encryption_state: Option<EncryptionState>,
    /// Packets of at least this many bytes get compressed.
    compression_threshold: Option<usize>,
    _marker: PhantomData<(Side, State)>,
}

impl<Side, State> Default for VanillaCodec<Side, State>
where
    Side: packet::Side,
    State: ProtocolState,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<Side, State> VanillaCodec<Side, State>
where
    Side: packet::Side,
    State: ProtocolState,
{
    pub fn new() -> Self {
        Self {
            read_buffer: Vec::new(),
            encryption_state: None,
            compression_threshold: None,
            _marker: PhantomData,
        }
    }

    pub fn switch_state<NewState: ProtocolState>(self) -> VanillaCodec<Side, NewState> {
        VanillaCodec {
            read_buffer: self.read_buffer,
            encryption_state: self.encryption_state,
            compression_threshold: self.compression_threshold,
            _marker: PhantomData,
        }
    }

    pub fn enable_encryption(&mut self, key: EncryptionKey) -> Result<(), ModeError> {
        if self.encryption_state.is_some() {
            return Err(ModeError::EncryptionAlreadyEnabled);
        }
        if self.compression_threshold.is_some() {
            return Err(ModeError::EncryptionAfterCompression);
        }
        self.encryption_state = Some(EncryptionState {
            encryptor: cfb8::Encryptor::new(&key.0.into(), &key.0.into()),
            decryptor: cfb8::Decryptor::new(&key.0.into(), &key.0.into()),
        });
        Ok(())
    }

    pub fn is_encrypted(&self) -> bool {
        self.encryption_state.is_some()
    }

    /// Sets the compression threshold for both directions.
    /// A negative threshold disables compression.
    pub fn set_compression_threshold(&mut self, threshold: i32) {
        self.compression_threshold = usize::try_from(threshold).ok();
    }

    /// The current threshold, or `-1` while compression is disabled.
    pub fn compression_threshold(&self) -> i32 {
        self.compression_threshold
            .map_or(-1, |t| i32::try_from(t).unwrap_or(i32::MAX))
    }

    /// Encodes a packet to a stream of bytes in the protocol format.
    pub fn encode_packet(&mut self, packet: &Side::SendPacket<State>) -> Result<Vec<u8>, CodecError> {
        let mut plain_buf = Vec::new();
        packet.encode(&mut Encoder::new(&mut plain_buf));
        self.encode_frame(plain_buf)
    }

    /// Frames an already-encoded packet (ID followed by body).
    pub fn encode_frame(&mut self, plain_buf: Vec<u8>) -> Result<Vec<u8>, CodecError> {
        let body = match self.compression_threshold {
            Some(threshold) => {
                let (data_length, data) = if plain_buf.len() >= threshold {
                    let mut encoder =
                        flate2::write::ZlibEncoder::new(Vec::new(), COMPRESSION_LEVEL);
                    encoder.write_all(&plain_buf)?;
                    (i32::try_from(plain_buf.len())?, encoder.finish()?)
                } else {
                    // send uncompressed
                    (0, plain_buf)
                };
                let mut buf = Vec::with_capacity(data.len() + var_int_size(data_length));
                let mut encoder = Encoder::new(&mut buf);
                encoder.write_var_int(data_length);
                encoder.write_slice(&data);
                buf
            }
            None => plain_buf,
        };

        if body.len() > BUFFER_LIMIT {
            return Err(CodecError::PacketTooLarge(body.len()));
        }

        let mut frame = Vec::with_capacity(body.len() + 5);
        let mut encoder = Encoder::new(&mut frame);
        encoder.write_var_int(i32::try_from(body.len())?);
        encoder.write_slice(&body);

        if let Some(EncryptionState { encryptor, .. }) = &mut self.encryption_state {
            for x in &mut frame {
                let slice = slice::from_mut(x);
                encryptor.encrypt_block_mut(GenericArray::from_mut_slice(slice));
            }
        }

        Ok(frame)
    }

    /// Gives data to the internal read buffer.
    ///
    /// `data` will be modified in-place and its results
    /// after calling this function are unspecified.
    ///
    /// Call `decode_frame` or `decode_packet` to get a packet.
    pub fn give_data(&mut self, mut data: impl AsMut<[u8]>) {
        let data = data.as_mut();
        if let Some(EncryptionState { decryptor, .. }) = &mut self.encryption_state {
            for byte in data.iter_mut() {
                let slice = slice::from_mut(byte);
                decryptor.decrypt_block_mut(GenericArray::from_mut_slice(slice));
            }
        }

        self.read_buffer.extend_from_slice(data);
    }

    /// Number of received bytes not yet returned as packets.
    pub fn buffered_len(&self) -> usize {
        self.read_buffer.len()
    }

    /// Attempts to take one complete frame off the read buffer.
    /// This should be called in a loop after any call to `give_data`
    /// until this function returns `None`.
    ///
    /// * If not enough data is available, returns `Ok(None)`.
    /// * If a packet was read, returns `Ok(Some(packet))`. More packets may be available.
    /// * If an error occurs, returns `Err(e)`, invalidating the stream.
    pub fn decode_frame(&mut self) -> Result<Option<RawPacket>, CodecError> {
        let mut decoder = Decoder::new(&self.read_buffer);
        let (length, length_size) = match decoder.read_var_int_with_size() {
            Ok(x) => x,
            Err(DecodeError::EndOfStream(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let length = usize::try_from(length)?;

        if length > BUFFER_LIMIT {
            return Err(CodecError::PacketTooLarge(length));
        }
        let packet_contents = match decoder.consume_slice(length) {
            Ok(x) => x,
            Err(DecodeError::EndOfStream(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let plain_data = match self.compression_threshold {
            Some(_) => {
                let mut decoder = Decoder::new(packet_contents);
                let data_length = usize::try_from(decoder.read_var_int()?)?;
                if data_length == 0 {
                    decoder.buffer().to_vec()
                } else {
                    if data_length > BUFFER_LIMIT {
                        return Err(CodecError::PacketTooLarge(data_length));
                    }
                    let mut buf = Vec::with_capacity(data_length);
                    flate2::read::ZlibDecoder::new(decoder.buffer())
                        .take(BUFFER_LIMIT as u64)
                        .read_to_end(&mut buf)?;
                    if buf.len() != data_length {
                        return Err(CodecError::DataLengthMismatch {
                            expected: data_length,
                            actual: buf.len(),
                        });
                    }
                    buf
                }
            }
            None => packet_contents.to_vec(),
        };

        self.read_buffer.drain(..length_size + length);
        Ok(Some(RawPacket::new(plain_data)?))
    }

    /// Like `decode_frame`, but also interprets the packet.
    pub fn decode_packet(&mut self) -> Result<Option<Side::RecvPacket<State>>, CodecError> {
        match self.decode_frame()? {
            Some(raw) => Ok(Some(raw.decode()?)),
            None => Ok(None),
        }
    }
}

struct EncryptionState {
    encryptor: cfb8::Encryptor<Aes128>,
    decryptor: cfb8::Decryptor<Aes128>,
}
