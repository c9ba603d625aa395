//! Framing codecs for the control stream.
//!
//! Three framings coexist over a session's lifetime:
//!
//! 1. Binary handshake frame: `0x00 | u32-BE LEN | base64(JSON)`, LEN
//!    bounded by [`MAX_HANDSHAKE_LEN`].
//! 2. Encrypted record frame: same envelope around
//!    `base64(NONCE || CIPHERTEXT || TAG)`, LEN bounded by
//!    [`MAX_RECORD_LEN`].
//! 3. Legacy plaintext frame: a JSON object followed by `\n`, used only
//!    when encryption is disabled.
//!
//! The decoder keeps its carry-over buffer across framing switches: the
//! server's handshake reply and the first encrypted record can arrive in
//! a single read.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Leading magic byte of the binary envelope. Distinguishes it from
/// line-terminated JSON used by older servers.
pub const FRAME_MAGIC: u8 = 0x00;

/// Maximum base64 length of a handshake frame.
pub const MAX_HANDSHAKE_LEN: usize = 64 * 1024;

/// Maximum base64 length of an encrypted record frame.
pub const MAX_RECORD_LEN: usize = 1400 * 1024;

const HEADER_LEN: usize = 5;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("invalid frame magic byte 0x{0:02x}")]
    BadMagic(u8),

    #[error("frame length {len} exceeds limit {max}")]
    Oversize { len: usize, max: usize },

    #[error("stream ended inside a frame")]
    Truncated,

    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Connection closed by server")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrameError {
    /// True when the stream ended cleanly between frames, as opposed to
    /// malformed input.
    pub fn is_closed(&self) -> bool {
        matches!(self, FrameError::Closed)
    }
}

/// Encode `payload` into the binary envelope `0x00 | u32-BE LEN | base64`.
pub fn encode_binary(payload: &[u8], max_len: usize) -> Result<Bytes, FrameError> {
    let encoded = BASE64.encode(payload);
    if encoded.len() > max_len {
        return Err(FrameError::Oversize {
            len: encoded.len(),
            max: max_len,
        });
    }
    let mut frame = BytesMut::with_capacity(HEADER_LEN + encoded.len());
    frame.extend_from_slice(&[FRAME_MAGIC]);
    frame.extend_from_slice(&(encoded.len() as u32).to_be_bytes());
    frame.extend_from_slice(encoded.as_bytes());
    Ok(frame.freeze())
}

/// Encode a handshake JSON body.
pub fn encode_handshake(value: &serde_json::Value) -> Result<Bytes, FrameError> {
    encode_binary(&serde_json::to_vec(value)?, MAX_HANDSHAKE_LEN)
}

/// Encode an already-encrypted record.
pub fn encode_record(record: &[u8]) -> Result<Bytes, FrameError> {
    encode_binary(record, MAX_RECORD_LEN)
}

/// Encode a JSON body as a newline-terminated plaintext frame.
pub fn encode_line(value: &serde_json::Value) -> Result<Bytes, FrameError> {
    let mut out = serde_json::to_vec(value)?;
    out.push(b'\n');
    Ok(Bytes::from(out))
}

/// Incremental decoder for the control stream.
///
/// Single-producer: it owns the read half while a decode is outstanding.
/// Partial frames stay in the internal buffer between calls and between
/// framing switches.
pub struct FrameReader<R> {
    reader: R,
    buf: BytesMut,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: BytesMut::with_capacity(8 * 1024),
        }
    }

    /// Read one binary-envelope frame and return the base64-decoded payload.
    pub async fn read_binary(&mut self, max_len: usize) -> Result<Vec<u8>, FrameError> {
        loop {
            if let Some(payload) = self.try_decode_binary(max_len)? {
                return Ok(payload);
            }
            self.fill().await?;
        }
    }

    /// Read one handshake frame and parse its JSON body.
    pub async fn read_handshake(&mut self) -> Result<serde_json::Value, FrameError> {
        let payload = self.read_binary(MAX_HANDSHAKE_LEN).await?;
        Ok(serde_json::from_slice(&payload)?)
    }

    /// Read one encrypted record. The payload is still ciphertext.
    pub async fn read_record(&mut self) -> Result<Vec<u8>, FrameError> {
        self.read_binary(MAX_RECORD_LEN).await
    }

    /// Read one newline-terminated plaintext JSON frame.
    pub async fn read_line(&mut self) -> Result<serde_json::Value, FrameError> {
        loop {
            if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
                let line = self.buf.split_to(pos + 1);
                return Ok(serde_json::from_slice(&line[..pos])?);
            }
            self.fill().await?;
        }
    }

    fn try_decode_binary(&mut self, max_len: usize) -> Result<Option<Vec<u8>>, FrameError> {
        if self.buf.is_empty() {
            return Ok(None);
        }
        if self.buf[0] != FRAME_MAGIC {
            return Err(FrameError::BadMagic(self.buf[0]));
        }
        if self.buf.len() < HEADER_LEN {
            return Ok(None);
        }
        let len =
            u32::from_be_bytes([self.buf[1], self.buf[2], self.buf[3], self.buf[4]]) as usize;
        if len > max_len {
            return Err(FrameError::Oversize { len, max: max_len });
        }
        if self.buf.len() < HEADER_LEN + len {
            return Ok(None);
        }
        self.buf.advance(HEADER_LEN);
        let encoded = self.buf.split_to(len);
        Ok(Some(BASE64.decode(&encoded[..])?))
    }

    async fn fill(&mut self) -> Result<(), FrameError> {
        let n = self.reader.read_buf(&mut self.buf).await?;
        if n == 0 {
            return Err(if self.buf.is_empty() {
                FrameError::Closed
            } else {
                FrameError::Truncated
            });
        }
        Ok(())
    }
}
