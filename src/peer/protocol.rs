//! Peer Wire Protocol
//!
//! Every inter-node exchange is a single length-prefixed frame:
//!
//! ```text
//! [4-byte big-endian length][1-byte message type][length - 1 bytes payload]
//! ```
//!
//! The length counts the type byte plus the payload, so the smallest legal frame has
//! `length == 1` (an empty payload). Type codes are a stable cross-node contract: new
//! message kinds get fresh codes and existing codes are never reused.

use bytes::{BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound for `type + payload`, enforced on both read and write.
pub const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

const LENGTH_PREFIX: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Ping,
    Pong,
    ForwardPut,
    ForwardGet,
    ForwardDelete,
    OperationSuccess,
    ValueResponse,
    KeyNotFound,
    Error,
    ReplicatePut,
    ReplicateDelete,
    ReplicationAck,
    /// Any code this node does not recognize. Decoding never fails on the type byte.
    Unknown,
}

impl MessageType {
    pub fn code(self) -> u8 {
        match self {
            MessageType::Ping => 0x01,
            MessageType::Pong => 0x02,
            MessageType::ForwardPut => 0x03,
            MessageType::ForwardGet => 0x04,
            MessageType::ForwardDelete => 0x05,
            MessageType::OperationSuccess => 0x06,
            MessageType::ValueResponse => 0x07,
            MessageType::KeyNotFound => 0x08,
            MessageType::Error => 0x09,
            MessageType::ReplicatePut => 0x0A,
            MessageType::ReplicateDelete => 0x0B,
            MessageType::ReplicationAck => 0x0C,
            MessageType::Unknown => 0xFF,
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            0x01 => MessageType::Ping,
            0x02 => MessageType::Pong,
            0x03 => MessageType::ForwardPut,
            0x04 => MessageType::ForwardGet,
            0x05 => MessageType::ForwardDelete,
            0x06 => MessageType::OperationSuccess,
            0x07 => MessageType::ValueResponse,
            0x08 => MessageType::KeyNotFound,
            0x09 => MessageType::Error,
            0x0A => MessageType::ReplicatePut,
            0x0B => MessageType::ReplicateDelete,
            0x0C => MessageType::ReplicationAck,
            _ => MessageType::Unknown,
        }
    }
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The peer closed the stream before sending any byte of a new frame.
    #[error("connection closed by peer")]
    Closed,

    /// The stream ended in the middle of a frame.
    #[error("truncated frame: expected {expected} bytes, got {received}")]
    Truncated { expected: usize, received: usize },

    #[error("invalid frame length {0}: must be greater than zero")]
    InvalidLength(u32),

    #[error("frame length {length} exceeds maximum of {max} bytes")]
    FrameTooLarge { length: usize, max: usize },

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// One deframed message. Built per call and dropped after it is sent or consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireMessage {
    pub kind: MessageType,
    pub payload: Bytes,
}

impl WireMessage {
    pub fn new(kind: MessageType, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    pub fn empty(kind: MessageType) -> Self {
        Self {
            kind,
            payload: Bytes::new(),
        }
    }

    /// Builds a message whose payload is the JSON encoding of `body`.
    pub fn json<T: Serialize>(kind: MessageType, body: &T) -> serde_json::Result<Self> {
        Ok(Self::new(kind, serde_json::to_vec(body)?))
    }

    pub fn payload_str(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.payload)
    }

    pub fn payload_json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.payload)
    }

    /// Encodes the full frame, length prefix included.
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let length = self.payload.len() + 1;
        if length > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                length,
                max: MAX_FRAME_SIZE,
            });
        }

        let mut buf = BytesMut::with_capacity(LENGTH_PREFIX + length);
        buf.put_u32(length as u32);
        buf.put_u8(self.kind.code());
        buf.put_slice(&self.payload);
        Ok(buf.freeze())
    }
}

/// Key/value body used by FORWARD_PUT, REPLICATE_PUT and VALUE_RESPONSE.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

/// Reads exactly one frame.
///
/// A stream that ends before the first length byte yields [`ProtocolError::Closed`];
/// one that ends anywhere later yields [`ProtocolError::Truncated`]. The declared length
/// is validated before the payload buffer is allocated.
pub async fn read_message<R>(reader: &mut R) -> Result<WireMessage, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; LENGTH_PREFIX];
    let mut filled = 0;
    while filled < LENGTH_PREFIX {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Err(ProtocolError::Closed);
            }
            return Err(ProtocolError::Truncated {
                expected: LENGTH_PREFIX,
                received: filled,
            });
        }
        filled += n;
    }

    let declared = u32::from_be_bytes(header);
    if declared == 0 {
        return Err(ProtocolError::InvalidLength(declared));
    }
    let length = declared as usize;
    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            length,
            max: MAX_FRAME_SIZE,
        });
    }

    let mut body = vec![0u8; length];
    let mut received = 0;
    while received < length {
        let n = reader.read(&mut body[received..]).await?;
        if n == 0 {
            return Err(ProtocolError::Truncated {
                expected: length,
                received,
            });
        }
        received += n;
    }

    let mut body = Bytes::from(body);
    let kind = MessageType::from_code(body[0]);
    let payload = body.split_off(1);
    Ok(WireMessage { kind, payload })
}

/// Writes one frame with a single write call and flushes before returning.
pub async fn write_message<W>(writer: &mut W, message: &WireMessage) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let frame = message.encode()?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}
