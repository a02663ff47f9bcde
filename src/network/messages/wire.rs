//! Protobuf frames for the TCP transport.
//!
//! Each frame on the socket is a big-endian `u32` length followed by a
//! prost-encoded [`Frame`].

use crate::error::MessageError;
use bytes::{BufMut, Bytes, BytesMut};
use prost::Message;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on an encoded frame. A lookup path holds at most one entry per
/// member plus the owner, so real frames stay far below this.
pub const MAX_FRAME_LEN: usize = 1 << 20;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum FrameKind {
    Unspecified = 0,
    LookupRequest = 1,
    LookupReply = 2,
    Done = 3,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LookupFrame {
    #[prost(uint64, tag = "1")]
    pub initiator: u64,
    #[prost(uint64, tag = "2")]
    pub key: u64,
    #[prost(uint64, repeated, tag = "3")]
    pub path: Vec<u64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Frame {
    #[prost(uint64, tag = "1")]
    pub sender: u64,
    #[prost(enumeration = "FrameKind", tag = "2")]
    pub kind: i32,
    #[prost(message, optional, tag = "3")]
    pub lookup: Option<LookupFrame>,
}

pub fn encode_frame(frame: &Frame) -> Result<Bytes, MessageError> {
    let len = frame.encoded_len();
    if len > MAX_FRAME_LEN {
        return Err(MessageError::FrameTooLarge {
            size: len,
            limit: MAX_FRAME_LEN,
        });
    }
    let mut buf = BytesMut::with_capacity(4 + len);
    buf.put_u32(len as u32);
    frame
        .encode(&mut buf)
        .map_err(|e| MessageError::SerializationFailed(e.to_string()))?;
    Ok(buf.freeze())
}

pub fn decode_frame(payload: &[u8]) -> Result<Frame, MessageError> {
    Frame::decode(payload).map_err(|e| MessageError::DeserializationFailed(e.to_string()))
}

pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = encode_frame(frame)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    writer.write_all(&bytes).await?;
    writer.flush().await
}

/// Reads one frame. `Ok(None)` means the peer closed the connection cleanly
/// between frames; a close anywhere inside a frame is an error.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Frame>, MessageError>
where
    R: AsyncRead + Unpin,
{
    // Fill the prefix by hand: EOF before its first byte is a clean close.
    let mut prefix = [0u8; 4];
    let mut received = 0;
    while received < prefix.len() {
        let n = reader.read(&mut prefix[received..]).await?;
        if n == 0 {
            if received == 0 {
                return Ok(None);
            }
            return Err(MessageError::TruncatedPrefix { received });
        }
        received += n;
    }

    let len = u32::from_be_bytes(prefix) as usize;
    if len > MAX_FRAME_LEN {
        return Err(MessageError::FrameTooLarge {
            size: len,
            limit: MAX_FRAME_LEN,
        });
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    decode_frame(&payload).map(Some)
}
