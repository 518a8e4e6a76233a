//! Front end <-> worker channel.
//!
//! Each message is `tag: u8`, `len: u32` (little-endian), then `len` bytes of
//! JSON. The worker has no notion of connections; it handles one request at a
//! time and answers each with exactly one response.

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::FramingError;

/// Size of the tag + length prefix.
pub const FRAME_HEADER_LEN: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameTag {
    Request = 0x00,
    Response = 0x01,
}

impl TryFrom<u8> for FrameTag {
    type Error = FramingError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Self::Request),
            0x01 => Ok(Self::Response),
            other => Err(FramingError::UnknownTag(other)),
        }
    }
}

/// Request relayed from the front end to the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerRequest {
    pub timeout_millis: u32,
    pub code: String,
    /// Session identity layered on by the front end. Absent means the
    /// worker's default session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,
}

/// The worker's answer to one [`WorkerRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerResponse {
    pub output: String,
}

/// Parsed tag + length prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub tag: FrameTag,
    pub len: usize,
}

impl FrameHeader {
    pub fn parse(bytes: &[u8; FRAME_HEADER_LEN]) -> Result<Self, FramingError> {
        let mut buf = &bytes[..];
        let tag = FrameTag::try_from(buf.get_u8())?;
        let len = buf.get_u32_le() as usize;
        Ok(Self { tag, len })
    }

    pub fn check_limit(&self, limit: usize) -> Result<(), FramingError> {
        if self.len > limit {
            return Err(FramingError::TooLarge { len: self.len, limit });
        }
        Ok(())
    }

    /// Error unless this frame carries `expected`.
    pub fn expect(&self, expected: FrameTag) -> Result<(), FramingError> {
        if self.tag != expected {
            return Err(FramingError::UnexpectedTag(self.tag));
        }
        Ok(())
    }
}

/// Serialize `message` into a complete tagged frame.
pub fn encode_message<T: Serialize>(tag: FrameTag, message: &T) -> Result<Vec<u8>, FramingError> {
    let payload = serde_json::to_vec(message)?;
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
    buf.put_u8(tag as u8);
    buf.put_u32_le(payload.len() as u32);
    buf.put_slice(&payload);
    Ok(buf.to_vec())
}

/// Deserialize a frame payload.
pub fn decode_message<T: DeserializeOwned>(payload: &[u8]) -> Result<T, FramingError> {
    Ok(serde_json::from_slice(payload)?)
}

impl WorkerRequest {
    pub fn encode(&self) -> Result<Vec<u8>, FramingError> {
        encode_message(FrameTag::Request, self)
    }
}

impl WorkerResponse {
    pub fn encode(&self) -> Result<Vec<u8>, FramingError> {
        encode_message(FrameTag::Response, self)
    }
}
