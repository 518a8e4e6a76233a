//! Client-facing wire format.
//!
//! Request: `u32 timeout_ms`, `u32 key_len`, `u32 code_len` (little-endian),
//! then `key_len` bytes of UTF-8 session key and `code_len` bytes of UTF-8
//! code. Response: `u32 output_len` then that many bytes of UTF-8 output.
//!
//! There is no error frame. Evaluation failures travel as text inside the
//! output; infrastructure failures close the connection.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::FramingError;

/// Size of the fixed request header.
pub const HEADER_LEN: usize = 12;

/// Default ceiling on `key_len + code_len` (and on response bodies).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Returned in place of output when an evaluation misses its deadline.
pub const TIMEOUT_SENTINEL: &str = "(timed out)";

/// One evaluation request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EvalRequest {
    /// Deadline in milliseconds; `0` waits without bound.
    pub timeout_ms: u32,
    pub session_key: String,
    pub code: String,
}

/// One evaluation response. Always present, possibly empty.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EvalResponse {
    pub output: String,
}

impl EvalRequest {
    pub fn new(session_key: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            timeout_ms: 0,
            session_key: session_key.into(),
            code: code.into(),
        }
    }

    pub fn with_timeout(mut self, timeout_ms: u32) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

impl EvalResponse {
    pub fn new(output: impl Into<String>) -> Self {
        Self { output: output.into() }
    }

    pub fn timed_out() -> Self {
        Self::new(TIMEOUT_SENTINEL)
    }

    pub fn is_timeout(&self) -> bool {
        self.output == TIMEOUT_SENTINEL
    }
}

/// The fixed-size request prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    pub timeout_ms: u32,
    pub key_len: u32,
    pub code_len: u32,
}

impl RequestHeader {
    pub fn parse(bytes: &[u8]) -> Result<Self, FramingError> {
        if bytes.len() < HEADER_LEN {
            return Err(FramingError::Truncated {
                expected: HEADER_LEN,
                actual: bytes.len(),
            });
        }
        let mut buf = &bytes[..HEADER_LEN];
        Ok(Self {
            timeout_ms: buf.get_u32_le(),
            key_len: buf.get_u32_le(),
            code_len: buf.get_u32_le(),
        })
    }

    /// Number of body bytes that follow the header.
    pub fn body_len(&self) -> usize {
        self.key_len as usize + self.code_len as usize
    }

    /// Reject bodies larger than `limit` before allocating for them.
    pub fn check_limit(&self, limit: usize) -> Result<(), FramingError> {
        let len = self.body_len();
        if len > limit {
            return Err(FramingError::TooLarge { len, limit });
        }
        Ok(())
    }

    /// Split a body of exactly `body_len()` bytes into the request.
    pub fn decode_body(&self, body: &[u8]) -> Result<EvalRequest, FramingError> {
        let expected = self.body_len();
        if body.len() < expected {
            return Err(FramingError::Truncated {
                expected,
                actual: body.len(),
            });
        }
        let (key, rest) = body.split_at(self.key_len as usize);
        let code = &rest[..self.code_len as usize];
        Ok(EvalRequest {
            timeout_ms: self.timeout_ms,
            session_key: lossy_utf8(key),
            code: lossy_utf8(code),
        })
    }
}

/// Decode a complete request frame.
pub fn decode_request(bytes: &[u8]) -> Result<EvalRequest, FramingError> {
    let header = RequestHeader::parse(bytes)?;
    header.decode_body(&bytes[HEADER_LEN..])
}

/// Encode a request frame (client side).
pub fn encode_request(request: &EvalRequest) -> Vec<u8> {
    let key = request.session_key.as_bytes();
    let code = request.code.as_bytes();
    let mut buf = BytesMut::with_capacity(HEADER_LEN + key.len() + code.len());
    buf.put_u32_le(request.timeout_ms);
    buf.put_u32_le(key.len() as u32);
    buf.put_u32_le(code.len() as u32);
    buf.put_slice(key);
    buf.put_slice(code);
    buf.to_vec()
}

/// Encode a response frame.
pub fn encode_response(response: &EvalResponse) -> Vec<u8> {
    let output = response.output.as_bytes();
    let mut buf = BytesMut::with_capacity(4 + output.len());
    buf.put_u32_le(output.len() as u32);
    buf.put_slice(output);
    buf.to_vec()
}

/// Decode a complete response frame (client side).
pub fn decode_response(bytes: &[u8]) -> Result<EvalResponse, FramingError> {
    if bytes.len() < 4 {
        return Err(FramingError::Truncated {
            expected: 4,
            actual: bytes.len(),
        });
    }
    let mut buf = bytes;
    let len = buf.get_u32_le() as usize;
    if buf.len() < len {
        return Err(FramingError::Truncated {
            expected: len,
            actual: buf.len(),
        });
    }
    Ok(EvalResponse {
        output: lossy_utf8(&buf[..len]),
    })
}

/// Invalid UTF-8 becomes an empty string rather than an error.
fn lossy_utf8(bytes: &[u8]) -> String {
    std::str::from_utf8(bytes).map(str::to_owned).unwrap_or_default()
}
