//! AWS binary event-stream framing (`application/vnd.amazon.eventstream`).
//!
//! Frame layout, all integers big-endian:
//!
//! ```text
//! total_len:u32 | headers_len:u32 | prelude_crc:u32 | headers | payload | message_crc:u32
//! ```
//!
//! `prelude_crc` covers the first 8 bytes, `message_crc` everything before it.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

const PRELUDE_LEN: usize = 12;
const MIN_FRAME_LEN: usize = PRELUDE_LEN + 4;
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame length {0} out of range")]
    InvalidLength(usize),

    #[error("prelude checksum mismatch")]
    PreludeChecksum,

    #[error("message checksum mismatch")]
    MessageChecksum,

    #[error("malformed header block: {0}")]
    InvalidHeader(String),

    #[error("stream ended inside a frame ({0} bytes pending)")]
    Truncated(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    Bool(bool),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Bytes(Vec<u8>),
    String(String),
    Timestamp(i64),
    Uuid([u8; 16]),
}

impl HeaderValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            HeaderValue::String(s) => Some(s),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub headers: Vec<(String, HeaderValue)>,
    pub payload: Bytes,
}

impl Frame {
    pub fn header(&self, name: &str) -> Option<&HeaderValue> {
        self.headers.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.header(name).and_then(HeaderValue::as_str)
    }
}

/// Incremental decoder. Feed it network reads with [`push`](Self::push) and
/// drain complete frames with [`next_frame`](Self::next_frame).
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Call once the byte source is exhausted.
    pub fn finish(&self) -> Result<(), FrameError> {
        match self.buf.len() {
            0 => Ok(()),
            n => Err(FrameError::Truncated(n)),
        }
    }

    pub fn next_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        if self.buf.len() < PRELUDE_LEN {
            return Ok(None);
        }

        let total_len = be_u32(&self.buf[0..4]) as usize;
        let headers_len = be_u32(&self.buf[4..8]) as usize;
        let prelude_crc = be_u32(&self.buf[8..12]);

        if !(MIN_FRAME_LEN..=MAX_FRAME_LEN).contains(&total_len) || headers_len > total_len - MIN_FRAME_LEN {
            return Err(FrameError::InvalidLength(total_len));
        }
        if crc32fast::hash(&self.buf[0..8]) != prelude_crc {
            return Err(FrameError::PreludeChecksum);
        }
        if self.buf.len() < total_len {
            return Ok(None);
        }

        let mut frame = self.buf.split_to(total_len).freeze();
        let message_crc = be_u32(&frame[total_len - 4..]);
        if crc32fast::hash(&frame[..total_len - 4]) != message_crc {
            return Err(FrameError::MessageChecksum);
        }

        frame.advance(PRELUDE_LEN);
        let header_block = frame.split_to(headers_len);
        let payload = frame.split_to(total_len - MIN_FRAME_LEN - headers_len);

        Ok(Some(Frame {
            headers: parse_headers(header_block)?,
            payload,
        }))
    }
}

fn be_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn need(buf: &Bytes, n: usize, what: &str) -> Result<(), FrameError> {
    if buf.remaining() < n {
        Err(FrameError::InvalidHeader(format!("truncated {}", what)))
    } else {
        Ok(())
    }
}

fn parse_headers(mut buf: Bytes) -> Result<Vec<(String, HeaderValue)>, FrameError> {
    let mut headers = Vec::new();

    while buf.has_remaining() {
        let name_len = buf.get_u8() as usize;
        need(&buf, name_len + 1, "header name")?;
        let name = String::from_utf8(buf.split_to(name_len).to_vec())
            .map_err(|_| FrameError::InvalidHeader("header name is not UTF-8".into()))?;

        let value = match buf.get_u8() {
            0 => HeaderValue::Bool(true),
            1 => HeaderValue::Bool(false),
            2 => {
                need(&buf, 1, "byte")?;
                HeaderValue::Byte(buf.get_i8())
            }
            3 => {
                need(&buf, 2, "short")?;
                HeaderValue::Short(buf.get_i16())
            }
            4 => {
                need(&buf, 4, "int")?;
                HeaderValue::Int(buf.get_i32())
            }
            5 => {
                need(&buf, 8, "long")?;
                HeaderValue::Long(buf.get_i64())
            }
            6 => HeaderValue::Bytes(length_prefixed(&mut buf)?.to_vec()),
            7 => {
                let raw = length_prefixed(&mut buf)?;
                HeaderValue::String(
                    String::from_utf8(raw.to_vec())
                        .map_err(|_| FrameError::InvalidHeader(format!("header {} is not UTF-8", name)))?,
                )
            }
            8 => {
                need(&buf, 8, "timestamp")?;
                HeaderValue::Timestamp(buf.get_i64())
            }
            9 => {
                need(&buf, 16, "uuid")?;
                let mut uuid = [0u8; 16];
                buf.copy_to_slice(&mut uuid);
                HeaderValue::Uuid(uuid)
            }
            other => return Err(FrameError::InvalidHeader(format!("unknown header type {}", other))),
        };
        headers.push((name, value));
    }

    Ok(headers)
}

fn length_prefixed(buf: &mut Bytes) -> Result<Bytes, FrameError> {
    need(buf, 2, "length")?;
    let len = buf.get_u16() as usize;
    need(buf, len, "value")?;
    Ok(buf.split_to(len))
}

/// Encodes a frame with string headers. Used to build fixtures and by tools
/// that replay captured streams.
pub fn encode_frame(headers: &[(&str, &str)], payload: &[u8]) -> Bytes {
    let mut header_block = BytesMut::new();
    for (name, value) in headers {
        header_block.put_u8(name.len() as u8);
        header_block.put_slice(name.as_bytes());
        header_block.put_u8(7);
        header_block.put_u16(value.len() as u16);
        header_block.put_slice(value.as_bytes());
    }

    let total_len = MIN_FRAME_LEN + header_block.len() + payload.len();
    let mut out = BytesMut::with_capacity(total_len);
    out.put_u32(total_len as u32);
    out.put_u32(header_block.len() as u32);
    let prelude_crc = crc32fast::hash(&out[..8]);
    out.put_u32(prelude_crc);
    out.put_slice(&header_block);
    out.put_slice(payload);
    let message_crc = crc32fast::hash(&out);
    out.put_u32(message_crc);
    out.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(payload: &str) -> Bytes {
        encode_frame(
            &[(":message-type", "event"), (":event-type", "chunk"), (":content-type", "application/json")],
            payload.as_bytes(),
        )
    }

    #[test]
    fn test_decodes_frame_split_across_reads() {
        let bytes = event(r#"{"bytes":"e30="}"#);
        let mut decoder = FrameDecoder::new();
        decoder.push(&bytes[..5]);
        assert_eq!(decoder.next_frame().unwrap(), None);
        decoder.push(&bytes[5..20]);
        assert_eq!(decoder.next_frame().unwrap(), None);
        decoder.push(&bytes[20..]);

        let frame = decoder.next_frame().unwrap().unwrap();
        assert_eq!(frame.header_str(":event-type"), Some("chunk"));
        assert_eq!(&frame.payload[..], br#"{"bytes":"e30="}"#);
        assert!(decoder.finish().is_ok());
    }

    #[test]
    fn test_two_frames_in_one_read() {
        let mut joined = BytesMut::new();
        joined.extend_from_slice(&event("1"));
        joined.extend_from_slice(&event("22"));
        let mut decoder = FrameDecoder::new();
        decoder.push(&joined);
        assert_eq!(&decoder.next_frame().unwrap().unwrap().payload[..], b"1");
        assert_eq!(&decoder.next_frame().unwrap().unwrap().payload[..], b"22");
        assert_eq!(decoder.next_frame().unwrap(), None);
    }

    #[test]
    fn test_corrupted_payload_fails_checksum() {
        let mut bytes = event("payload").to_vec();
        let idx = bytes.len() - 6;
        bytes[idx] ^= 0xff;
        let mut decoder = FrameDecoder::new();
        decoder.push(&bytes);
        assert_eq!(decoder.next_frame(), Err(FrameError::MessageChecksum));
    }

    #[test]
    fn test_truncated_stream_is_reported() {
        let bytes = event("payload");
        let mut decoder = FrameDecoder::new();
        decoder.push(&bytes[..bytes.len() - 1]);
        assert_eq!(decoder.next_frame().unwrap(), None);
        assert!(matches!(decoder.finish(), Err(FrameError::Truncated(_))));
    }

    #[test]
    fn test_typed_headers() {
        let mut block = BytesMut::new();
        block.put_u8(1);
        block.put_slice(b"a");
        block.put_u8(4);
        block.put_i32(-7);
        block.put_u8(1);
        block.put_slice(b"b");
        block.put_u8(0);
        let headers = parse_headers(block.freeze()).unwrap();
        assert_eq!(headers[0], ("a".to_string(), HeaderValue::Int(-7)));
        assert_eq!(headers[1], ("b".to_string(), HeaderValue::Bool(true)));
    }
}
