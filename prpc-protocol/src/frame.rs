//! In-memory frame encoding and incremental decoding.
//!
//! Frame layout (12 bytes header + metadata + payload):
//!
//! ```text
//! +--------+-----------+-----------+----------+---------+
//! | magic  | body_size | meta_size | RpcMeta  | payload |
//! | 4 bytes|  4 bytes  |  4 bytes  | meta_size| rest    |
//! +--------+-----------+-----------+----------+---------+
//! ```
//!
//! The stream codecs in [`crate::codec`] build on [`encode_frame`]; [`Frame::decode`]
//! is the buffer-driven counterpart for callers that already hold the bytes.

use crate::error::ProtocolError;
use crate::header::{PacketHeader, HEADER_SIZE};
use crate::meta::RpcMeta;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use prost::Message;

/// A complete decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Call metadata.
    pub meta: RpcMeta,
    /// Serialized payload, uninterpreted.
    pub payload: Bytes,
}

impl Frame {
    /// Creates a new frame with the given metadata and raw payload.
    pub fn new(meta: RpcMeta, payload: Bytes) -> Self {
        Self { meta, payload }
    }

    /// Creates a new frame carrying a serialized message.
    pub fn from_message<M: Message>(meta: RpcMeta, payload: &M) -> Self {
        Self::new(meta, Bytes::from(payload.encode_to_vec()))
    }

    /// Decodes the payload as `M`.
    pub fn decode_payload<M: Message + Default>(&self) -> Result<M, ProtocolError> {
        Ok(M::decode(self.payload.clone())?)
    }

    /// Encodes the frame into bytes.
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        let mut buf = BytesMut::new();
        encode_raw_frame(&self.meta, &self.payload, &mut buf)?;
        Ok(buf)
    }

    /// Decodes a frame from the front of `buf`.
    ///
    /// Returns `Ok(Some(frame))` if a complete frame was decoded,
    /// `Ok(None)` if more data is needed, or `Err` on protocol errors.
    /// Nothing is consumed unless a whole frame is available.
    pub fn decode(buf: &mut BytesMut, max_body_size: u32) -> Result<Option<Self>, ProtocolError> {
        if buf.len() < HEADER_SIZE {
            return Ok(None);
        }

        let header = PacketHeader::unmarshal(&buf[..HEADER_SIZE])?;
        let payload_size = header.payload_size()? as usize;
        if header.body_size() > max_body_size {
            return Err(ProtocolError::FrameTooLarge {
                size: header.body_size() as u64,
                max: max_body_size as u64,
            });
        }

        if buf.len() < header.frame_len() {
            return Ok(None);
        }

        // Consume header
        buf.advance(HEADER_SIZE);

        let meta_bytes = buf.split_to(header.meta_size() as usize).freeze();
        let payload = buf.split_to(payload_size).freeze();

        // The frame is consumed even if its metadata is garbage, so the
        // next call starts on a frame boundary.
        let meta = RpcMeta::decode(meta_bytes)?;

        Ok(Some(Self { meta, payload }))
    }
}

/// Appends a complete frame for `meta` and a serialized `payload` to `buf`.
///
/// Nothing is appended if encoding fails.
pub fn encode_frame<M: Message>(
    meta: &RpcMeta,
    payload: &M,
    buf: &mut BytesMut,
) -> Result<(), ProtocolError> {
    let meta_len = meta.encoded_len();
    let payload_len = payload.encoded_len();
    let header = PacketHeader::new(meta_len, payload_len)?;

    let start = buf.len();
    buf.reserve(header.frame_len());
    header.put(buf);
    let encoded = meta.encode(buf).and_then(|_| payload.encode(buf));
    if let Err(e) = encoded {
        buf.truncate(start);
        return Err(e.into());
    }
    Ok(())
}

/// Appends a complete frame for `meta` and an already serialized payload to `buf`.
pub fn encode_raw_frame(
    meta: &RpcMeta,
    payload: &[u8],
    buf: &mut BytesMut,
) -> Result<(), ProtocolError> {
    let meta_len = meta.encoded_len();
    let header = PacketHeader::new(meta_len, payload.len())?;

    let start = buf.len();
    buf.reserve(header.frame_len());
    header.put(buf);
    if let Err(e) = meta.encode(buf) {
        buf.truncate(start);
        return Err(e.into());
    }
    buf.put_slice(payload);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DEFAULT_MAX_BODY_SIZE;

    #[test]
    fn test_frame_roundtrip() {
        let meta = RpcMeta::for_request("Echo", "Say", 42);
        let frame = Frame::from_message(meta.clone(), &"hi".to_string());

        let mut buf = frame.encode().unwrap();
        let decoded = Frame::decode(&mut buf, DEFAULT_MAX_BODY_SIZE)
            .unwrap()
            .unwrap();

        assert_eq!(decoded.meta, meta);
        assert_eq!(decoded.decode_payload::<String>().unwrap(), "hi");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_header_sizes_match_sections() {
        let meta = RpcMeta::for_response(1, 0, "");
        let payload = Bytes::from_static(b"\x0a\x03abc");
        let encoded = Frame::new(meta.clone(), payload.clone()).encode().unwrap();

        let header = PacketHeader::unmarshal(&encoded).unwrap();
        assert_eq!(header.meta_size() as usize, meta.encoded_len());
        assert_eq!(header.payload_size().unwrap() as usize, payload.len());
        assert_eq!(encoded.len(), header.frame_len());
    }

    #[test]
    fn test_incomplete_frame() {
        let frame = Frame::from_message(RpcMeta::for_request("a", "b", 1), &7u32);
        let encoded = frame.encode().unwrap();

        // Header only
        let mut buf = BytesMut::from(&encoded[..HEADER_SIZE]);
        assert!(Frame::decode(&mut buf, DEFAULT_MAX_BODY_SIZE)
            .unwrap()
            .is_none());
        assert_eq!(buf.len(), HEADER_SIZE);

        // Less than a header
        let mut buf = BytesMut::from(&encoded[..5]);
        assert!(Frame::decode(&mut buf, DEFAULT_MAX_BODY_SIZE)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_invalid_magic() {
        let mut buf = BytesMut::from(&b"HTTP\x00\x00\x00\x00\x00\x00\x00\x00"[..]);
        let result = Frame::decode(&mut buf, DEFAULT_MAX_BODY_SIZE);
        assert!(matches!(result, Err(ProtocolError::MalformedHeader(_))));
    }

    #[test]
    fn test_frame_too_large() {
        let mut buf = BytesMut::new();
        PacketHeader::from_sizes(1024, 0).put(&mut buf);
        let result = Frame::decode(&mut buf, 512);
        assert!(matches!(result, Err(ProtocolError::FrameTooLarge { .. })));
    }

    #[test]
    fn test_garbage_meta_consumes_frame() {
        let mut buf = BytesMut::new();
        PacketHeader::new(2, 1).unwrap().put(&mut buf);
        buf.put_slice(&[0xff, 0xff, 0x00]);
        let next = Frame::from_message(RpcMeta::for_request("a", "b", 2), &1u32);
        buf.extend_from_slice(&next.encode().unwrap());

        assert!(matches!(
            Frame::decode(&mut buf, DEFAULT_MAX_BODY_SIZE),
            Err(ProtocolError::Decode(_))
        ));
        let decoded = Frame::decode(&mut buf, DEFAULT_MAX_BODY_SIZE)
            .unwrap()
            .unwrap();
        assert_eq!(decoded.meta.sequence().unwrap(), 2);
    }

    #[test]
    fn test_multiple_frames_in_buffer() {
        let frame1 = Frame::from_message(RpcMeta::for_request("s", "m", 1), &"one".to_string());
        let frame2 = Frame::from_message(RpcMeta::for_request("s", "m", 2), &"two".to_string());

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&frame1.encode().unwrap());
        buf.extend_from_slice(&frame2.encode().unwrap());

        let decoded1 = Frame::decode(&mut buf, DEFAULT_MAX_BODY_SIZE)
            .unwrap()
            .unwrap();
        assert_eq!(decoded1.decode_payload::<String>().unwrap(), "one");

        let decoded2 = Frame::decode(&mut buf, DEFAULT_MAX_BODY_SIZE)
            .unwrap()
            .unwrap();
        assert_eq!(decoded2.decode_payload::<String>().unwrap(), "two");
    }

    #[test]
    fn test_encode_frame_appends() {
        let mut buf = BytesMut::from(&b"prefix"[..]);
        encode_frame(&RpcMeta::for_request("s", "m", 1), &5u64, &mut buf).unwrap();
        assert_eq!(&buf[..6], b"prefix");
        assert_eq!(&buf[6..10], b"PRPC");
    }

    #[test]
    fn test_empty_payload() {
        let frame = Frame::new(RpcMeta::for_response(9, 0, ""), Bytes::new());
        let mut buf = frame.encode().unwrap();
        let decoded = Frame::decode(&mut buf, DEFAULT_MAX_BODY_SIZE)
            .unwrap()
            .unwrap();
        assert!(decoded.payload.is_empty());
        assert_eq!(decoded.meta.sequence().unwrap(), 9);
    }
}
