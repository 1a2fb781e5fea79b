//! Fixed packet header for baidu_std frames.
//!
//! Header layout (12 bytes):
//!
//! ```text
//! +--------+-----------+-----------+
//! | magic  | body_size | meta_size |
//! | 4 bytes|  4 bytes  |  4 bytes  |
//! +--------+-----------+-----------+
//! ```
//!
//! `body_size` counts the metadata and the payload that follow; `meta_size`
//! is the metadata part of it. Both are big-endian.

use crate::error::ProtocolError;
use bytes::BufMut;
use std::fmt;

/// Magic bytes identifying baidu_std frames: "PRPC"
pub const MAGIC: [u8; 4] = *b"PRPC";

/// Size of the packet header in bytes (4+4+4 = 12).
pub const HEADER_SIZE: usize = 12;

/// A parsed packet header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketHeader {
    body_size: u32,
    meta_size: u32,
}

impl PacketHeader {
    /// Builds a header for a frame carrying `meta_size` metadata bytes and
    /// `payload_size` payload bytes.
    pub fn new(meta_size: usize, payload_size: usize) -> Result<Self, ProtocolError> {
        let body = meta_size as u64 + payload_size as u64;
        if body > u32::MAX as u64 {
            return Err(ProtocolError::FrameTooLarge {
                size: body,
                max: u32::MAX as u64,
            });
        }
        Ok(Self {
            body_size: body as u32,
            meta_size: meta_size as u32,
        })
    }

    /// Builds a header from raw size fields without validation.
    pub fn from_sizes(body_size: u32, meta_size: u32) -> Self {
        Self {
            body_size,
            meta_size,
        }
    }

    pub fn body_size(&self) -> u32 {
        self.body_size
    }

    pub fn meta_size(&self) -> u32 {
        self.meta_size
    }

    /// Returns the number of payload bytes following the metadata.
    ///
    /// Fails when `meta_size` exceeds `body_size`, which a peer can send
    /// but which never describes a real frame.
    pub fn payload_size(&self) -> Result<u32, ProtocolError> {
        self.body_size.checked_sub(self.meta_size).ok_or_else(|| {
            ProtocolError::MalformedHeader(format!(
                "meta_size {} exceeds body_size {}",
                self.meta_size, self.body_size
            ))
        })
    }

    /// Total bytes on the wire for this frame, header included.
    pub fn frame_len(&self) -> usize {
        HEADER_SIZE + self.body_size as usize
    }

    /// Encodes the header into its 12 byte wire form.
    pub fn marshal(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..4].copy_from_slice(&MAGIC);
        out[4..8].copy_from_slice(&self.body_size.to_be_bytes());
        out[8..12].copy_from_slice(&self.meta_size.to_be_bytes());
        out
    }

    /// Appends the wire form to `buf`.
    pub fn put<B: BufMut>(&self, buf: &mut B) {
        buf.put_slice(&MAGIC);
        buf.put_u32(self.body_size);
        buf.put_u32(self.meta_size);
    }

    /// Parses a header from the first 12 bytes of `data`.
    ///
    /// Sizes are not cross-checked here; see [`PacketHeader::payload_size`].
    pub fn unmarshal(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < HEADER_SIZE {
            return Err(ProtocolError::MalformedHeader(format!(
                "need {} bytes, got {}",
                HEADER_SIZE,
                data.len()
            )));
        }

        if data[0..4] != MAGIC {
            return Err(ProtocolError::MalformedHeader(format!(
                "bad magic {:?}",
                &data[0..4]
            )));
        }

        let body_size = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let meta_size = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);

        Ok(Self {
            body_size,
            meta_size,
        })
    }
}

impl fmt::Display for PacketHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[meta_size:{}][body_size:{}]",
            self.meta_size, self.body_size
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_marshal_layout() {
        let header = PacketHeader::new(0x10, 0x0102).unwrap();
        let raw = header.marshal();

        assert_eq!(&raw[0..4], b"PRPC");
        assert_eq!(&raw[4..8], &[0x00, 0x00, 0x01, 0x12]);
        assert_eq!(&raw[8..12], &[0x00, 0x00, 0x00, 0x10]);
    }

    #[test]
    fn test_put_matches_marshal() {
        let header = PacketHeader::from_sizes(77, 7);
        let mut buf = Vec::new();
        header.put(&mut buf);
        assert_eq!(buf.as_slice(), &header.marshal()[..]);
    }

    #[test]
    fn test_invalid_magic() {
        let raw = *b"HULU\x00\x00\x00\x10\x00\x00\x00\x04";
        let result = PacketHeader::unmarshal(&raw);
        assert!(matches!(result, Err(ProtocolError::MalformedHeader(_))));
    }

    #[test]
    fn test_short_header() {
        let raw = b"PRPC\x00\x00\x00";
        let result = PacketHeader::unmarshal(raw);
        assert!(matches!(result, Err(ProtocolError::MalformedHeader(_))));
    }

    #[test]
    fn test_unmarshal_ignores_trailing_bytes() {
        let mut raw = PacketHeader::from_sizes(9, 4).marshal().to_vec();
        raw.extend_from_slice(b"trailing");
        let header = PacketHeader::unmarshal(&raw).unwrap();
        assert_eq!(header.body_size(), 9);
        assert_eq!(header.meta_size(), 4);
    }

    #[test]
    fn test_meta_larger_than_body() {
        let raw = PacketHeader::from_sizes(4, 9).marshal();
        // Parsing succeeds, deriving the payload size does not.
        let header = PacketHeader::unmarshal(&raw).unwrap();
        assert!(matches!(
            header.payload_size(),
            Err(ProtocolError::MalformedHeader(_))
        ));
    }

    #[test]
    fn test_payload_size() {
        let header = PacketHeader::new(12, 30).unwrap();
        assert_eq!(header.body_size(), 42);
        assert_eq!(header.payload_size().unwrap(), 30);
        assert_eq!(header.frame_len(), 54);
    }

    #[test]
    fn test_too_large() {
        let result = PacketHeader::new(u32::MAX as usize, 1);
        assert!(matches!(result, Err(ProtocolError::FrameTooLarge { .. })));
    }

    #[test]
    fn test_display() {
        let header = PacketHeader::new(3, 4).unwrap();
        assert_eq!(header.to_string(), "[meta_size:3][body_size:7]");
    }

    proptest! {
        #[test]
        fn prop_header_roundtrip(body in any::<u32>(), meta_frac in 0.0f64..=1.0) {
            let meta = (body as f64 * meta_frac) as u32;
            let header = PacketHeader::from_sizes(body, meta.min(body));
            let parsed = PacketHeader::unmarshal(&header.marshal()).unwrap();
            prop_assert_eq!(parsed, header);
            prop_assert_eq!(parsed.payload_size().unwrap(), body - meta.min(body));
        }

        #[test]
        fn prop_bad_magic_rejected(magic in any::<[u8; 4]>(), rest in any::<[u8; 8]>()) {
            prop_assume!(magic != MAGIC);
            let mut raw = magic.to_vec();
            raw.extend_from_slice(&rest);
            prop_assert!(matches!(
                PacketHeader::unmarshal(&raw),
                Err(ProtocolError::MalformedHeader(_))
            ));
        }
    }
}
