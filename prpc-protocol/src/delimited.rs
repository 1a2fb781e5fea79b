//! Length-prefixed framing: a uvarint byte count followed by one message.
//!
//! This mode has no packet header and no metadata section. It is a separate
//! reader/writer pair from [`crate::codec`] because the two formats cannot be
//! told apart on the wire.

use crate::error::ProtocolError;
use crate::{DEFAULT_BUFFER_SIZE, DEFAULT_MAX_BODY_SIZE};
use bytes::BytesMut;
use prost::Message;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};

/// Longest encoding of a u64 as a uvarint.
pub const MAX_VARINT_LEN: usize = 10;

/// Reads one uvarint from `reader`, a byte at a time.
pub async fn read_uvarint<R: AsyncRead + Unpin>(reader: &mut R) -> Result<u64, ProtocolError> {
    let mut value: u64 = 0;
    for i in 0..MAX_VARINT_LEN {
        let byte = reader.read_u8().await?;
        // The tenth byte may only contribute the top bit of a u64.
        if i == MAX_VARINT_LEN - 1 && byte > 1 {
            return Err(ProtocolError::MalformedVarint);
        }
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(ProtocolError::MalformedVarint)
}

/// Reads length-prefixed messages from a byte stream.
///
/// Like [`crate::codec::FrameReader`], the scratch buffer is reused and
/// decoded messages never borrow from it.
pub struct DelimitedReader<R> {
    reader: BufReader<R>,
    buf: BytesMut,
    max_message_size: u64,
}

impl<R: AsyncRead + Unpin> DelimitedReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_max_message_size(inner, DEFAULT_MAX_BODY_SIZE as u64)
    }

    pub fn with_max_message_size(inner: R, max_message_size: u64) -> Self {
        Self {
            reader: BufReader::with_capacity(DEFAULT_BUFFER_SIZE, inner),
            buf: BytesMut::new(),
            max_message_size,
        }
    }

    /// Reads the next message and decodes it as `M`.
    pub async fn read_message<M: Message + Default>(&mut self) -> Result<M, ProtocolError> {
        self.fill_next().await?;
        Ok(M::decode(&self.buf[..])?)
    }

    /// Reads the next message and throws it away.
    ///
    /// Returns the number of message bytes skipped, not counting the prefix.
    pub async fn discard_message(&mut self) -> Result<usize, ProtocolError> {
        self.fill_next().await?;
        Ok(self.buf.len())
    }

    /// Returns the capacity of the scratch buffer.
    pub fn buffer_capacity(&self) -> usize {
        self.buf.capacity()
    }

    pub fn into_inner(self) -> R {
        self.reader.into_inner()
    }

    async fn fill_next(&mut self) -> Result<(), ProtocolError> {
        let size = read_uvarint(&mut self.reader).await?;
        if size > self.max_message_size {
            return Err(ProtocolError::FrameTooLarge {
                size,
                max: self.max_message_size,
            });
        }

        self.buf.clear();
        self.buf.resize(size as usize, 0);
        self.reader.read_exact(&mut self.buf[..]).await?;
        Ok(())
    }
}

/// Writes length-prefixed messages to a byte stream.
pub struct DelimitedWriter<W> {
    writer: BufWriter<W>,
    buf: BytesMut,
}

impl<W: AsyncWrite + Unpin> DelimitedWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            writer: BufWriter::with_capacity(DEFAULT_BUFFER_SIZE, inner),
            buf: BytesMut::new(),
        }
    }

    /// Writes `message` with its uvarint length prefix and flushes.
    ///
    /// Returns the number of bytes written, prefix included.
    pub async fn write_message<M: Message>(&mut self, message: &M) -> Result<usize, ProtocolError> {
        self.buf.clear();
        message.encode_length_delimited(&mut self.buf)?;
        self.writer.write_all(&self.buf).await?;
        self.writer.flush().await?;
        Ok(self.buf.len())
    }

    pub async fn shutdown(&mut self) -> Result<(), ProtocolError> {
        self.writer.shutdown().await?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}
