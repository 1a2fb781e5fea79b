//! Stream reader and writer for header-framed baidu_std frames.
//!
//! A frame is read in two steps: [`FrameReader::read_meta`] consumes the
//! packet header and the metadata section, then exactly one of
//! [`FrameReader::read_payload`], [`FrameReader::read_payload_bytes`] or
//! [`FrameReader::discard_payload`] consumes the payload. Calling them out of
//! order is a [`ProtocolError::ProtocolSequence`] error.
//!
//! The reader keeps one scratch buffer that grows to the largest section seen.
//! Decoded messages and the `Bytes` handed out by `read_payload_bytes` are
//! owned copies; nothing returned to a caller aliases the scratch buffer, so
//! results stay valid across later reads.

use crate::error::ProtocolError;
use crate::frame::{encode_frame, encode_raw_frame};
use crate::header::{PacketHeader, HEADER_SIZE};
use crate::meta::RpcMeta;
use crate::{DEFAULT_BUFFER_SIZE, DEFAULT_MAX_BODY_SIZE};
use bytes::{Bytes, BytesMut};
use prost::Message;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};

/// Initial scratch capacity; small frames never allocate again.
const BOOTSTRAP_LEN: usize = 128;

/// Reads header-framed frames from a byte stream.
pub struct FrameReader<R> {
    reader: BufReader<R>,
    buf: BytesMut,
    /// Header whose payload has not been consumed yet.
    pending: Option<PacketHeader>,
    max_body_size: u32,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_max_body_size(inner, DEFAULT_MAX_BODY_SIZE)
    }

    /// Creates a reader that rejects frames whose body exceeds `max_body_size`.
    pub fn with_max_body_size(inner: R, max_body_size: u32) -> Self {
        Self {
            reader: BufReader::with_capacity(DEFAULT_BUFFER_SIZE, inner),
            buf: BytesMut::with_capacity(BOOTSTRAP_LEN),
            pending: None,
            max_body_size,
        }
    }

    /// Returns whether a header has been read and its payload is still unread.
    pub fn has_pending_payload(&self) -> bool {
        self.pending.is_some()
    }

    /// Returns the header of the frame currently being read, if any.
    pub fn pending_header(&self) -> Option<PacketHeader> {
        self.pending
    }

    /// Returns the capacity of the scratch buffer.
    pub fn buffer_capacity(&self) -> usize {
        self.buf.capacity()
    }

    /// Reads the packet header and the metadata section of the next frame.
    ///
    /// If the metadata does not decode, the payload is skipped before the
    /// error is returned so the stream stays on a frame boundary.
    ///
    /// Header errors leave the stream unusable and the connection should be
    /// closed: bad magic or `meta_size > body_size` ([`ProtocolError::MalformedHeader`])
    /// and an oversized body ([`ProtocolError::FrameTooLarge`]). The body of
    /// such a frame is never read.
    pub async fn read_meta(&mut self) -> Result<RpcMeta, ProtocolError> {
        if self.pending.is_some() {
            return Err(ProtocolError::ProtocolSequence(
                "metadata read while the previous payload is unread",
            ));
        }

        let mut raw = [0u8; HEADER_SIZE];
        self.reader.read_exact(&mut raw).await?;
        let header = PacketHeader::unmarshal(&raw)?;
        let payload_size = header.payload_size()?;

        if header.body_size() > self.max_body_size {
            return Err(ProtocolError::FrameTooLarge {
                size: header.body_size() as u64,
                max: self.max_body_size as u64,
            });
        }

        tracing::debug!("Read packet header {}", header);

        self.fill(header.meta_size() as usize).await?;
        match RpcMeta::decode(&self.buf[..]) {
            Ok(meta) => {
                self.pending = Some(header);
                Ok(meta)
            }
            Err(e) => {
                self.fill(payload_size as usize).await?;
                Err(e.into())
            }
        }
    }

    /// Reads the payload of the current frame and decodes it as `M`.
    pub async fn read_payload<M: Message + Default>(&mut self) -> Result<M, ProtocolError> {
        let size = self.take_pending()?;
        self.fill(size).await?;
        Ok(M::decode(&self.buf[..])?)
    }

    /// Reads the payload of the current frame without decoding it.
    pub async fn read_payload_bytes(&mut self) -> Result<Bytes, ProtocolError> {
        let size = self.take_pending()?;
        self.fill(size).await?;
        Ok(Bytes::copy_from_slice(&self.buf))
    }

    /// Consumes the payload of the current frame and throws it away.
    ///
    /// Returns the number of bytes skipped.
    pub async fn discard_payload(&mut self) -> Result<usize, ProtocolError> {
        let size = self.take_pending()?;
        self.fill(size).await?;
        Ok(size)
    }

    /// Returns the underlying reader.
    ///
    /// Bytes already buffered but not yet consumed are lost.
    pub fn into_inner(self) -> R {
        self.reader.into_inner()
    }

    fn take_pending(&mut self) -> Result<usize, ProtocolError> {
        let header = self.pending.take().ok_or(ProtocolError::ProtocolSequence(
            "payload read before a packet header",
        ))?;
        Ok(header.payload_size()? as usize)
    }

    /// Reads exactly `len` bytes into the scratch buffer.
    async fn fill(&mut self, len: usize) -> Result<(), ProtocolError> {
        self.buf.clear();
        self.buf.resize(len, 0);
        self.reader.read_exact(&mut self.buf[..]).await?;
        Ok(())
    }
}

/// Writes header-framed frames to a byte stream.
///
/// Each frame is assembled in memory and written with a single `write_all`
/// followed by a flush, so an encoding failure never leaves a partial frame
/// on the wire. Callers sharing one writer must hold an exclusive lock around
/// each call.
pub struct FrameWriter<W> {
    writer: BufWriter<W>,
    buf: BytesMut,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            writer: BufWriter::with_capacity(DEFAULT_BUFFER_SIZE, inner),
            buf: BytesMut::with_capacity(BOOTSTRAP_LEN),
        }
    }

    /// Writes one frame carrying `meta` and a serialized `payload`.
    ///
    /// Returns the number of bytes written.
    pub async fn write_message<M: Message>(
        &mut self,
        meta: &RpcMeta,
        payload: &M,
    ) -> Result<usize, ProtocolError> {
        self.buf.clear();
        encode_frame(meta, payload, &mut self.buf)?;
        self.flush_frame().await
    }

    /// Writes one frame carrying `meta` and an already serialized payload.
    pub async fn write_frame(
        &mut self,
        meta: &RpcMeta,
        payload: &[u8],
    ) -> Result<usize, ProtocolError> {
        self.buf.clear();
        encode_raw_frame(meta, payload, &mut self.buf)?;
        self.flush_frame().await
    }

    /// Flushes and shuts down the underlying writer.
    pub async fn shutdown(&mut self) -> Result<(), ProtocolError> {
        self.writer.shutdown().await?;
        Ok(())
    }

    /// Returns the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }

    async fn flush_frame(&mut self) -> Result<usize, ProtocolError> {
        let len = self.buf.len();
        self.writer.write_all(&self.buf).await?;
        self.writer.flush().await?;
        tracing::debug!("Wrote frame ({} bytes)", len);
        Ok(len)
    }
}
