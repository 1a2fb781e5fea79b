//! Server side of the header-framed protocol.

use crate::error::ServerError;
use bytes::Bytes;
use prost::Message;
use prpc_protocol::{
    join_service_method, FrameReader, FrameWriter, ProtocolError, RpcMeta, DEFAULT_MAX_BODY_SIZE,
};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::Mutex;

/// The decoded metadata of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHeader {
    pub service: String,
    pub method: String,
    /// Sequence number to echo in the response.
    pub seq: u64,
    /// Deadline hint from the caller.
    pub timeout_ms: Option<i32>,
    pub log_id: Option<i64>,
}

impl RequestHeader {
    pub fn service_method(&self) -> String {
        join_service_method(&self.service, &self.method)
    }
}

/// Request reader and response writer over one stream.
///
/// Requests are read by a single task; the writer is locked per frame so
/// a response always reaches the wire whole.
pub struct ServerCodec<S> {
    reader: Mutex<FrameReader<ReadHalf<S>>>,
    writer: Mutex<FrameWriter<WriteHalf<S>>>,
}

impl<S: AsyncRead + AsyncWrite> ServerCodec<S> {
    pub fn new(stream: S) -> Self {
        Self::with_max_body_size(stream, DEFAULT_MAX_BODY_SIZE)
    }

    pub fn with_max_body_size(stream: S, max_body_size: u32) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: Mutex::new(FrameReader::with_max_body_size(read_half, max_body_size)),
            writer: Mutex::new(FrameWriter::new(write_half)),
        }
    }

    /// Reads the header and metadata of the next request.
    ///
    /// Frames without a request section, without a correlation id, or using
    /// compression or attachments are rejected after their body is skipped.
    pub async fn read_request_header(&self) -> Result<RequestHeader, ServerError> {
        let mut reader = self.reader.lock().await;
        let meta = reader.read_meta().await?;
        match request_header(meta) {
            Ok(header) => Ok(header),
            Err(e) => {
                reader.discard_payload().await?;
                Err(e.into())
            }
        }
    }

    /// Reads the body of the current request and decodes it as `M`.
    pub async fn read_request_body<M: Message + Default>(&self) -> Result<M, ServerError> {
        Ok(self.reader.lock().await.read_payload().await?)
    }

    /// Reads the body of the current request without decoding it.
    pub async fn read_request_body_bytes(&self) -> Result<Bytes, ServerError> {
        Ok(self.reader.lock().await.read_payload_bytes().await?)
    }

    /// Consumes the body of the current request without decoding it.
    pub async fn discard_request_body(&self) -> Result<(), ServerError> {
        self.reader.lock().await.discard_payload().await?;
        Ok(())
    }

    /// Writes a response frame carrying `response`.
    pub async fn write_response<M: Message>(
        &self,
        seq: u64,
        error_code: i32,
        error_text: &str,
        response: &M,
    ) -> Result<(), ServerError> {
        let meta = RpcMeta::for_response(seq, error_code, error_text);
        self.writer
            .lock()
            .await
            .write_message(&meta, response)
            .await?;
        Ok(())
    }

    /// Writes a response frame whose payload is already serialized.
    pub async fn write_response_bytes(
        &self,
        seq: u64,
        error_code: i32,
        error_text: &str,
        payload: &[u8],
    ) -> Result<(), ServerError> {
        let meta = RpcMeta::for_response(seq, error_code, error_text);
        self.writer.lock().await.write_frame(&meta, payload).await?;
        Ok(())
    }

    /// Shuts down the write half.
    pub async fn close(&self) -> Result<(), ServerError> {
        self.writer.lock().await.shutdown().await?;
        Ok(())
    }
}

fn request_header(meta: RpcMeta) -> Result<RequestHeader, ProtocolError> {
    meta.ensure_supported()?;
    let seq = meta.sequence()?;
    let request = meta.request.ok_or(ProtocolError::MissingField("request"))?;
    Ok(RequestHeader {
        service: request.service_name,
        method: request.method_name,
        seq,
        timeout_ms: request.timeout_ms,
        log_id: request.log_id,
    })
}
