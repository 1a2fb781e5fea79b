//! Client side of the header-framed protocol.
//!
//! A call moves through `Idle -> AwaitingResponseHeader -> AwaitingResponseBody -> Idle`.
//! The codec only enforces the order of reads; matching a response to its
//! request is left to [`crate::connection::Connection`].

use crate::error::ClientError;
use parking_lot::Mutex as StateLock;
use prost::Message;
use prpc_protocol::{
    split_service_method, FrameReader, FrameWriter, ProtocolError, RpcMeta, DEFAULT_MAX_BODY_SIZE,
};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::Mutex;

/// Where the codec is in the current call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    AwaitingResponseHeader,
    AwaitingResponseBody,
}

/// The decoded metadata of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHeader {
    /// Sequence number echoed by the server.
    pub seq: u64,
    pub error_code: i32,
    pub error_text: String,
}

impl ResponseHeader {
    pub fn is_ok(&self) -> bool {
        self.error_code == 0
    }
}

/// Request writer and response reader over one stream.
pub struct ClientCodec<S> {
    writer: Mutex<FrameWriter<WriteHalf<S>>>,
    reader: Mutex<FrameReader<ReadHalf<S>>>,
    state: StateLock<CallState>,
    timeout_ms: Option<i32>,
}

impl<S: AsyncRead + AsyncWrite> ClientCodec<S> {
    pub fn new(stream: S) -> Self {
        Self::with_max_body_size(stream, DEFAULT_MAX_BODY_SIZE)
    }

    pub fn with_max_body_size(stream: S, max_body_size: u32) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            writer: Mutex::new(FrameWriter::new(write_half)),
            reader: Mutex::new(FrameReader::with_max_body_size(read_half, max_body_size)),
            state: StateLock::new(CallState::Idle),
            timeout_ms: None,
        }
    }

    /// Sets the deadline hint carried in every request's metadata.
    pub fn with_timeout_ms(mut self, timeout_ms: i32) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn state(&self) -> CallState {
        *self.state.lock()
    }

    /// Writes a request frame for `service_method` carrying `request`.
    pub async fn write_request<M: Message>(
        &self,
        service_method: &str,
        seq: u64,
        request: &M,
    ) -> Result<(), ClientError> {
        let meta = self.request_meta(service_method, seq);
        self.writer
            .lock()
            .await
            .write_message(&meta, request)
            .await?;
        self.mark_sent();
        Ok(())
    }

    /// Writes a request frame whose payload is already serialized.
    pub async fn write_request_bytes(
        &self,
        service_method: &str,
        seq: u64,
        payload: &[u8],
    ) -> Result<(), ClientError> {
        let meta = self.request_meta(service_method, seq);
        self.writer.lock().await.write_frame(&meta, payload).await?;
        self.mark_sent();
        Ok(())
    }

    /// Reads the header and metadata of the next response.
    ///
    /// Responses using compression or attachments are rejected; their body
    /// is skipped first so the stream stays usable.
    pub async fn read_response_header(&self) -> Result<ResponseHeader, ClientError> {
        if self.state() == CallState::AwaitingResponseBody {
            return Err(ProtocolError::ProtocolSequence(
                "response header read while the previous body is unread",
            )
            .into());
        }

        let mut reader = self.reader.lock().await;
        let meta = reader.read_meta().await?;
        let seq = match meta.ensure_supported().and_then(|_| meta.sequence()) {
            Ok(seq) => seq,
            Err(e) => {
                reader.discard_payload().await?;
                return Err(e.into());
            }
        };

        *self.state.lock() = CallState::AwaitingResponseBody;
        Ok(ResponseHeader {
            seq,
            error_code: meta.error_code(),
            error_text: meta.error_text().to_string(),
        })
    }

    /// Reads the body of the current response and decodes it as `M`.
    pub async fn read_response_body<M: Message + Default>(&self) -> Result<M, ClientError> {
        self.expect_body()?;
        let result = self.reader.lock().await.read_payload().await;
        *self.state.lock() = CallState::Idle;
        Ok(result?)
    }

    /// Consumes the body of the current response without decoding it.
    pub async fn discard_response_body(&self) -> Result<(), ClientError> {
        self.expect_body()?;
        let result = self.reader.lock().await.discard_payload().await;
        *self.state.lock() = CallState::Idle;
        result?;
        Ok(())
    }

    /// Shuts down the write half; the server sees end of stream.
    pub async fn close(&self) -> Result<(), ClientError> {
        self.writer.lock().await.shutdown().await?;
        Ok(())
    }

    fn request_meta(&self, service_method: &str, seq: u64) -> RpcMeta {
        let (service, method) = split_service_method(service_method);
        if method.is_empty() {
            tracing::debug!("No method name in '{}'", service_method);
        }
        let meta = RpcMeta::for_request(service, method, seq);
        match self.timeout_ms {
            Some(ms) => meta.with_timeout_ms(ms),
            None => meta,
        }
    }

    fn mark_sent(&self) {
        let mut state = self.state.lock();
        if *state == CallState::Idle {
            *state = CallState::AwaitingResponseHeader;
        }
    }

    fn expect_body(&self) -> Result<(), ClientError> {
        if self.state() != CallState::AwaitingResponseBody {
            return Err(
                ProtocolError::ProtocolSequence("response body read before its header").into(),
            );
        }
        Ok(())
    }
}
