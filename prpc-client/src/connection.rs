//! Connection management.

use crate::codec::ClientCodec;
use crate::error::ClientError;
use prost::Message;
use prpc_protocol::{ProtocolError, DEFAULT_MAX_BODY_SIZE};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Backend address, `host:port`.
    pub addr: String,
    /// Dial timeout.
    pub connect_timeout: Duration,
    /// Deadline for one whole round trip. `None` waits forever.
    pub request_timeout: Option<Duration>,
    /// Largest response body accepted.
    pub max_body_size: u32,
}

impl ConnectionConfig {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Some(Duration::from_secs(30)),
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_max_body_size(mut self, size: u32) -> Self {
        self.max_body_size = size;
        self
    }
}

/// A connection to one backend.
///
/// Round trips are serialized: one call is in flight at a time, and the
/// response is matched to the request by position. The echoed sequence
/// number is still checked.
pub struct Connection {
    config: ConnectionConfig,
    codec: ClientCodec<TcpStream>,
    /// Held for a whole request/response exchange.
    call_lock: Mutex<()>,
    next_seq: AtomicU64,
    connected: AtomicBool,
    calls_total: AtomicU64,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("addr", &self.config.addr)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl Connection {
    /// Dials the backend.
    pub async fn connect(config: ConnectionConfig) -> Result<Self, ClientError> {
        tracing::debug!("Connecting to {}...", config.addr);

        let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(&config.addr))
            .await
            .map_err(|_| {
                tracing::debug!("Connection timeout");
                ClientError::Dial {
                    addr: config.addr.clone(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "connect timed out",
                    ),
                }
            })?
            .map_err(|e| {
                tracing::debug!("Connection failed: {}", e);
                ClientError::Dial {
                    addr: config.addr.clone(),
                    source: e,
                }
            })?;

        stream.set_nodelay(true).ok();

        let mut codec = ClientCodec::with_max_body_size(stream, config.max_body_size);
        if let Some(timeout) = config.request_timeout {
            codec = codec.with_timeout_ms(timeout.as_millis().min(i32::MAX as u128) as i32);
        }

        tracing::debug!("Connected to {}", config.addr);

        Ok(Self {
            config,
            codec,
            call_lock: Mutex::new(()),
            next_seq: AtomicU64::new(1),
            connected: AtomicBool::new(true),
            calls_total: AtomicU64::new(0),
        })
    }

    pub fn addr(&self) -> &str {
        &self.config.addr
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Number of calls attempted on this connection.
    pub fn calls_total(&self) -> u64 {
        self.calls_total.load(Ordering::Relaxed)
    }

    /// Calls `service_method` with `request` and decodes the response as `Resp`.
    pub async fn call<Req, Resp>(&self, service_method: &str, request: &Req) -> Result<Resp, ClientError>
    where
        Req: Message,
        Resp: Message + Default,
    {
        self.call_encoded(service_method, &request.encode_to_vec())
            .await
    }

    /// Calls `service_method` with an already serialized request payload.
    pub async fn call_encoded<Resp: Message + Default>(
        &self,
        service_method: &str,
        payload: &[u8],
    ) -> Result<Resp, ClientError> {
        let _guard = self.call_lock.lock().await;
        // Checked under the lock: the previous holder may have poisoned the stream.
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        self.calls_total.fetch_add(1, Ordering::Relaxed);

        tracing::debug!("Calling {} seq={} on {}", service_method, seq, self.config.addr);

        let exchange = self.exchange(service_method, seq, payload);
        let result = match self.config.request_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, exchange).await {
                Ok(result) => result,
                Err(_) => Err(ClientError::Timeout),
            },
            None => exchange.await,
        };

        if let Err(e) = &result {
            if leaves_stream_unusable(e) {
                tracing::debug!("Connection to {} poisoned: {}", self.config.addr, e);
                self.connected.store(false, Ordering::SeqCst);
            }
        }
        result
    }

    /// Shuts down the write half and marks the connection unusable.
    pub async fn close(&self) -> Result<(), ClientError> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.codec.close().await
    }

    async fn exchange<Resp: Message + Default>(
        &self,
        service_method: &str,
        seq: u64,
        payload: &[u8],
    ) -> Result<Resp, ClientError> {
        self.codec
            .write_request_bytes(service_method, seq, payload)
            .await?;

        let header = self.codec.read_response_header().await?;
        if header.seq != seq {
            self.codec.discard_response_body().await?;
            return Err(ClientError::SequenceMismatch {
                expected: seq,
                actual: header.seq,
            });
        }

        if !header.is_ok() {
            self.codec.discard_response_body().await?;
            return Err(ClientError::Remote {
                code: header.error_code,
                text: header.error_text,
            });
        }

        self.codec.read_response_body().await
    }
}

/// Errors after which the next frame boundary is unknown.
fn leaves_stream_unusable(err: &ClientError) -> bool {
    match err {
        ClientError::Remote { .. } => false,
        // Undecodable metadata or bodies are skipped whole.
        ClientError::Protocol(ProtocolError::Decode(_))
        | ClientError::Protocol(ProtocolError::MissingField(_))
        | ClientError::Protocol(ProtocolError::Unsupported(_)) => false,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prpc_protocol::{FrameReader, FrameWriter, RpcMeta};
    use std::sync::Arc;
    use tokio::net::TcpListener;

    /// Accepts one connection and answers each request with `respond`.
    async fn fake_backend<F>(respond: F) -> String
    where
        F: Fn(RpcMeta, String) -> (RpcMeta, String) + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (r, w) = stream.into_split();
            let mut reader = FrameReader::new(r);
            let mut writer = FrameWriter::new(w);
            while let Ok(meta) = reader.read_meta().await {
                let body: String = reader.read_payload().await.unwrap();
                let (meta, body) = respond(meta, body);
                writer.write_message(&meta, &body).await.unwrap();
            }
        });
        addr
    }

    #[tokio::test]
    async fn test_call_roundtrip() {
        let addr = fake_backend(|meta, body| {
            let seq = meta.sequence().unwrap();
            (RpcMeta::for_response(seq, 0, ""), body.to_uppercase())
        })
        .await;

        let conn = Connection::connect(ConnectionConfig::new(addr)).await.unwrap();
        assert!(conn.is_connected());

        let reply: String = conn.call("Echo.Say", &"hi".to_string()).await.unwrap();
        assert_eq!(reply, "HI");
        let reply: String = conn.call("Echo.Say", &"again".to_string()).await.unwrap();
        assert_eq!(reply, "AGAIN");
        assert_eq!(conn.calls_total(), 2);
    }

    #[tokio::test]
    async fn test_remote_error_keeps_connection() {
        let addr = fake_backend(|meta, body| {
            let seq = meta.sequence().unwrap();
            if body == "bad" {
                (RpcMeta::for_response(seq, 1003, "bad request"), String::new())
            } else {
                (RpcMeta::for_response(seq, 0, ""), body)
            }
        })
        .await;

        let conn = Connection::connect(ConnectionConfig::new(addr)).await.unwrap();
        let err = conn
            .call::<_, String>("Echo.Say", &"bad".to_string())
            .await
            .unwrap_err();
        match err {
            ClientError::Remote { code, text } => {
                assert_eq!(code, 1003);
                assert_eq!(text, "bad request");
            }
            other => panic!("unexpected error: {:?}", other),
        }

        assert!(conn.is_connected());
        let reply: String = conn.call("Echo.Say", &"ok".to_string()).await.unwrap();
        assert_eq!(reply, "ok");
    }

    #[tokio::test]
    async fn test_sequence_mismatch() {
        let addr = fake_backend(|meta, body| {
            let seq = meta.sequence().unwrap();
            (RpcMeta::for_response(seq + 100, 0, ""), body)
        })
        .await;

        let conn = Connection::connect(ConnectionConfig::new(addr)).await.unwrap();
        let err = conn
            .call::<_, String>("Echo.Say", &"x".to_string())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::SequenceMismatch {
                expected: 1,
                actual: 101
            }
        ));
        assert!(!conn.is_connected());

        let err = conn
            .call::<_, String>("Echo.Say", &"x".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::NotConnected));
    }

    #[tokio::test]
    async fn test_request_timeout_poisons_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            // Accept and never answer.
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let config =
            ConnectionConfig::new(addr).with_request_timeout(Some(Duration::from_millis(50)));
        let conn = Connection::connect(config).await.unwrap();

        let err = conn
            .call::<_, String>("Echo.Say", &"x".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Timeout));
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn test_queued_call_fails_after_timeout_poisons_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let received = Arc::new(AtomicU64::new(0));
        let seen = received.clone();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (r, w) = stream.into_split();
            let mut reader = FrameReader::new(r);
            let mut writer = FrameWriter::new(w);
            while let Ok(meta) = reader.read_meta().await {
                let body: String = reader.read_payload().await.unwrap();
                seen.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(80)).await;
                let reply = RpcMeta::for_response(meta.sequence().unwrap(), 0, "");
                if writer.write_message(&reply, &body).await.is_err() {
                    break;
                }
            }
        });

        let config =
            ConnectionConfig::new(addr).with_request_timeout(Some(Duration::from_millis(50)));
        let conn = Arc::new(Connection::connect(config).await.unwrap());

        let first = {
            let conn = conn.clone();
            tokio::spawn(async move { conn.call::<_, String>("Echo.Say", &"a".to_string()).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = {
            let conn = conn.clone();
            tokio::spawn(async move { conn.call::<_, String>("Echo.Say", &"b".to_string()).await })
        };

        assert!(matches!(first.await.unwrap(), Err(ClientError::Timeout)));
        assert!(matches!(second.await.unwrap(), Err(ClientError::NotConnected)));
        assert_eq!(conn.calls_total(), 1);

        // Only the first request ever reached the backend.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(received.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dial_failure() {
        // Bind then drop to get a port nobody listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = Connection::connect(ConnectionConfig::new(addr.clone()))
            .await
            .err()
            .unwrap();
        match err {
            ClientError::Dial { addr: failed, .. } => assert_eq!(failed, addr),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_server_hangup_is_io_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        let conn = Connection::connect(ConnectionConfig::new(addr)).await.unwrap();
        let err = conn
            .call::<_, String>("Echo.Say", &"x".to_string())
            .await
            .unwrap_err();
        assert!(!err.is_remote());
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn test_close() {
        let addr = fake_backend(|meta, body| {
            (RpcMeta::for_response(meta.sequence().unwrap(), 0, ""), body)
        })
        .await;

        let conn = Connection::connect(ConnectionConfig::new(addr)).await.unwrap();
        conn.close().await.unwrap();
        assert!(!conn.is_connected());
        // Closing twice is harmless.
        conn.close().await.unwrap();
    }
}
