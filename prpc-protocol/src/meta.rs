//! Call metadata carried in the metadata section of every frame.
//!
//! These are the baidu_std `RpcMeta` messages; field numbers follow the
//! upstream `baidu_rpc_meta.proto` so that metadata produced here can be read
//! by any baidu_std peer. Fields this implementation never acts on are left
//! out; protobuf skips them on decode.

use crate::error::ProtocolError;

/// Separator between the service and method parts of `service.method`.
pub const SERVICE_METHOD_SEPARATOR: char = '.';

/// Envelope for request and response metadata.
#[derive(Clone, PartialEq, prost::Message)]
pub struct RpcMeta {
    #[prost(message, optional, tag = "1")]
    pub request: Option<RpcRequestMeta>,
    #[prost(message, optional, tag = "2")]
    pub response: Option<RpcResponseMeta>,
    #[prost(int32, optional, tag = "3")]
    pub compress_type: Option<i32>,
    #[prost(int64, optional, tag = "4")]
    pub correlation_id: Option<i64>,
    #[prost(int32, optional, tag = "5")]
    pub attachment_size: Option<i32>,
}

/// Request half of [`RpcMeta`].
#[derive(Clone, PartialEq, prost::Message)]
pub struct RpcRequestMeta {
    #[prost(string, required, tag = "1")]
    pub service_name: String,
    #[prost(string, required, tag = "2")]
    pub method_name: String,
    #[prost(int64, optional, tag = "3")]
    pub log_id: Option<i64>,
    #[prost(int32, optional, tag = "8")]
    pub timeout_ms: Option<i32>,
}

/// Response half of [`RpcMeta`].
#[derive(Clone, PartialEq, prost::Message)]
pub struct RpcResponseMeta {
    #[prost(int32, optional, tag = "1")]
    pub error_code: Option<i32>,
    #[prost(string, optional, tag = "2")]
    pub error_text: Option<String>,
}

impl RpcMeta {
    /// Builds request metadata for `service.method` with the given sequence number.
    pub fn for_request(service: &str, method: &str, seq: u64) -> Self {
        Self {
            request: Some(RpcRequestMeta {
                service_name: service.to_string(),
                method_name: method.to_string(),
                log_id: None,
                timeout_ms: None,
            }),
            correlation_id: Some(seq as i64),
            ..Default::default()
        }
    }

    /// Builds response metadata echoing `seq`.
    pub fn for_response(seq: u64, error_code: i32, error_text: &str) -> Self {
        Self {
            response: Some(RpcResponseMeta {
                error_code: Some(error_code),
                error_text: Some(error_text.to_string()),
            }),
            correlation_id: Some(seq as i64),
            ..Default::default()
        }
    }

    /// Sets the request deadline hint sent to the server.
    pub fn with_timeout_ms(mut self, timeout_ms: i32) -> Self {
        if let Some(request) = self.request.as_mut() {
            request.timeout_ms = Some(timeout_ms);
        }
        self
    }

    /// Returns the correlation id as the caller's sequence number.
    ///
    /// The cast is bit-preserving, so `u64::MAX` survives the trip through
    /// the signed wire field.
    pub fn sequence(&self) -> Result<u64, ProtocolError> {
        self.correlation_id
            .map(|id| id as u64)
            .ok_or(ProtocolError::MissingField("correlation_id"))
    }

    /// Rejects frames that rely on features this implementation lacks.
    pub fn ensure_supported(&self) -> Result<(), ProtocolError> {
        if let Some(compress) = self.compress_type.filter(|c| *c != 0) {
            return Err(ProtocolError::Unsupported(format!(
                "compress_type {}",
                compress
            )));
        }
        if let Some(size) = self.attachment_size.filter(|s| *s != 0) {
            return Err(ProtocolError::Unsupported(format!(
                "attachment of {} bytes",
                size
            )));
        }
        Ok(())
    }

    /// Returns the error code, treating an absent response section as success.
    pub fn error_code(&self) -> i32 {
        self.response
            .as_ref()
            .and_then(|r| r.error_code)
            .unwrap_or(0)
    }

    /// Returns the error text, empty when absent.
    pub fn error_text(&self) -> &str {
        self.response
            .as_ref()
            .and_then(|r| r.error_text.as_deref())
            .unwrap_or("")
    }
}

/// Splits `service.method` on the first separator.
///
/// A string without a separator yields an empty method name.
pub fn split_service_method(service_method: &str) -> (&str, &str) {
    service_method
        .split_once(SERVICE_METHOD_SEPARATOR)
        .unwrap_or((service_method, ""))
}

/// Joins service and method names into `service.method`.
pub fn join_service_method(service: &str, method: &str) -> String {
    format!("{}{}{}", service, SERVICE_METHOD_SEPARATOR, method)
}
