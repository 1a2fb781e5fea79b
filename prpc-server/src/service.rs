//! Method dispatch.
//!
//! The server hands every request to a [`Dispatcher`]. [`ServiceRegistry`]
//! is the stock implementation: typed handlers registered per
//! `service.method`.

use bytes::Bytes;
use prost::Message;
use prpc_protocol::ErrorCode;
use std::collections::HashMap;
use thiserror::Error;

/// Outcome of dispatching one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchResult {
    /// Serialized response; empty on error.
    pub payload: Bytes,
    /// 0 on success.
    pub error_code: i32,
    pub error_text: String,
}

impl DispatchResult {
    pub fn ok(payload: Bytes) -> Self {
        Self {
            payload,
            ..Default::default()
        }
    }

    pub fn from_message<M: Message>(response: &M) -> Self {
        Self::ok(Bytes::from(response.encode_to_vec()))
    }

    /// An error response. Code 0 means success on the wire, so it is sent
    /// as [`ErrorCode::Internal`] instead.
    pub fn error(code: i32, text: impl Into<String>) -> Self {
        Self {
            payload: Bytes::new(),
            error_code: nonzero_code(code),
            error_text: text.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error_code == 0
    }
}

impl From<MethodError> for DispatchResult {
    fn from(err: MethodError) -> Self {
        Self::error(err.code, err.text)
    }
}

fn nonzero_code(code: i32) -> i32 {
    if code == 0 {
        ErrorCode::Internal.code()
    } else {
        code
    }
}

/// Maps `service` and `method` to a response.
pub trait Dispatcher: Send + Sync + 'static {
    fn dispatch(&self, service: &str, method: &str, payload: Bytes) -> DispatchResult;
}

/// An application error returned by a handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{text} (code {code})")]
pub struct MethodError {
    pub code: i32,
    pub text: String,
}

impl MethodError {
    pub fn new(code: ErrorCode, text: impl Into<String>) -> Self {
        Self::with_code(code.code(), text)
    }

    /// An error with an application-defined code; 0 becomes [`ErrorCode::Internal`].
    pub fn with_code(code: i32, text: impl Into<String>) -> Self {
        Self {
            code: nonzero_code(code),
            text: text.into(),
        }
    }

    pub fn internal(text: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, text)
    }
}

type Handler = Box<dyn Fn(Bytes) -> DispatchResult + Send + Sync>;

/// Handlers keyed by service, then method.
#[derive(Default)]
pub struct ServiceRegistry {
    services: HashMap<String, HashMap<String, Handler>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a typed handler for `service.method`.
    ///
    /// A request body that does not decode as `Req` is answered with
    /// `EREQUEST` without calling the handler.
    pub fn register<Req, Resp, F>(&mut self, service: &str, method: &str, handler: F) -> &mut Self
    where
        Req: Message + Default,
        Resp: Message,
        F: Fn(Req) -> Result<Resp, MethodError> + Send + Sync + 'static,
    {
        self.register_raw(service, method, move |payload: Bytes| {
            let request = match Req::decode(payload) {
                Ok(request) => request,
                Err(e) => {
                    return DispatchResult::error(
                        ErrorCode::BadRequest.code(),
                        format!("failed to decode request: {}", e),
                    )
                }
            };
            match handler(request) {
                Ok(response) => DispatchResult::from_message(&response),
                Err(e) => e.into(),
            }
        })
    }

    /// Registers a handler working on serialized bytes.
    pub fn register_raw<F>(&mut self, service: &str, method: &str, handler: F) -> &mut Self
    where
        F: Fn(Bytes) -> DispatchResult + Send + Sync + 'static,
    {
        self.services
            .entry(service.to_string())
            .or_default()
            .insert(method.to_string(), Box::new(handler));
        self
    }

    pub fn has_method(&self, service: &str, method: &str) -> bool {
        self.services
            .get(service)
            .is_some_and(|methods| methods.contains_key(method))
    }

    /// Registered service names, sorted.
    pub fn services(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.services.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Dispatcher for ServiceRegistry {
    fn dispatch(&self, service: &str, method: &str, payload: Bytes) -> DispatchResult {
        let Some(methods) = self.services.get(service) else {
            tracing::warn!("Unknown service '{}'", service);
            return DispatchResult::error(
                ErrorCode::NoService.code(),
                format!("service '{}' not found", service),
            );
        };
        let Some(handler) = methods.get(method) else {
            tracing::warn!("Unknown method '{}.{}'", service, method);
            return DispatchResult::error(
                ErrorCode::NoMethod.code(),
                format!("method '{}' not found in service '{}'", method, service),
            );
        };
        handler(payload)
    }
}
