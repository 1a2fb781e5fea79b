//! # prpc-server
//!
//! TCP server for prpc.
//!
//! This crate provides:
//! - The server codec: request reader and response writer
//! - Method dispatch through the [`Dispatcher`] trait and [`ServiceRegistry`]
//! - TCP connection handling with idle timeouts and connection limits
//! - YAML and environment configuration

pub mod codec;
pub mod config;
pub mod error;
pub mod server;
pub mod service;

pub use codec::{RequestHeader, ServerCodec};
pub use config::{Config, ConfigError, NetworkConfig};
pub use error::ServerError;
pub use server::{Server, ServerConfig, ServerStats};
pub use service::{DispatchResult, Dispatcher, MethodError, ServiceRegistry};
