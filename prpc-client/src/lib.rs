//! # prpc-client
//!
//! Client library for prpc.
//!
//! This crate provides:
//! - The client codec: request writer and response reader
//! - Connections with sequence checking and request deadlines
//! - Load-balanced channels (round-robin, random, content hash)
//! - Backend registry and naming services (`list://`, `file://`)

pub mod balancer;
pub mod channel;
pub mod codec;
pub mod connection;
pub mod error;
pub mod naming;
pub mod registry;

pub use balancer::{LoadBalancer, LoadBalancerKind};
pub use channel::{Channel, ChannelOptions, ReloadSummary};
pub use codec::{CallState, ClientCodec, ResponseHeader};
pub use connection::{Connection, ConnectionConfig};
pub use error::ClientError;
pub use naming::{FileNamingService, ListNamingService, NamingService};
pub use registry::{Backend, BackendRegistry};
