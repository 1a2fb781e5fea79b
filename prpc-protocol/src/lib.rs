//! # prpc-protocol
//!
//! Wire protocol implementation for prpc (the baidu_std RPC protocol).
//!
//! This crate provides:
//! - The fixed 12 byte packet header
//! - Protobuf call metadata (`RpcMeta`) for requests and responses
//! - Header-framed stream reader/writer with full-read semantics
//! - Length-prefixed (uvarint) stream reader/writer
//! - Error codes and protocol constants

pub mod codec;
pub mod delimited;
pub mod error;
pub mod frame;
pub mod header;
pub mod meta;

pub use codec::{FrameReader, FrameWriter};
pub use delimited::{DelimitedReader, DelimitedWriter};
pub use error::{ErrorCode, ProtocolError};
pub use frame::{encode_frame, encode_raw_frame, Frame};
pub use header::{PacketHeader, HEADER_SIZE, MAGIC};
pub use meta::{join_service_method, split_service_method, RpcMeta, RpcRequestMeta, RpcResponseMeta};

/// Re-exported so payload types can be declared without a direct dependency.
pub use prost::Message;

/// Default port for prpc servers.
pub const DEFAULT_PORT: u16 = 8170;

/// Maximum frame body size (64 MiB).
pub const DEFAULT_MAX_BODY_SIZE: u32 = 64 * 1024 * 1024;

/// Default size of socket read/write buffers (4 KiB).
pub const DEFAULT_BUFFER_SIZE: usize = 4 * 1024;
