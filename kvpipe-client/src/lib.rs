//! # KVPipe Sync Client
//!
//! Purpose: A lightweight, synchronous Redis-compatible client with
//! connection pooling, usable directly or as a `kvpipe` backend.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Reuse TCP connections to avoid repeated connects.
//! 2. **Pipelined Batches**: A batch of N commands is one write and N replies.
//! 3. **Minimal Allocation**: Reuse buffers for RESP framing and parsing.
//! 4. **Protocol Clarity**: Encode/parse RESP2 explicitly for correctness.

mod client;
mod connector;
mod pool;
mod resp;

pub use client::{ClientConfig, ClientError, ClientResult, ClientTtl, KVClient};
pub use connector::{ClientConnector, ClientPipeline};
pub use resp::RespValue;
