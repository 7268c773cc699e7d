//! # Synchronous Client API
//!
//! Purpose: A compact, blocking API for Redis-compatible servers over RESP2,
//! for one command at a time or for pipelined batches.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `KVClient` hides pooling and protocol details.
//! 2. **Borrow-Friendly API**: Single commands take `&[u8]`; batches take
//!    `Bytes` so recorded arguments are sent without copying.
//! 3. **Fail Fast**: Protocol violations surface immediately as errors.
//! 4. **Cheap Clones**: A client is a handle on a shared pool.

use std::time::Duration;

use bytes::Bytes;
use kvpipe::PoolId;
use serde::{Deserialize, Deserializer};
use thiserror::Error;
use tracing::debug;

use crate::connector::ClientPipeline;
use crate::pool::{ConnectionPool, PoolConfig};
use crate::resp::RespValue;

pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the sync client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// RESP2 framing or parse error.
    #[error("protocol error")]
    Protocol,
    /// Server returned an error reply.
    #[error("server error: {}", String::from_utf8_lossy(.message))]
    Server { message: Vec<u8> },
    /// Response type did not match the command.
    #[error("unexpected response")]
    UnexpectedResponse,
    /// Pool is at capacity and no idle connections are available.
    #[error("connection pool exhausted")]
    PoolExhausted,
    #[error("invalid address")]
    InvalidAddress,
    /// EXEC replied with a null array.
    #[error("transaction aborted")]
    TransactionAborted,
}

/// TTL state returned by the server, mirroring Redis semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientTtl {
    /// Key is missing or already expired.
    Missing,
    /// Key exists without expiration.
    NoExpiry,
    /// Key expires after the provided duration.
    ExpiresIn(Duration),
}

/// Configuration for the client and its pool.
///
/// Timeouts are given in milliseconds when loaded from a file:
///
/// ```json
/// { "addr": "10.0.0.5:6379", "max_total": 32, "read_timeout_ms": 500 }
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server address, e.g. "127.0.0.1:6379".
    pub addr: String,
    /// Maximum idle connections kept in the pool.
    pub max_idle: usize,
    /// Maximum total connections (idle + in-use).
    pub max_total: usize,
    #[serde(rename = "read_timeout_ms", deserialize_with = "millis")]
    pub read_timeout: Option<Duration>,
    #[serde(rename = "write_timeout_ms", deserialize_with = "millis")]
    pub write_timeout: Option<Duration>,
    #[serde(rename = "connect_timeout_ms", deserialize_with = "millis")]
    pub connect_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            addr: "127.0.0.1:6379".to_string(),
            max_idle: 8,
            max_total: 16,
            read_timeout: None,
            write_timeout: None,
            connect_timeout: None,
        }
    }
}

fn millis<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
    Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
}

/// Synchronous client with connection pooling.
///
/// Each call acquires a connection, runs its command (or batch), and returns
/// the connection to the pool.
#[derive(Clone)]
pub struct KVClient {
    pool: ConnectionPool,
}

impl KVClient {
    /// Creates a client with default configuration.
    pub fn connect(addr: impl Into<String>) -> ClientResult<Self> {
        Self::with_config(ClientConfig {
            addr: addr.into(),
            ..ClientConfig::default()
        })
    }

    pub fn with_config(config: ClientConfig) -> ClientResult<Self> {
        let pool = ConnectionPool::new(PoolConfig {
            addr: config.addr,
            max_idle: config.max_idle,
            max_total: config.max_total,
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
            connect_timeout: config.connect_timeout,
        })?;
        Ok(KVClient { pool })
    }

    /// Identity of the pool, shared by every clone of this client.
    pub fn pool_id(&self) -> PoolId {
        self.pool.id()
    }

    /// Sends all commands in one write and returns one reply per command.
    ///
    /// Error replies are returned in place; only IO and framing failures fail
    /// the whole batch.
    pub fn exec_batch(&self, commands: &[Vec<Bytes>]) -> ClientResult<Vec<RespValue>> {
        if commands.is_empty() {
            return Ok(Vec::new());
        }
        debug!(commands = commands.len(), "sending pipelined batch");
        let mut conn = self.pool.acquire()?;
        conn.exec_batch::<Vec<Bytes>, Bytes>(commands)
    }

    /// Batch handle sending its commands as a plain pipeline.
    pub fn pipeline(&self) -> ClientPipeline {
        ClientPipeline::new(self.clone(), false)
    }

    /// Batch handle wrapping its commands in MULTI/EXEC.
    pub fn transaction(&self) -> ClientPipeline {
        ClientPipeline::new(self.clone(), true)
    }

    /// Fetches a value by key. `Ok(None)` when the key is missing.
    pub fn get(&self, key: &[u8]) -> ClientResult<Option<Vec<u8>>> {
        match self.call(&[b"GET", key])? {
            RespValue::Bulk(data) => Ok(data.map(|data| data.to_vec())),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    pub fn set(&self, key: &[u8], value: &[u8]) -> ClientResult<()> {
        match self.call(&[b"SET", key, value])? {
            RespValue::Simple(_) => Ok(()),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Sets a value with an expiration in whole seconds.
    pub fn set_with_ttl(&self, key: &[u8], value: &[u8], ttl: Duration) -> ClientResult<()> {
        let seconds = ttl.as_secs().to_string();
        match self.call(&[b"SET", key, value, b"EX", seconds.as_bytes()])? {
            RespValue::Simple(_) => Ok(()),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Deletes a key. Returns true when a key was removed.
    pub fn delete(&self, key: &[u8]) -> ClientResult<bool> {
        match self.call(&[b"DEL", key])? {
            RespValue::Integer(count) => Ok(count > 0),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Sets a time-to-live on a key. Returns true when the TTL was set.
    pub fn expire(&self, key: &[u8], ttl: Duration) -> ClientResult<bool> {
        let seconds = ttl.as_secs().to_string();
        match self.call(&[b"EXPIRE", key, seconds.as_bytes()])? {
            RespValue::Integer(value) => Ok(value == 1),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    pub fn ttl(&self, key: &[u8]) -> ClientResult<ClientTtl> {
        match self.call(&[b"TTL", key])? {
            RespValue::Integer(-2) => Ok(ClientTtl::Missing),
            RespValue::Integer(-1) => Ok(ClientTtl::NoExpiry),
            RespValue::Integer(value) if value >= 0 => {
                Ok(ClientTtl::ExpiresIn(Duration::from_secs(value as u64)))
            }
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Pings the server. Returns the raw response payload.
    pub fn ping(&self, payload: Option<&[u8]>) -> ClientResult<Vec<u8>> {
        let response = match payload {
            Some(data) => self.call(&[b"PING", data])?,
            None => self.call(&[b"PING"])?,
        };
        match response {
            RespValue::Simple(text) => Ok(text),
            RespValue::Bulk(Some(data)) => Ok(data.to_vec()),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    pub fn info(&self) -> ClientResult<Vec<u8>> {
        match self.call(&[b"INFO"])? {
            RespValue::Bulk(Some(data)) => Ok(data.to_vec()),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    fn call(&self, args: &[&[u8]]) -> ClientResult<RespValue> {
        let mut conn = self.pool.acquire()?;
        match conn.exec(args)? {
            RespValue::Error(message) => Err(ClientError::Server { message }),
            reply => Ok(reply),
        }
    }
}
