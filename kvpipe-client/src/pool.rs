//! # Connection Pool
//!
//! Purpose: Reuse TCP connections across single commands and pipelined
//! batches.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: A bounded set of reusable connections; going
//!    over the limit fails immediately with `PoolExhausted`.
//! 2. **Short Critical Sections**: The lock is held only while moving idle
//!    connections in or out.
//! 3. **Poisoned Connections Are Dropped**: Any IO or framing failure retires
//!    the connection instead of returning it with unread replies.
//! 4. **One Write per Batch**: A batch is framed into the connection's write
//!    buffer and sent with a single `write_all`.

use std::collections::VecDeque;
use std::io::{BufReader, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use kvpipe::PoolId;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::client::{ClientError, ClientResult};
use crate::resp::{encode_command, read_responses, RespValue};

/// Pool configuration for the sync client.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Server address, e.g. "127.0.0.1:6379".
    pub addr: String,
    /// Maximum number of idle connections to keep.
    pub max_idle: usize,
    /// Maximum total connections (idle + in-use).
    pub max_total: usize,
    /// Optional TCP read timeout.
    pub read_timeout: Option<Duration>,
    /// Optional TCP write timeout.
    pub write_timeout: Option<Duration>,
    /// Optional TCP connect timeout.
    pub connect_timeout: Option<Duration>,
}

struct PoolState {
    idle: VecDeque<Connection>,
    total: usize,
}

struct PoolInner {
    config: PoolConfig,
    state: Mutex<PoolState>,
}

impl PoolInner {
    fn release_slot(&self) {
        let mut state = self.state.lock();
        state.total = state.total.saturating_sub(1);
    }

    fn give_back(&self, conn: Connection) {
        let mut state = self.state.lock();
        if state.idle.len() < self.config.max_idle {
            state.idle.push_back(conn);
        } else {
            state.total = state.total.saturating_sub(1);
        }
    }
}

/// Connection pool handle. Clones share the same pool.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Creates a new connection pool with the provided configuration.
    pub fn new(config: PoolConfig) -> ClientResult<Self> {
        config.addr.parse::<SocketAddr>().map_err(|_| ClientError::InvalidAddress)?;
        let state = PoolState {
            idle: VecDeque::with_capacity(config.max_idle),
            total: 0,
        };
        Ok(ConnectionPool {
            inner: Arc::new(PoolInner {
                config,
                state: Mutex::new(state),
            }),
        })
    }

    /// Identity shared by every clone of this pool.
    pub fn id(&self) -> PoolId {
        PoolId::of(&self.inner)
    }

    /// Acquires an idle connection, or opens one if under the limit.
    pub fn acquire(&self) -> ClientResult<PooledConnection> {
        let idle = self.inner.state.lock().idle.pop_front();
        if let Some(conn) = idle {
            return Ok(PooledConnection::new(self.inner.clone(), conn));
        }

        if !self.try_reserve() {
            warn!(addr = %self.inner.config.addr, max_total = self.inner.config.max_total, "connection pool exhausted");
            return Err(ClientError::PoolExhausted);
        }

        match Connection::connect(&self.inner.config) {
            Ok(conn) => {
                debug!(addr = %self.inner.config.addr, "opened connection");
                Ok(PooledConnection::new(self.inner.clone(), conn))
            }
            Err(err) => {
                self.inner.release_slot();
                Err(err)
            }
        }
    }

    fn try_reserve(&self) -> bool {
        let mut state = self.inner.state.lock();
        if state.total >= self.inner.config.max_total {
            return false;
        }
        state.total += 1;
        true
    }
}

/// RAII wrapper returning a connection to the pool on drop.
pub struct PooledConnection {
    pool: Arc<PoolInner>,
    conn: Option<Connection>,
    valid: bool,
}

impl PooledConnection {
    fn new(pool: Arc<PoolInner>, conn: Connection) -> Self {
        PooledConnection {
            pool,
            conn: Some(conn),
            valid: true,
        }
    }

    /// Sends one command and reads its reply.
    pub fn exec(&mut self, args: &[&[u8]]) -> ClientResult<RespValue> {
        let mut replies = self.exec_batch::<&[&[u8]], &[u8]>(&[args])?;
        replies.pop().ok_or(ClientError::Protocol)
    }

    /// Sends every command in one write, then reads one reply per command.
    pub fn exec_batch<C, A>(&mut self, commands: &[C]) -> ClientResult<Vec<RespValue>>
    where
        C: AsRef<[A]>,
        A: AsRef<[u8]>,
    {
        let conn = self.conn.as_mut().ok_or(ClientError::Protocol)?;
        let replies = conn.exec_batch::<C, A>(commands);
        if let Err(err) = &replies {
            // Unread replies may still be in flight; never reuse this socket.
            warn!(error = %err, "retiring connection after failure");
            self.valid = false;
        }
        replies
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        if self.valid {
            self.pool.give_back(conn);
        } else {
            self.pool.release_slot();
        }
    }
}

/// Single TCP connection with reusable buffers.
struct Connection {
    reader: BufReader<TcpStream>,
    line_buf: Vec<u8>,
    write_buf: Vec<u8>,
}

impl Connection {
    fn connect(config: &PoolConfig) -> ClientResult<Self> {
        let stream = connect_stream(config)?;
        stream.set_read_timeout(config.read_timeout)?;
        stream.set_write_timeout(config.write_timeout)?;
        stream.set_nodelay(true)?;

        Ok(Connection {
            reader: BufReader::new(stream),
            line_buf: Vec::with_capacity(128),
            write_buf: Vec::with_capacity(256),
        })
    }

    fn exec_batch<C, A>(&mut self, commands: &[C]) -> ClientResult<Vec<RespValue>>
    where
        C: AsRef<[A]>,
        A: AsRef<[u8]>,
    {
        self.write_buf.clear();
        for command in commands {
            encode_command(command.as_ref(), &mut self.write_buf);
        }

        let stream = self.reader.get_mut();
        stream.write_all(&self.write_buf)?;
        stream.flush()?;

        read_responses(&mut self.reader, &mut self.line_buf, commands.len())
    }
}

fn connect_stream(config: &PoolConfig) -> ClientResult<TcpStream> {
    let addr: SocketAddr = config.addr.parse().map_err(|_| ClientError::InvalidAddress)?;
    let stream = match config.connect_timeout {
        Some(timeout) => TcpStream::connect_timeout(&addr, timeout)?,
        None => TcpStream::connect(addr)?,
    };
    Ok(stream)
}
