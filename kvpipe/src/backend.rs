//! # Backend Seams
//!
//! Purpose: Define the two traits a key-value client implements to plug into
//! the pipeline engine.
//!
//! ## Design Principles
//! 1. **Strategy Pattern**: Pipelines only see `BatchHandle`; the wire protocol
//!    lives behind it.
//! 2. **Factory per Name**: A `Connector` is bound under a connection name and
//!    produces a fresh, exclusively owned handle on demand.
//! 3. **Pool Identity**: `pool_id` lets the registry tell whether a rebinding
//!    points at the same underlying pool.

use crate::command::Command;
use crate::error::{BackendError, PipeResult};
use crate::value::Value;

/// Identity of the connection pool behind a connector.
///
/// Two connectors with equal ids talk to the same pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolId(usize);

impl PoolId {
    pub fn new(id: usize) -> Self {
        PoolId(id)
    }

    /// Derives an id from the address of a shared allocation.
    pub fn of<T: ?Sized>(shared: &std::sync::Arc<T>) -> Self {
        PoolId(std::sync::Arc::as_ptr(shared) as *const () as usize)
    }
}

/// One backend batch: queue commands without I/O, then send them in one trip.
pub trait BatchHandle: Send {
    /// Queues a command. Must not perform I/O.
    fn queue(&mut self, command: &Command);

    /// Sends every queued command in one round trip.
    ///
    /// Replies are returned in submission order. The handle's queue is empty
    /// afterwards whether or not the call succeeded.
    fn execute(&mut self) -> Result<Vec<Value>, BackendError>;
}

/// Factory bound in the registry under a connection name.
pub trait Connector: Send + Sync {
    /// Identity of the underlying pool.
    fn pool_id(&self) -> PoolId;

    /// Produces a fresh batch handle.
    fn batch(&self) -> PipeResult<Box<dyn BatchHandle>>;
}
