//! # KVPipe
//!
//! Purpose: Batch commands against key-value backends behind a record-now,
//! read-later API, so independent pieces of code can contribute to one round
//! trip per connection.
//!
//! ## Design Principles
//! 1. **Futures as Placeholders**: Every recorded command returns a `Future`
//!    that resolves when the owning batch executes.
//! 2. **Composable Helpers**: Functions accept `&mut dyn Pipe` and open a
//!    nested scope; nested work is forwarded to the root pipe without I/O.
//! 3. **One Round Trip per Connection**: The `Coordinator` keeps one batch per
//!    named connection and runs them concurrently.
//! 4. **Pluggable Backends**: Anything implementing `Connector` can be bound
//!    into the `ConnectionRegistry`; `MemoryConnector` ships for tests.
//!
//! ## Example
//!
//! ```rust
//! use kvpipe::prelude::*;
//!
//! let registry = ConnectionRegistry::new();
//! registry.connect(MemoryConnector::new(), None)?;
//!
//! let value = registry.autoexec(None, None, |pipe| -> PipeResult<Future> {
//!     pipe.set("greeting", "hello");
//!     Ok(pipe.get("greeting"))
//! })?;
//! assert_eq!(value.text()?, "hello");
//! # Ok::<(), kvpipe::PipeError>(())
//! ```

mod backend;
mod command;
mod context;
mod coordinator;
mod error;
mod future;
mod memory;
mod nested;
mod pipe;
mod pipeline;
mod registry;
mod value;

pub use backend::{BatchHandle, Connector, PoolId};
pub use command::Command;
pub use context::{nested, nested_autoexec, scoped};
pub use coordinator::Coordinator;
pub use error::{BackendError, PipeError, PipeResult};
pub use future::Future;
pub use memory::{InjectedFailure, MemoryConnector};
pub use nested::NestedPipeline;
pub use pipe::{Callback, Commands, Pipe};
pub use pipeline::Pipeline;
pub use registry::{ConnectionRegistry, RegistryConfig, TaskMode, DEFAULT_CONNECTION};
pub use value::Value;

/// Common imports for code that records commands.
pub mod prelude {
    pub use crate::{Commands, ConnectionRegistry, Future, MemoryConnector, Pipe, PipeError, PipeResult, Value};
}
