//! # Scoped Execution
//!
//! Purpose: Acquire the right pipe for a unit of work, hand it to a closure,
//! and guarantee cleanup on every exit path.
//!
//! ## Design Principles
//! 1. **Execute on Success Only**: With auto-execute set, `execute()` runs
//!    only when the body returns `Ok`. A failed unit of work never partially
//!    applies.
//! 2. **Always Reset**: A drop guard calls `reset()` after the body, after
//!    execute, on early return and while unwinding from a panic.
//! 3. **Caller's Error Type**: Bodies return any `E: From<PipeError>`, so
//!    application errors pass through untouched.
//!
//! ## Usage
//!
//! ```rust
//! use kvpipe::{Commands, ConnectionRegistry, Future, MemoryConnector, Pipe, PipeResult};
//!
//! fn incr(registry: &ConnectionRegistry, pipe: Option<&mut dyn Pipe>, key: &str) -> PipeResult<Future> {
//!     registry.autoexec(pipe, None, |pipe| Ok(pipe.incr(key)))
//! }
//!
//! let registry = ConnectionRegistry::new();
//! registry.connect(MemoryConnector::new(), None).expect("bind");
//!
//! let (a, b) = registry
//!     .autoexec(None, None, |pipe| -> PipeResult<_> {
//!         let a = incr(&registry, Some(&mut *pipe), "key")?;
//!         let b = incr(&registry, Some(&mut *pipe), "key")?;
//!         Ok((a, b))
//!     })
//!     .expect("batch");
//! assert_eq!((a.int().unwrap(), b.int().unwrap()), (1, 2));
//! ```

use crate::coordinator::Coordinator;
use crate::error::PipeError;
use crate::nested::NestedPipeline;
use crate::pipe::Pipe;
use crate::registry::ConnectionRegistry;

/// Resets the wrapped pipe when dropped.
struct ResetGuard<P: Pipe> {
    pipe: P,
}

impl<P: Pipe> Drop for ResetGuard<P> {
    fn drop(&mut self) {
        self.pipe.reset();
    }
}

/// Runs `body` against `pipe`, executing on `Ok` when the pipe is marked
/// auto-execute, and resetting on every exit.
pub fn scoped<P, R, E, F>(pipe: P, body: F) -> Result<R, E>
where
    P: Pipe,
    E: From<PipeError>,
    F: FnOnce(&mut dyn Pipe) -> Result<R, E>,
{
    let mut guard = ResetGuard { pipe };
    let value = body(&mut guard.pipe)?;
    if guard.pipe.autoexec() {
        guard.pipe.execute()?;
    }
    Ok(value)
}

/// Nested scope over `parent` without auto-execute.
pub fn nested<R, E, F>(parent: &mut dyn Pipe, name: Option<&str>, body: F) -> Result<R, E>
where
    E: From<PipeError>,
    F: FnOnce(&mut dyn Pipe) -> Result<R, E>,
{
    scoped(nested_pipe(parent, name, false), body)
}

/// Nested scope over `parent` that flushes into it on success.
pub fn nested_autoexec<R, E, F>(parent: &mut dyn Pipe, name: Option<&str>, body: F) -> Result<R, E>
where
    E: From<PipeError>,
    F: FnOnce(&mut dyn Pipe) -> Result<R, E>,
{
    scoped(nested_pipe(parent, name, true), body)
}

// A nested scope without a name records on the parent's connection.
fn nested_pipe<'p>(parent: &'p mut dyn Pipe, name: Option<&str>, autoexec: bool) -> NestedPipeline<'p> {
    let pipe = match name {
        Some(name) => NestedPipeline::new(parent, name),
        None => NestedPipeline::inherit(parent),
    };
    pipe.with_autoexec(autoexec)
}

impl ConnectionRegistry {
    /// Opens a scope: a root `Coordinator` when `parent` is `None`, a
    /// `NestedPipeline` over `parent` otherwise. The body must call
    /// `execute()` itself; the pipe is reset afterwards either way.
    pub fn pipeline<R, E, F>(&self, parent: Option<&mut dyn Pipe>, name: Option<&str>, body: F) -> Result<R, E>
    where
        E: From<PipeError>,
        F: FnOnce(&mut dyn Pipe) -> Result<R, E>,
    {
        self.open(parent, name, false, body)
    }

    /// Same as `pipeline`, executing automatically when the body succeeds.
    pub fn autoexec<R, E, F>(&self, parent: Option<&mut dyn Pipe>, name: Option<&str>, body: F) -> Result<R, E>
    where
        E: From<PipeError>,
        F: FnOnce(&mut dyn Pipe) -> Result<R, E>,
    {
        self.open(parent, name, true, body)
    }

    fn open<R, E, F>(&self, parent: Option<&mut dyn Pipe>, name: Option<&str>, autoexec: bool, body: F) -> Result<R, E>
    where
        E: From<PipeError>,
        F: FnOnce(&mut dyn Pipe) -> Result<R, E>,
    {
        match parent {
            None => scoped(Coordinator::new(self, name).with_autoexec(autoexec), body),
            Some(parent) => {
                let name = self.resolve(name);
                scoped(NestedPipeline::new(parent, name).with_autoexec(autoexec), body)
            }
        }
    }
}
