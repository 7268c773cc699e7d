//! # The Pipe Contract
//!
//! Purpose: The surface shared by `Pipeline`, `NestedPipeline` and
//! `Coordinator`, so helper functions can accept "whatever pipe the caller
//! has" as `&mut dyn Pipe`.
//!
//! ## Design Principles
//! 1. **Object Safe Core**: `Pipe` has only non-generic methods so it can be
//!    used as `dyn Pipe`; generic conveniences live in `Commands`.
//! 2. **Sealed Plumbing**: Routing and callback injection are crate-private
//!    (`Compose`), so nesting rules cannot be bypassed from outside.
//! 3. **Record Now, Read Later**: Every command method returns a `Future`
//!    immediately and performs no I/O.

use crate::command::Command;
use crate::error::PipeResult;
use crate::future::Future;
use crate::value::Value;

/// Deferred action run after a batch resolves.
pub type Callback = Box<dyn FnOnce() -> PipeResult<()> + Send + 'static>;

pub(crate) mod private {
    use super::Callback;
    use crate::pipeline::Pipeline;
    use crate::error::PipeResult;

    /// Plumbing used by nested pipelines to reach the pipe that owns a
    /// connection and to hand their callbacks upwards.
    pub trait Compose {
        /// The pipeline that records work for `name`.
        fn route(&mut self, name: &str) -> PipeResult<&mut Pipeline>;

        /// Queues a group of callbacks flushed by a nested pipeline. Groups run
        /// in arrival order, ahead of this pipe's own callbacks.
        fn inject(&mut self, callbacks: Vec<Callback>);
    }
}

/// A pipeline-like recorder of backend commands.
pub trait Pipe: private::Compose + Send {
    /// Connection this pipe records for.
    fn connection_name(&self) -> &str;

    /// Whether scoped execution calls `execute()` on a clean exit.
    fn autoexec(&self) -> bool;

    /// Records a command and returns its placeholder. No I/O.
    fn record(&mut self, command: Command) -> Future<Value>;

    /// Registers a callback run after this pipe's batch resolves.
    fn on_execute(&mut self, callback: Callback);

    /// Executes (root pipes) or flushes upwards (nested pipes).
    fn execute(&mut self) -> PipeResult<()>;

    /// Discards pending commands and callbacks.
    fn reset(&mut self);

    /// Number of commands recorded and not yet executed.
    fn pending(&self) -> usize;
}

/// Command helpers available on every `Pipe`, including `dyn Pipe`.
pub trait Commands: Pipe {
    /// Registers a closure as an execute callback.
    fn then<F>(&mut self, callback: F)
    where
        F: FnOnce() -> PipeResult<()> + Send + 'static,
    {
        self.on_execute(Box::new(callback));
    }

    fn ping(&mut self) -> Future {
        self.record(Command::ping())
    }

    fn echo(&mut self, message: impl AsRef<[u8]>) -> Future {
        self.record(Command::echo(message.as_ref()))
    }

    fn get(&mut self, key: impl AsRef<[u8]>) -> Future {
        self.record(Command::get(key.as_ref()))
    }

    fn set(&mut self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Future {
        self.record(Command::set(key.as_ref(), value.as_ref()))
    }

    fn set_ex(&mut self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>, seconds: u64) -> Future {
        self.record(Command::set_ex(key.as_ref(), value.as_ref(), seconds))
    }

    fn setnx(&mut self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Future {
        self.record(Command::setnx(key.as_ref(), value.as_ref()))
    }

    fn del(&mut self, key: impl AsRef<[u8]>) -> Future {
        self.record(Command::del(&[key.as_ref()]))
    }

    fn exists(&mut self, key: impl AsRef<[u8]>) -> Future {
        self.record(Command::exists(&[key.as_ref()]))
    }

    fn expire(&mut self, key: impl AsRef<[u8]>, seconds: u64) -> Future {
        self.record(Command::expire(key.as_ref(), seconds))
    }

    fn ttl(&mut self, key: impl AsRef<[u8]>) -> Future {
        self.record(Command::ttl(key.as_ref()))
    }

    fn incr(&mut self, key: impl AsRef<[u8]>) -> Future {
        self.record(Command::incr(key.as_ref()))
    }

    fn incrby(&mut self, key: impl AsRef<[u8]>, amount: i64) -> Future {
        self.record(Command::incrby(key.as_ref(), amount))
    }

    fn decr(&mut self, key: impl AsRef<[u8]>) -> Future {
        self.record(Command::decr(key.as_ref()))
    }

    fn append(&mut self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Future {
        self.record(Command::append(key.as_ref(), value.as_ref()))
    }

    fn hget(&mut self, key: impl AsRef<[u8]>, field: impl AsRef<[u8]>) -> Future {
        self.record(Command::hget(key.as_ref(), field.as_ref()))
    }

    fn hset(
        &mut self,
        key: impl AsRef<[u8]>,
        field: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
    ) -> Future {
        self.record(Command::hset(key.as_ref(), field.as_ref(), value.as_ref()))
    }

    fn hgetall(&mut self, key: impl AsRef<[u8]>) -> Future {
        self.record(Command::hgetall(key.as_ref()))
    }

    fn sadd(&mut self, key: impl AsRef<[u8]>, member: impl AsRef<[u8]>) -> Future {
        self.record(Command::sadd(key.as_ref(), &[member.as_ref()]))
    }

    fn smembers(&mut self, key: impl AsRef<[u8]>) -> Future {
        self.record(Command::smembers(key.as_ref()))
    }

    fn rpush(&mut self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Future {
        self.record(Command::rpush(key.as_ref(), &[value.as_ref()]))
    }

    fn lrange(&mut self, key: impl AsRef<[u8]>, start: i64, stop: i64) -> Future {
        self.record(Command::lrange(key.as_ref(), start, stop))
    }

    fn zadd(&mut self, key: impl AsRef<[u8]>, score: f64, member: impl AsRef<[u8]>) -> Future {
        self.record(Command::zadd(key.as_ref(), score, member.as_ref()))
    }

    fn zrange(&mut self, key: impl AsRef<[u8]>, start: i64, stop: i64) -> Future {
        self.record(Command::zrange(key.as_ref(), start, stop))
    }
}

impl<P: Pipe + ?Sized> Commands for P {}

/// Runs callbacks in order, stopping at the first failure.
pub(crate) fn run_callbacks(callbacks: Vec<Callback>) -> PipeResult<()> {
    for callback in callbacks {
        callback()?;
    }
    Ok(())
}
