//! # Pipeline
//!
//! Purpose: Record commands for one named connection and send them as a
//! single batch, assigning replies to futures in submission order.
//!
//! ## Design Principles
//! 1. **Lazy Handle**: The batch handle is created from the registry on the
//!    first execute that has work, then kept across resets.
//! 2. **Clear Before I/O**: Pending state is taken out of the pipeline before
//!    the round trip, so success and failure both leave it empty.
//! 3. **Callbacks After Results**: Callbacks run only once every future of the
//!    batch holds its reply.
//! 4. **Adapters Travel With Commands**: Nested levels attach the callbacks
//!    that copy replies into their own futures to the pipeline that sends the
//!    commands. They run as part of a successful dispatch, whatever happens
//!    to other connections.
//!
//! ## Execute Flow
//!
//! ```text
//! record(cmd) ──► pending: [(cmd, future)]
//!                         │ execute()
//!                         ▼
//!           handle.queue(cmd) for each, in order
//!                         │
//!           handle.execute() ──► replies[0..n]
//!                         │
//!           pending[i].future.set(replies[i])
//!                         │
//!           adapters (nested futures resolve)
//!                         │
//!           injected groups ──► own callbacks
//! ```

use tracing::{debug, trace, warn};

use crate::backend::BatchHandle;
use crate::command::Command;
use crate::error::{PipeError, PipeResult};
use crate::future::Future;
use crate::pipe::{private::Compose, run_callbacks, Callback, Pipe};
use crate::registry::ConnectionRegistry;
use crate::value::Value;

/// Batch recorder that owns one connection's handle.
pub struct Pipeline {
    registry: ConnectionRegistry,
    name: String,
    autoexec: bool,
    handle: Option<Box<dyn BatchHandle>>,
    pending: Vec<(Command, Future<Value>)>,
    adapters: Vec<Callback>,
    injected: Vec<Callback>,
    callbacks: Vec<Callback>,
}

impl Pipeline {
    /// Creates a pipeline for `name` (the registry default when `None`).
    pub fn new(registry: &ConnectionRegistry, name: Option<&str>) -> Self {
        Pipeline {
            registry: registry.clone(),
            name: registry.resolve(name),
            autoexec: false,
            handle: None,
            pending: Vec::new(),
            adapters: Vec::new(),
            injected: Vec::new(),
            callbacks: Vec::new(),
        }
    }

    /// Sets whether scoped execution executes this pipeline on a clean exit.
    pub fn with_autoexec(mut self, autoexec: bool) -> Self {
        self.autoexec = autoexec;
        self
    }

    /// Creates a pipeline around an existing handle.
    pub fn with_handle(registry: &ConnectionRegistry, name: Option<&str>, handle: Box<dyn BatchHandle>) -> Self {
        let mut pipeline = Pipeline::new(registry, name);
        pipeline.handle = Some(handle);
        pipeline
    }

    /// True once a batch handle has been acquired.
    pub fn has_handle(&self) -> bool {
        self.handle.is_some()
    }

    /// True when there is anything to execute: commands or callbacks.
    pub(crate) fn has_work(&self) -> bool {
        !self.pending.is_empty() || !self.adapters.is_empty() || !self.injected.is_empty() || !self.callbacks.is_empty()
    }

    /// Attaches callbacks that resolve nested futures from commands recorded
    /// here. They run right after this pipeline's replies are assigned.
    pub(crate) fn adopt(&mut self, mut adapters: Vec<Callback>) {
        trace!(connection = %self.name, adapters = adapters.len(), "adapters attached");
        self.adapters.append(&mut adapters);
    }

    /// Sends pending commands, assigns their futures and runs adapters,
    /// without running callbacks. Callbacks are returned so the caller
    /// decides when to run them.
    pub(crate) fn dispatch(&mut self) -> PipeResult<Vec<Callback>> {
        let pending = std::mem::take(&mut self.pending);
        let adapters = std::mem::take(&mut self.adapters);
        let mut callbacks = std::mem::take(&mut self.injected);
        callbacks.append(&mut self.callbacks);

        if pending.is_empty() {
            return Ok(callbacks);
        }

        if self.handle.is_none() {
            self.handle = Some(self.registry.batch(Some(&self.name))?);
        }
        let handle = match self.handle.as_mut() {
            Some(handle) => handle,
            None => return Err(PipeError::NotConfigured(self.name.clone())),
        };

        for (command, _) in &pending {
            handle.queue(command);
        }
        debug!(connection = %self.name, commands = pending.len(), "dispatching batch");

        let replies = handle.execute().map_err(|err| {
            warn!(connection = %self.name, error = %err, "batch execute failed");
            PipeError::Backend(err)
        })?;

        if replies.len() != pending.len() {
            warn!(
                connection = %self.name,
                sent = pending.len(),
                received = replies.len(),
                "reply count mismatch"
            );
            return Err(PipeError::BatchMismatch {
                sent: pending.len(),
                received: replies.len(),
            });
        }

        for ((_, future), reply) in pending.into_iter().zip(replies) {
            future.set(reply)?;
        }
        run_callbacks(adapters)?;
        Ok(callbacks)
    }
}

impl Compose for Pipeline {
    fn route(&mut self, name: &str) -> PipeResult<&mut Pipeline> {
        if name == self.name {
            return Ok(self);
        }
        Err(PipeError::InvalidPipeline(format!(
            "pipeline for {:?} cannot record commands for {:?}",
            self.name, name
        )))
    }

    fn inject(&mut self, mut callbacks: Vec<Callback>) {
        trace!(connection = %self.name, callbacks = callbacks.len(), "callbacks injected");
        self.injected.append(&mut callbacks);
    }
}

impl Pipe for Pipeline {
    fn connection_name(&self) -> &str {
        &self.name
    }

    fn autoexec(&self) -> bool {
        self.autoexec
    }

    fn record(&mut self, command: Command) -> Future<Value> {
        let future = Future::new();
        self.pending.push((command, future.clone()));
        future
    }

    fn on_execute(&mut self, callback: Callback) {
        self.callbacks.push(callback);
    }

    fn execute(&mut self) -> PipeResult<()> {
        let callbacks = self.dispatch()?;
        run_callbacks(callbacks)
    }

    fn reset(&mut self) {
        self.pending.clear();
        self.adapters.clear();
        self.injected.clear();
        self.callbacks.clear();
    }

    fn pending(&self) -> usize {
        self.pending.len()
    }
}
