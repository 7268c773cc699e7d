//! # Nested Pipelines
//!
//! Purpose: Let a helper record commands into whatever pipe its caller holds
//! without knowing whether that pipe is a root or another nested level.
//!
//! ## Design Principles
//! 1. **No Backend Access**: A nested pipeline never owns a handle; `execute`
//!    re-records its commands on the parent side and returns without I/O.
//! 2. **Borrowed Parent**: The parent is held as `&mut dyn Pipe`, so the
//!    borrow checker keeps the parent untouched while the child is alive.
//! 3. **Adapters First**: The callbacks that copy parent results into this
//!    level's futures are attached to the pipeline that sends the commands,
//!    so they run before any callback queued at this level and do not depend
//!    on other connections succeeding.
//!
//! ## Flush Flow
//!
//! ```text
//! nested.execute()
//!   ├── target = parent.route(name)          (pipeline owning `name`)
//!   ├── for (cmd, child_future):
//!   │      parent_future = target.record(cmd)
//!   │      adapter: child_future.set(parent_future)
//!   ├── target.adopt(adapters)
//!   └── parent.inject(injected ++ callbacks)
//! ```

use tracing::trace;

use crate::command::Command;
use crate::error::PipeResult;
use crate::future::Future;
use crate::pipe::{private::Compose, Callback, Pipe};
use crate::pipeline::Pipeline;
use crate::value::Value;

/// Recorder that forwards its work to a parent pipe.
pub struct NestedPipeline<'p> {
    parent: &'p mut dyn Pipe,
    name: String,
    autoexec: bool,
    pending: Vec<(Command, Future<Value>)>,
    injected: Vec<Callback>,
    callbacks: Vec<Callback>,
}

impl<'p> NestedPipeline<'p> {
    /// Creates a nested pipeline recording for `name`.
    ///
    /// `name` is already resolved; use the registry or the parent's
    /// connection name to pick one.
    pub fn new(parent: &'p mut dyn Pipe, name: impl Into<String>) -> Self {
        NestedPipeline {
            parent,
            name: name.into(),
            autoexec: false,
            pending: Vec::new(),
            injected: Vec::new(),
            callbacks: Vec::new(),
        }
    }

    /// Creates a nested pipeline on the parent's own connection.
    pub fn inherit(parent: &'p mut dyn Pipe) -> Self {
        let name = parent.connection_name().to_string();
        NestedPipeline::new(parent, name)
    }

    pub fn with_autoexec(mut self, autoexec: bool) -> Self {
        self.autoexec = autoexec;
        self
    }
}

impl Compose for NestedPipeline<'_> {
    fn route(&mut self, name: &str) -> PipeResult<&mut Pipeline> {
        self.parent.route(name)
    }

    fn inject(&mut self, mut callbacks: Vec<Callback>) {
        self.injected.append(&mut callbacks);
    }
}

impl Pipe for NestedPipeline<'_> {
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
        let pending = std::mem::take(&mut self.pending);
        let injected = std::mem::take(&mut self.injected);
        let callbacks = std::mem::take(&mut self.callbacks);

        if !pending.is_empty() {
            let target = self.parent.route(&self.name)?;
            let mut adapters: Vec<Callback> = Vec::with_capacity(pending.len());
            for (command, local) in pending {
                let upstream = target.record(command);
                adapters.push(Box::new(move || local.set_from(&upstream)));
            }
            target.adopt(adapters);
        }

        let mut group = injected;
        group.extend(callbacks);
        if !group.is_empty() {
            trace!(connection = %self.name, callbacks = group.len(), "nested pipeline flushed");
            self.parent.inject(group);
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.pending.clear();
        self.injected.clear();
        self.callbacks.clear();
    }

    fn pending(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipeError;
    use crate::memory::MemoryConnector;
    use crate::pipe::Commands;
    use crate::registry::ConnectionRegistry;
    use std::sync::{Arc, Mutex};

    fn root() -> (MemoryConnector, Pipeline) {
        let backend = MemoryConnector::new();
        let registry = ConnectionRegistry::new();
        registry.connect(backend.clone(), None).unwrap();
        (backend, Pipeline::new(&registry, None))
    }

    #[test]
    fn execute_forwards_without_io() {
        let (backend, mut root) = root();
        let future = {
            let mut nested = NestedPipeline::inherit(&mut root);
            let future = nested.incr("a");
            nested.execute().unwrap();
            assert_eq!(nested.pending(), 0);
            future
        };

        assert_eq!(backend.round_trips(), 0);
        assert_eq!(root.pending(), 1);
        assert!(!future.is_ready());

        root.execute().unwrap();
        assert_eq!(future.int().unwrap(), 1);
        assert_eq!(backend.round_trips(), 1);
    }

    #[test]
    fn nested_callbacks_see_resolved_futures_before_parent_callbacks() {
        let (_backend, mut root) = root();
        let log = Arc::new(Mutex::new(Vec::new()));

        let early = log.clone();
        root.then(move || {
            early.lock().unwrap().push("parent".to_string());
            Ok(())
        });

        {
            let mut outer = NestedPipeline::inherit(&mut root);
            {
                let mut inner = NestedPipeline::inherit(&mut outer);
                let value = inner.incr("n");
                let seen = log.clone();
                inner.then(move || {
                    seen.lock().unwrap().push(format!("inner:{}", value.int()?));
                    Ok(())
                });
                inner.execute().unwrap();
            }
            let seen = log.clone();
            outer.then(move || {
                seen.lock().unwrap().push("outer".to_string());
                Ok(())
            });
            outer.execute().unwrap();
        }

        root.execute().unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["inner:1", "outer", "parent"]);
    }

    #[test]
    fn sibling_groups_keep_execution_order() {
        let (_backend, mut root) = root();
        let mut futures = Vec::new();
        for _ in 0..2 {
            let mut nested = NestedPipeline::inherit(&mut root);
            futures.push(nested.incr("key"));
            nested.execute().unwrap();
        }

        root.execute().unwrap();
        let values: Vec<i64> = futures.iter().map(|f| f.int().unwrap()).collect();
        assert_eq!(values, vec![1, 2]);
    }

    #[test]
    fn reset_drops_local_work() {
        let (backend, mut root) = root();
        let future = {
            let mut nested = NestedPipeline::inherit(&mut root);
            let future = nested.get("a");
            nested.reset();
            nested.execute().unwrap();
            future
        };
        root.execute().unwrap();
        assert!(matches!(future.result(), Err(PipeError::ResultNotReady)));
        assert_eq!(backend.round_trips(), 0);
    }

    #[test]
    fn foreign_connection_under_plain_pipeline_is_invalid() {
        let (_backend, mut root) = root();
        let mut nested = NestedPipeline::new(&mut root, "elsewhere");
        nested.ping();
        assert!(matches!(nested.execute(), Err(PipeError::InvalidPipeline(_))));
    }
}
