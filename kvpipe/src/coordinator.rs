//! # Multi-Connection Coordinator
//!
//! Purpose: A root pipe that can address several named connections in one
//! unit of work and execute their batches concurrently.
//!
//! ## Design Principles
//! 1. **Lazy Children**: A child `Pipeline` is created the first time a nested
//!    pipeline routes to a name other than the default.
//! 2. **Fan-Out, Then Self**: Child batches run on scoped worker threads; the
//!    default batch and the coordinator's callbacks run after every worker
//!    has been joined.
//! 3. **Failure Isolation**: Every worker is joined even when one fails. Each
//!    connection that succeeds resolves its futures, including those handed
//!    down by nested scopes, whether or not the others fail. Only the first
//!    error is returned.
//!
//! ## Execute Flow
//!
//! ```text
//!            ┌── worker: child["cache"].execute() ──┐
//! execute() ─┼── worker: child["users"].execute() ──┼─► join all
//!            └── ...                              ──┘
//!                                                     │
//!                          default.dispatch() (I/O) ◄─┘
//!                                                     │
//!                 callbacks (only if every child succeeded)
//! ```

use std::collections::BTreeMap;
use std::thread;

use tracing::{debug, warn};

use crate::command::Command;
use crate::error::{PipeError, PipeResult};
use crate::future::Future;
use crate::pipe::{private::Compose, run_callbacks, Callback, Pipe};
use crate::pipeline::Pipeline;
use crate::registry::{ConnectionRegistry, TaskMode};
use crate::value::Value;

/// Root pipe owning a default pipeline plus one child per other connection.
pub struct Coordinator {
    registry: ConnectionRegistry,
    default: Pipeline,
    children: BTreeMap<String, Pipeline>,
    autoexec: bool,
}

impl Coordinator {
    /// Creates a coordinator whose default connection is `name` (the registry
    /// default when `None`).
    pub fn new(registry: &ConnectionRegistry, name: Option<&str>) -> Self {
        Coordinator {
            registry: registry.clone(),
            default: Pipeline::new(registry, name),
            children: BTreeMap::new(),
            autoexec: false,
        }
    }

    pub fn with_autoexec(mut self, autoexec: bool) -> Self {
        self.autoexec = autoexec;
        self
    }

    /// The pipeline recording for `name`, created on first request.
    pub fn sub_pipeline(&mut self, name: &str) -> &mut Pipeline {
        if name == self.default.connection_name() {
            return &mut self.default;
        }
        let registry = &self.registry;
        self.children
            .entry(name.to_string())
            .or_insert_with(|| Pipeline::new(registry, Some(name)).with_autoexec(true))
    }

    /// Names of the child connections created so far.
    pub fn child_names(&self) -> Vec<&str> {
        self.children.keys().map(String::as_str).collect()
    }

    fn execute_children(&mut self) -> PipeResult<()> {
        let mut active: Vec<(&String, &mut Pipeline)> = self
            .children
            .iter_mut()
            .filter(|(_, child)| child.has_work())
            .collect();
        if active.is_empty() {
            return Ok(());
        }

        let threaded = active.len() > 1 && self.registry.task_mode() == TaskMode::Threaded;
        debug!(children = active.len(), threaded, "executing child pipelines");

        let outcomes: Vec<(String, PipeResult<()>)> = if threaded {
            thread::scope(|scope| {
                let workers: Vec<_> = active
                    .drain(..)
                    .map(|(name, child)| (name.clone(), scope.spawn(move || child.execute())))
                    .collect();
                workers
                    .into_iter()
                    .map(|(name, worker)| {
                        let outcome = worker
                            .join()
                            .unwrap_or_else(|_| Err(PipeError::WorkerPanicked(name.clone())));
                        (name, outcome)
                    })
                    .collect()
            })
        } else {
            active
                .drain(..)
                .map(|(name, child)| (name.clone(), child.execute()))
                .collect()
        };

        let mut first_error = None;
        for (name, outcome) in outcomes {
            if let Err(err) = outcome {
                warn!(connection = %name, error = %err, "child pipeline failed");
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Compose for Coordinator {
    fn route(&mut self, name: &str) -> PipeResult<&mut Pipeline> {
        Ok(self.sub_pipeline(name))
    }

    fn inject(&mut self, callbacks: Vec<Callback>) {
        self.default.inject(callbacks);
    }
}

impl Pipe for Coordinator {
    fn connection_name(&self) -> &str {
        self.default.connection_name()
    }

    fn autoexec(&self) -> bool {
        self.autoexec
    }

    fn record(&mut self, command: Command) -> Future<Value> {
        self.default.record(command)
    }

    fn on_execute(&mut self, callback: Callback) {
        self.default.on_execute(callback);
    }

    #[tracing::instrument(level = "debug", skip(self), fields(connection = %self.default.connection_name(), children = self.children.len()))]
    fn execute(&mut self) -> PipeResult<()> {
        let children = self.execute_children();
        let dispatched = self.default.dispatch();
        children?;
        run_callbacks(dispatched?)
    }

    fn reset(&mut self) {
        self.default.reset();
        for child in self.children.values_mut() {
            child.reset();
        }
    }

    fn pending(&self) -> usize {
        self.default.pending() + self.children.values().map(Pipe::pending).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryConnector;
    use crate::nested::NestedPipeline;
    use crate::pipe::Commands;

    struct Fixture {
        registry: ConnectionRegistry,
        default: MemoryConnector,
        cache: MemoryConnector,
        users: MemoryConnector,
    }

    fn fixture() -> Fixture {
        let registry = ConnectionRegistry::new();
        let default = MemoryConnector::new();
        let cache = MemoryConnector::new();
        let users = MemoryConnector::new();
        registry.connect(default.clone(), None).unwrap();
        registry.connect(cache.clone(), Some("cache")).unwrap();
        registry.connect(users.clone(), Some("users")).unwrap();
        Fixture {
            registry,
            default,
            cache,
            users,
        }
    }

    #[test]
    fn sub_pipeline_is_cached_per_name() {
        let fx = fixture();
        let mut coordinator = Coordinator::new(&fx.registry, None);
        coordinator.sub_pipeline("cache").incr("a");
        coordinator.sub_pipeline("cache").incr("a");
        coordinator.sub_pipeline("default").ping();

        assert_eq!(coordinator.child_names(), vec!["cache"]);
        assert_eq!(coordinator.sub_pipeline("cache").pending(), 2);
        assert_eq!(coordinator.pending(), 3);
    }

    #[test]
    fn resolves_each_connection_in_one_trip() {
        let fx = fixture();
        let mut coordinator = Coordinator::new(&fx.registry, None);

        let local = coordinator.set("k", "default-value");
        let (cached, user) = {
            let mut on_cache = NestedPipeline::new(&mut coordinator, "cache");
            let cached = on_cache.incr("hits");
            on_cache.execute().unwrap();
            drop(on_cache);

            let mut on_users = NestedPipeline::new(&mut coordinator, "users");
            let user = on_users.set("user:1", "ada");
            on_users.execute().unwrap();
            (cached, user)
        };

        coordinator.execute().unwrap();
        assert_eq!(local.text().unwrap(), "OK");
        assert_eq!(cached.int().unwrap(), 1);
        assert_eq!(user.text().unwrap(), "OK");
        assert_eq!(fx.default.round_trips(), 1);
        assert_eq!(fx.cache.round_trips(), 1);
        assert_eq!(fx.users.round_trips(), 1);
        assert_eq!(fx.users.peek(b"user:1"), Some(b"ada".to_vec()));
    }

    #[test]
    fn failing_child_does_not_block_siblings() {
        let fx = fixture();
        let mut coordinator = Coordinator::new(&fx.registry, None);

        let local = coordinator.incr("n");
        let cached = coordinator.sub_pipeline("cache").incr("n");
        let user = coordinator.sub_pipeline("users").incr("n");
        let ran = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = ran.clone();
        coordinator.then(move || {
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        });

        fx.users.fail_next("users down");
        let err = coordinator.execute().unwrap_err();
        assert!(matches!(err, PipeError::Backend(_)));
        assert_eq!(err.to_string(), "backend error: users down");

        assert_eq!(cached.int().unwrap(), 1);
        assert_eq!(local.int().unwrap(), 1);
        assert!(matches!(user.result(), Err(PipeError::ResultNotReady)));
        assert!(!ran.load(std::sync::atomic::Ordering::SeqCst));
        assert_eq!(coordinator.pending(), 0);
    }

    fn nested_incr(coordinator: &mut Coordinator, name: &str) -> Future {
        let mut nested = NestedPipeline::new(coordinator, name);
        let future = nested.incr("n");
        nested.execute().unwrap();
        future
    }

    #[test]
    fn nested_futures_on_healthy_connections_survive_a_failing_sibling() {
        let fx = fixture();
        let mut coordinator = Coordinator::new(&fx.registry, None);

        let local = nested_incr(&mut coordinator, "default");
        let cached = nested_incr(&mut coordinator, "cache");
        let user = nested_incr(&mut coordinator, "users");

        fx.users.fail_next("users down");
        let err = coordinator.execute().unwrap_err();
        assert_eq!(err.to_string(), "backend error: users down");

        assert_eq!(cached.int().unwrap(), 1);
        assert_eq!(local.int().unwrap(), 1);
        assert!(matches!(user.result(), Err(PipeError::ResultNotReady)));
        assert_eq!(fx.cache.peek(b"n"), Some(b"1".to_vec()));
        assert_eq!(fx.users.peek(b"n"), None);
    }

    #[test]
    fn failing_default_leaves_children_resolved() {
        let fx = fixture();
        let mut coordinator = Coordinator::new(&fx.registry, None);

        let local = nested_incr(&mut coordinator, "default");
        let direct = coordinator.incr("m");
        let cached = nested_incr(&mut coordinator, "cache");
        let user = nested_incr(&mut coordinator, "users");

        fx.default.fail_next("default down");
        let err = coordinator.execute().unwrap_err();
        assert_eq!(err.to_string(), "backend error: default down");

        assert_eq!(cached.int().unwrap(), 1);
        assert_eq!(user.int().unwrap(), 1);
        assert!(matches!(local.result(), Err(PipeError::ResultNotReady)));
        assert!(matches!(direct.result(), Err(PipeError::ResultNotReady)));
        assert_eq!(coordinator.pending(), 0);
    }

    #[test]
    fn sequential_mode_matches_threaded_results() {
        let fx = fixture();
        fx.registry.set_task_mode(TaskMode::Sequential);
        let mut coordinator = Coordinator::new(&fx.registry, None);

        let a = coordinator.sub_pipeline("cache").incrby("n", 5);
        let b = coordinator.sub_pipeline("users").incrby("n", 7);
        coordinator.execute().unwrap();

        assert_eq!(a.int().unwrap(), 5);
        assert_eq!(b.int().unwrap(), 7);
    }

    #[test]
    fn coordinator_callbacks_run_after_children() {
        let fx = fixture();
        let mut coordinator = Coordinator::new(&fx.registry, None);
        let cached = coordinator.sub_pipeline("cache").incr("visits");
        let seen = std::sync::Arc::new(parking_lot::Mutex::new(None));

        let slot = seen.clone();
        let observed = cached.clone();
        coordinator.then(move || {
            *slot.lock() = Some(observed.int()?);
            Ok(())
        });
        coordinator.execute().unwrap();
        assert_eq!(*seen.lock(), Some(1));
    }
}
