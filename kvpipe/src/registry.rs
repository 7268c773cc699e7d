//! # Connection Registry
//!
//! Purpose: Map connection names to connectors so pipelines can resolve a
//! name into a fresh batch handle.
//!
//! ## Design Principles
//! 1. **Explicit Handle**: The registry is a cloneable value passed to whatever
//!    creates root pipelines; there is no global state.
//! 2. **Read-Mostly Lock**: Bindings change during setup and teardown only;
//!    lookups take a shared `RwLock` guard.
//! 3. **No Silent Rebinding**: Binding a name to a different pool fails with
//!    `AlreadyConnected`; rebinding the same pool is a no-op.
//!
//! ## Usage
//!
//! ```rust
//! use kvpipe::{ConnectionRegistry, MemoryConnector};
//!
//! let registry = ConnectionRegistry::new();
//! let backend = MemoryConnector::new();
//! registry.connect(backend.clone(), None).expect("bind default");
//! registry.connect(backend, None).expect("same pool rebinds");
//! assert!(registry.is_connected(None));
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Deserialize;
use tracing::{debug, trace};

use crate::backend::{BatchHandle, Connector};
use crate::error::{PipeError, PipeResult};

/// Name used when a caller does not specify a connection.
pub const DEFAULT_CONNECTION: &str = "default";

/// How a coordinator runs child pipelines for other connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskMode {
    /// One worker thread per child pipeline.
    #[default]
    Threaded,
    /// Children run one after another on the calling thread.
    Sequential,
}

/// Registry configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Name an unspecified connection resolves to.
    pub default_name: String,
    /// Child pipeline scheduling for multi-connection batches.
    pub task_mode: TaskMode,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        RegistryConfig {
            default_name: DEFAULT_CONNECTION.to_string(),
            task_mode: TaskMode::Threaded,
        }
    }
}

struct RegistryInner {
    default_name: String,
    task_mode: RwLock<TaskMode>,
    connections: RwLock<HashMap<String, Arc<dyn Connector>>>,
}

/// Shared table of named connectors.
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RegistryInner>,
}

impl ConnectionRegistry {
    /// Creates an empty registry with the default configuration.
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Creates an empty registry with a custom configuration.
    pub fn with_config(config: RegistryConfig) -> Self {
        ConnectionRegistry {
            inner: Arc::new(RegistryInner {
                default_name: config.default_name,
                task_mode: RwLock::new(config.task_mode),
                connections: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Resolves an optional name, falling back to the default.
    pub fn resolve(&self, name: Option<&str>) -> String {
        name.unwrap_or(&self.inner.default_name).to_string()
    }

    pub fn default_name(&self) -> &str {
        &self.inner.default_name
    }

    pub fn task_mode(&self) -> TaskMode {
        *self.inner.task_mode.read()
    }

    /// Switches between threaded and sequential child execution.
    pub fn set_task_mode(&self, mode: TaskMode) {
        *self.inner.task_mode.write() = mode;
    }

    /// Binds `connector` under `name` (default when `None`).
    ///
    /// # Errors
    /// `AlreadyConnected` when the name is bound to a different pool.
    pub fn connect<C>(&self, connector: C, name: Option<&str>) -> PipeResult<()>
    where
        C: Connector + 'static,
    {
        self.connect_shared(Arc::new(connector), name)
    }

    /// Same as `connect` for an already shared connector.
    pub fn connect_shared(&self, connector: Arc<dyn Connector>, name: Option<&str>) -> PipeResult<()> {
        let name = self.resolve(name);
        let mut connections = self.inner.connections.write();
        if let Some(existing) = connections.get(&name) {
            if existing.pool_id() != connector.pool_id() {
                return Err(PipeError::AlreadyConnected(name));
            }
        }
        debug!(connection = %name, "connection bound");
        connections.insert(name, connector);
        Ok(())
    }

    /// Removes a binding. Missing names are ignored.
    pub fn disconnect(&self, name: Option<&str>) {
        let name = self.resolve(name);
        if self.inner.connections.write().remove(&name).is_some() {
            debug!(connection = %name, "connection removed");
        }
    }

    /// Removes every binding.
    pub fn reset(&self) {
        self.inner.connections.write().clear();
        debug!("connection registry reset");
    }

    /// Looks up the connector bound under `name`.
    pub fn get(&self, name: Option<&str>) -> PipeResult<Arc<dyn Connector>> {
        let name = self.resolve(name);
        self.inner
            .connections
            .read()
            .get(&name)
            .cloned()
            .ok_or(PipeError::NotConfigured(name))
    }

    /// Produces a fresh batch handle for `name`.
    pub fn batch(&self, name: Option<&str>) -> PipeResult<Box<dyn BatchHandle>> {
        let connector = self.get(name)?;
        trace!(connection = %self.resolve(name), "batch handle created");
        connector.batch()
    }

    pub fn is_connected(&self, name: Option<&str>) -> bool {
        let name = self.resolve(name);
        self.inner.connections.read().contains_key(&name)
    }

    /// Bound names in sorted order.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.connections.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryConnector;

    #[test]
    fn unresolved_names_are_not_configured() {
        let registry = ConnectionRegistry::new();
        assert!(matches!(
            registry.batch(Some("users")),
            Err(PipeError::NotConfigured(name)) if name == "users"
        ));
    }

    #[test]
    fn rebinding_to_another_pool_fails() {
        let registry = ConnectionRegistry::new();
        let pool_a = MemoryConnector::new();
        let pool_b = MemoryConnector::new();

        registry.connect(pool_a.clone(), None).unwrap();
        assert!(matches!(
            registry.connect(pool_b, None),
            Err(PipeError::AlreadyConnected(name)) if name == DEFAULT_CONNECTION
        ));
        registry.connect(pool_a, None).unwrap();
        assert_eq!(registry.names(), vec![DEFAULT_CONNECTION.to_string()]);
    }

    #[test]
    fn disconnect_allows_rebinding() {
        let registry = ConnectionRegistry::new();
        registry.connect(MemoryConnector::new(), Some("cache")).unwrap();
        registry.disconnect(Some("cache"));
        assert!(!registry.is_connected(Some("cache")));
        registry.connect(MemoryConnector::new(), Some("cache")).unwrap();

        registry.reset();
        assert!(registry.names().is_empty());
        registry.disconnect(Some("never-bound"));
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: RegistryConfig = serde_json::from_str(r#"{"task_mode":"sequential"}"#).unwrap();
        assert_eq!(config.default_name, DEFAULT_CONNECTION);
        assert_eq!(config.task_mode, TaskMode::Sequential);

        let registry = ConnectionRegistry::with_config(RegistryConfig {
            default_name: "primary".into(),
            ..RegistryConfig::default()
        });
        assert_eq!(registry.resolve(None), "primary");
        assert_eq!(registry.resolve(Some("other")), "other");
    }
}
