//! # Futures
//!
//! Purpose: A single-assignment placeholder handed out the moment an operation
//! is recorded and filled in when its batch executes.
//!
//! ## Design Principles
//! 1. **Write Once**: The slot is a `OnceLock`; a second `set` is rejected and
//!    the first value stays.
//! 2. **Shared Handle**: Clones share one slot, so the recorder and the caller
//!    observe the same result. Identity is `is()`, not `==`.
//! 3. **Fail Loudly Before Execute**: Every accessor returns
//!    `PipeError::ResultNotReady` until the slot is filled.
//!
//! ## Usage
//!
//! ```rust
//! use kvpipe::{Future, PipeError, Value};
//!
//! let future: Future = Future::new();
//! assert!(matches!(future.result(), Err(PipeError::ResultNotReady)));
//!
//! future.set(Value::Int(1)).expect("first set");
//! assert_eq!(future.int().expect("ready"), 1);
//! ```

use std::fmt;
use std::sync::{Arc, OnceLock};

use serde::ser::{Error as _, Serialize, Serializer};

use crate::error::{PipeError, PipeResult};
use crate::value::Value;

/// Placeholder for the eventual result of one recorded operation.
pub struct Future<T = Value> {
    slot: Arc<OnceLock<T>>,
}

impl<T> Future<T> {
    /// Creates an unset future.
    pub fn new() -> Self {
        Future {
            slot: Arc::new(OnceLock::new()),
        }
    }

    /// Creates a future that already holds `value`.
    pub fn ready(value: T) -> Self {
        let slot = OnceLock::new();
        let _ = slot.set(value);
        Future {
            slot: Arc::new(slot),
        }
    }

    /// Stores the result.
    ///
    /// # Errors
    /// Returns `PipeError::AlreadySet` if a value was stored before; the
    /// first value is kept.
    pub fn set(&self, value: T) -> PipeResult<()> {
        self.slot.set(value).map_err(|_| PipeError::AlreadySet)
    }

    /// Borrows the stored result.
    pub fn result(&self) -> PipeResult<&T> {
        self.slot.get().ok_or(PipeError::ResultNotReady)
    }

    pub fn is_ready(&self) -> bool {
        self.slot.get().is_some()
    }

    /// True when both handles point at the same placeholder.
    pub fn is(&self, other: &Future<T>) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }

    /// Applies `f` to the stored result.
    pub fn try_map<U, F>(&self, f: F) -> PipeResult<U>
    where
        F: FnOnce(&T) -> PipeResult<U>,
    {
        f(self.result()?)
    }
}

impl<T: Clone> Future<T> {
    /// Clones the stored result out of the placeholder.
    pub fn get(&self) -> PipeResult<T> {
        self.result().cloned()
    }

    /// Copies the result of `source` into this future.
    ///
    /// Used by nested pipelines to hand a parent's result to the child's
    /// placeholder once the parent batch has run.
    pub(crate) fn set_from(&self, source: &Future<T>) -> PipeResult<()> {
        self.set(source.get()?)
    }
}

impl Future<Value> {
    /// Truthiness of the reply (see `Value::is_truthy`).
    pub fn truthy(&self) -> PipeResult<bool> {
        Ok(self.result()?.is_truthy())
    }

    /// String form of the reply.
    pub fn text(&self) -> PipeResult<String> {
        Ok(self.result()?.to_string())
    }

    pub fn int(&self) -> PipeResult<i64> {
        self.result()?.as_int()
    }

    /// Raw bytes of a data or status reply; `None` for other shapes.
    pub fn bytes(&self) -> PipeResult<Option<&[u8]>> {
        Ok(self.result()?.as_bytes())
    }

    /// Items of an array reply.
    pub fn items(&self) -> PipeResult<std::slice::Iter<'_, Value>> {
        Ok(self.result()?.as_array()?.iter())
    }

    pub fn len(&self) -> PipeResult<usize> {
        self.result()?.len()
    }

    pub fn is_empty(&self) -> PipeResult<bool> {
        self.result()?.is_empty()
    }

    /// JSON rendering of the reply.
    pub fn to_json(&self) -> PipeResult<String> {
        let value = self.result()?;
        Ok(serde_json::to_string(value)?)
    }
}

impl<T> Clone for Future<T> {
    fn clone(&self) -> Self {
        Future {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> Default for Future<T> {
    fn default() -> Self {
        Future::new()
    }
}

// Unset futures print as `None`, matching how an absent result reads.
impl<T: fmt::Debug> fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.slot.get() {
            Some(value) => write!(f, "Future({:?})", value),
            None => write!(f, "Future(None)"),
        }
    }
}

impl<T: Serialize> Serialize for Future<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.slot.get() {
            Some(value) => value.serialize(serializer),
            None => Err(S::Error::custom(PipeError::ResultNotReady)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reading_before_set_is_not_ready() {
        let future: Future = Future::new();
        assert!(!future.is_ready());
        assert!(matches!(future.result(), Err(PipeError::ResultNotReady)));
        assert!(matches!(future.truthy(), Err(PipeError::ResultNotReady)));
        assert!(matches!(future.text(), Err(PipeError::ResultNotReady)));
        assert!(matches!(future.items(), Err(PipeError::ResultNotReady)));
        assert!(matches!(future.len(), Err(PipeError::ResultNotReady)));
        assert!(matches!(future.to_json(), Err(PipeError::ResultNotReady)));
    }

    #[test]
    fn second_set_is_rejected_and_first_value_kept() {
        let future = Future::new();
        future.set(Value::from("first")).unwrap();
        assert!(matches!(
            future.set(Value::from("second")),
            Err(PipeError::AlreadySet)
        ));
        assert_eq!(future.text().unwrap(), "first");
    }

    #[test]
    fn clones_share_the_slot() {
        let future: Future<i64> = Future::new();
        let alias = future.clone();
        let other: Future<i64> = Future::new();
        assert!(future.is(&alias));
        assert!(!future.is(&other));

        alias.set(9).unwrap();
        assert_eq!(future.get().unwrap(), 9);
    }

    #[test]
    fn array_results_iterate() {
        let future = Future::ready(Value::Array(vec![Value::from("a"), Value::from("b")]));
        let items: Vec<String> = future.items().unwrap().map(|v| v.to_string()).collect();
        assert_eq!(items, vec!["a", "b"]);
        assert_eq!(future.len().unwrap(), 2);
    }

    #[test]
    fn debug_prints_none_when_unset() {
        let future: Future<i64> = Future::new();
        assert_eq!(format!("{:?}", future), "Future(None)");
        future.set(3).unwrap();
        assert_eq!(format!("{:?}", future), "Future(3)");
    }

    #[test]
    fn serializes_only_when_ready() {
        let future: Future = Future::new();
        assert!(serde_json::to_string(&future).is_err());
        future.set(Value::from("bar")).unwrap();
        assert_eq!(serde_json::to_string(&future).unwrap(), "\"bar\"");
        assert_eq!(future.to_json().unwrap(), "\"bar\"");
    }

    #[test]
    fn set_from_copies_a_ready_source() {
        let source = Future::ready(Value::Int(4));
        let target = Future::new();
        target.set_from(&source).unwrap();
        assert_eq!(target.int().unwrap(), 4);

        let empty: Future = Future::new();
        assert!(matches!(
            Future::<Value>::new().set_from(&empty),
            Err(PipeError::ResultNotReady)
        ));
    }
}
