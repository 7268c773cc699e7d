//! # Pipeline Errors
//!
//! A single error enum covers every failure the deferred-execution engine can
//! surface: ordering mistakes (reading a future too early), configuration
//! mistakes (unknown or conflicting connections) and backend failures, which
//! are carried through unchanged.

use thiserror::Error;

/// Error type produced by a backend batch handle.
///
/// The core never inspects backend errors; it only forwards them to the
/// caller of `execute()`.
pub type BackendError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for pipeline operations.
pub type PipeResult<T> = Result<T, PipeError>;

/// Errors surfaced by futures, pipelines and the connection registry.
#[derive(Debug, Error)]
pub enum PipeError {
    /// A future was read before its pipeline executed.
    #[error("result not ready: wait until after the pipeline executes")]
    ResultNotReady,

    /// A future was assigned twice.
    #[error("future already holds a result")]
    AlreadySet,

    /// No connector is bound under the requested name.
    #[error("connection {0:?} is not configured")]
    NotConfigured(String),

    /// A pipeline was asked to do something its shape does not allow.
    #[error("invalid pipeline: {0}")]
    InvalidPipeline(String),

    /// A name is already bound to a different connection pool.
    #[error("can't change connection for {0:?} without disconnecting first")]
    AlreadyConnected(String),

    /// The backend batch-execute call failed.
    #[error("backend error: {0}")]
    Backend(#[source] BackendError),

    /// The backend returned a different number of replies than commands sent.
    #[error("batch mismatch: sent {sent} commands, received {received} replies")]
    BatchMismatch { sent: usize, received: usize },

    /// A reply did not have the shape a conversion asked for.
    #[error("unexpected value: expected {expected}, found {found}")]
    UnexpectedValue {
        expected: &'static str,
        found: &'static str,
    },

    /// A result could not be rendered as JSON.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A coordinator worker panicked while executing a child pipeline.
    #[error("worker for connection {0:?} panicked")]
    WorkerPanicked(String),
}

impl PipeError {
    /// Wraps any backend error.
    pub fn backend<E>(err: E) -> Self
    where
        E: Into<BackendError>,
    {
        PipeError::Backend(err.into())
    }

    /// Returns true for configuration errors (unknown names, rebinding).
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            PipeError::NotConfigured(_)
                | PipeError::InvalidPipeline(_)
                | PipeError::AlreadyConnected(_)
        )
    }
}
