//! Error types for the flow-control system.

use std::sync::Arc;

use crate::core::kind::Kind;

/// The main error type for the flow-control system.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// A producer's output kind cannot be accepted by a consumer's input kind
    #[error("type mismatch: {found} cannot flow into {expected}")]
    TypeMismatch { expected: Kind, found: Kind },

    /// A processor callback failed
    #[error("processor error: {0}")]
    Processor(#[source] Arc<dyn std::error::Error + Send + Sync>),

    /// A pending output value resolved to an error
    #[error("pending value failed: {0}")]
    AsyncValue(#[source] Arc<dyn std::error::Error + Send + Sync>),

    /// A continuation could not be scheduled on the local executor
    #[error("failed to spawn continuation: {0}")]
    Spawn(String),

    /// The flow was shut down before the operation could complete
    #[error("flow was shut down")]
    Shutdown,

    /// A custom error with a message
    #[error("{0}")]
    Custom(String),
}

// Convenience constructors
impl Error {
    /// Create a processor error from any error type
    pub fn processor<E: std::error::Error + Send + Sync + 'static>(error: E) -> Self {
        Error::Processor(Arc::new(error))
    }

    /// Create a pending-value error from any error type
    pub fn async_value<E: std::error::Error + Send + Sync + 'static>(error: E) -> Self {
        Error::AsyncValue(Arc::new(error))
    }

    /// Create a type mismatch error
    pub fn type_mismatch(expected: Kind, found: Kind) -> Self {
        Error::TypeMismatch { expected, found }
    }

    /// Create a custom error with a message
    pub fn custom<S: Into<String>>(message: S) -> Self {
        Error::Custom(message.into())
    }

    /// Whether this error was raised while attaching two stages.
    pub fn is_type_mismatch(&self) -> bool {
        matches!(self, Error::TypeMismatch { .. })
    }
}

impl From<futures::task::SpawnError> for Error {
    fn from(err: futures::task::SpawnError) -> Self {
        Error::Spawn(err.to_string())
    }
}

impl From<futures::channel::oneshot::Canceled> for Error {
    fn from(_: futures::channel::oneshot::Canceled) -> Self {
        Error::Shutdown
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for Error {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        Error::Shutdown
    }
}

impl From<Box<dyn std::error::Error + Send + Sync>> for Error {
    fn from(e: Box<dyn std::error::Error + Send + Sync>) -> Self {
        Error::Processor(Arc::from(e))
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Custom(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Custom(s.to_string())
    }
}

/// Convenience type alias for Results in this crate
pub type Result<T> = std::result::Result<T, Error>;

/// Helper trait for converting foreign errors into our Error type
pub trait IntoError<T> {
    fn into_processor_error(self) -> Result<T>;
    fn into_async_value_error(self) -> Result<T>;
}

impl<T, E> IntoError<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn into_processor_error(self) -> Result<T> {
        self.map_err(Error::processor)
    }

    fn into_async_value_error(self) -> Result<T> {
        self.map_err(Error::async_value)
    }
}

/// Why a flow stopped permanently.
///
/// This is the value handed to [`Consumer::flow_stopped`](crate::core::Consumer::flow_stopped)
/// and to [`Processor::stopped`](crate::core::Processor::stopped).
#[derive(Debug, Clone)]
pub enum StopReason {
    /// The upstream producer ran out of items
    Finished,
    /// A downstream consumer asked for the flow to stop
    Stopped,
    /// The flow failed
    Failed(Error),
}

impl StopReason {
    /// The error behind this stop, if it was a failure.
    pub fn error(&self) -> Option<&Error> {
        match self {
            StopReason::Failed(e) => Some(e),
            _ => None,
        }
    }

    /// Whether the flow ended without a failure.
    pub fn is_clean(&self) -> bool {
        !matches!(self, StopReason::Failed(_))
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::Finished => write!(f, "finished"),
            StopReason::Stopped => write!(f, "stopped"),
            StopReason::Failed(e) => write!(f, "failed: {}", e),
        }
    }
}

impl From<Error> for StopReason {
    fn from(error: Error) -> Self {
        StopReason::Failed(error)
    }
}
