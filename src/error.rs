//! Crate-wide error taxonomy.
//!
//! Mirrors the severity classes in spec.md §7: validation and not-found
//! errors are non-retryable, transient errors are eligible for
//! [`crate::error_recovery::ErrorRecoveryManager`], and `NotReady` carries
//! the "subscribe to readiness and retry" contract verbatim in its message.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("validation error in {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("camera not found or not accessible")]
    CameraNotFound,

    #[error("path '{0}' not found")]
    PathNotFound(String),

    #[error("session '{0}' not found")]
    SessionNotFound(String),

    #[error("{operation} conflict: {reason}")]
    Conflict { operation: String, reason: String },

    #[error("{component} is not ready yet; subscribe to readiness and retry")]
    NotReady { component: String },

    #[error("media server request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("media server returned malformed response for {operation}: {reason}")]
    MalformedResponse { operation: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GStreamer error: {0}")]
    GStreamer(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("not yet implemented: {0}")]
    NotImplemented(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("{component}.{operation} failed: {source}")]
    Context {
        component: String,
        operation: String,
        #[source]
        source: Box<ControllerError>,
    },
}

impl ControllerError {
    /// Wrap with `{component, operation}` context, per spec.md §7's
    /// propagation policy: managers wrap, the Controller forwards as-is.
    pub fn with_context(self, component: &str, operation: &str) -> Self {
        ControllerError::Context {
            component: component.to_string(),
            operation: operation.to_string(),
            source: Box::new(self),
        }
    }

    /// Whether this error class is eligible for recovery-strategy handling.
    pub fn is_recoverable(&self) -> bool {
        match self {
            ControllerError::Http(_) | ControllerError::Timeout(_) => true,
            ControllerError::Context { source, .. } => source.is_recoverable(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ControllerError>;
