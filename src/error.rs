//! Error types for longpoll.
//!
//! All errors are strongly typed using thiserror. Timeouts and termination
//! are *not* errors: they are ordinary outcomes of a subscription
//! (see [`crate::coordinator::Outcome`]).

use thiserror::Error;

/// Validation errors that occur during input validation.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid fingerprint '{value}': {reason}")]
    InvalidFingerprint {
        value: String,
        reason: String,
    },
}

/// Execution errors that occur while updating content or awaiting updates.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Content can not be updated any more: the holder is already terminated")]
    AlreadyTerminated,

    #[error("Unable to serialize broadcast content: {message}")]
    SerializationFailed {
        message: String,
    },

    #[error("Wait for broadcast update was interrupted: {reason}")]
    WaitInterrupted {
        reason: String,
    },

    #[error("Wait pool queue is full (capacity: {capacity})")]
    QueueFull {
        capacity: usize,
    },

    #[error("Channel disconnected: {path}")]
    Disconnected {
        path: String,
    },
}

/// Top-level error type for longpoll.
#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl BroadcastError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates a serialization failure.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Execution(ExecutionError::SerializationFailed {
            message: message.into(),
        })
    }

    /// Creates a wait interruption.
    #[must_use]
    pub fn interrupted(reason: impl Into<String>) -> Self {
        Self::Execution(ExecutionError::WaitInterrupted {
            reason: reason.into(),
        })
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is an execution error.
    #[must_use]
    pub const fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }

    /// Returns true if the holder rejected an update because it is terminated.
    #[must_use]
    pub const fn is_terminated(&self) -> bool {
        matches!(self, Self::Execution(ExecutionError::AlreadyTerminated))
    }

    /// Returns true if this is a serialization failure.
    #[must_use]
    pub const fn is_serialization(&self) -> bool {
        matches!(self, Self::Execution(ExecutionError::SerializationFailed { .. }))
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) => false,
            Self::Execution(e) => matches!(e, ExecutionError::QueueFull { .. } | ExecutionError::WaitInterrupted { .. }),
            Self::Internal { .. } => false,
        }
    }
}

/// Result type alias for longpoll operations.
pub type BroadcastResult<T> = Result<T, BroadcastError>;
