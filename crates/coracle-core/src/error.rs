//! Error types for the coracle client runtime
//!
//! Explicit error variants with context, using thiserror.

use thiserror::Error;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Client runtime error types
#[derive(Error, Debug)]
pub enum ClientError {
    // =========================================================================
    // Lifecycle Errors
    // =========================================================================
    #[error("Invalid configuration: {field}, reason: {reason}")]
    ConfigInvalid { field: String, reason: String },

    #[error("A client runtime is already running in this process")]
    AlreadyRunning,

    #[error("Client runtime not started")]
    NotStarted,

    #[error("Operation {operation} is only valid inside a silo, not on a client")]
    InvalidContext { operation: String },

    // =========================================================================
    // Request Errors
    // =========================================================================
    #[error("Request {correlation} timed out after {timeout_ms}ms")]
    ResponseTimeout { correlation: String, timeout_ms: u64 },

    #[error("Remote grain call failed: {detail}")]
    RemoteFailure { detail: String },

    #[error("Request rejected by gateway: {reason}")]
    GatewayRejection { reason: String },

    // =========================================================================
    // Serialization Errors
    // =========================================================================
    #[error("Deep copy failed: {reason}")]
    SerializationFailed { reason: String },

    // =========================================================================
    // Local Object Errors
    // =========================================================================
    #[error("No local object registered for grain {grain}")]
    TargetNotFound { grain: String },

    #[error("Local object for grain {grain} has been dropped")]
    TargetCollected { grain: String },

    #[error("Reference {grain} does not name a local object of this client")]
    NotLocalObject { grain: String },

    #[error("A local object is already registered for grain {grain}")]
    ObserverAlreadyRegistered { grain: String },

    // =========================================================================
    // Transport Errors
    // =========================================================================
    #[error("No gateway available: {reason}")]
    GatewayUnavailable { reason: String },

    #[error("Transport closed")]
    TransportClosed,

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ClientError {
    /// Create a configuration error
    pub fn config_invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid-context error for a host-only operation
    pub fn invalid_context(operation: impl Into<String>) -> Self {
        Self::InvalidContext {
            operation: operation.into(),
        }
    }

    /// Create a serialization failure
    pub fn serialization_failed(reason: impl Into<String>) -> Self {
        Self::SerializationFailed {
            reason: reason.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Check if this error is retriable by the caller
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::ResponseTimeout { .. }
                | Self::GatewayUnavailable { .. }
                | Self::TransportClosed
        )
    }
}
