//! # Error Handling
//!
//! Crate-wide error type for the edgeplane control plane. Variants follow the
//! failure classes the registry and discovery server surface to callers:
//! bad input, missing entities, exhausted pools, and transient runtime
//! failures, plus the usual infrastructure errors.

/// Custom result type for edgeplane operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the edgeplane control plane
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Caller supplied input that can never succeed as given
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unknown exposure, app or container
    #[error("Not found: {0}")]
    NotFound(String),

    /// Request collides with existing state
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A bounded pool (TCP host ports) has no free entries left
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Container runtime call failed
    #[error("Container runtime error: {0}")]
    Runtime(String),

    /// Container runtime call did not complete in time
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Durable state could not be read or written
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network transport errors (gRPC, HTTP)
    #[error("Transport error: {0}")]
    Transport(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found<S: Into<String>>(message: S) -> Self {
        Self::NotFound(message.into())
    }

    pub fn conflict<S: Into<String>>(message: S) -> Self {
        Self::Conflict(message.into())
    }

    pub fn resource_exhausted<S: Into<String>>(message: S) -> Self {
        Self::ResourceExhausted(message.into())
    }

    pub fn runtime<S: Into<String>>(message: S) -> Self {
        Self::Runtime(message.into())
    }

    pub fn timeout<S: Into<String>>(message: S) -> Self {
        Self::Timeout(message.into())
    }

    pub fn persistence<S: Into<String>>(message: S) -> Self {
        Self::Persistence(message.into())
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config(message.into())
    }

    /// Create a new transport error
    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport(message.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal(message.into())
    }

    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Runtime(_) | Self::Timeout(_))
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::Timeout("operation exceeded its deadline".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_produce_matching_variants() {
        assert!(matches!(Error::validation("x"), Error::Validation(_)));
        assert!(matches!(Error::not_found("x"), Error::NotFound(_)));
        assert!(matches!(Error::resource_exhausted("x"), Error::ResourceExhausted(_)));
        assert!(matches!(Error::persistence("x"), Error::Persistence(_)));
    }

    #[test]
    fn transient_classification() {
        assert!(Error::runtime("socket closed").is_transient());
        assert!(Error::timeout("inspect").is_transient());
        assert!(!Error::not_found("exp_1").is_transient());
        assert!(!Error::validation("bad").is_transient());
    }

    #[test]
    fn display_includes_message() {
        let err = Error::resource_exhausted("no available ports in range 10000-60000");
        assert_eq!(err.to_string(), "Resource exhausted: no available ports in range 10000-60000");
    }
}
