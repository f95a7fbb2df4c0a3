//! Error types for the authorization core

use thiserror::Error;

/// Authorization core errors
#[derive(Debug, Error)]
pub enum AuthzError {
    /// Malformed URI or body shape, rejected before any remote call
    #[error("Classification failed: {0}")]
    Classification(String),

    /// Explicit negative decision from the policy engine
    #[error("Permission denied: {0}")]
    Denied(String),

    /// Transport or backend failure contacting the policy engine
    #[error("Authorization indeterminate: {0}")]
    Indeterminate(String),

    /// Register, update or deregister failure
    #[error("Resource registration failed: {0}")]
    Registration(String),

    /// Authorized business list refresh failure
    #[error("Authorization cache refresh failed: {0}")]
    CacheRefresh(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Domain store failure
    #[error("Store error: {0}")]
    Store(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AuthzError {
    /// Whether the error came from the policy engine being unreachable or failing
    pub fn is_indeterminate(&self) -> bool {
        matches!(self, AuthzError::Indeterminate(_))
    }

    /// Re-tag a policy engine error as a registration failure
    pub(crate) fn into_registration(self) -> Self {
        match self {
            AuthzError::Registration(msg) => AuthzError::Registration(msg),
            other => AuthzError::Registration(other.to_string()),
        }
    }
}

/// Result type for authorization operations
pub type Result<T> = std::result::Result<T, AuthzError>;
