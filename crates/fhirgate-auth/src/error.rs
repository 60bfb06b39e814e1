//! Authorization error types.
//!
//! The scope-to-policy engine fails in exactly three ways (unsupported
//! resource type, unsupported operation keyword, patient grant without a
//! patient). All of them are request-fatal: the engine never hands back a
//! partially built rule list.

use std::fmt;

/// Errors that can occur while building or enforcing scope-derived rules.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// A scope names a resource type the deployment does not serve.
    #[error("Scope resource {resource} not supported.")]
    ResourceNotSupported {
        /// The offending resource type name.
        resource: String,
    },

    /// A scope's operation keyword is not `read`, `write` or `*`.
    #[error("Scope operation {operation} not supported.")]
    OperationNotSupported {
        /// The offending operation keyword.
        operation: String,
    },

    /// A grant cannot be honored safely (e.g. patient scope without patient).
    #[error("Security error: {message}")]
    Security {
        /// Description of the security misconfiguration.
        message: String,
    },

    /// The request is not permitted by the granted scopes.
    #[error("Forbidden: {message}")]
    Forbidden {
        /// Description of why access is forbidden.
        message: String,
    },

    /// The verified token claims are unusable.
    #[error("Invalid token: {message}")]
    InvalidToken {
        /// Description of why the claims are invalid.
        message: String,
    },

    /// The authorization configuration is invalid.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },

    /// An unexpected internal error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl AuthError {
    /// Creates a new `ResourceNotSupported` error.
    #[must_use]
    pub fn resource_not_supported(resource: impl Into<String>) -> Self {
        Self::ResourceNotSupported {
            resource: resource.into(),
        }
    }

    /// Creates a new `OperationNotSupported` error.
    #[must_use]
    pub fn operation_not_supported(operation: impl Into<String>) -> Self {
        Self::OperationNotSupported {
            operation: operation.into(),
        }
    }

    /// Creates a new `Security` error.
    #[must_use]
    pub fn security(message: impl Into<String>) -> Self {
        Self::Security {
            message: message.into(),
        }
    }

    /// Creates a new `Forbidden` error.
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidToken` error.
    #[must_use]
    pub fn invalid_token(message: impl Into<String>) -> Self {
        Self::InvalidToken {
            message: message.into(),
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if this error was raised while deriving rules from scopes.
    #[must_use]
    pub fn is_grant_error(&self) -> bool {
        matches!(
            self,
            Self::ResourceNotSupported { .. }
                | Self::OperationNotSupported { .. }
                | Self::Security { .. }
        )
    }

    /// Returns `true` if this is a client error (4xx category).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Security { .. } | Self::Forbidden { .. } | Self::InvalidToken { .. }
        )
    }

    /// Returns `true` if this is a server error (5xx category).
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        !self.is_client_error()
    }

    /// Returns the error category for logging/monitoring purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ResourceNotSupported { .. } | Self::OperationNotSupported { .. } => {
                ErrorCategory::Grant
            }
            Self::Security { .. } | Self::Forbidden { .. } => ErrorCategory::Authorization,
            Self::InvalidToken { .. } => ErrorCategory::Token,
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }
}

/// Categories of authorization errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// A granted scope cannot be translated into rules.
    Grant,
    /// Permission checks.
    Authorization,
    /// Token claims.
    Token,
    /// Configuration errors.
    Configuration,
    /// Internal server errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Grant => write!(f, "grant"),
            Self::Authorization => write!(f, "authorization"),
            Self::Token => write!(f, "token"),
            Self::Configuration => write!(f, "configuration"),
            Self::Internal => write!(f, "internal"),
        }
    }
}
