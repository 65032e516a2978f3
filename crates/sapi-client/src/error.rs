//! Error types for the credential SDK.

use reqwest::StatusCode;
use thiserror::Error;

use sapi_common::TenantError;

/// Errors that can occur while managing tokens or intercepting requests.
///
/// Interception failures never reach the host application: the middleware
/// logs them and sends the original request instead.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SapiError {
    /// Invalid SDK configuration, including a malformed tenant identifier.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The token endpoint rejected the request (HTTP status >= 400).
    #[error("Authentication error ({status}): {message}")]
    Auth {
        /// Status returned by the token endpoint.
        status: StatusCode,
        /// Response body or a short description.
        message: String,
    },

    /// Network or HTTP failure while talking to the token endpoint.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The token fetch did not finish within the configured timeout.
    #[error("Token fetch timed out")]
    Timeout,

    /// JSON encoding or decoding failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The token endpoint answered with an unexpected payload.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The local key-value store could not be read or written.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A stored record exists but cannot be decoded.
    #[error("Corrupt token record under '{key}': {source}")]
    CorruptRecord {
        /// Storage key of the record.
        key: String,
        /// Decoding failure.
        #[source]
        source: serde_json::Error,
    },

    /// Rewriting or authenticating an outgoing request failed.
    #[error("Interception error: {0}")]
    Interception(String),
}

/// Result type alias using [`SapiError`].
pub type Result<T> = std::result::Result<T, SapiError>;

impl SapiError {
    /// Whether the token endpoint refused to issue a token.
    #[must_use]
    pub const fn is_auth_error(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }

    /// Whether the failure is transient and a later attempt may succeed.
    ///
    /// Auth rejections count as retryable only for server-side statuses.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout | Self::Storage(_) => true,
            Self::Auth { status, .. } => status.is_server_error(),
            _ => false,
        }
    }
}

impl From<TenantError> for SapiError {
    fn from(err: TenantError) -> Self {
        Self::Configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_error_classification() {
        let rejected = SapiError::Auth {
            status: StatusCode::UNAUTHORIZED,
            message: "captcha required".to_string(),
        };
        assert!(rejected.is_auth_error());
        assert!(!rejected.is_retryable());

        let unavailable = SapiError::Auth {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: String::new(),
        };
        assert!(unavailable.is_retryable());
    }

    #[test]
    fn test_timeout_is_retryable() {
        assert!(SapiError::Timeout.is_retryable());
        assert!(!SapiError::Interception("x".to_string()).is_retryable());
    }

    #[test]
    fn test_tenant_error_becomes_configuration_error() {
        let err = SapiError::from(TenantError::Empty);
        assert!(matches!(err, SapiError::Configuration(_)));
        assert_eq!(
            err.to_string(),
            "Configuration error: tenant identifier is empty"
        );
    }
}
