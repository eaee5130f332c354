//! Error types for the management core.
//!
//! Uses `thiserror` for library-style errors with automatic `Display` and `Error` implementations.
//! [`ManagementError`] is the only error that crosses component boundaries; the
//! lower-level [`ApiError`] and [`AuthError`] travel inside it as the `source`.

use std::error::Error as StdError;

use thiserror::Error;

pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Failure calling or decoding a management API response.
///
/// Always carries an operation-specific message ("Error getting table list")
/// and, when there is one, the underlying cause.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct ManagementError {
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl ManagementError {
    /// Wrap `cause` under an operation-specific message.
    pub fn new(message: impl Into<String>, cause: impl Into<BoxError>) -> Self {
        Self {
            message: message.into(),
            source: Some(cause.into()),
        }
    }

    /// An error with no underlying cause, e.g. a server-reported failure message.
    pub fn message_only(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// First HTTP status code found anywhere in the cause chain.
    pub fn status(&self) -> Option<u16> {
        let mut current: Option<&(dyn StdError + 'static)> = self.source();
        while let Some(err) = current {
            if let Some(ApiError::Http { status, .. }) = err.downcast_ref::<ApiError>() {
                return Some(*status);
            }
            current = err.source();
        }
        None
    }

    /// True when an HTTP 401 surfaced somewhere in the cause chain.
    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }

    /// Returns a user-friendly message for display.
    pub fn user_message(&self) -> String {
        match self.source.as_deref() {
            Some(cause) => format!("{}: {}", self.message, cause),
            None => self.message.clone(),
        }
    }
}

/// Errors raised while talking to the management endpoint.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid XML response: {0}")]
    Xml(#[from] roxmltree::Error),

    #[error("Invalid JSON response: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to parse API response: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not configured: {0}")]
    NotConfigured(String),

    #[error("Management certificate error: {0}")]
    Certificate(String),

    #[error("Asynchronous operation failed: {0}")]
    OperationFailed(String),

    #[error("Timed out: {0}")]
    Timeout(String),
}

impl ApiError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Http { status: 401, .. })
    }
}

/// Authentication-related errors.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("OAuth2 authorization failed: {0}")]
    OAuthFailed(String),

    #[error("Invalid authorization code")]
    InvalidAuthCode,

    #[error("State validation failed (possible CSRF attack)")]
    StateValidationFailed,

    #[error("OAuth callback timeout")]
    CallbackTimeout,

    #[error("User cancelled authentication")]
    UserCancelled,

    #[error("Token exchange failed: {0}")]
    TokenExchangeFailed(String),

    #[error("Token refresh failed: {message}")]
    TokenRefreshFailed { status: Option<u16>, message: String },

    #[error("Active Directory not configured: {0}")]
    NotConfigured(String),
}

impl AuthError {
    /// The token endpoint rejected the request as malformed or the grant as invalid.
    ///
    /// This class of failure is answered with interactive re-authentication.
    pub fn is_bad_request(&self) -> bool {
        matches!(self, Self::TokenRefreshFailed { status: Some(400), .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unauthorized_detected_through_cause_chain() {
        let api = ApiError::Http {
            status: 401,
            body: "expired".into(),
        };
        let inner = ManagementError::new("Error getting table list", api);
        let outer = ManagementError::new("Error getting table data", inner);

        assert!(outer.is_unauthorized());
        assert_eq!(outer.status(), Some(401));
    }

    #[test]
    fn test_other_failures_are_not_unauthorized() {
        let err = ManagementError::new(
            "Error getting job list",
            ApiError::Http {
                status: 403,
                body: String::new(),
            },
        );
        assert!(!err.is_unauthorized());
        assert_eq!(err.status(), Some(403));

        let err = ManagementError::new("Error getting log", ApiError::Parse("bad".into()));
        assert!(!err.is_unauthorized());
        assert_eq!(err.status(), None);
    }

    #[test]
    fn test_user_message() {
        let err = ManagementError::message_only("Region not available");
        assert_eq!(err.user_message(), "Region not available");
        assert_eq!(err.to_string(), "Region not available");

        let err = ManagementError::new(
            "Error getting service list",
            ApiError::NotConfigured("no token".into()),
        );
        assert_eq!(
            err.user_message(),
            "Error getting service list: Not configured: no token"
        );
    }

    #[test]
    fn test_bad_request_classification() {
        let err = AuthError::TokenRefreshFailed {
            status: Some(400),
            message: "invalid_grant".into(),
        };
        assert!(err.is_bad_request());

        let err = AuthError::TokenRefreshFailed {
            status: Some(500),
            message: "server".into(),
        };
        assert!(!err.is_bad_request());
    }
}
