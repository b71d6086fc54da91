/// Errors raised by credential handling and authenticated requests.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The auth service rejected the call with a machine-readable code.
    #[error("auth service error ({code}): {message}")]
    Api { code: String, message: String },

    /// Network failure talking to an HTTP collaborator.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Non-success status other than an authorization failure.
    #[error("request failed ({status}): {message}")]
    Status { status: u16, message: String },

    #[error("JSON error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("malformed access token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),

    #[error("access token has no subject claim")]
    MissingSubject,

    #[error("invalid endpoint: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// A single request was rejected for its credential. The interceptor
    /// refreshes and retries on this; callers never see it from
    /// [`RequestInterceptor::call`](crate::RequestInterceptor::call).
    #[error("credential rejected")]
    Unauthorized,

    /// Authorization failed even after a refresh, or there is no credential.
    #[error("not authenticated")]
    Unauthenticated,

    /// Refreshing the credential failed; the session is over.
    #[error("session expired: {reason}")]
    SessionExpired { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AuthError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }

    /// Errors that end the session rather than a single request.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::SessionExpired { .. } | Self::Unauthenticated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_display() {
        let err = AuthError::Api {
            code: "invalid_argument".into(),
            message: "email cannot be empty".into(),
        };
        assert_eq!(
            err.to_string(),
            "auth service error (invalid_argument): email cannot be empty"
        );
    }

    #[test]
    fn only_session_ending_errors_are_terminal() {
        assert!(AuthError::Unauthenticated.is_terminal());
        assert!(AuthError::SessionExpired { reason: "x".into() }.is_terminal());
        assert!(!AuthError::Unauthorized.is_terminal());
        assert!(
            !AuthError::Status {
                status: 500,
                message: String::new()
            }
            .is_terminal()
        );
    }
}
