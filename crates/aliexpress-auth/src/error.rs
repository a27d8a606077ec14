//! Error types for token endpoint operations

/// Errors from the OAuth code exchange and refresh calls.
///
/// `Rejected` and `InvalidResponse` keep the raw provider body so the route
/// layer can surface it for diagnosis.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("token endpoint unreachable: {0}")]
    Transport(String),

    #[error("token endpoint returned {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("invalid token response ({reason}): {body}")]
    InvalidResponse { body: String, reason: String },

    #[error("no refresh token available, re-run the authorization flow")]
    MissingRefreshToken,
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
