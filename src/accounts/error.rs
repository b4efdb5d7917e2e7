use axum::http::StatusCode;
use thiserror::Error;

/// Errors raised by account operations.
#[derive(Debug, Error)]
pub enum AccountError {
    /// A required field is missing or malformed.
    #[error("{0}")]
    Validation(String),

    /// The normalized email is already registered.
    #[error("account with email {0} already exists")]
    Uniqueness(String),

    /// The hashing collaborator failed.
    #[error("password hashing failed: {0}")]
    Hashing(String),

    #[error("account not found")]
    NotFound,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl AccountError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Uniqueness(_) => StatusCode::CONFLICT,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::InvalidCredentials => StatusCode::UNAUTHORIZED,
            Self::Hashing(_) | Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Rejection tuple used by the HTTP handlers. Internal failures are not
    /// echoed back to the client.
    pub fn into_rejection(self) -> (StatusCode, String) {
        let status = self.status();
        let msg = match self {
            Self::Uniqueness(_) => "Account already exists".to_string(),
            Self::Hashing(_) | Self::Storage(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };
        (status, msg)
    }
}
