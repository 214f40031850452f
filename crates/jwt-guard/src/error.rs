//! Guard errors.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Why a token that was present got rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VerificationFailure {
    /// Past its `exp` (or outside the refresh window).
    #[error("token expired")]
    Expired,

    /// Well-formed but not acceptable (bad signature, issuer, algorithm...).
    #[error("token invalid")]
    Invalid,

    /// Revoked through the engine's revocation list.
    #[error("token revoked")]
    Revoked,

    /// Not a decodable token at all.
    #[error("token malformed")]
    Malformed,
}

/// Guard errors.
///
/// Authentication *failure* is not an error: `AuthGuard::user` returns
/// `Ok(None)` for a bad token or an unknown subject. The variants here are
/// what surfaces to the host's error layer.
#[derive(Debug, Error)]
pub enum GuardError {
    /// The request carries no token where one was required.
    #[error("token not provided")]
    MissingToken,

    /// A route required an authenticated user and there is none.
    #[error("unauthenticated")]
    Unauthenticated,

    /// Credentials were rejected by the user directory.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// A token was present but rejected.
    #[error(transparent)]
    Token(#[from] VerificationFailure),

    /// The bound engine or directory does not implement a capability.
    #[error("{component} does not support {operation}")]
    Unsupported {
        component: &'static str,
        operation: &'static str,
    },

    /// User directory backend failure.
    #[error("user directory error: {0}")]
    Directory(String),

    /// Token engine failure (signing, key material).
    #[error("token engine error: {0}")]
    Engine(String),

    /// Registrar or guard configuration defect.
    #[error("configuration error: {0}")]
    Config(String),
}

impl GuardError {
    pub(crate) fn unsupported(component: &'static str, operation: &'static str) -> Self {
        Self::Unsupported {
            component,
            operation,
        }
    }

    /// Stable machine-readable code for the error body.
    pub fn error_code(&self) -> &'static str {
        match self {
            GuardError::MissingToken => "missing_token",
            GuardError::Unauthenticated => "unauthenticated",
            GuardError::InvalidCredentials => "invalid_credentials",
            GuardError::Token(VerificationFailure::Expired) => "token_expired",
            GuardError::Token(VerificationFailure::Invalid) => "invalid_token",
            GuardError::Token(VerificationFailure::Revoked) => "token_revoked",
            GuardError::Token(VerificationFailure::Malformed) => "malformed_token",
            GuardError::Unsupported { .. } => "unsupported_operation",
            GuardError::Directory(_) => "directory_error",
            GuardError::Engine(_) => "engine_error",
            GuardError::Config(_) => "configuration_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            GuardError::MissingToken => StatusCode::BAD_REQUEST,
            GuardError::Unauthenticated
            | GuardError::InvalidCredentials
            | GuardError::Token(_) => StatusCode::UNAUTHORIZED,
            GuardError::Unsupported { .. }
            | GuardError::Directory(_)
            | GuardError::Engine(_)
            | GuardError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<sqlx::Error> for GuardError {
    fn from(err: sqlx::Error) -> Self {
        GuardError::Directory(err.to_string())
    }
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct GuardErrorResponse {
    pub error: String,
    pub error_code: String,
}

impl IntoResponse for GuardError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "guard failure");
        }

        let body = Json(GuardErrorResponse {
            error: self.to_string(),
            error_code: self.error_code().to_string(),
        });

        (status, body).into_response()
    }
}
