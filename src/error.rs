use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

/// Every failure a handler or extractor can surface to a client.
///
/// Validation and credential errors carry fixed messages so a caller can never
/// tell an unknown email from a wrong password. Store and Internal keep their
/// detail server-side; clients only ever see "Server error".
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Please provide all required fields")]
    MissingFields,
    #[error("User with this email already exists")]
    DuplicateEmail,
    #[error("Invalid email or password")]
    InvalidCredentials,
    #[error("Access denied. No token provided.")]
    MissingToken,
    #[error("Invalid token")]
    InvalidToken,
    #[error("Token expired")]
    ExpiredToken,
    #[error("User not found")]
    NotFound,
    #[error("Server error")]
    Store(#[source] sqlx::Error),
    #[error("Server error")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingFields | ApiError::DuplicateEmail | ApiError::InvalidCredentials => {
                StatusCode::BAD_REQUEST
            }
            ApiError::MissingToken | ApiError::InvalidToken | ApiError::ExpiredToken => {
                StatusCode::UNAUTHORIZED
            }
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Store(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            ApiError::Store(e) => error!(error = %e, "store error"),
            ApiError::Internal(msg) => error!(error = %msg, "internal error"),
            _ => {}
        }
        let body = json!({ "error": self.to_string() });
        (self.status(), Json(body)).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        ApiError::Store(e)
    }
}
