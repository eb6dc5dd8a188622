use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::envelope::{DecryptError, SizeError};
use crate::store::StoreError;

/// Errors surfaced by the HTTP layer.
///
/// Decryption failures keep their cause for logging but render as one
/// generic message, and every missing-secret case renders as the same 404.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid JSON")]
    InvalidJson,

    #[error("{0}")]
    BadRequest(&'static str),

    #[error(transparent)]
    TooLong(#[from] SizeError),

    #[error("failed to decrypt: {0}")]
    Decrypt(#[from] DecryptError),

    #[error(transparent)]
    Capacity(#[from] StoreError),

    #[error("secret not found")]
    NotFound,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, msg) = match &self {
            AppError::InvalidJson => (StatusCode::BAD_REQUEST, self.to_string()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, (*msg).to_string()),
            AppError::TooLong(e) => (StatusCode::BAD_REQUEST, e.to_string()),
            AppError::Decrypt(e) => {
                tracing::debug!(reason = %e, "rejected envelope");
                (StatusCode::BAD_REQUEST, "failed to decrypt".to_string())
            }
            AppError::Capacity(e) => (StatusCode::TOO_MANY_REQUESTS, e.to_string()),
            AppError::NotFound => (StatusCode::NOT_FOUND, self.to_string()),
        };

        (status, Json(json!({ "error": msg }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decrypt_causes_share_one_status() {
        for cause in [
            DecryptError::InvalidKeyEncoding,
            DecryptError::InvalidPadding(0),
            DecryptError::InvalidPkcs7Padding,
        ] {
            let resp = AppError::from(cause).into_response();
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        }
    }

    #[test]
    fn capacity_is_rate_limit_class() {
        let resp = AppError::from(StoreError::CapacityExceeded { max: 3 }).into_response();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
