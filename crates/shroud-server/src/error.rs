//! HTTP error types for the Shroud server.
//!
//! Maps domain errors from `shroud-core` into appropriate HTTP responses.
//! Every error variant produces a JSON body with a machine-readable `error`
//! field and a human-readable `message`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use shroud_core::Denial;
use shroud_core::error::{EngineError, KdfError};

/// Application-level error returned from HTTP handlers.
#[derive(Debug)]
pub enum AppError {
    /// The secret can no longer be viewed.
    Gone(Denial),
    /// The supplied password did not match.
    WrongPassword,
    /// Requested resource not found.
    NotFound(String),
    /// Client sent invalid input.
    BadRequest(String),
    /// The request could not be extracted (malformed JSON, bad path or
    /// query parameters, wrong content type).
    Rejected { status: StatusCode, message: String },
    /// The secret is too contended to update right now.
    Unavailable(String),
    /// Internal server error.
    Internal(String),
}

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            Self::Gone(denial) => (
                StatusCode::GONE,
                denial.as_str(),
                gone_message(denial).to_owned(),
            ),
            Self::WrongPassword => (
                StatusCode::UNAUTHORIZED,
                "wrong_password",
                "the password is incorrect".to_owned(),
            ),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            Self::Rejected { status, message } => (status, "invalid_request", message),
            Self::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable", msg),
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "request failed with internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg)
            }
        };

        let body = ErrorBody {
            error: error_type,
            message,
        };

        (status, axum::Json(body)).into_response()
    }
}

const fn gone_message(denial: Denial) -> &'static str {
    match denial {
        Denial::Expired => "this secret has expired",
        Denial::ViewLimitReached => "this secret has reached its view limit",
        Denial::AlreadyBurned => "this secret was burned after its first view",
        Denial::Deleted => "this secret has been deleted",
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::NotFound { .. } => Self::NotFound(err.to_string()),
            EngineError::InvalidRequest { .. } | EngineError::Kdf(KdfError::EmptyPassword) => {
                Self::BadRequest(err.to_string())
            }
            EngineError::Contention { .. } => Self::Unavailable(err.to_string()),
            EngineError::Integrity { .. }
            | EngineError::Kdf(_)
            | EngineError::Cipher(_)
            | EngineError::Payload(_)
            | EngineError::Serialization { .. }
            | EngineError::Internal { .. }
            | EngineError::Audit(_)
            | EngineError::Storage(_) => Self::Internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_errors_map_to_statuses() {
        let cases = [
            (
                EngineError::NotFound { id: "x".to_owned() },
                StatusCode::NOT_FOUND,
            ),
            (
                EngineError::InvalidRequest {
                    reason: "bad".to_owned(),
                },
                StatusCode::BAD_REQUEST,
            ),
            (
                EngineError::Contention {
                    id: "x".to_owned(),
                    attempts: 16,
                },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                EngineError::Integrity {
                    id: "x".to_owned(),
                    reason: "tag".to_owned(),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).into_response().status(), status);
        }
    }

    #[test]
    fn rejections_keep_their_status_and_use_the_json_body() {
        let response = AppError::Rejected {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            message: "unknown field `viewCount`".to_owned(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            response.headers()[axum::http::header::CONTENT_TYPE],
            "application/json"
        );
    }

    #[test]
    fn denials_are_gone() {
        for denial in [
            Denial::Expired,
            Denial::ViewLimitReached,
            Denial::AlreadyBurned,
            Denial::Deleted,
        ] {
            assert_eq!(
                AppError::Gone(denial).into_response().status(),
                StatusCode::GONE
            );
        }
        assert_eq!(
            AppError::WrongPassword.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
    }
}
