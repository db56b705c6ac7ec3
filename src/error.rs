use axum::{
    extract::rejection::JsonRejection,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Map;
use tracing::error;

use crate::{response::Envelope, validation::FieldErrors};

/// Every failure a handler can answer with. Internal details stay in the log.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("The given data was invalid.")]
    Validation(FieldErrors),

    #[error("Unauthenticated")]
    Unauthenticated,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Invalid verification link")]
    InvalidLink,

    #[error("Email already verified")]
    AlreadyVerified,

    #[error("Resource not found")]
    NotFound,

    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("Too many attempts. Please try again later.")]
    RateLimited { retry_after_secs: u64 },

    #[error("{message}")]
    Internal {
        message: &'static str,
        cause: anyhow::Error,
    },
}

impl ApiError {
    /// Internal failure answered with a fixed public `message`.
    pub fn internal(message: &'static str, cause: impl Into<anyhow::Error>) -> Self {
        Self::Internal {
            message,
            cause: cause.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Unauthenticated | Self::InvalidCredentials => StatusCode::UNAUTHORIZED,
            Self::InvalidSignature | Self::InvalidLink => StatusCode::FORBIDDEN,
            Self::AlreadyVerified => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<FieldErrors> for ApiError {
    fn from(errors: FieldErrors) -> Self {
        Self::Validation(errors)
    }
}

/// Unparseable JSON bodies are answered like any other validation failure.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let mut errors = FieldErrors::new();
        errors.add("body", rejection.body_text());
        Self::Validation(errors)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if let Self::Internal { message, cause } = &self {
            error!(error = ?cause, %status, "{}", message);
        }

        let retry_after = match &self {
            Self::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        };
        let message = self.to_string();
        let errors = match self {
            Self::Validation(errors) => Some(errors),
            _ => None,
        };

        let mut res = (
            status,
            Json(Envelope {
                message,
                data: Map::new(),
                errors,
            }),
        )
            .into_response();
        if let Some(secs) = retry_after {
            res.headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        res
    }
}
