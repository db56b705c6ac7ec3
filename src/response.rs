use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::validation::FieldErrors;

/// The `{ message, data }` envelope every JSON response is wrapped in.
#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub message: String,
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<FieldErrors>,
}

/// Successful response with a status code.
pub struct ApiResponse<T: Serialize> {
    status: StatusCode,
    body: Envelope<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self::with_status(StatusCode::OK, message, data)
    }

    pub fn with_status(status: StatusCode, message: impl Into<String>, data: T) -> Self {
        Self {
            status,
            body: Envelope {
                message: message.into(),
                data,
                errors: None,
            },
        }
    }
}

impl ApiResponse<Map<String, Value>> {
    /// Response whose `data` is an empty object.
    pub fn message(message: impl Into<String>) -> Self {
        Self::ok(message, Map::new())
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_only_response_has_empty_data() {
        let body = ApiResponse::message("Logout successful").body;
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["message"], "Logout successful");
        assert_eq!(json["data"], serde_json::json!({}));
        assert!(json.get("errors").is_none());
    }
}
