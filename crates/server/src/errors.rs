use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use store::StoreError;
use tracing::error;

/// Error returned by HTTP handlers, rendered as `{"error": "..."}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        let status = match &err {
            StoreError::KeyNotFound(_) => StatusCode::NOT_FOUND,
            StoreError::KeyAlreadyExists(_) => StatusCode::CONFLICT,
            StoreError::Io(_) | StoreError::ShutdownDrainTimeout(_) | StoreError::AlreadyConnected => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = %self.status, error = %self.message, "request failed");
        }
        (self.status, Json(serde_json::json!({"error": self.message}))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_to_statuses() {
        assert_eq!(ApiError::from(StoreError::KeyNotFound("k".into())).status, StatusCode::NOT_FOUND);
        assert_eq!(ApiError::from(StoreError::KeyAlreadyExists("k".into())).status, StatusCode::CONFLICT);
        assert_eq!(
            ApiError::from(StoreError::Io("disk".into())).status,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn message_keeps_store_wording() {
        let err = ApiError::from(StoreError::KeyNotFound("user:1".into()));
        assert_eq!(err.message, "key not found: user:1");
    }
}
