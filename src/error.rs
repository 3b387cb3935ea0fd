// Error handling module
// Defines error types and HTTP response conversion

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// API errors that can occur during request processing
#[derive(Error, Debug)]
pub enum ApiError {
    /// Authentication failed (missing/unknown/disabled API key, bad admin credentials)
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Request validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Requested resource does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Credential plane failure (token blob missing, refresh failed, ...)
    #[error("Credential error: {0}")]
    Credential(String),

    /// Non-2xx from CodeWhisperer after the single auth retry
    #[error("CodeWhisperer returned status {status}: {message}")]
    Upstream { status: u16, message: String },

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            ApiError::Auth(msg) => (StatusCode::UNAUTHORIZED, "authentication_error", msg),
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, "invalid_request_error", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found_error", msg),
            ApiError::Credential(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "api_error", msg),
            ApiError::Upstream { status, message } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "api_error",
                format!("CodeWhisperer returned status {}: {}", status, message),
            ),
            ApiError::Internal(err) => {
                tracing::error!("Internal error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "api_error",
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "type": "error",
            "error": {
                "type": error_type,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type alias for API operations
pub type Result<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = ApiError::Auth("Invalid API key".to_string());
        assert_eq!(err.to_string(), "Authentication failed: Invalid API key");

        let err = ApiError::Upstream {
            status: 429,
            message: "Rate limit exceeded".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "CodeWhisperer returned status 429: Rate limit exceeded"
        );

        let err = ApiError::Credential("Token refresh failed: 400".to_string());
        assert_eq!(
            err.to_string(),
            "Credential error: Token refresh failed: 400"
        );
    }

    #[tokio::test]
    async fn test_error_response_status_codes() {
        let response = ApiError::Auth("bad key".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = ApiError::Validation("bad body".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = ApiError::NotFound("no such account".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        // Upstream failures always surface as 500 regardless of the upstream status
        let response = ApiError::Upstream {
            status: 403,
            message: "denied".to_string(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let response = ApiError::Internal(anyhow::anyhow!("boom")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_error_response_body_shape() {
        let response = ApiError::Auth("Missing API key".to_string()).into_response();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(body["type"], "error");
        assert_eq!(body["error"]["type"], "authentication_error");
        assert_eq!(body["error"]["message"], "Missing API key");
    }
}
