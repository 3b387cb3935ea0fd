// CORS and admin authentication middleware

use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use tower_http::cors::{Any, CorsLayer};

use crate::error::ApiError;
use crate::routes::AppState;

fn decode_basic(header: &str) -> Option<(String, String)> {
    let encoded = header.strip_prefix("Basic ")?;
    let decoded = BASE64.decode(encoded).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

/// Basic-auth guard for the admin surface.
///
/// Rejections carry a WWW-Authenticate challenge so browsers prompt.
pub async fn admin_auth_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let authorized = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(decode_basic)
        .map(|(user, pass)| {
            user == state.config.admin_username && pass == state.config.admin_password
        })
        .unwrap_or(false);

    if authorized {
        return next.run(request).await;
    }

    tracing::warn!(
        "Admin request with invalid or missing credentials: {} {}",
        request.method(),
        request.uri().path()
    );

    let mut response = ApiError::Auth("Invalid credentials".to_string()).into_response();
    response
        .headers_mut()
        .insert("WWW-Authenticate", HeaderValue::from_static("Basic"));
    response
}

/// Create CORS middleware layer
///
/// Allows all origins, methods, and headers; handles OPTIONS preflight.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_basic_valid() {
        // "admin:admin123"
        let header = format!("Basic {}", BASE64.encode("admin:admin123"));
        let (user, pass) = decode_basic(&header).unwrap();
        assert_eq!(user, "admin");
        assert_eq!(pass, "admin123");
    }

    #[test]
    fn test_decode_basic_password_with_colon() {
        let header = format!("Basic {}", BASE64.encode("admin:pa:ss"));
        let (user, pass) = decode_basic(&header).unwrap();
        assert_eq!(user, "admin");
        assert_eq!(pass, "pa:ss");
    }

    #[test]
    fn test_decode_basic_rejects_other_schemes() {
        assert!(decode_basic("Bearer abc").is_none());
        assert!(decode_basic("Basic not-base64!!!").is_none());
        assert!(decode_basic("").is_none());
    }
}
