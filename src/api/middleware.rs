//! API Middleware
//!
//! Admin key check and request logging.

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::error::AppError;

use super::routes::AppState;

/// Header carrying the admin key
pub const API_KEY_HEADER: &str = "x-api-key";

/// Require `X-API-Key` to match the configured admin key.
/// Passes everything through when no key is configured.
pub async fn auth_middleware(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(expected) = state.api_key.as_deref() else {
        return next.run(request).await;
    };

    match headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) {
        None => AppError::MissingHeader("X-API-Key".to_string()).into_response(),
        Some(provided) if provided == expected => next.run(request).await,
        Some(_) => {
            tracing::warn!(uri = %request.uri(), "Rejected request with invalid API key");
            AppError::InvalidApiKey.into_response()
        }
    }
}

/// Headers that should be masked in logs
const SENSITIVE_HEADERS: &[&str] = &["x-api-key", "authorization", "cookie", "set-cookie"];

/// Mask sensitive headers for logging
pub fn mask_headers_for_logging(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let masked_value = if SENSITIVE_HEADERS.contains(&name.as_str()) {
                "[REDACTED]".to_string()
            } else {
                value.to_str().unwrap_or("[invalid utf8]").to_string()
            };
            (name.to_string(), masked_value)
        })
        .collect()
}

/// Request logging middleware
pub async fn logging_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let headers = mask_headers_for_logging(request.headers());
    let start = std::time::Instant::now();

    tracing::info!(method = %method, uri = %uri, headers = ?headers, "Incoming request");

    let response = next.run(request).await;

    tracing::info!(
        method = %method,
        uri = %uri,
        status = %response.status(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Request completed"
    );

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_headers_for_logging() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", "application/json".parse().unwrap());
        headers.insert("x-api-key", "secret-key-12345".parse().unwrap());
        headers.insert("authorization", "Bearer abc".parse().unwrap());

        let masked = mask_headers_for_logging(&headers);
        let value = |name: &str| masked.iter().find(|(k, _)| k == name).map(|(_, v)| v.clone());

        assert_eq!(value("x-api-key").as_deref(), Some("[REDACTED]"));
        assert_eq!(value("authorization").as_deref(), Some("[REDACTED]"));
        assert_eq!(value("content-type").as_deref(), Some("application/json"));
    }
}
