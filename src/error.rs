// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authorization errors.
//!
//! Detailed variants (`KeyNotFound`, `InvalidSignature`, ...) are produced
//! during verification and logged server-side; they are never rendered to a
//! client. Clients only ever see the opaque `Unauthorized`, `Forbidden` and
//! `MiddlewareNotInstalled` responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Authorization error type.
#[derive(Debug)]
pub enum AuthError {
    /// Invalid authorization header format
    InvalidAuthHeader,
    /// Token is malformed
    MalformedToken,
    /// Token header carries no key ID
    MissingKeyId,
    /// No matching key in the key set
    KeyNotFound,
    /// Key declares an algorithm outside the supported set
    UnsupportedAlgorithm(String),
    /// Token signature is invalid
    InvalidSignature,
    /// Token has expired
    TokenExpired,
    /// JWKS fetch failed
    JwksFetchError(String),
    /// Authorization is enabled but neither a key set nor a JWKS URL is configured
    NotConfigured,
    /// Authorization middleware is not installed on the router
    MiddlewareNotInstalled,
    /// Request rejected: no acceptable identity
    Unauthorized,
    /// Request rejected: identity lacks the required scope
    Forbidden,
    /// Internal error
    InternalError(String),
}

#[derive(Serialize)]
struct AuthErrorBody {
    error: String,
    error_code: String,
}

impl AuthError {
    /// Get the error code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::InvalidAuthHeader => "invalid_auth_header",
            AuthError::MalformedToken => "malformed_token",
            AuthError::MissingKeyId => "missing_key_id",
            AuthError::KeyNotFound => "key_not_found",
            AuthError::UnsupportedAlgorithm(_) => "unsupported_algorithm",
            AuthError::InvalidSignature => "invalid_signature",
            AuthError::TokenExpired => "token_expired",
            AuthError::JwksFetchError(_) => "jwks_fetch_error",
            AuthError::NotConfigured => "authorization_not_configured",
            AuthError::MiddlewareNotInstalled => "middleware_not_installed",
            AuthError::Unauthorized => "unauthorized",
            AuthError::Forbidden => "forbidden",
            AuthError::InternalError(_) => "internal_error",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::InvalidAuthHeader
            | AuthError::MalformedToken
            | AuthError::MissingKeyId
            | AuthError::KeyNotFound
            | AuthError::UnsupportedAlgorithm(_)
            | AuthError::InvalidSignature
            | AuthError::TokenExpired
            | AuthError::Unauthorized => StatusCode::UNAUTHORIZED,
            AuthError::Forbidden => StatusCode::FORBIDDEN,
            AuthError::JwksFetchError(_)
            | AuthError::NotConfigured
            | AuthError::MiddlewareNotInstalled
            | AuthError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::InvalidAuthHeader => {
                write!(f, "Invalid authorization header format (expected 'Bearer <token>')")
            }
            AuthError::MalformedToken => write!(f, "Token is malformed"),
            AuthError::MissingKeyId => write!(f, "No key ID in token header"),
            AuthError::KeyNotFound => write!(f, "No matching key found in key set"),
            AuthError::UnsupportedAlgorithm(alg) => write!(f, "Unsupported algorithm {alg}"),
            AuthError::InvalidSignature => write!(f, "Token signature is invalid"),
            AuthError::TokenExpired => write!(f, "Token has expired"),
            AuthError::JwksFetchError(msg) => write!(f, "Failed to fetch JWKS: {msg}"),
            AuthError::NotConfigured => write!(
                f,
                "Authorization is enabled, but not configured - a key set or JWKS URL is required"
            ),
            AuthError::MiddlewareNotInstalled => write!(f, "Authorization info not available"),
            AuthError::Unauthorized => write!(f, "Unauthorized"),
            AuthError::Forbidden => write!(f, "Forbidden"),
            AuthError::InternalError(msg) => write!(f, "Internal authorization error: {msg}"),
        }
    }
}

impl std::error::Error for AuthError {}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(AuthErrorBody {
            error: self.to_string(),
            error_code: self.error_code().to_string(),
        });
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn unauthorized_returns_401() {
        let response = AuthError::Unauthorized.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let body_bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap();
        assert_eq!(body["error_code"], "unauthorized");
        assert_eq!(body["error"], "Unauthorized");
    }

    #[tokio::test]
    async fn forbidden_returns_403() {
        let response = AuthError::Forbidden.into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn missing_middleware_returns_500() {
        let response = AuthError::MiddlewareNotInstalled.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body_bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap();
        assert_eq!(body["error_code"], "middleware_not_installed");
    }

    #[test]
    fn verification_failures_map_to_401() {
        for err in [
            AuthError::MalformedToken,
            AuthError::MissingKeyId,
            AuthError::KeyNotFound,
            AuthError::InvalidSignature,
            AuthError::TokenExpired,
        ] {
            assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
        }
    }
}
