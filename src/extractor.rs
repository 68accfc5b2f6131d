// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Axum extractors for the resolved identity.
//!
//! Use `Auth` in handlers that require an authenticated user:
//!
//! ```rust,ignore
//! async fn my_handler(Auth(identity): Auth) -> impl IntoResponse {
//!     // identity.user_id, identity.scopes, ...
//! }
//! ```
//!
//! Use `MaybeAuth` in handlers that also serve anonymous requests; it
//! yields `None` when the policy allows the request through without an
//! identity (anonymous access, disabled authorization, tolerated invalid
//! tokens).

use std::sync::Arc;

use axum::{extract::FromRequestParts, http::request::Parts};

use crate::claims::{AuthState, Identity};
use crate::error::AuthError;
use crate::middleware::CurrentUser;
use crate::policy::{Authorization, Outcome};

/// Extractor that requires an authenticated identity.
///
/// Rejects with 401 when the policy resolves the request as anonymous,
/// because the handler demanded an identity it cannot have. Routes meant
/// to serve anonymous traffic should take [`MaybeAuth`] instead.
pub struct Auth(pub Identity);

impl<S: Send + Sync> FromRequestParts<S> for Auth {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let MaybeAuth(identity) = MaybeAuth::from_request_parts(parts, state).await?;
        identity.map(Auth).ok_or(AuthError::Unauthorized)
    }
}

/// Extractor for the policy outcome, anonymous included.
///
/// Applies the decision table at handler-invocation time. If the
/// enforcement layer already ran for this route, its outcome is reused;
/// otherwise the global policy is applied with no route override.
pub struct MaybeAuth(pub Option<Identity>);

impl<S: Send + Sync> FromRequestParts<S> for MaybeAuth {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        // The enforcement layer resolved this route already.
        if let Some(CurrentUser(identity)) = parts.extensions.get::<CurrentUser>() {
            return Ok(MaybeAuth(identity.clone()));
        }

        let auth = parts
            .extensions
            .get::<Arc<Authorization>>()
            .cloned()
            .ok_or(AuthError::MiddlewareNotInstalled)?;
        let state = parts
            .extensions
            .get::<AuthState>()
            .ok_or(AuthError::MiddlewareNotInstalled)?;

        match auth.decide(state, None) {
            Outcome::Allow(identity) => Ok(MaybeAuth(identity)),
            Outcome::Unauthorized => Err(AuthError::Unauthorized),
            Outcome::Forbidden => Err(AuthError::Forbidden),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::TokenClaims;
    use crate::config::AuthorizationOptions;
    use axum::http::Request;
    use serde_json::json;

    fn parts() -> Parts {
        Request::builder()
            .uri("/test")
            .body(())
            .unwrap()
            .into_parts()
            .0
    }

    fn engine(options: AuthorizationOptions) -> Arc<Authorization> {
        Arc::new(Authorization::new(options))
    }

    fn identity() -> Identity {
        let raw = json!({"sub": "user_123", "scopes": ["read"]});
        Identity::from_claims(TokenClaims::from_raw(raw.as_object().unwrap().clone()))
    }

    #[tokio::test]
    async fn missing_middleware_is_rejected_as_wiring_error() {
        let mut parts = parts();
        let result = Auth::from_request_parts(&mut parts, &()).await;
        assert!(matches!(result, Err(AuthError::MiddlewareNotInstalled)));
    }

    #[tokio::test]
    async fn authenticated_state_yields_identity() {
        let mut parts = parts();
        parts.extensions.insert(engine(AuthorizationOptions::default()));
        parts
            .extensions
            .insert(AuthState::Authenticated(identity()));

        let Auth(user) = Auth::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(user.user_id, "user_123");
    }

    #[tokio::test]
    async fn anonymous_outcome_rejects_auth_but_not_maybe_auth() {
        let mut parts = parts();
        parts.extensions.insert(engine(AuthorizationOptions {
            allow_anonymous: true,
            ..Default::default()
        }));
        parts.extensions.insert(AuthState::Unauthenticated);

        let MaybeAuth(user) = MaybeAuth::from_request_parts(&mut parts, &()).await.unwrap();
        assert!(user.is_none());

        let result = Auth::from_request_parts(&mut parts, &()).await;
        assert!(matches!(result, Err(AuthError::Unauthorized)));
    }

    #[tokio::test]
    async fn scope_mismatch_is_forbidden() {
        let mut parts = parts();
        parts.extensions.insert(engine(AuthorizationOptions {
            required_scope: "admin".to_string(),
            ..Default::default()
        }));
        parts.extensions.insert(AuthState::InvalidScope(identity()));

        let result = MaybeAuth::from_request_parts(&mut parts, &()).await;
        assert!(matches!(result, Err(AuthError::Forbidden)));
    }

    #[tokio::test]
    async fn enforcement_outcome_is_reused() {
        let mut parts = parts();
        // No engine handle needed once the route layer resolved the user.
        parts.extensions.insert(CurrentUser(Some(identity())));

        let Auth(user) = Auth::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(user.user_id, "user_123");
    }
}
