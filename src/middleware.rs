// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authorization middleware for Axum.
//!
//! Two layers cooperate:
//!
//! - [`authorize`] runs early, resolves the auth state once per request and
//!   attaches it (plus the engine handle) to the request extensions. It
//!   never rejects anything itself.
//! - [`enforce`] runs as a `route_layer`, so the final allow / 401 / 403
//!   decision is made at handler-invocation time, when the route's own
//!   [`RoutePolicy`] override is known. Endpoints that declare themselves
//!   anonymous-eligible are therefore not blocked by middleware ordering.
//!
//! Handlers that skip the enforcement layer can use the
//! [`Auth`](crate::extractor::Auth) extractor instead, which applies the
//! global policy with no override.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let auth = Arc::new(Authorization::new(options));
//! auth.validate().await?;
//!
//! let app = Router::new()
//!     .route("/status", get(status))
//!     .route_layer(middleware::from_fn_with_state(
//!         RoutePolicy::new().allow_anonymous(),
//!         jwks_guard::enforce,
//!     ))
//!     .layer(middleware::from_fn_with_state(auth, jwks_guard::authorize));
//! ```

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::debug;

use crate::claims::{AuthState, Identity};
use crate::error::AuthError;
use crate::policy::{Authorization, Outcome, RoutePolicy};

/// The identity the enforcement layer resolved for this route.
///
/// `None` means the request proceeds anonymously (allowed by policy).
/// Inserted into the request extensions by [`enforce`]; read by the
/// extractors and by handlers that want the raw option.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub Option<Identity>);

/// Authorization middleware.
///
/// Resolves the auth state for the request and stores it, together with
/// the engine handle, in the request extensions. Enforcement is deferred;
/// this middleware always invokes the inner service.
pub async fn authorize(
    State(auth): State<Arc<Authorization>>,
    mut request: Request,
    next: Next,
) -> Response {
    let state = auth.resolve_state(request.headers().get(AUTHORIZATION)).await;

    debug!(
        method = %request.method(),
        path = %request.uri().path(),
        user = state.log_label(),
        "request"
    );

    request.extensions_mut().insert(state);
    request.extensions_mut().insert(Arc::clone(&auth));

    next.run(request).await
}

/// Per-route enforcement layer.
///
/// Applies the decision table with this route's [`RoutePolicy`] override
/// and either rejects the request or inserts the resolved [`CurrentUser`]
/// and continues. Install with `route_layer` so it only runs for matched
/// routes.
///
/// A missing engine handle means [`authorize`] is not installed on the
/// router; that is a wiring error and answers 500, not 401.
pub async fn enforce(
    State(policy): State<RoutePolicy>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(auth) = request.extensions().get::<Arc<Authorization>>().cloned() else {
        return AuthError::MiddlewareNotInstalled.into_response();
    };
    let Some(state) = request.extensions().get::<AuthState>().cloned() else {
        return AuthError::MiddlewareNotInstalled.into_response();
    };

    match auth.decide(&state, Some(&policy)) {
        Outcome::Allow(identity) => {
            request.extensions_mut().insert(CurrentUser(identity));
            next.run(request).await
        }
        Outcome::Unauthorized => AuthError::Unauthorized.into_response(),
        Outcome::Forbidden => AuthError::Forbidden.into_response(),
    }
}
