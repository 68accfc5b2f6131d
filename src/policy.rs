// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! The authorization engine: per-request identity resolution and the
//! allow / anonymous / deny decision table.

use std::sync::Arc;

use axum::http::HeaderValue;
use tracing::{error, trace, warn};

use crate::claims::{AuthState, Identity};
use crate::config::AuthorizationOptions;
use crate::error::AuthError;
use crate::keys::{JwksCache, KeySet, KeySource};
use crate::verify;

/// Pluggable permission check. When installed it replaces the default
/// required-scope check; returning `false` marks the identity as lacking
/// permissions (the invalid-scope path).
pub type UserValidator = dyn Fn(&Identity) -> bool + Send + Sync;

/// Outcome of an authorization decision for one request on one route.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// The request may proceed. `None` means it proceeds anonymously.
    Allow(Option<Identity>),
    /// The request is rejected with 401.
    Unauthorized,
    /// The request is rejected with 403: the identity is known but lacks
    /// the required scope.
    Forbidden,
}

/// Per-route overrides of the global authorization policy.
///
/// Unset fields fall through to the global option; set fields win for this
/// route only.
///
/// # Example
///
/// ```rust,ignore
/// let app = Router::new()
///     .route("/status", get(status_handler))
///     .route_layer(middleware::from_fn_with_state(
///         RoutePolicy::new().allow_anonymous(),
///         jwks_guard::enforce,
///     ));
/// ```
#[derive(Debug, Clone, Default)]
pub struct RoutePolicy {
    allowed_scopes: Option<Vec<String>>,
    allow_anonymous: Option<bool>,
    invalid_token_is_anonymous: Option<bool>,
    invalid_scope_is_anonymous: Option<bool>,
}

impl RoutePolicy {
    /// Start with no overrides; everything falls through to the global
    /// options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept any of the given scopes on this route instead of the single
    /// global required scope. An entry of `""` or `"*"` accepts any
    /// verified token.
    pub fn allow_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_scopes = Some(scopes.into_iter().map(Into::into).collect());
        self
    }

    /// Allow anonymous access on this route. Implies treating invalid
    /// tokens and scope mismatches as anonymous as well.
    pub fn allow_anonymous(mut self) -> Self {
        self.allow_anonymous = Some(true);
        self.invalid_token_is_anonymous = Some(true);
        self.invalid_scope_is_anonymous = Some(true);
        self
    }

    /// Treat an invalid token as an anonymous user on this route.
    pub fn invalid_token_is_anonymous(mut self) -> Self {
        self.invalid_token_is_anonymous = Some(true);
        self
    }

    /// Treat a scope mismatch as an anonymous user on this route.
    pub fn invalid_scope_is_anonymous(mut self) -> Self {
        self.invalid_scope_is_anonymous = Some(true);
        self
    }
}

/// The authorization engine.
///
/// Built once at startup from [`AuthorizationOptions`] and shared (as an
/// `Arc`) between the middleware, the enforcement layer and the extractors.
pub struct Authorization {
    key_source: Option<KeySource>,
    required_scope: String,
    allow_anonymous: bool,
    invalid_token_is_anonymous: bool,
    invalid_scope_is_anonymous: bool,
    disabled: bool,
    user_validator: Option<Box<UserValidator>>,
}

impl Authorization {
    /// Create a new authorization engine.
    ///
    /// An empty required scope is normalized to `*`; disabling
    /// authorization drops any configured keys.
    pub fn new(options: AuthorizationOptions) -> Self {
        let required_scope = if options.required_scope.is_empty() {
            "*".to_string()
        } else {
            options.required_scope
        };

        let key_source = if options.disabled {
            None
        } else if let Some(jwks) = options.jwks {
            Some(KeySource::Static(Arc::new(KeySet::new(jwks))))
        } else {
            options
                .jwks_url
                .filter(|url| !url.is_empty())
                .map(|url| KeySource::Remote(JwksCache::new(url)))
        };

        Self {
            key_source,
            required_scope,
            allow_anonymous: options.allow_anonymous,
            invalid_token_is_anonymous: options.invalid_token_is_anonymous,
            invalid_scope_is_anonymous: options.invalid_scope_is_anonymous,
            disabled: options.disabled,
            user_validator: None,
        }
    }

    /// Install a custom permission check, replacing the required-scope
    /// check.
    pub fn with_user_validator(
        mut self,
        validator: impl Fn(&Identity) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.user_validator = Some(Box::new(validator));
        self
    }

    /// Whether authorization is disabled.
    pub fn disabled(&self) -> bool {
        self.disabled
    }

    /// Startup validation.
    ///
    /// Fails if authorization is enabled but no key source is configured;
    /// for a remote source, performs one priming fetch so a broken JWKS
    /// endpoint surfaces at startup instead of on the first request. An
    /// empty key set is tolerated (it may fill on the next refresh) but
    /// logged, since no token can verify against it.
    pub async fn validate(&self) -> Result<(), AuthError> {
        if self.disabled {
            return Ok(());
        }

        match &self.key_source {
            None => Err(AuthError::NotConfigured),
            Some(source) => {
                let keys = source.resolve().await?;
                if keys.is_empty() {
                    warn!("authorization key set is empty, no token can verify");
                }
                Ok(())
            }
        }
    }

    /// Resolve the authorization state for one request.
    ///
    /// This is the identity state machine: no header is anonymous, any
    /// verification failure collapses to an invalid token, and a verified
    /// token without the required permission is an invalid scope. It runs
    /// once per request, in the middleware.
    pub async fn resolve_state(&self, header: Option<&HeaderValue>) -> AuthState {
        if self.disabled {
            return AuthState::Unauthenticated;
        }

        let Some(header) = header else {
            return AuthState::Unauthenticated;
        };

        let Ok(header) = header.to_str() else {
            error!("wrong Authorization header");
            return AuthState::InvalidToken;
        };

        if header.is_empty() {
            return AuthState::Unauthenticated;
        }

        let token = match verify::bearer_token(header) {
            Ok(token) => token,
            Err(_) => {
                error!("wrong Authorization header");
                return AuthState::InvalidToken;
            }
        };

        let Some(keys) = &self.key_source else {
            error!("jwks not available");
            return AuthState::InvalidToken;
        };

        let claims = match verify::verify_token(token, keys).await {
            Ok(claims) => claims,
            Err(err) => {
                error!(error = %err, "error decoding token");
                return AuthState::InvalidToken;
            }
        };

        trace!(sub = %claims.sub, email = ?claims.email, scopes = ?claims.scopes, "auth claims");

        // A token that verifies but carries no usable identity is not
        // trusted.
        if claims.sub.is_empty() {
            return AuthState::InvalidToken;
        }

        let identity = Identity::from_claims(claims);

        let permitted = match &self.user_validator {
            Some(validator) => validator(&identity),
            None => scope_allows(&self.required_scope, &identity),
        };

        if permitted {
            AuthState::Authenticated(identity)
        } else {
            AuthState::InvalidScope(identity)
        }
    }

    /// Render the final decision for a resolved state on a route.
    ///
    /// Route override fields win over the global options when set; the
    /// merge happens here, per request, because different routes carry
    /// different overrides.
    pub fn decide(&self, state: &AuthState, route: Option<&RoutePolicy>) -> Outcome {
        if self.disabled {
            return Outcome::Allow(None);
        }

        let allow_anonymous = route
            .and_then(|r| r.allow_anonymous)
            .unwrap_or(self.allow_anonymous);
        let invalid_token_is_anonymous = route
            .and_then(|r| r.invalid_token_is_anonymous)
            .unwrap_or(self.invalid_token_is_anonymous);
        let invalid_scope_is_anonymous = route
            .and_then(|r| r.invalid_scope_is_anonymous)
            .unwrap_or(self.invalid_scope_is_anonymous);

        match state {
            AuthState::Unauthenticated => {
                if allow_anonymous {
                    Outcome::Allow(None)
                } else {
                    Outcome::Unauthorized
                }
            }
            AuthState::InvalidToken => {
                if invalid_token_is_anonymous {
                    Outcome::Allow(None)
                } else {
                    Outcome::Unauthorized
                }
            }
            AuthState::InvalidScope(identity) => {
                // A route-level allow-list can widen the accepted scopes
                // beyond the global required scope; any match wins.
                if let Some(scopes) = route.and_then(|r| r.allowed_scopes.as_ref()) {
                    if scopes
                        .iter()
                        .any(|s| s.is_empty() || s == "*" || identity.has_scope(s))
                    {
                        return Outcome::Allow(Some(identity.clone()));
                    }
                }
                if invalid_scope_is_anonymous {
                    Outcome::Allow(None)
                } else {
                    Outcome::Forbidden
                }
            }
            AuthState::Authenticated(identity) => Outcome::Allow(Some(identity.clone())),
        }
    }
}

fn scope_allows(required: &str, identity: &Identity) -> bool {
    required.is_empty()
        || required == "*"
        || identity.has_scope(required)
        || identity.has_scope("*")
}
