// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! JWT claims, the authenticated identity and the per-request auth state.

use std::collections::HashSet;

use serde::Serialize;
use serde_json::{Map, Value};

/// Claims extracted from a verified token.
///
/// Issuers encode granted scopes either as a space-delimited `scope` string
/// claim (OAuth2 style) or as a `scopes` array claim; both are accepted and
/// normalized into a set.
#[derive(Debug, Clone)]
pub struct TokenClaims {
    /// Subject (user ID). May be empty; an empty subject is not trusted.
    pub sub: String,
    /// E-mail address, if the issuer includes one.
    pub email: Option<String>,
    /// Normalized scope set.
    pub scopes: HashSet<String>,
    /// The full decoded payload.
    pub raw: Map<String, Value>,
}

impl TokenClaims {
    /// Build claims from a decoded token payload.
    pub fn from_raw(raw: Map<String, Value>) -> Self {
        let sub = raw
            .get("sub")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let email = raw
            .get("email")
            .and_then(Value::as_str)
            .map(str::to_string);

        let mut scopes = HashSet::new();
        match (raw.get("scopes"), raw.get("scope")) {
            (Some(Value::Array(list)), _) => {
                scopes.extend(
                    list.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string),
                );
            }
            (_, Some(Value::String(joined))) => {
                scopes.extend(joined.split_whitespace().map(str::to_string));
            }
            _ => {}
        }

        Self {
            sub,
            email,
            scopes,
            raw,
        }
    }
}

/// Authenticated user information extracted from a verified JWT.
///
/// This is the only value handed to application handlers; the sentinel
/// states below never leave the authorization layer.
#[derive(Debug, Clone, Serialize)]
pub struct Identity {
    /// Canonical user ID (`sub` claim)
    pub user_id: String,

    /// E-mail address, if present in the token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Granted scopes
    pub scopes: HashSet<String>,

    /// Full decoded claims (not serialized)
    #[serde(skip)]
    pub raw_claims: Map<String, Value>,
}

impl Identity {
    /// Build an identity from verified claims. The caller has already
    /// checked that the subject is non-empty.
    pub(crate) fn from_claims(claims: TokenClaims) -> Self {
        Self {
            user_id: claims.sub,
            email: claims.email,
            scopes: claims.scopes,
            raw_claims: claims.raw,
        }
    }

    /// Returns whether the given scope was granted to this identity.
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.contains(scope)
    }
}

/// Per-request authorization state.
///
/// Resolved once by the middleware and attached to the request extensions.
/// An explicit enum rather than marker values, so every consumer is forced
/// to handle all four cases.
#[derive(Debug, Clone)]
pub enum AuthState {
    /// No `Authorization` header was presented
    Unauthenticated,
    /// A token was presented but it is malformed or failed verification
    InvalidToken,
    /// The token verified but the identity lacks the required scope.
    /// Carries the rejected identity so a route-level allow-list can
    /// re-evaluate it; it is never exposed unless that re-check passes.
    InvalidScope(Identity),
    /// The token verified and the scope check passed
    Authenticated(Identity),
}

impl AuthState {
    /// Label used in request logs. Sentinel states get fixed markers so a
    /// real user ID can never be confused with them.
    pub(crate) fn log_label(&self) -> &str {
        match self {
            AuthState::Unauthenticated => "",
            AuthState::InvalidToken => "user_with_invalid_token",
            AuthState::InvalidScope(_) => "user_with_invalid_scope",
            AuthState::Authenticated(identity) => &identity.user_id,
        }
    }
}
