// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authorization Configuration
//!
//! Options are loaded from the environment at startup and are immutable for
//! the lifetime of the middleware built from them.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `AUTHORIZATION_JWKS_URL` | JWKS endpoint for JWT verification | unset |
//! | `AUTHORIZATION_DISABLED` | Disable authorization entirely | `false` |
//! | `AUTHORIZATION_SCOPE` | Scope required in every token (`*` = any) | `*` |
//! | `AUTHORIZATION_ALLOW_ANONYMOUS` | Allow requests without a token | `false` |
//! | `AUTHORIZATION_INVALID_TOKEN_IS_ANONYMOUS` | Treat invalid tokens as anonymous | `false` |
//! | `AUTHORIZATION_INVALID_SCOPE_IS_ANONYMOUS` | Treat scope mismatches as anonymous | `false` |

use jsonwebtoken::jwk::JwkSet;
use url::Url;

/// Environment variable name for the JWKS endpoint URL.
pub const JWKS_URL_ENV: &str = "AUTHORIZATION_JWKS_URL";

/// Environment variable name for disabling authorization.
pub const DISABLED_ENV: &str = "AUTHORIZATION_DISABLED";

/// Environment variable name for the globally required scope.
pub const SCOPE_ENV: &str = "AUTHORIZATION_SCOPE";

/// Environment variable name for allowing anonymous requests.
pub const ALLOW_ANONYMOUS_ENV: &str = "AUTHORIZATION_ALLOW_ANONYMOUS";

/// Environment variable name for treating invalid tokens as anonymous.
pub const INVALID_TOKEN_IS_ANONYMOUS_ENV: &str = "AUTHORIZATION_INVALID_TOKEN_IS_ANONYMOUS";

/// Environment variable name for treating scope mismatches as anonymous.
pub const INVALID_SCOPE_IS_ANONYMOUS_ENV: &str = "AUTHORIZATION_INVALID_SCOPE_IS_ANONYMOUS";

/// Configuration loading error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A variable that should hold a boolean holds something else.
    #[error("{var} must be a boolean (true/false), got '{value}'")]
    InvalidBool { var: &'static str, value: String },

    /// The JWKS URL does not parse.
    #[error("{var} is not a valid URL: {source}")]
    InvalidUrl {
        var: &'static str,
        #[source]
        source: url::ParseError,
    },
}

/// Configuration for the authorization middleware.
///
/// Constructed once at startup; the derived [`Authorization`](crate::Authorization)
/// engine is immutable for the process lifetime.
#[derive(Debug, Clone)]
pub struct AuthorizationOptions {
    /// Static key set. If set, `jwks_url` is ignored.
    pub jwks: Option<JwkSet>,
    /// As an alternative to `jwks`, a JWKS URL can be provided. The
    /// middleware will fetch the key set and refresh it automatically.
    pub jwks_url: Option<String>,
    /// Scope that needs to be present in every token. `*` means any -
    /// only the key must match.
    pub required_scope: String,
    /// Allow anonymous users - users without a token. Their identity is None.
    pub allow_anonymous: bool,
    /// How to treat an invalid token: anonymous or unauthorized.
    pub invalid_token_is_anonymous: bool,
    /// How to treat a valid token without the required scope: anonymous or
    /// forbidden.
    pub invalid_scope_is_anonymous: bool,
    /// Disable authorization - all requests are allowed and the identity is
    /// always None.
    pub disabled: bool,
}

impl Default for AuthorizationOptions {
    fn default() -> Self {
        Self {
            jwks: None,
            jwks_url: None,
            required_scope: "*".to_string(),
            allow_anonymous: false,
            invalid_token_is_anonymous: false,
            invalid_scope_is_anonymous: false,
            disabled: false,
        }
    }
}

impl AuthorizationOptions {
    /// Load options from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let jwks_url = match std::env::var(JWKS_URL_ENV) {
            Ok(raw) if !raw.is_empty() => {
                Url::parse(&raw).map_err(|source| ConfigError::InvalidUrl {
                    var: JWKS_URL_ENV,
                    source,
                })?;
                Some(raw)
            }
            _ => None,
        };

        let required_scope = std::env::var(SCOPE_ENV)
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "*".to_string());

        Ok(Self {
            jwks: None,
            jwks_url,
            required_scope,
            allow_anonymous: env_bool(ALLOW_ANONYMOUS_ENV)?,
            invalid_token_is_anonymous: env_bool(INVALID_TOKEN_IS_ANONYMOUS_ENV)?,
            invalid_scope_is_anonymous: env_bool(INVALID_SCOPE_IS_ANONYMOUS_ENV)?,
            disabled: env_bool(DISABLED_ENV)?,
        })
    }
}

fn env_bool(var: &'static str) -> Result<bool, ConfigError> {
    match std::env::var(var) {
        Ok(raw) => parse_bool(&raw).ok_or(ConfigError::InvalidBool { var, value: raw }),
        Err(_) => Ok(false),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "" | "false" | "0" | "no" => Some(false),
        "true" | "1" | "yes" => Some(true),
        _ => None,
    }
}
