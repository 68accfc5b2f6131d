// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Bearer-token parsing and JWT verification.

use jsonwebtoken::{decode, decode_header, Validation};
use serde_json::{Map, Value};

use crate::claims::TokenClaims;
use crate::error::AuthError;
use crate::keys::KeySource;

/// Clock skew tolerance (60 seconds).
const CLOCK_SKEW_LEEWAY: u64 = 60;

/// Extract the token from an `Authorization: Bearer <token>` header value.
///
/// Exactly one `Bearer` marker with exactly one token segment after it is
/// accepted; surrounding whitespace is trimmed. Anything else is rejected.
pub(crate) fn bearer_token(header: &str) -> Result<&str, AuthError> {
    let mut parts = header.split("Bearer");

    let prefix = parts.next().unwrap_or_default();
    let token = parts.next().ok_or(AuthError::InvalidAuthHeader)?;

    if parts.next().is_some() || !prefix.trim().is_empty() {
        return Err(AuthError::InvalidAuthHeader);
    }

    let token = token.trim();
    if token.is_empty() || token.contains(char::is_whitespace) {
        return Err(AuthError::InvalidAuthHeader);
    }

    Ok(token)
}

/// Verify a JWT against the given key source and extract its claims.
///
/// The key is resolved by the `kid` from the token header; the signature is
/// checked with the algorithm bound to that key, never with the algorithm
/// the token itself claims.
pub(crate) async fn verify_token(
    token: &str,
    keys: &KeySource,
) -> Result<TokenClaims, AuthError> {
    let header = decode_header(token).map_err(|_| AuthError::MalformedToken)?;
    let kid = header.kid.ok_or(AuthError::MissingKeyId)?;

    let key_set = keys.resolve().await?;
    let (decoding_key, algorithm) = key_set.decoding_key(&kid)?;

    let mut validation = Validation::new(algorithm);
    validation.leeway = CLOCK_SKEW_LEEWAY;
    validation.validate_aud = false;
    // Expiry is validated when present but not demanded; issuers decide
    // which registered claims they include.
    validation.required_spec_claims.clear();

    let token_data = decode::<Map<String, Value>>(token, &decoding_key, &validation).map_err(
        |e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            jsonwebtoken::errors::ErrorKind::InvalidSignature => AuthError::InvalidSignature,
            _ => AuthError::MalformedToken,
        },
    )?;

    Ok(TokenClaims::from_raw(token_data.claims))
}
