// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # jwks-guard
//!
//! Bearer-token authentication and per-route scope authorization for Axum
//! services.
//!
//! ## Auth Flow
//!
//! 1. Client sends `Authorization: Bearer <JWT>`
//! 2. The [`authorize`] middleware:
//!    - Resolves the verification key by the token's `kid`, from a static
//!      key set or an auto-refreshing JWKS endpoint
//!    - Verifies the signature with the algorithm bound to that key
//!    - Extracts `sub`, `email` and the granted scopes
//!    - Attaches the resolved [`AuthState`] to the request
//! 3. At handler-invocation time, the [`enforce`] route layer (or the
//!    [`Auth`]/[`MaybeAuth`] extractors) render the final decision:
//!    allow with identity, allow anonymously, 401 or 403 - from the global
//!    [`AuthorizationOptions`] merged with the route's [`RoutePolicy`].
//!
//! ## Security
//!
//! - JWKS is fetched via HTTPS with a bounded timeout and cached with TTL
//! - Key snapshots are immutable; refreshes publish a new snapshot
//!   atomically and are single-flight per source
//! - The token's own `alg` header is never used to pick the verification
//!   scheme
//! - Verification failures collapse to one opaque 401; detail goes to the
//!   server-side logs only
//! - Clock skew tolerance is 60 seconds

pub mod claims;
pub mod config;
pub mod error;
pub mod extractor;
pub mod keys;
pub mod middleware;
pub mod policy;

mod verify;

pub use claims::{AuthState, Identity, TokenClaims};
pub use config::{AuthorizationOptions, ConfigError};
pub use error::AuthError;
pub use extractor::{Auth, MaybeAuth};
pub use keys::{JwksCache, KeySet, KeySource};
pub use middleware::{authorize, enforce, CurrentUser};
pub use policy::{Authorization, Outcome, RoutePolicy};
