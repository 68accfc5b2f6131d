// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Remote JWKS behavior: priming, TTL-driven refresh, single-flight
//! coalescing and the stale-snapshot fallback, against a throwaway
//! hit-counting endpoint on an ephemeral port.

mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::{HeaderValue, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use jwks_guard::{AuthState, Authorization, AuthorizationOptions, JwksCache};

/// Serve the fixture JWKS on an ephemeral port, counting hits. Flipping
/// the returned flag makes the endpoint answer 500 instead; a non-zero
/// delay stalls every response by that long.
async fn spawn_jwks_server(delay: Duration) -> (String, Arc<AtomicUsize>, Arc<AtomicBool>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let fail = Arc::new(AtomicBool::new(false));

    let app = Router::new().route(
        "/.well-known/jwks.json",
        get({
            let hits = Arc::clone(&hits);
            let fail = Arc::clone(&fail);
            move || {
                let hits = Arc::clone(&hits);
                let fail = Arc::clone(&fail);
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(delay).await;
                    if fail.load(Ordering::SeqCst) {
                        StatusCode::INTERNAL_SERVER_ERROR.into_response()
                    } else {
                        Json(common::jwks_json()).into_response()
                    }
                }
            }
        }),
    );

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}/.well-known/jwks.json"), hits, fail)
}

#[tokio::test]
async fn validate_primes_the_cache_and_requests_reuse_it() {
    let (url, hits, _) = spawn_jwks_server(Duration::ZERO).await;
    let auth = Authorization::new(AuthorizationOptions {
        jwks_url: Some(url),
        ..Default::default()
    });

    auth.validate().await.unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    // Verification resolves against the primed cache, no further fetch.
    let token = common::sign_rsa(&common::user_claims(&["read"]));
    let header = HeaderValue::from_str(&format!("Bearer {token}")).unwrap();
    let state = auth.resolve_state(Some(&header)).await;
    assert!(matches!(state, AuthState::Authenticated(_)));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn concurrent_cold_resolves_fetch_exactly_once() {
    let (url, hits, _) = spawn_jwks_server(Duration::ZERO).await;
    let cache = JwksCache::new(url);

    let mut handles = Vec::new();
    for _ in 0..16 {
        let cache = cache.clone();
        handles.push(tokio::spawn(async move { cache.resolve().await }));
    }
    for handle in handles {
        let keys = handle.await.unwrap().unwrap();
        assert_eq!(keys.len(), 2);
    }

    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn expired_ttl_triggers_a_refetch() {
    let (url, hits, _) = spawn_jwks_server(Duration::ZERO).await;
    let cache = JwksCache::new(url).with_cache_ttl(Duration::from_millis(50));

    cache.resolve().await.unwrap();
    assert!(cache.is_cached().await);
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(!cache.is_cached().await);

    cache.resolve().await.unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn stale_snapshot_is_served_when_the_endpoint_breaks() {
    let (url, hits, fail) = spawn_jwks_server(Duration::ZERO).await;
    let cache = JwksCache::new(url).with_cache_ttl(Duration::from_millis(50));

    cache.resolve().await.unwrap();
    fail.store(true, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(80)).await;

    // The refetch fails, but verification keeps working off the stale keys.
    let keys = cache.resolve().await.unwrap();
    assert_eq!(keys.len(), 2);
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn cancelled_caller_does_not_abort_the_shared_fetch() {
    let (url, hits, _) = spawn_jwks_server(Duration::from_millis(300)).await;
    let cache = JwksCache::new(url);

    // The first caller starts the fetch, then goes away mid-flight, the
    // way a request aborted by a client timeout would.
    let leader = tokio::spawn({
        let cache = cache.clone();
        async move { cache.resolve().await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    leader.abort();
    assert!(leader.await.unwrap_err().is_cancelled());

    // The next caller adopts the fetch already in flight; the endpoint is
    // hit exactly once.
    let keys = cache.resolve().await.unwrap();
    assert_eq!(keys.len(), 2);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn fetch_failure_with_no_snapshot_is_an_error() {
    let (url, hits, fail) = spawn_jwks_server(Duration::ZERO).await;
    fail.store(true, Ordering::SeqCst);
    let cache = JwksCache::new(url);

    assert!(cache.resolve().await.is_err());
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    // An immediate retry is absorbed by the failure backoff.
    assert!(cache.resolve().await.is_err());
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn startup_validation_surfaces_a_broken_endpoint() {
    let (url, _, fail) = spawn_jwks_server(Duration::ZERO).await;
    fail.store(true, Ordering::SeqCst);

    let auth = Authorization::new(AuthorizationOptions {
        jwks_url: Some(url),
        ..Default::default()
    });
    assert!(auth.validate().await.is_err());
}

#[tokio::test]
async fn remote_source_verifies_tokens_end_to_end() {
    let (url, _, _) = spawn_jwks_server(Duration::ZERO).await;
    let auth = Authorization::new(AuthorizationOptions {
        jwks_url: Some(url),
        required_scope: "read".to_string(),
        ..Default::default()
    });

    let token = common::sign_ec(&common::user_claims(&["read"]));
    let header = HeaderValue::from_str(&format!("Bearer {token}")).unwrap();
    match auth.resolve_state(Some(&header)).await {
        AuthState::Authenticated(identity) => assert_eq!(identity.user_id, "user_123"),
        other => panic!("expected Authenticated, got {other:?}"),
    }
}
