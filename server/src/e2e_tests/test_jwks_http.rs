use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};

use super::helpers::{policy, refresh_config, token};
use crate::auth::TokenGate;
use crate::keys::{HttpKeySource, KeySource, KeySourceError, KeyStore, RefreshConfig};
use crate::testing::{NOW, jwks, standard_claims};
use crate::time::{ManualTimeSource, TimeSource};

/// Serve a JWKS endpoint and a few broken ones on an ephemeral port.
async fn issuer(hits: Arc<AtomicU64>) -> SocketAddr {
    let document = jwks(&["k1"]);
    let app = Router::new()
        .route(
            "/jwks",
            get(move || {
                hits.fetch_add(1, Ordering::SeqCst);
                let document = document.clone();
                async move { Json(document) }
            }),
        )
        .route(
            "/unavailable",
            get(|| async { StatusCode::SERVICE_UNAVAILABLE }),
        )
        .route("/garbage", get(|| async { "<html>not a key set</html>" }))
        .route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "{}"
            }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local address");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("test issuer");
    });
    addr
}

fn source(addr: SocketAddr, path: &str) -> HttpKeySource {
    HttpKeySource::new(format!("http://{addr}{path}"), Duration::from_secs(2))
        .expect("http client")
}

#[tokio::test]
async fn test_fetches_jwks_document() {
    let hits = Arc::new(AtomicU64::new(0));
    let addr = issuer(Arc::clone(&hits)).await;

    let document = source(addr, "/jwks").fetch().await.expect("fetch succeeds");

    assert_eq!(document.keys.len(), 1);
    assert_eq!(document.keys[0].kid.as_deref(), Some("k1"));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_error_status_is_reported() {
    let addr = issuer(Arc::new(AtomicU64::new(0))).await;

    let result = source(addr, "/unavailable").fetch().await;

    assert!(matches!(result, Err(KeySourceError::Status(503))));
}

#[tokio::test]
async fn test_non_jwks_body_is_a_decode_error() {
    let addr = issuer(Arc::new(AtomicU64::new(0))).await;

    let result = source(addr, "/garbage").fetch().await;

    assert!(matches!(result, Err(KeySourceError::Decode(_))));
}

#[tokio::test]
async fn test_slow_endpoint_times_out_in_store() {
    let addr = issuer(Arc::new(AtomicU64::new(0))).await;
    let config = RefreshConfig {
        fetch_timeout: Duration::from_millis(100),
        ..refresh_config()
    };
    let store = KeyStore::new(Arc::new(source(addr, "/slow")), config);

    let result = store.refresh_now().await;

    assert!(matches!(result, Err(KeySourceError::Timeout(_))));
    assert!(!store.snapshot().is_loaded());
}

#[tokio::test]
async fn test_gate_admits_token_signed_by_served_key() {
    let hits = Arc::new(AtomicU64::new(0));
    let addr = issuer(Arc::clone(&hits)).await;
    let store = KeyStore::new(Arc::new(source(addr, "/jwks")), refresh_config());
    store.refresh_now().await.expect("initial load");
    let gate = TokenGate::new(store, policy())
        .with_time_source(Arc::new(ManualTimeSource::new(NOW)) as Arc<dyn TimeSource>);

    let decision = gate
        .validate(&token("k1", &standard_claims()), &BTreeSet::new())
        .await;

    assert!(decision.is_admitted(), "got {decision:?}");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}
