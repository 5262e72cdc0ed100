use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use super::helpers::{TestGate, refresh_config, token};
use crate::auth::RejectReason;
use crate::keys::{KeySet, RefreshConfig};
use crate::testing::{jwks, standard_claims};

#[tokio::test]
async fn test_rotated_key_is_admitted_after_one_refresh() {
    let gate = TestGate::loaded(&["k1"]).await;
    gate.source.set_document(jwks(&["k1", "k2"]));

    let decision = gate
        .gate
        .validate(&token("k2", &standard_claims()), &BTreeSet::new())
        .await;

    assert!(decision.is_admitted(), "got {decision:?}");
    assert_eq!(gate.source.fetches(), 2);
    assert_eq!(gate.store.snapshot().generation(), 2);
}

#[tokio::test]
async fn test_concurrent_unknown_kids_cause_one_refresh() {
    let gate = TestGate::loaded(&["k1"]).await;
    gate.source.set_document(jwks(&["k1", "k2"]));
    gate.source.set_delay(Duration::from_millis(100));

    let token = token("k2", &standard_claims());
    let required = BTreeSet::new();
    let decisions = join_all((0..32).map(|_| gate.gate.validate(&token, &required))).await;

    assert!(decisions.iter().all(crate::auth::Decision::is_admitted));
    assert_eq!(gate.source.fetches(), 2);
}

#[tokio::test]
async fn test_concurrent_unknown_kids_across_tasks_cause_one_refresh() {
    let gate = TestGate::loaded(&["k1"]).await;
    gate.source.set_document(jwks(&["k1", "k2"]));
    gate.source.set_delay(Duration::from_millis(100));

    let token = Arc::new(token("k2", &standard_claims()));
    let handles: Vec<_> = (0..16)
        .map(|_| {
            let gate = gate.gate.clone();
            let token = Arc::clone(&token);
            tokio::spawn(async move { gate.validate(&token, &BTreeSet::new()).await })
        })
        .collect();

    for handle in handles {
        let decision = handle.await.expect("validation task");
        assert!(decision.is_admitted(), "got {decision:?}");
    }
    assert_eq!(gate.source.fetches(), 2);
}

#[tokio::test]
async fn test_refresh_inside_window_is_throttled() {
    let config = RefreshConfig {
        min_refresh_interval: Duration::from_secs(60),
        ..refresh_config()
    };
    let gate = TestGate::loaded_with(&["k1"], config).await;
    gate.source.set_document(jwks(&["k1", "k2"]));

    let decision = gate
        .gate
        .validate(&token("k2", &standard_claims()), &BTreeSet::new())
        .await;

    assert_eq!(decision.reason(), Some(RejectReason::UnknownKey));
    assert_eq!(gate.source.fetches(), 1);
}

#[tokio::test]
async fn test_one_refresh_per_coalescing_window() {
    let config = RefreshConfig {
        min_refresh_interval: Duration::from_secs(60),
        ..refresh_config()
    };
    let gate = TestGate::unloaded_with(&["k1"], config);

    for kid in ["k7", "k8", "k9"] {
        let decision = gate
            .gate
            .validate(&token(kid, &standard_claims()), &BTreeSet::new())
            .await;
        assert_eq!(decision.reason(), Some(RejectReason::UnknownKey));
    }

    assert_eq!(gate.source.fetches(), 1);
    assert!(gate.store.snapshot().is_loaded());
}

#[tokio::test]
async fn test_failed_refresh_keeps_serving_stale_keys() {
    let gate = TestGate::loaded(&["k1"]).await;
    gate.source.set_failing(true);

    let unknown = gate
        .gate
        .validate(&token("k2", &standard_claims()), &BTreeSet::new())
        .await;
    assert_eq!(unknown.reason(), Some(RejectReason::UnknownKey));

    let known = gate
        .gate
        .validate(&token("k1", &standard_claims()), &BTreeSet::new())
        .await;
    assert!(known.is_admitted());
    assert_eq!(gate.store.snapshot().generation(), 1);
}

#[tokio::test]
async fn test_slow_fetch_times_out_and_keeps_snapshot() {
    let config = RefreshConfig {
        fetch_timeout: Duration::from_millis(50),
        ..refresh_config()
    };
    let gate = TestGate::loaded_with(&["k1"], config).await;
    gate.source.set_document(jwks(&["k1", "k2"]));
    gate.source.set_delay(Duration::from_secs(5));

    let decision = gate
        .gate
        .validate(&token("k2", &standard_claims()), &BTreeSet::new())
        .await;

    assert_eq!(decision.reason(), Some(RejectReason::UnknownKey));
    assert_eq!(gate.store.snapshot().kids(), vec!["k1"]);
}

#[tokio::test]
async fn test_periodic_refresh_picks_up_new_keys() {
    let config = RefreshConfig {
        refresh_interval: Duration::from_millis(50),
        ..refresh_config()
    };
    let gate = TestGate::loaded_with(&["k1"], config).await;
    gate.source.set_document(jwks(&["k1", "k2"]));

    let has_k2 = |snapshot: &KeySet| snapshot.get("k2").is_some();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !has_k2(&gate.store.snapshot()) {
        assert!(
            tokio::time::Instant::now() < deadline,
            "periodic refresh did not install the new key"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_removed_key_is_rejected_after_rotation() {
    let gate = TestGate::loaded(&["k1"]).await;
    gate.source.set_document(jwks(&["k2"]));
    gate.store.refresh_now().await.expect("rotation refresh");

    let decision = gate
        .gate
        .validate(&token("k1", &standard_claims()), &BTreeSet::new())
        .await;

    assert_eq!(decision.reason(), Some(RejectReason::UnknownKey));
}
