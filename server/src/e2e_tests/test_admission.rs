use std::collections::BTreeSet;

use serde_json::json;

use super::helpers::{TestGate, token};
use crate::auth::{Decision, Identity, Stage};
use crate::testing::{ISSUER, NOW, standard_claims};

fn scopes(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|name| (*name).to_string()).collect()
}

async fn admitted(gate: &TestGate, token: &str, required: &BTreeSet<String>) -> Identity {
    match gate.gate.validate(token, required).await {
        Decision::Admitted(identity) => identity,
        Decision::Rejected(rejection) => panic!("expected admission, got {rejection}"),
    }
}

#[tokio::test]
async fn test_valid_token_yields_identity() {
    let gate = TestGate::loaded(&["k1"]).await;

    let identity = admitted(&gate, &token("k1", &standard_claims()), &BTreeSet::new()).await;

    assert_eq!(identity.subject, "user-1");
    assert_eq!(identity.issuer, ISSUER);
    assert_eq!(identity.scopes, scopes(&["course.read"]));
    assert_eq!(identity.roles, scopes(&["AUTHOR"]));
    assert_eq!(identity.expires_at, NOW + 600);
    assert_eq!(
        identity.authorities(),
        vec!["ROLE_AUTHOR".to_string(), "SCOPE_course.read".to_string()]
    );
}

#[tokio::test]
async fn test_admitted_decision_reaches_final_stage() {
    let gate = TestGate::loaded(&["k1"]).await;

    let decision = gate
        .gate
        .validate(&token("k1", &standard_claims()), &scopes(&["course.read"]))
        .await;

    assert!(decision.is_admitted());
    assert_eq!(decision.stage(), Stage::Admitted);
}

#[tokio::test]
async fn test_audience_array_containing_expected() {
    let gate = TestGate::loaded(&["k1"]).await;
    let mut claims = standard_claims();
    claims["aud"] = json!(["billing-api", "course-api"]);

    admitted(&gate, &token("k1", &claims), &BTreeSet::new()).await;
}

#[tokio::test]
async fn test_space_delimited_scope_claim() {
    let gate = TestGate::loaded(&["k1"]).await;
    let mut claims = standard_claims();
    claims["scp"] = json!("course.read course.write");

    let identity = admitted(
        &gate,
        &token("k1", &claims),
        &scopes(&["course.read", "course.write"]),
    )
    .await;

    assert_eq!(identity.scopes, scopes(&["course.read", "course.write"]));
}

#[tokio::test]
async fn test_superset_of_required_scopes_is_admitted() {
    let gate = TestGate::loaded(&["k1"]).await;
    let mut claims = standard_claims();
    claims["scp"] = json!(["read", "write", "admin"]);

    admitted(&gate, &token("k1", &claims), &scopes(&["read", "write"])).await;
}

#[tokio::test]
async fn test_expiry_within_skew_is_admitted() {
    let gate = TestGate::loaded(&["k1"]).await;
    let token = token("k1", &standard_claims());

    // exp is NOW + 600 and the default skew is 60 seconds.
    gate.clock.set(NOW + 660);
    admitted(&gate, &token, &BTreeSet::new()).await;
}

#[tokio::test]
async fn test_issued_slightly_in_the_future_is_admitted() {
    let gate = TestGate::loaded(&["k1"]).await;
    let mut claims = standard_claims();
    claims["iat"] = json!(NOW + 60);
    claims["nbf"] = json!(NOW + 60);

    admitted(&gate, &token("k1", &claims), &BTreeSet::new()).await;
}

#[tokio::test]
async fn test_second_key_in_set_is_used() {
    let gate = TestGate::loaded(&["k1", "k2"]).await;

    admitted(&gate, &token("k2", &standard_claims()), &BTreeSet::new()).await;
    assert_eq!(gate.source.fetches(), 1);
}

#[tokio::test]
async fn test_fractional_timestamps_are_admitted() {
    let gate = TestGate::loaded(&["k1"]).await;
    let mut claims = standard_claims();
    claims["exp"] = json!(1_700_000_600.5);
    claims["iat"] = json!(1_699_999_990.25);

    let identity = admitted(&gate, &token("k1", &claims), &BTreeSet::new()).await;

    assert_eq!(identity.expires_at, NOW + 600);
}
