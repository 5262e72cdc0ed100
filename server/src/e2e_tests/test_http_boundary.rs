use axum::http::{Method, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

use super::helpers::{TestGate, bearer, body_text, challenge, request, token};
use crate::access::{Access, AccessPolicy};
use crate::testing::{NOW, standard_claims};

fn course_service() -> AccessPolicy {
    AccessPolicy::course_service(Access::Anonymous)
}

#[tokio::test]
async fn test_public_ping_without_token() {
    let gate = TestGate::loaded(&["k1"]).await;

    let response = gate
        .router(course_service())
        .oneshot(request(Method::GET, "/api/ping", None))
        .await
        .expect("infallible");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "pong");
}

#[tokio::test]
async fn test_public_route_rejects_a_bad_token() {
    let gate = TestGate::loaded(&["k1"]).await;

    let response = gate
        .router(course_service())
        .oneshot(bearer("/api/ping", "not.a.token"))
        .await
        .expect("infallible");

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(challenge(&response), Some(r#"Bearer error="invalid_token""#));
}

#[tokio::test]
async fn test_secure_ping_with_scope() {
    let gate = TestGate::loaded(&["k1"]).await;

    let response = gate
        .router(course_service())
        .oneshot(bearer("/api/secure/ping", &token("k1", &standard_claims())))
        .await
        .expect("infallible");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "pong-secure");
}

#[tokio::test]
async fn test_secure_ping_without_token_is_401() {
    let gate = TestGate::loaded(&["k1"]).await;

    let response = gate
        .router(course_service())
        .oneshot(request(Method::GET, "/api/secure/ping", None))
        .await
        .expect("infallible");

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(challenge(&response), Some("Bearer"));
    assert_eq!(body_text(response).await, "");
}

#[tokio::test]
async fn test_secure_ping_with_other_scheme_is_401() {
    let gate = TestGate::loaded(&["k1"]).await;

    let response = gate
        .router(course_service())
        .oneshot(request(
            Method::GET,
            "/api/secure/ping",
            Some("Basic dXNlcjpwYXNz"),
        ))
        .await
        .expect("infallible");

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(challenge(&response), Some("Bearer"));
}

#[tokio::test]
async fn test_empty_bearer_value_is_401() {
    let gate = TestGate::loaded(&["k1"]).await;

    let response = gate
        .router(course_service())
        .oneshot(request(Method::GET, "/api/secure/ping", Some("Bearer ")))
        .await
        .expect("infallible");

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(challenge(&response), Some(r#"Bearer error="invalid_token""#));
}

#[tokio::test]
async fn test_missing_scope_is_403_without_detail() {
    let gate = TestGate::loaded(&["k1"]).await;
    let mut claims = standard_claims();
    claims["scp"] = json!(["course.write"]);

    let response = gate
        .router(course_service())
        .oneshot(bearer("/api/secure/ping", &token("k1", &claims)))
        .await
        .expect("infallible");

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(
        challenge(&response),
        Some(r#"Bearer error="insufficient_scope""#)
    );
    assert_eq!(body_text(response).await, "");
}

#[tokio::test]
async fn test_every_authentication_failure_looks_the_same() {
    let gate = TestGate::loaded(&["k1"]).await;
    let router = gate.router(course_service());

    let mut expired = standard_claims();
    expired["exp"] = json!(NOW - 3_600);
    let mut wrong_issuer = standard_claims();
    wrong_issuer["iss"] = json!("https://evil.example");

    for token in [
        token("k1", &expired),
        token("k1", &wrong_issuer),
        token("k9", &standard_claims()),
        "garbage".to_string(),
    ] {
        let response = router
            .clone()
            .oneshot(bearer("/api/secure/ping", &token))
            .await
            .expect("infallible");

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(challenge(&response), Some(r#"Bearer error="invalid_token""#));
        assert_eq!(body_text(response).await, "");
    }
}

#[tokio::test]
async fn test_post_to_secure_ping_is_not_scope_checked() {
    let gate = TestGate::loaded(&["k1"]).await;

    let response = gate
        .router(course_service())
        .oneshot(request(Method::POST, "/api/secure/ping", None))
        .await
        .expect("infallible");

    // The route only answers GET; the access rule only covers GET too.
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_actuator_endpoints_stay_open_when_authentication_is_required() {
    let gate = TestGate::loaded(&["k1"]).await;
    let router = gate.router(AccessPolicy::course_service(Access::Authenticated));

    let health = router
        .clone()
        .oneshot(request(Method::GET, "/actuator/health", None))
        .await
        .expect("infallible");
    assert_eq!(health.status(), StatusCode::OK);
    let body: Value = serde_json::from_str(&body_text(health).await).expect("json body");
    assert_eq!(body, json!({"status": "UP"}));

    let info = router
        .clone()
        .oneshot(request(Method::GET, "/actuator/info", None))
        .await
        .expect("infallible");
    assert_eq!(info.status(), StatusCode::OK);
    let body: Value = serde_json::from_str(&body_text(info).await).expect("json body");
    assert_eq!(body["build"]["name"], json!("admission-gate"));

    let ping = router
        .oneshot(request(Method::GET, "/api/ping", None))
        .await
        .expect("infallible");
    assert_eq!(ping.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_authenticated_fallback_admits_any_valid_token() {
    let gate = TestGate::loaded(&["k1"]).await;
    let mut claims = standard_claims();
    claims["scp"] = json!([]);

    let response = gate
        .router(AccessPolicy::course_service(Access::Authenticated))
        .oneshot(bearer("/api/ping", &token("k1", &claims)))
        .await
        .expect("infallible");

    assert_eq!(response.status(), StatusCode::OK);
}
