//! HTTP routes of the course service.
//!
//! Every route sits behind the admission middleware; the access policy in
//! `GateState` decides which of them need a token.

use axum::routing::get;
use axum::{Json, Router, middleware};
use serde_json::{Value, json};

use crate::auth::Identity;
use crate::middleware::{GateState, admission};

/// Build the router with every route and the admission layer.
pub fn router(state: GateState) -> Router {
    Router::new()
        .route("/api/ping", get(ping))
        .route("/api/secure/ping", get(secure_ping))
        .route("/actuator/health", get(health))
        .route("/actuator/info", get(info))
        .layer(middleware::from_fn_with_state(state, admission))
}

async fn ping() -> &'static str {
    "pong"
}

async fn secure_ping(identity: Identity) -> &'static str {
    tracing::debug!(subject = %identity.subject, "secure ping");
    "pong-secure"
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "UP" }))
}

async fn info() -> Json<Value> {
    Json(json!({
        "build": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
        }
    }))
}
