//! HTTP admission middleware.
//!
//! `admission` is installed with `axum::middleware::from_fn_with_state`. It
//! looks up the access rule for the request, validates the bearer token
//! when one is needed or presented, and either forwards the request with
//! the caller's `Identity` in its extensions or answers 401/403.
//!
//! # Invariants
//! - Rejections carry an empty body. The reason is only logged.
//! - A request reaches a handler with an `Identity` extension only if its
//!   token was admitted.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{FromRequestParts, OptionalFromRequestParts, Request, State};
use axum::http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::access::AccessPolicy;
use crate::auth::{Decision, Identity, RejectReason, TokenGate};

/// State shared by the admission middleware.
#[derive(Clone)]
pub struct GateState {
    pub gate: TokenGate,
    pub access: Arc<AccessPolicy>,
}

impl GateState {
    #[must_use]
    pub fn new(gate: TokenGate, access: AccessPolicy) -> Self {
        Self {
            gate,
            access: Arc::new(access),
        }
    }
}

/// Admit or reject a request according to its route's access rule.
pub async fn admission(
    State(state): State<GateState>,
    mut request: Request,
    next: Next,
) -> Response {
    let access = state.access.resolve(request.method(), request.uri().path());
    let token = bearer_token(request.headers()).map(str::to_string);

    let Some(token) = token else {
        if access.is_anonymous() {
            return next.run(request).await;
        }
        tracing::debug!(
            method = %request.method(),
            path = request.uri().path(),
            "no bearer token on a protected route"
        );
        return rejection_response(RejectReason::MissingToken, false);
    };

    if token.is_empty() {
        tracing::debug!(path = request.uri().path(), "empty bearer token");
        return rejection_response(RejectReason::MalformedToken, true);
    }

    match state.gate.validate(&token, access.required_scopes()).await {
        Decision::Admitted(identity) => {
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Decision::Rejected(rejection) => {
            tracing::debug!(
                method = %request.method(),
                path = request.uri().path(),
                reason = %rejection.reason,
                stage = %rejection.stage,
                "request rejected"
            );
            rejection_response(rejection.reason, true)
        }
    }
}

/// The bearer token from the `Authorization` header.
///
/// The scheme is matched case-insensitively. Returns `None` when there is
/// no header, the header is not valid ASCII, or it uses another scheme, and
/// `Some("")` for a bearer header without a value.
#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    let (scheme, token) = value.split_once(' ').unwrap_or((value, ""));
    scheme
        .eq_ignore_ascii_case("bearer")
        .then_some(token.trim())
}

/// Map a rejection to a bare 401 or 403.
///
/// `token_presented` selects the `invalid_token` challenge for 401s.
#[must_use]
pub fn rejection_response(reason: RejectReason, token_presented: bool) -> Response {
    let (status, challenge) = if reason.is_forbidden() {
        (
            StatusCode::FORBIDDEN,
            r#"Bearer error="insufficient_scope""#,
        )
    } else if token_presented {
        (StatusCode::UNAUTHORIZED, r#"Bearer error="invalid_token""#)
    } else {
        (StatusCode::UNAUTHORIZED, "Bearer")
    };
    (
        status,
        [(WWW_AUTHENTICATE, HeaderValue::from_static(challenge))],
    )
        .into_response()
}

impl<S: Send + Sync> FromRequestParts<S> for Identity {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Self>()
            .cloned()
            .ok_or_else(|| rejection_response(RejectReason::MissingToken, false))
    }
}

impl<S: Send + Sync> OptionalFromRequestParts<S> for Identity {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Option<Self>, Self::Rejection> {
        Ok(parts.extensions.get::<Self>().cloned())
    }
}
