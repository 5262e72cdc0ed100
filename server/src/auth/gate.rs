//! The token admission gate.
//!
//! `TokenGate::validate` runs a bearer token through every check and
//! returns a `Decision`. The only shared state it touches is the key store
//! snapshot.
//!
//! # Pre-conditions
//! - The key store should have loaded at least once; until then every
//!   token is rejected with `KeySetUnavailable`.
//!
//! # Post-conditions
//! - `Decision::Admitted` is only returned for a token whose signature
//!   verified against a key in the current snapshot and whose claims
//!   satisfy the policy.
//!
//! # Invariants
//! - Disallowed algorithms are rejected before key lookup and never cause
//!   a key set refresh.
//! - A request waits at most `unknown_key_wait` for a refresh, and retries
//!   the key lookup at most once.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use super::claims::{check_scopes, validate_claims};
use super::decision::{Decision, Identity, RejectReason, Rejection, Stage};
use super::jwt::{parse_header, verify_signature};
use super::policy::ValidationPolicy;
use crate::keys::{KeyStore, RefreshTrigger, VerificationKey};
use crate::time::{SystemTimeSource, TimeSource};

/// Default time a request waits for a refresh after an unknown `kid`.
pub const DEFAULT_UNKNOWN_KEY_WAIT: Duration = Duration::from_secs(1);

/// Validates bearer tokens against a policy and the issuer's signing keys.
#[derive(Clone)]
pub struct TokenGate {
    keys: Arc<KeyStore>,
    policy: Arc<ValidationPolicy>,
    clock: Arc<dyn TimeSource>,
    unknown_key_wait: Duration,
}

impl TokenGate {
    #[must_use]
    pub fn new(keys: Arc<KeyStore>, policy: ValidationPolicy) -> Self {
        Self {
            keys,
            policy: Arc::new(policy),
            clock: Arc::new(SystemTimeSource),
            unknown_key_wait: DEFAULT_UNKNOWN_KEY_WAIT,
        }
    }

    /// Use `clock` instead of the system clock.
    #[must_use]
    pub fn with_time_source(mut self, clock: Arc<dyn TimeSource>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub const fn with_unknown_key_wait(mut self, wait: Duration) -> Self {
        self.unknown_key_wait = wait;
        self
    }

    #[must_use]
    pub fn policy(&self) -> &ValidationPolicy {
        &self.policy
    }

    #[must_use]
    pub fn keys(&self) -> &Arc<KeyStore> {
        &self.keys
    }

    /// Validate `token` and check that it carries every scope in `required`.
    pub async fn validate(&self, token: &str, required: &BTreeSet<String>) -> Decision {
        let decision = Decision::from(self.admit(token, required).await);
        match &decision {
            Decision::Admitted(identity) => {
                tracing::debug!(subject = %identity.subject, "token admitted");
            }
            Decision::Rejected(rejection) => {
                tracing::debug!(
                    reason = %rejection.reason,
                    stage = %rejection.stage,
                    "token rejected"
                );
            }
        }
        decision
    }

    async fn admit(&self, token: &str, required: &BTreeSet<String>) -> Result<Identity, Rejection> {
        let mut stage = Stage::Start;
        let reject = |stage: Stage| move |reason: RejectReason| Rejection::at(stage, reason);

        let header = parse_header(token).map_err(reject(stage))?;
        stage = Stage::Parsed;

        let algorithm = self
            .policy
            .allowed_algorithm(&header.alg)
            .ok_or(Rejection::at(stage, RejectReason::InvalidSignature))?;
        let kid = header
            .kid
            .as_deref()
            .filter(|kid| !kid.is_empty())
            .ok_or(Rejection::at(stage, RejectReason::UnknownKey))?;

        let key = self.resolve_key(kid).await.map_err(reject(stage))?;
        stage = Stage::KeyResolved;

        let claims = verify_signature(token, &key, algorithm).map_err(reject(stage))?;
        stage = Stage::SignatureVerified;

        let identity =
            validate_claims(&claims, &self.policy, self.clock.now_secs()).map_err(reject(stage))?;
        stage = Stage::ClaimsValidated;

        check_scopes(&identity, required).map_err(reject(stage))?;
        Ok(identity)
    }

    /// Find the key for `kid`, refreshing the key set once if it is unknown.
    async fn resolve_key(&self, kid: &str) -> Result<Arc<VerificationKey>, RejectReason> {
        let observed = self.keys.progress().completed;
        if let Some(key) = self.keys.snapshot().get(kid) {
            return Ok(key);
        }

        match self.keys.trigger_refresh() {
            RefreshTrigger::Scheduled | RefreshTrigger::Coalesced => {
                tracing::debug!(kid, "unknown key id; waiting for key set refresh");
                self.keys
                    .wait_for_refresh_after(observed, self.unknown_key_wait)
                    .await;
            }
            RefreshTrigger::Throttled => {
                tracing::debug!(kid, "unknown key id; refresh throttled");
            }
        }

        let snapshot = self.keys.snapshot();
        match snapshot.get(kid) {
            Some(key) => Ok(key),
            None if !snapshot.is_loaded() => Err(RejectReason::KeySetUnavailable),
            None => Err(RejectReason::UnknownKey),
        }
    }
}
