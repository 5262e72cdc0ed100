//! Token claims and their validation.
//!
//! # Invariants
//! - Claims are checked in a fixed order: time window, issuer, audience,
//!   subject. The first failure wins.
//! - Timestamp comparisons saturate; no claim value can overflow them.
//! - `exp`, `iat` and `nbf` accept any non-negative JSON number; fractional
//!   seconds are floored.

use std::collections::BTreeSet;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Number, Value};

use super::decision::{Identity, RejectReason};
use super::policy::ValidationPolicy;

/// The `aud` claim: one audience or several.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    #[must_use]
    pub fn contains(&self, audience: &str) -> bool {
        match self {
            Self::One(value) => value == audience,
            Self::Many(values) => values.iter().any(|value| value == audience),
        }
    }
}

/// Claims carried by a token payload.
///
/// Registered claims are typed; everything else, including the scope and
/// role claims whose names are configurable, lands in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<Audience>,
    #[serde(
        default,
        deserialize_with = "numeric_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub exp: Option<u64>,
    #[serde(
        default,
        deserialize_with = "numeric_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub iat: Option<u64>,
    #[serde(
        default,
        deserialize_with = "numeric_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub nbf: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Claims {
    /// Scopes from `claim`: a JSON array of strings, or a space-delimited
    /// string. Anything else yields no scopes.
    #[must_use]
    pub fn scopes(&self, claim: &str) -> BTreeSet<String> {
        match self.extra.get(claim) {
            Some(Value::String(value)) => value.split_whitespace().map(str::to_string).collect(),
            Some(Value::Array(values)) => string_items(values),
            _ => BTreeSet::new(),
        }
    }

    /// Roles from `claim`. Only a JSON array of strings is recognized.
    #[must_use]
    pub fn roles(&self, claim: &str) -> BTreeSet<String> {
        match self.extra.get(claim) {
            Some(Value::Array(values)) => string_items(values),
            _ => BTreeSet::new(),
        }
    }
}

/// A `NumericDate`: seconds since the epoch, possibly fractional.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn numeric_date<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    let Some(number) = Option::<Number>::deserialize(deserializer)? else {
        return Ok(None);
    };
    if let Some(seconds) = number.as_u64() {
        return Ok(Some(seconds));
    }
    match number.as_f64() {
        // Float to integer `as` saturates at u64::MAX.
        Some(seconds) if seconds.is_finite() && seconds >= 0.0 => Ok(Some(seconds.floor() as u64)),
        _ => Err(D::Error::custom(format!(
            "timestamp must be a non-negative number, got {number}"
        ))),
    }
}

fn string_items(values: &[Value]) -> BTreeSet<String> {
    values
        .iter()
        .filter_map(Value::as_str)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .collect()
}

/// Check the claims of a verified token against `policy` at time `now`.
///
/// # Errors
/// Returns the first failing check as a `RejectReason`.
pub fn validate_claims(
    claims: &Claims,
    policy: &ValidationPolicy,
    now: u64,
) -> Result<Identity, RejectReason> {
    let skew = policy.clock_skew_secs();

    let expires_at = claims.exp.ok_or(RejectReason::MalformedToken)?;
    if now > expires_at.saturating_add(skew) {
        return Err(RejectReason::Expired);
    }
    let earliest = now.saturating_add(skew);
    if claims.iat.is_some_and(|issued_at| earliest < issued_at)
        || claims.nbf.is_some_and(|not_before| earliest < not_before)
    {
        return Err(RejectReason::NotYetValid);
    }

    if claims.iss.as_deref() != Some(policy.issuer()) {
        return Err(RejectReason::IssuerMismatch);
    }

    if !claims
        .aud
        .as_ref()
        .is_some_and(|aud| aud.contains(policy.audience()))
    {
        return Err(RejectReason::AudienceMismatch);
    }

    let subject = claims
        .sub
        .as_deref()
        .filter(|sub| !sub.is_empty())
        .ok_or(RejectReason::MalformedToken)?;

    Ok(Identity {
        subject: subject.to_string(),
        issuer: policy.issuer().to_string(),
        scopes: claims.scopes(policy.scope_claim()),
        roles: claims.roles(policy.roles_claim()),
        expires_at,
    })
}

/// Check that `identity` holds every scope in `required`.
///
/// # Errors
/// Returns `RejectReason::InsufficientScope` if any scope is missing.
pub fn check_scopes(identity: &Identity, required: &BTreeSet<String>) -> Result<(), RejectReason> {
    if required.is_subset(&identity.scopes) {
        Ok(())
    } else {
        Err(RejectReason::InsufficientScope)
    }
}
