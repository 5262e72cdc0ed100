//! JWT parsing and signature verification.
//!
//! Parsing is done here rather than through `jsonwebtoken::decode_header`
//! so that `alg` stays a plain string: `none` and unknown algorithms must be
//! rejected as signature failures, not as malformed headers.
//!
//! # Pre-conditions
//! - The verification key must accept the token algorithm (same family and,
//!   if pinned, the same `alg`).
//!
//! # Post-conditions
//! - On success, returns the payload claims of a correctly signed token.
//!
//! # Invariants
//! - Verification is stateless and does not modify any external state.
//! - Temporal, issuer and audience checks are left to `claims`; this module
//!   only answers "is this a well-formed token signed by this key".

use jsonwebtoken::{Algorithm, Validation, decode};
use serde::Deserialize;

use super::claims::Claims;
use super::decision::RejectReason;
use crate::base64url;
use crate::keys::VerificationKey;

/// The JOSE header fields the gate looks at.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenHeader {
    pub alg: String,
    #[serde(default)]
    pub kid: Option<String>,
    #[serde(default)]
    pub typ: Option<String>,
}

/// Split a compact JWS and decode its header.
///
/// The token must have exactly three non-empty base64url segments, a JSON
/// header with a string `alg`, and a JSON object payload.
///
/// # Errors
/// Returns `RejectReason::MalformedToken` on any structural problem.
pub fn parse_header(token: &str) -> Result<TokenHeader, RejectReason> {
    let mut segments = token.split('.');
    let (Some(header), Some(payload), Some(signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(RejectReason::MalformedToken);
    };

    if header.is_empty() || payload.is_empty() {
        return Err(RejectReason::MalformedToken);
    }

    let header_bytes = base64url::decode(header).map_err(|_| RejectReason::MalformedToken)?;
    let header: TokenHeader =
        serde_json::from_slice(&header_bytes).map_err(|_| RejectReason::MalformedToken)?;

    let payload_bytes = base64url::decode(payload).map_err(|_| RejectReason::MalformedToken)?;
    let payload: serde_json::Value =
        serde_json::from_slice(&payload_bytes).map_err(|_| RejectReason::MalformedToken)?;
    if !payload.is_object() {
        return Err(RejectReason::MalformedToken);
    }

    // An empty signature is structurally fine (unsecured JWS); the algorithm
    // check rejects it later as a signature failure.
    base64url::decode(signature).map_err(|_| RejectReason::MalformedToken)?;

    Ok(header)
}

/// Verify the signature of `token` with `key` and decode its claims.
///
/// # Errors
/// Returns `RejectReason::InvalidSignature` if the key does not accept the
/// algorithm or the signature does not match, and
/// `RejectReason::MalformedToken` if the payload cannot be decoded.
pub fn verify_signature(
    token: &str,
    key: &VerificationKey,
    algorithm: Algorithm,
) -> Result<Claims, RejectReason> {
    if !key.accepts(algorithm) {
        return Err(RejectReason::InvalidSignature);
    }

    let mut validation = Validation::new(algorithm);
    validation.required_spec_claims.clear();
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;

    let token_data =
        decode::<Claims>(token, key.decoding_key(), &validation).map_err(map_jwt_error)?;
    Ok(token_data.claims)
}

/// Maps jsonwebtoken errors to a rejection reason.
fn map_jwt_error(error: jsonwebtoken::errors::Error) -> RejectReason {
    use jsonwebtoken::errors::ErrorKind;

    match error.kind() {
        ErrorKind::InvalidToken | ErrorKind::Base64(_) | ErrorKind::Json(_) | ErrorKind::Utf8(_) => {
            RejectReason::MalformedToken
        }
        // InvalidSignature, InvalidAlgorithm and key errors all mean the
        // token is not provably signed by this key.
        _ => RejectReason::InvalidSignature,
    }
}
