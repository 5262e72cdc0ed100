//! Admission decisions.
//!
//! Every call to the gate ends in `Decision::Admitted` with the caller's
//! `Identity`, or `Decision::Rejected` with the reason and the last stage
//! the token reached.
//!
//! # Invariants
//! - An `Identity` only exists for a token that passed every stage.
//! - Rejection reasons are for logs; the HTTP boundary maps them to a bare
//!   401 or 403.

use std::collections::BTreeSet;

use serde::Serialize;

/// Validation stages, in order.
///
/// `Start → Parsed → KeyResolved → SignatureVerified → ClaimsValidated → Admitted`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Start,
    Parsed,
    KeyResolved,
    SignatureVerified,
    ClaimsValidated,
    Admitted,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Start => "start",
            Self::Parsed => "parsed",
            Self::KeyResolved => "key_resolved",
            Self::SignatureVerified => "signature_verified",
            Self::ClaimsValidated => "claims_validated",
            Self::Admitted => "admitted",
        };
        f.write_str(name)
    }
}

/// Why a token was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    /// No bearer token was presented on a route that needs one.
    MissingToken,
    /// The token is not a well-formed JWS or lacks a mandatory claim.
    MalformedToken,
    /// The `kid` is absent or not in the key set, even after a refresh.
    UnknownKey,
    /// Bad signature, or an algorithm outside the allow-list.
    InvalidSignature,
    /// `exp` is further in the past than the skew tolerance.
    Expired,
    /// `iat` or `nbf` is further in the future than the skew tolerance.
    NotYetValid,
    IssuerMismatch,
    AudienceMismatch,
    /// The token lacks a scope the route requires.
    InsufficientScope,
    /// No key set has ever been loaded.
    KeySetUnavailable,
}

impl RejectReason {
    /// Whether this is an authorization failure (403) rather than an
    /// authentication failure (401).
    #[must_use]
    pub const fn is_forbidden(self) -> bool {
        matches!(self, Self::InsufficientScope)
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingToken => write!(f, "missing bearer token"),
            Self::MalformedToken => write!(f, "malformed token"),
            Self::UnknownKey => write!(f, "unknown signing key"),
            Self::InvalidSignature => write!(f, "invalid token signature"),
            Self::Expired => write!(f, "token has expired"),
            Self::NotYetValid => write!(f, "token is not yet valid"),
            Self::IssuerMismatch => write!(f, "token issuer does not match"),
            Self::AudienceMismatch => write!(f, "token audience does not match"),
            Self::InsufficientScope => write!(f, "insufficient scope"),
            Self::KeySetUnavailable => write!(f, "signing key set unavailable"),
        }
    }
}

impl std::error::Error for RejectReason {}

/// A rejection: the reason plus the last stage reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejection {
    pub reason: RejectReason,
    pub stage: Stage,
}

impl Rejection {
    #[must_use]
    pub const fn at(stage: Stage, reason: RejectReason) -> Self {
        Self { reason, stage }
    }
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (after stage {})", self.reason, self.stage)
    }
}

impl std::error::Error for Rejection {}

/// The authenticated caller, attached to admitted requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub subject: String,
    pub issuer: String,
    pub scopes: BTreeSet<String>,
    pub roles: BTreeSet<String>,
    /// `exp` claim, seconds since the Unix epoch.
    pub expires_at: u64,
}

impl Identity {
    #[must_use]
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.contains(scope)
    }

    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    /// Granted authorities in the `ROLE_<role>` / `SCOPE_<scope>` form.
    #[must_use]
    pub fn authorities(&self) -> Vec<String> {
        self.roles
            .iter()
            .map(|role| format!("ROLE_{role}"))
            .chain(self.scopes.iter().map(|scope| format!("SCOPE_{scope}")))
            .collect()
    }
}

/// Result of validating one token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Admitted(Identity),
    Rejected(Rejection),
}

impl Decision {
    #[must_use]
    pub const fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted(_))
    }

    /// The rejection reason, if rejected.
    #[must_use]
    pub const fn reason(&self) -> Option<RejectReason> {
        match self {
            Self::Admitted(_) => None,
            Self::Rejected(rejection) => Some(rejection.reason),
        }
    }

    /// The terminal stage of this decision.
    #[must_use]
    pub const fn stage(&self) -> Stage {
        match self {
            Self::Admitted(_) => Stage::Admitted,
            Self::Rejected(rejection) => rejection.stage,
        }
    }

    /// Convert into a `Result` for `?`-style handling.
    ///
    /// # Errors
    /// Returns the `Rejection` if the token was rejected.
    pub fn into_result(self) -> Result<Identity, Rejection> {
        match self {
            Self::Admitted(identity) => Ok(identity),
            Self::Rejected(rejection) => Err(rejection),
        }
    }
}

impl From<Result<Identity, Rejection>> for Decision {
    fn from(result: Result<Identity, Rejection>) -> Self {
        match result {
            Ok(identity) => Self::Admitted(identity),
            Err(rejection) => Self::Rejected(rejection),
        }
    }
}
