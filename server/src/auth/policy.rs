//! Token validation policy.
//!
//! # Pre-conditions
//! - `issuer` and `audience` must be non-empty.
//! - The algorithm allow-list must name at least one JWS algorithm.
//!
//! # Post-conditions
//! - `ValidationPolicy` instances are immutable once built.
//!
//! # Invariants
//! - `none` is never in the allow-list.
//! - Every allowed algorithm is a known `jsonwebtoken::Algorithm`.

use std::str::FromStr;

use jsonwebtoken::Algorithm;

/// Default clock skew tolerance, in seconds.
pub const DEFAULT_CLOCK_SKEW_SECS: u64 = 60;
/// Default claim carrying scopes.
pub const DEFAULT_SCOPE_CLAIM: &str = "scp";
/// Default claim carrying roles.
pub const DEFAULT_ROLES_CLAIM: &str = "roles";

/// Error returned when a validation policy is invalid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    /// The expected issuer is empty.
    EmptyIssuer,
    /// The expected audience is empty.
    EmptyAudience,
    /// The algorithm allow-list is empty.
    NoAlgorithms,
    /// `none` was listed as an allowed algorithm.
    NoneAlgorithm,
    /// The name is not a supported JWS algorithm.
    UnsupportedAlgorithm(String),
    /// A claim name is empty.
    EmptyClaimName(&'static str),
}

impl std::fmt::Display for PolicyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyIssuer => write!(f, "expected issuer must not be empty"),
            Self::EmptyAudience => write!(f, "expected audience must not be empty"),
            Self::NoAlgorithms => write!(f, "at least one algorithm must be allowed"),
            Self::NoneAlgorithm => write!(f, "the 'none' algorithm cannot be allowed"),
            Self::UnsupportedAlgorithm(name) => write!(f, "unsupported algorithm '{name}'"),
            Self::EmptyClaimName(which) => write!(f, "{which} claim name must not be empty"),
        }
    }
}

impl std::error::Error for PolicyError {}

/// What a token must satisfy to be admitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationPolicy {
    issuer: String,
    audience: String,
    allowed_algorithms: Vec<Algorithm>,
    clock_skew_secs: u64,
    scope_claim: String,
    roles_claim: String,
}

impl ValidationPolicy {
    /// Create a policy for `issuer` and `audience`.
    ///
    /// Defaults: RS256 only, 60 seconds of skew, scopes in `scp`, roles in
    /// `roles`.
    ///
    /// # Errors
    /// Returns `PolicyError::EmptyIssuer` or `PolicyError::EmptyAudience`.
    pub fn new(issuer: impl Into<String>, audience: impl Into<String>) -> Result<Self, PolicyError> {
        let issuer = issuer.into();
        let audience = audience.into();
        if issuer.is_empty() {
            return Err(PolicyError::EmptyIssuer);
        }
        if audience.is_empty() {
            return Err(PolicyError::EmptyAudience);
        }
        Ok(Self {
            issuer,
            audience,
            allowed_algorithms: vec![Algorithm::RS256],
            clock_skew_secs: DEFAULT_CLOCK_SKEW_SECS,
            scope_claim: DEFAULT_SCOPE_CLAIM.to_string(),
            roles_claim: DEFAULT_ROLES_CLAIM.to_string(),
        })
    }

    /// Replace the algorithm allow-list.
    ///
    /// Names are matched exactly (`RS256`, `ES256`, `EdDSA`, ...).
    /// Duplicates are collapsed.
    ///
    /// # Errors
    /// Returns `PolicyError::NoneAlgorithm` for `none` in any casing,
    /// `PolicyError::UnsupportedAlgorithm` for unknown names and
    /// `PolicyError::NoAlgorithms` for an empty list.
    pub fn with_algorithms<I, S>(mut self, names: I) -> Result<Self, PolicyError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut allowed = Vec::new();
        for name in names {
            let name = name.as_ref().trim();
            if name.eq_ignore_ascii_case("none") {
                return Err(PolicyError::NoneAlgorithm);
            }
            let algorithm = Algorithm::from_str(name)
                .map_err(|_| PolicyError::UnsupportedAlgorithm(name.to_string()))?;
            if !allowed.contains(&algorithm) {
                allowed.push(algorithm);
            }
        }
        if allowed.is_empty() {
            return Err(PolicyError::NoAlgorithms);
        }
        self.allowed_algorithms = allowed;
        Ok(self)
    }

    #[must_use]
    pub const fn with_clock_skew(mut self, secs: u64) -> Self {
        self.clock_skew_secs = secs;
        self
    }

    /// # Errors
    /// Returns `PolicyError::EmptyClaimName` if `claim` is empty.
    pub fn with_scope_claim(mut self, claim: impl Into<String>) -> Result<Self, PolicyError> {
        let claim = claim.into();
        if claim.is_empty() {
            return Err(PolicyError::EmptyClaimName("scope"));
        }
        self.scope_claim = claim;
        Ok(self)
    }

    /// # Errors
    /// Returns `PolicyError::EmptyClaimName` if `claim` is empty.
    pub fn with_roles_claim(mut self, claim: impl Into<String>) -> Result<Self, PolicyError> {
        let claim = claim.into();
        if claim.is_empty() {
            return Err(PolicyError::EmptyClaimName("roles"));
        }
        self.roles_claim = claim;
        Ok(self)
    }

    /// Resolve a header `alg` against the allow-list.
    ///
    /// Returns `None` for `none`, unknown names, and known but disallowed
    /// algorithms alike.
    #[must_use]
    pub fn allowed_algorithm(&self, name: &str) -> Option<Algorithm> {
        let algorithm = Algorithm::from_str(name).ok()?;
        self.allowed_algorithms
            .contains(&algorithm)
            .then_some(algorithm)
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    #[must_use]
    pub fn audience(&self) -> &str {
        &self.audience
    }

    #[must_use]
    pub fn allowed_algorithms(&self) -> &[Algorithm] {
        &self.allowed_algorithms
    }

    #[must_use]
    pub const fn clock_skew_secs(&self) -> u64 {
        self.clock_skew_secs
    }

    #[must_use]
    pub fn scope_claim(&self) -> &str {
        &self.scope_claim
    }

    #[must_use]
    pub fn roles_claim(&self) -> &str {
        &self.roles_claim
    }
}
