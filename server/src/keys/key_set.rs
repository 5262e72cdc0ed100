//! Signing key sets.
//!
//! A `JwkSet` is the wire document served by the issuer. A `KeySet` is the
//! immutable snapshot built from it: `kid` to verification key, with each
//! key's family and pinned algorithm.
//!
//! # Invariants
//! - A `KeySet` is never mutated after construction.
//! - Every entry has a non-empty `kid` and decodable key material.
//! - Generation 0 means "never loaded"; installed snapshots start at 1.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use jsonwebtoken::{Algorithm, DecodingKey};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::base64url;

/// Key family, matching the JWK `kty` member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyFamily {
    /// RSA keys (`RS*`, `PS*`).
    Rsa,
    /// Elliptic-curve keys (`ES*`).
    Ec,
    /// Octet key pairs (`EdDSA`).
    Okp,
    /// Symmetric secrets (`HS*`).
    Oct,
}

impl KeyFamily {
    /// The family a signing algorithm requires.
    #[must_use]
    pub fn of(algorithm: Algorithm) -> Self {
        if matches!(
            algorithm,
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
        ) {
            Self::Oct
        } else if matches!(algorithm, Algorithm::ES256 | Algorithm::ES384) {
            Self::Ec
        } else if algorithm == Algorithm::EdDSA {
            Self::Okp
        } else {
            Self::Rsa
        }
    }

    fn from_kty(kty: &str) -> Option<Self> {
        match kty {
            "RSA" => Some(Self::Rsa),
            "EC" => Some(Self::Ec),
            "OKP" => Some(Self::Okp),
            "oct" => Some(Self::Oct),
            _ => None,
        }
    }
}

/// A single JSON Web Key as served by the issuer.
///
/// Only the members needed for signature verification are modeled.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    #[serde(default, rename = "use", skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
    /// RSA modulus.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    /// RSA exponent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
    /// Symmetric key value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k: Option<String>,
}

/// The JWKS document: `{"keys": [...]}`.
///
/// Entries that are not JWK objects at all (no `kty`, a non-string `kid`)
/// are dropped while decoding; the rest of the document still loads.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JwkSet {
    #[serde(default, deserialize_with = "lenient_keys")]
    pub keys: Vec<Jwk>,
}

fn lenient_keys<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Jwk>, D::Error> {
    let entries = Vec::<Value>::deserialize(deserializer)?;
    Ok(entries
        .into_iter()
        .enumerate()
        .filter_map(|(index, entry)| match serde_json::from_value::<Jwk>(entry) {
            Ok(jwk) => Some(jwk),
            Err(e) => {
                tracing::warn!(index, error = %e, "skipping malformed key set entry");
                None
            }
        })
        .collect())
}

/// Error returned when a JWK cannot be turned into a verification key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JwkError {
    /// The key has no `kid`, so tokens could never select it.
    MissingKeyId,
    /// The `kty` is not one of RSA, EC, OKP or oct.
    UnsupportedKeyType(String),
    /// The `use` member marks the key for something other than signatures.
    NotASigningKey(String),
    /// The `alg` member is not a known JWS algorithm.
    UnsupportedAlgorithm(String),
    /// The `alg` member belongs to a different key family than `kty`.
    AlgorithmFamilyMismatch(String),
    /// A member required by the key type is absent.
    MissingParameter(&'static str),
    /// The key material could not be decoded.
    InvalidKeyMaterial(String),
}

impl std::fmt::Display for JwkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingKeyId => write!(f, "key has no 'kid'"),
            Self::UnsupportedKeyType(kty) => write!(f, "unsupported key type '{kty}'"),
            Self::NotASigningKey(key_use) => write!(f, "key use '{key_use}' is not 'sig'"),
            Self::UnsupportedAlgorithm(alg) => write!(f, "unsupported algorithm '{alg}'"),
            Self::AlgorithmFamilyMismatch(alg) => {
                write!(f, "algorithm '{alg}' does not match the key type")
            }
            Self::MissingParameter(name) => write!(f, "missing key parameter '{name}'"),
            Self::InvalidKeyMaterial(reason) => write!(f, "invalid key material: {reason}"),
        }
    }
}

impl std::error::Error for JwkError {}

/// A key that tokens can be verified against.
#[derive(Clone)]
pub struct VerificationKey {
    kid: String,
    family: KeyFamily,
    algorithm: Option<Algorithm>,
    key: DecodingKey,
}

impl std::fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationKey")
            .field("kid", &self.kid)
            .field("family", &self.family)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl VerificationKey {
    /// Build a verification key from a JWK.
    ///
    /// # Errors
    /// Returns `JwkError` describing why the key is unusable.
    pub fn from_jwk(jwk: &Jwk) -> Result<Self, JwkError> {
        let kid = jwk
            .kid
            .as_deref()
            .filter(|kid| !kid.is_empty())
            .ok_or(JwkError::MissingKeyId)?;

        match jwk.key_use.as_deref() {
            None | Some("sig") => {}
            Some(key_use) => return Err(JwkError::NotASigningKey(key_use.to_string())),
        }

        let family = KeyFamily::from_kty(&jwk.kty)
            .ok_or_else(|| JwkError::UnsupportedKeyType(jwk.kty.clone()))?;

        let algorithm = match jwk.alg.as_deref() {
            Some(name) => {
                let algorithm = Algorithm::from_str(name)
                    .map_err(|_| JwkError::UnsupportedAlgorithm(name.to_string()))?;
                if KeyFamily::of(algorithm) != family {
                    return Err(JwkError::AlgorithmFamilyMismatch(name.to_string()));
                }
                Some(algorithm)
            }
            None => None,
        };

        let key = decoding_key(jwk, family)?;

        Ok(Self {
            kid: kid.to_string(),
            family,
            algorithm,
            key,
        })
    }

    #[must_use]
    pub fn kid(&self) -> &str {
        &self.kid
    }

    #[must_use]
    pub const fn family(&self) -> KeyFamily {
        self.family
    }

    /// The algorithm pinned by the JWK `alg` member, if any.
    #[must_use]
    pub const fn algorithm(&self) -> Option<Algorithm> {
        self.algorithm
    }

    #[must_use]
    pub const fn decoding_key(&self) -> &DecodingKey {
        &self.key
    }

    /// Whether a token signed with `algorithm` may be checked against this key.
    #[must_use]
    pub fn accepts(&self, algorithm: Algorithm) -> bool {
        KeyFamily::of(algorithm) == self.family
            && self.algorithm.is_none_or(|pinned| pinned == algorithm)
    }
}

fn required<'a>(value: Option<&'a String>, name: &'static str) -> Result<&'a str, JwkError> {
    value
        .map(String::as_str)
        .ok_or(JwkError::MissingParameter(name))
}

fn decoding_key(jwk: &Jwk, family: KeyFamily) -> Result<DecodingKey, JwkError> {
    let invalid = |e: jsonwebtoken::errors::Error| JwkError::InvalidKeyMaterial(e.to_string());
    match family {
        KeyFamily::Rsa => {
            let n = required(jwk.n.as_ref(), "n")?;
            let e = required(jwk.e.as_ref(), "e")?;
            DecodingKey::from_rsa_components(n, e).map_err(invalid)
        }
        KeyFamily::Ec => {
            let x = required(jwk.x.as_ref(), "x")?;
            let y = required(jwk.y.as_ref(), "y")?;
            DecodingKey::from_ec_components(x, y).map_err(invalid)
        }
        KeyFamily::Okp => {
            let x = required(jwk.x.as_ref(), "x")?;
            DecodingKey::from_ed_components(x).map_err(invalid)
        }
        KeyFamily::Oct => {
            let k = required(jwk.k.as_ref(), "k")?;
            let secret =
                base64url::decode(k).map_err(|e| JwkError::InvalidKeyMaterial(e.to_string()))?;
            if secret.is_empty() {
                return Err(JwkError::InvalidKeyMaterial(
                    "secret must be non-empty".to_string(),
                ));
            }
            Ok(DecodingKey::from_secret(&secret))
        }
    }
}

/// An immutable snapshot of the issuer's signing keys.
#[derive(Debug, Clone, Default)]
pub struct KeySet {
    keys: HashMap<String, Arc<VerificationKey>>,
    generation: u64,
}

impl KeySet {
    /// The never-loaded key set installed before the first successful fetch.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a snapshot from a JWKS document.
    ///
    /// Unusable entries are skipped with a warning and the remaining keys
    /// still load. When two entries share a `kid`, the first wins.
    #[must_use]
    pub fn from_jwks(document: &JwkSet, generation: u64) -> Self {
        let mut keys = HashMap::with_capacity(document.keys.len());
        for jwk in &document.keys {
            match VerificationKey::from_jwk(jwk) {
                Ok(key) => {
                    if keys.contains_key(key.kid()) {
                        tracing::warn!(kid = key.kid(), "duplicate key id in key set; ignoring");
                        continue;
                    }
                    keys.insert(key.kid().to_string(), Arc::new(key));
                }
                Err(e) => {
                    tracing::warn!(kid = ?jwk.kid, error = %e, "skipping unusable key");
                }
            }
        }
        Self { keys, generation }
    }

    /// Look up a key by id.
    #[must_use]
    pub fn get(&self, kid: &str) -> Option<Arc<VerificationKey>> {
        self.keys.get(kid).map(Arc::clone)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether this snapshot came from a successful fetch.
    #[must_use]
    pub const fn is_loaded(&self) -> bool {
        self.generation > 0
    }

    /// Key ids in this snapshot, sorted.
    #[must_use]
    pub fn kids(&self) -> Vec<&str> {
        let mut kids: Vec<&str> = self.keys.keys().map(String::as_str).collect();
        kids.sort_unstable();
        kids
    }
}
