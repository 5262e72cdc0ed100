//! Signing key management.
//!
//! This module provides the issuer's signing key set: the JWKS wire types,
//! the immutable `KeySet` snapshot, the sources it is fetched from, and the
//! `KeyStore` that swaps snapshots in atomically.
//!
//! # Invariants
//! - Validation only ever sees complete snapshots.
//! - Key set I/O happens on the refresh task, never on a request.

pub mod key_set;
pub mod source;
pub mod store;

pub use key_set::{JwkError, Jwk, JwkSet, KeyFamily, KeySet, VerificationKey};
pub use source::{HttpKeySource, KeySource, KeySourceError, StaticKeySource};
pub use store::{KeyStore, RefreshConfig, RefreshProgress, RefreshTrigger, spawn_refresh_task};
