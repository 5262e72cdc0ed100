//! Authentication module.
//!
//! This module turns bearer tokens into admission decisions: JWT parsing
//! and signature checks, claim validation, the validation policy, and the
//! `TokenGate` that ties them to the signing key store.
//!
//! # Pre-conditions
//! - The validation policy names a non-empty issuer and audience.
//!
//! # Post-conditions
//! - Policies are immutable once built.
//!
//! # Invariants
//! - A token is admitted only after its signature verifies against a key in
//!   the current key set snapshot and all mandatory claims pass.

pub mod claims;
pub mod decision;
pub mod gate;
pub mod jwt;
pub mod policy;

pub use claims::{Audience, Claims};
pub use decision::{Decision, Identity, RejectReason, Rejection, Stage};
pub use gate::{DEFAULT_UNKNOWN_KEY_WAIT, TokenGate};
pub use policy::{PolicyError, ValidationPolicy};
