//! End-to-end tests at the gate and HTTP level.
//!
//! Each test file covers a specific scenario, using a pinned clock and an
//! in-process key source so results are deterministic.

#![cfg(test)]


mod test_admission;
mod test_http_boundary;
mod test_jwks_http;
mod test_key_rotation;
