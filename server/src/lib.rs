#![cfg_attr(
    test,
    allow(clippy::disallowed_methods, clippy::expect_used, clippy::unwrap_used)
)]
// Life of a request:
// 1. The access policy picks the rule for the method and path
// 2. The bearer token, if any, is extracted from `Authorization`
// 3. The gate validates it:
//     - Parse the header and check the algorithm allow-list
//     - Resolve the `kid` in the current key set snapshot
//       (an unknown `kid` triggers one coalesced refresh)
//     - Verify the signature
//     - Check time window, issuer, audience, subject and scopes
// 4. Admitted requests reach the handler with an `Identity`;
//    rejected ones get a bare 401 or 403
//
// System components:
//  - Key store with a background refresh task
//  - Token gate
//  - Admission middleware and routes

pub mod access;
pub mod auth;
pub mod base64url;
pub mod config;
pub mod keys;
pub mod middleware;
pub mod server;
pub mod time;

#[cfg(test)]
mod e2e_tests;
