//! Base64url decoding shared by token parsing and JWK decoding.
//!
//! JWS segments are unpadded base64url, but some issuers pad JWK members,
//! so decoding accepts either form.

use base64::Engine as _;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};

const LENIENT_URL_SAFE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Decode a base64url string, padded or not.
pub fn decode(input: &str) -> Result<Vec<u8>, base64::DecodeError> {
    LENIENT_URL_SAFE.decode(input)
}

/// Encode bytes as unpadded base64url.
#[must_use]
pub fn encode(input: &[u8]) -> String {
    LENIENT_URL_SAFE.encode(input)
}
