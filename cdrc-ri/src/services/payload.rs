//! Fragment payload normalization
//!
//! Some device firmwares publish fragments base64-encoded instead of raw.
//! Encoded payloads are recognised heuristically and decoded; anything that
//! fails a check is passed through untouched. The cheap syntactic checks run
//! before the decode attempt.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;

/// Shortest payload considered for decoding
const MIN_ENCODED_LEN: usize = 8;

/// Accepted decoded/encoded length ratio for unpadded payloads (base64 is ~0.75)
const MIN_DECODE_RATIO: f64 = 0.45;
const MAX_DECODE_RATIO: f64 = 0.85;

/// Standard alphabet, tolerant of non-zero trailing bits
const LENIENT_STANDARD: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_allow_trailing_bits(true),
);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedPayload {
    pub data: Vec<u8>,
    pub decoded: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct PayloadNormalizer {
    accept_base64: bool,
}

impl PayloadNormalizer {
    pub fn new(accept_base64: bool) -> Self {
        Self { accept_base64 }
    }

    pub fn normalize(&self, raw: Vec<u8>) -> NormalizedPayload {
        if self.accept_base64 {
            if let Some(data) = decode_if_base64(&raw) {
                return NormalizedPayload { data, decoded: true };
            }
        }
        NormalizedPayload {
            data: raw,
            decoded: false,
        }
    }
}

fn is_base64_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'+' || b == b'/' || b == b'='
}

/// Decoded bytes if `raw` looks like a base64 text payload
pub fn decode_if_base64(raw: &[u8]) -> Option<Vec<u8>> {
    if raw.len() < MIN_ENCODED_LEN {
        return None;
    }
    if !raw.iter().copied().all(is_base64_byte) {
        return None;
    }
    if raw.len() % 4 != 0 {
        return None;
    }
    // Binary fragments with embedded NULs must never be taken for text
    if raw.contains(&0) {
        return None;
    }

    let decoded = LENIENT_STANDARD.decode(raw).ok()?;

    let padded = raw.last() == Some(&b'=');
    let ratio = decoded.len() as f64 / raw.len() as f64;
    if padded || (MIN_DECODE_RATIO..=MAX_DECODE_RATIO).contains(&ratio) {
        Some(decoded)
    } else {
        None
    }
}
