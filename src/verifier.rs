//! Output normalizer & verifier
//!
//! Canonicalizes captured output and verifies it by digest comparison.
//! Verification never reconstructs the expected plaintext: only digests
//! are compared, so a user holding the bundle cannot recover the hidden
//! expected output short of brute force.

use sha2::{Digest, Sha256};

use crate::bundle::{HashAlg, NormalizationMode};

/// Truncation marker appended to oversized output
pub const TRUNCATION_MARKER: &str = "\n... (truncated)";

/// Unify line endings to `\n` and apply the trim mode.
///
/// Idempotent: normalizing an already-normalized string under the same
/// mode yields the identical string.
pub fn normalize(s: &str, mode: NormalizationMode) -> String {
    let unified = s.replace("\r\n", "\n").replace('\r', "\n");
    match mode {
        NormalizationMode::Raw => unified,
        NormalizationMode::Strip => unified.trim().to_string(),
        NormalizationMode::Rstrip => unified.trim_end().to_string(),
        NormalizationMode::Lstrip => unified.trim_start().to_string(),
    }
}

/// Lowercase hex digest of a string under the given algorithm
pub fn digest_hex(alg: HashAlg, s: &str) -> String {
    match alg {
        HashAlg::Sha256 => {
            let mut hasher = Sha256::new();
            hasher.update(s.as_bytes());
            hex::encode(hasher.finalize())
        }
    }
}

/// Compare normalized output against the expected digest.
///
/// Exact string match, case-sensitive as encoded.
pub fn verify(alg: HashAlg, normalized_output: &str, expected_hash: &str) -> bool {
    digest_hex(alg, normalized_output) == expected_hash
}

/// Truncate text exceeding `limit` characters, appending the marker.
/// Text at or below the limit is returned untouched.
pub fn truncate_output(s: &str, limit: usize) -> String {
    if s.chars().count() <= limit {
        return s.to_string();
    }
    let mut truncated: String = s.chars().take(limit).collect();
    truncated.push_str(TRUNCATION_MARKER);
    truncated
}
