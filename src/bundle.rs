//! Test bundle data model
//!
//! Bundles arrive as JSON from the external store, one per exercise. The
//! field names (`entrada`, `saida_hash`, `normalizacao`) are fixed by that
//! format. Only the digest of each expected output crosses this boundary;
//! the plaintext never does.

use serde::{Deserialize, Serialize};

/// Whitespace-trimming policy applied to captured output before hashing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NormalizationMode {
    Raw,
    Strip,
    Rstrip,
    Lstrip,
}

impl Default for NormalizationMode {
    fn default() -> Self {
        NormalizationMode::Strip
    }
}

/// Digest family used for expected-output hashes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlg {
    Sha256,
}

impl HashAlg {
    /// Length of this algorithm's digest in hex characters
    pub fn hex_len(&self) -> usize {
        match self {
            HashAlg::Sha256 => 64,
        }
    }
}

impl Default for HashAlg {
    fn default() -> Self {
        HashAlg::Sha256
    }
}

/// One hidden test case
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    /// Input script: the lines the submission will receive in place of
    /// interactive input
    pub entrada: String,
    /// Hex digest of the normalized expected output
    pub saida_hash: String,
    /// Per-case override of the bundle's normalization mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalizacao: Option<NormalizationMode>,
}

/// Ordered test cases plus bundle-level defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestBundle {
    pub cases: Vec<TestCase>,
    #[serde(default)]
    pub hash_alg: HashAlg,
    #[serde(default)]
    pub normalizacao: NormalizationMode,
}

/// Bundle format errors
#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    #[error("bundle has no cases")]
    Empty,
    #[error("case {index}: expected a {expected}-char hex digest, got {got:?}")]
    BadDigest {
        index: usize,
        expected: usize,
        got: String,
    },
}

impl TestBundle {
    /// Parse a bundle from JSON, rejecting anything malformed.
    ///
    /// A partially valid bundle is not graded against: any malformed case
    /// fails the entire load.
    pub fn from_json(data: &str) -> anyhow::Result<Self> {
        let bundle: TestBundle = serde_json::from_str(data)?;
        bundle.validate()?;
        Ok(bundle)
    }

    /// Check every case digest against the bundle's hash algorithm
    pub fn validate(&self) -> Result<(), BundleError> {
        if self.cases.is_empty() {
            return Err(BundleError::Empty);
        }
        let expected = self.hash_alg.hex_len();
        for (index, case) in self.cases.iter().enumerate() {
            let hash = &case.saida_hash;
            if hash.len() != expected
                || !hash.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
            {
                return Err(BundleError::BadDigest {
                    index,
                    expected,
                    got: hash.chars().take(16).collect(),
                });
            }
        }
        Ok(())
    }

    /// Normalization mode for a case: its own if stated, the bundle
    /// default otherwise.
    pub fn mode_for(&self, case: &TestCase) -> NormalizationMode {
        case.normalizacao.unwrap_or(self.normalizacao)
    }
}
