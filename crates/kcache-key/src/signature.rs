//! Generator signatures.
//!
//! A signature covers every input that affects generated kernel source:
//! problem parameters, generator code version, compile flags. Any change to
//! those inputs yields a different signature and therefore a different cache
//! key, which is how stale entries are invalidated without explicit versioning.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Length of a generator signature in bytes.
pub const SIGNATURE_LEN: usize = 32;

/// Errors from parsing or validating a signature.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature must be {SIGNATURE_LEN} bytes, got {0}")]
    BadLength(usize),

    #[error("invalid hex in signature: {0}")]
    BadHex(String),
}

/// Fixed-size content hash identifying a generator configuration.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct GeneratorSignature([u8; SIGNATURE_LEN]);

impl GeneratorSignature {
    /// Wrap raw signature bytes.
    pub const fn new(bytes: [u8; SIGNATURE_LEN]) -> Self {
        Self(bytes)
    }

    /// Build a signature from a byte slice, validating its length.
    ///
    /// Used when reading keys back out of a store, where the column is an
    /// untyped blob.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, SignatureError> {
        let arr: [u8; SIGNATURE_LEN] = bytes
            .try_into()
            .map_err(|_| SignatureError::BadLength(bytes.len()))?;
        Ok(Self(arr))
    }

    /// Hash arbitrary bytes into a signature.
    pub fn of(data: impl AsRef<[u8]>) -> Self {
        let digest = Sha256::digest(data.as_ref());
        Self(digest.into())
    }

    /// Raw signature bytes.
    pub fn as_bytes(&self) -> &[u8; SIGNATURE_LEN] {
        &self.0
    }

    /// Lowercase hex rendering.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First 12 hex characters, for log lines.
    pub fn short_hex(&self) -> String {
        let mut s = self.to_hex();
        s.truncate(12);
        s
    }
}

impl fmt::Debug for GeneratorSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GeneratorSignature({})", self.to_hex())
    }
}

impl fmt::Display for GeneratorSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for GeneratorSignature {
    type Err = SignatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|e| SignatureError::BadHex(e.to_string()))?;
        Self::from_slice(&bytes)
    }
}

impl From<GeneratorSignature> for String {
    fn from(sig: GeneratorSignature) -> Self {
        sig.to_hex()
    }
}

impl TryFrom<String> for GeneratorSignature {
    type Error = SignatureError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Incremental signature computation over labelled fields.
///
/// Each field is fed as `len(label) || label || len(value) || value` so that
/// moving bytes across a field boundary always changes the result.
#[derive(Debug, Clone, Default)]
pub struct SignatureBuilder {
    hasher: Sha256,
}

impl SignatureBuilder {
    /// Start an empty signature.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one labelled field.
    pub fn field(mut self, label: &str, value: impl AsRef<[u8]>) -> Self {
        let value = value.as_ref();
        self.hasher.update((label.len() as u64).to_le_bytes());
        self.hasher.update(label.as_bytes());
        self.hasher.update((value.len() as u64).to_le_bytes());
        self.hasher.update(value);
        self
    }

    /// Feed an integer field.
    pub fn field_u64(self, label: &str, value: u64) -> Self {
        self.field(label, value.to_le_bytes())
    }

    /// Finish and produce the signature.
    pub fn finish(self) -> GeneratorSignature {
        GeneratorSignature(self.hasher.finalize().into())
    }
}
