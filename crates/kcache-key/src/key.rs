//! Cache key.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::signature::GeneratorSignature;

/// Composite identity of one compiled kernel variant.
///
/// Two keys are equal iff all four fields are equal. Binaries are not
/// portable across architectures or runtime versions, so both are part of the
/// identity alongside the kernel name and generator signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    /// Kernel variant identifier (e.g., "fft_len64_sbrr")
    pub kernel_name: String,
    /// GPU architecture / ISA (e.g., "gfx90a")
    pub target_arch: String,
    /// Version of the runtime that produced the binary
    pub runtime_version: i64,
    /// Hash of every input that shapes the generated source
    pub generator_signature: GeneratorSignature,
}

impl CacheKey {
    /// Create a new key.
    pub fn new(
        kernel_name: impl Into<String>,
        target_arch: impl Into<String>,
        runtime_version: i64,
        generator_signature: GeneratorSignature,
    ) -> Self {
        Self {
            kernel_name: kernel_name.into(),
            target_arch: target_arch.into(),
            runtime_version,
            generator_signature,
        }
    }

    /// Same kernel and signature, different architecture.
    ///
    /// Precompilation produces one key per target architecture from a single
    /// generator description.
    pub fn for_arch(&self, target_arch: impl Into<String>) -> Self {
        Self {
            target_arch: target_arch.into(),
            ..self.clone()
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}/rv{}/{}",
            self.kernel_name,
            self.target_arch,
            self.runtime_version,
            self.generator_signature.short_hex()
        )
    }
}
