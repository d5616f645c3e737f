//! Compiled code objects.

use chrono::{DateTime, Utc};

/// An opaque compiled binary.
///
/// The bytes are never interpreted by the cache. `created_at` is
/// informational only and is not part of the entry's identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeObject {
    /// Compiled binary
    pub bytes: Vec<u8>,
    /// When the entry was written, if known
    pub created_at: Option<DateTime<Utc>>,
}

impl CodeObject {
    /// Wrap freshly compiled bytes, stamped with the current time.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            created_at: Some(Utc::now()),
        }
    }

    /// Wrap bytes read back from a store.
    pub fn with_timestamp(bytes: Vec<u8>, created_at: Option<DateTime<Utc>>) -> Self {
        Self { bytes, created_at }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Take the bytes out.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl From<Vec<u8>> for CodeObject {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl AsRef<[u8]> for CodeObject {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_object_basics() {
        let obj = CodeObject::new(vec![1, 2, 3]);
        assert_eq!(obj.len(), 3);
        assert!(!obj.is_empty());
        assert!(obj.created_at.is_some());
        assert_eq!(obj.into_bytes(), vec![1, 2, 3]);
    }

    #[test]
    fn test_code_object_timestamp_not_identity_of_bytes() {
        let a = CodeObject::with_timestamp(vec![9], None);
        let b = CodeObject::from(vec![9]);
        assert_eq!(a.as_ref(), b.as_ref());
    }
}
