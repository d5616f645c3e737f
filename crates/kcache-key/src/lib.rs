//! kcache key model
//!
//! Identity and payload types for compiled kernels:
//! - [`CacheKey`]: the composite primary key of every cache tier
//! - [`GeneratorSignature`]: 32-byte content hash of everything that shapes the
//!   generated source
//! - [`CodeObject`]: the opaque compiled binary

pub mod code_object;
pub mod key;
pub mod signature;

pub use code_object::CodeObject;
pub use key::CacheKey;
pub use signature::{GeneratorSignature, SignatureBuilder, SignatureError, SIGNATURE_LEN};
