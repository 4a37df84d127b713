//! Content hashing for change detection.
//!
//! The gateway's hash-guarded reload logic hinges on one property: the hash
//! changes if and only if the serialized byte image changes. Hashing the
//! already-serialized bytes (rather than hashing field-by-field) gives that
//! property for free and keeps this module a single, trivial function.

use blake3::Hasher;

/// A 32-byte BLAKE3 digest of the serialized cluster configuration.
pub type ConfigHash = [u8; 32];

pub fn hash_bytes(bytes: &[u8]) -> ConfigHash {
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    *hasher.finalize().as_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_bytes_hash_identically() {
        assert_eq!(hash_bytes(b"abc"), hash_bytes(b"abc"));
    }

    #[test]
    fn different_bytes_hash_differently() {
        assert_ne!(hash_bytes(b"abc"), hash_bytes(b"abd"));
    }
}
