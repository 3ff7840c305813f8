//! Thread block key derivation
//!
//! Every member of a thread holds the thread's Ed25519 secret; the symmetric
//! key that encrypts block envelopes is derived from it with BLAKE3 KDF.
//! Derivation is fast enough to run on demand, so the key is never stored.

use blake3::derive_key;

/// Context string for block-envelope encryption keys
const BLOCK_KEY_CONTEXT: &str = "weft thread block key";

/// Derive the AES-256 block-envelope key from a thread secret.
///
/// Deterministic: every holder of the thread secret derives the same key.
pub fn thread_block_key(sk: &[u8]) -> [u8; 32] {
    derive_key(BLOCK_KEY_CONTEXT, sk)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic() {
        let sk = [42u8; 32];
        assert_eq!(thread_block_key(&sk), thread_block_key(&sk));
    }

    #[test]
    fn test_different_threads_different_keys() {
        assert_ne!(thread_block_key(&[1u8; 32]), thread_block_key(&[2u8; 32]));
    }

    #[test]
    fn test_key_differs_from_secret() {
        let sk = [7u8; 32];
        assert_ne!(thread_block_key(&sk), sk);
    }
}
