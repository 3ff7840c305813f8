//! Content checksums for the file pipeline
//!
//! The checksum covers the payload plus a flag byte recording whether the
//! payload will be stored encrypted, so a plaintext copy and an encrypted
//! copy of the same bytes never collide in the dedup index.

use sha2::{Digest, Sha256};

/// Checksum of `data || flag`, base58-encoded.
///
/// `will_encrypt` sets the flag byte to 1, otherwise 0.
pub fn checksum(data: &[u8], will_encrypt: bool) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.update([u8::from(will_encrypt)]);
    bs58::encode(hasher.finalize()).into_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic() {
        assert_eq!(checksum(b"hello", false), checksum(b"hello", false));
    }

    #[test]
    fn test_flag_separates_plaintext_and_encrypted() {
        assert_ne!(checksum(b"hello", false), checksum(b"hello", true));
    }

    #[test]
    fn test_different_data_different_checksum() {
        assert_ne!(checksum(b"hello", false), checksum(b"world", false));
    }

    #[test]
    fn test_known_vector() {
        // sha256("hello" || 0x00), base58
        assert_eq!(
            checksum(b"hello", false),
            bs58::encode(Sha256::digest(b"hello\x00")).into_string()
        );
    }
}
