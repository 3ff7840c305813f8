//! AES-256-CTR symmetric encryption
//!
//! Used for thread block envelopes, file payloads, and internal invite
//! envelopes. A fresh random 16-byte IV is generated per encryption and
//! prepended to the ciphertext.
//!
//! CTR mode provides no authentication on its own; block envelopes carry an
//! Ed25519 signature inside the ciphertext, and file payloads are addressed
//! by their content hash, so tampering is detected one layer up.

use aes::Aes256;
use ctr::cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr128BE;
use rand::RngCore;

type Aes256Ctr = Ctr128BE<Aes256>;

/// AES-256 key size
pub const KEY_SIZE: usize = 32;

/// CTR IV size
pub const IV_SIZE: usize = 16;

/// Symmetric encryption/decryption error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoError {
    /// Key is not 32 bytes
    InvalidKey,
    /// Ciphertext is too short to contain an IV
    CiphertextTooShort,
}

impl std::fmt::Display for CryptoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CryptoError::InvalidKey => write!(f, "AES key must be {} bytes", KEY_SIZE),
            CryptoError::CiphertextTooShort => {
                write!(f, "ciphertext too short (minimum {} bytes)", IV_SIZE)
            }
        }
    }
}

impl std::error::Error for CryptoError {}

/// Generate a random 32-byte AES key from the OS CSPRNG.
pub fn generate_aes_key() -> [u8; KEY_SIZE] {
    let mut key = [0u8; KEY_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut key);
    key
}

/// Encrypt plaintext with AES-256-CTR.
///
/// Output layout: `iv (16 bytes) || ciphertext`.
pub fn encrypt_aes(plaintext: &[u8], key: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let key: &[u8; KEY_SIZE] = key.try_into().map_err(|_| CryptoError::InvalidKey)?;

    let mut iv = [0u8; IV_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut iv);

    let mut out = Vec::with_capacity(IV_SIZE + plaintext.len());
    out.extend_from_slice(&iv);
    out.extend_from_slice(plaintext);

    let mut cipher = Aes256Ctr::new(key.into(), (&iv).into());
    cipher.apply_keystream(&mut out[IV_SIZE..]);
    Ok(out)
}

/// Decrypt an `iv || ciphertext` payload with AES-256-CTR.
pub fn decrypt_aes(data: &[u8], key: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let key: &[u8; KEY_SIZE] = key.try_into().map_err(|_| CryptoError::InvalidKey)?;
    if data.len() < IV_SIZE {
        return Err(CryptoError::CiphertextTooShort);
    }

    let iv: [u8; IV_SIZE] = data[..IV_SIZE].try_into().expect("length checked");
    let mut out = data[IV_SIZE..].to_vec();

    let mut cipher = Aes256Ctr::new(key.into(), (&iv).into());
    cipher.apply_keystream(&mut out);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_round_trip() {
        let key = generate_aes_key();
        let plaintext = b"the quick brown fox";

        let ciphertext = encrypt_aes(plaintext, &key).unwrap();
        assert_eq!(ciphertext.len(), IV_SIZE + plaintext.len());

        let decrypted = decrypt_aes(&ciphertext, &key).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_fresh_iv_per_encryption() {
        let key = generate_aes_key();
        let c1 = encrypt_aes(b"same message", &key).unwrap();
        let c2 = encrypt_aes(b"same message", &key).unwrap();
        assert_ne!(c1, c2);
    }

    #[test]
    fn test_wrong_key_garbles() {
        let key = generate_aes_key();
        let wrong = generate_aes_key();
        let ciphertext = encrypt_aes(b"secret", &key).unwrap();

        // CTR is not authenticated, so decryption "succeeds" with garbage
        let garbled = decrypt_aes(&ciphertext, &wrong).unwrap();
        assert_ne!(garbled, b"secret");
    }

    #[test]
    fn test_empty_plaintext() {
        let key = generate_aes_key();
        let ciphertext = encrypt_aes(b"", &key).unwrap();
        assert_eq!(ciphertext.len(), IV_SIZE);
        assert!(decrypt_aes(&ciphertext, &key).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_key_length() {
        assert_eq!(
            encrypt_aes(b"data", &[0u8; 16]),
            Err(CryptoError::InvalidKey)
        );
        assert_eq!(
            decrypt_aes(&[0u8; 32], &[0u8; 16]),
            Err(CryptoError::InvalidKey)
        );
    }

    #[test]
    fn test_ciphertext_too_short() {
        let key = generate_aes_key();
        assert_eq!(
            decrypt_aes(&[0u8; 8], &key),
            Err(CryptoError::CiphertextTooShort)
        );
    }

    #[test]
    fn test_large_payload() {
        let key = generate_aes_key();
        let plaintext = vec![0xAB; 1024 * 1024];
        let ciphertext = encrypt_aes(&plaintext, &key).unwrap();
        assert_eq!(decrypt_aes(&ciphertext, &key).unwrap(), plaintext);
    }
}
