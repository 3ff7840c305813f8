//! Sealed boxes for invite envelopes
//!
//! An external invite is encrypted to the recipient's Ed25519 identity so
//! that only they can open it, without any prior key exchange:
//!
//! 1. Generate an ephemeral X25519 key pair.
//! 2. ECDH against the recipient's Ed25519 public key (converted to its
//!    Montgomery form).
//! 3. Derive an AES-256 key from the shared secret with BLAKE3.
//! 4. AES-256-CTR encrypt the payload.
//!
//! Output layout: `ephemeral_pub (32) || iv (16) || ciphertext`.

use ed25519_dalek::VerifyingKey;
use rand::RngCore;
use sha2::{Digest, Sha512};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::Zeroize;

use super::encrypt::{decrypt_aes, encrypt_aes, CryptoError, IV_SIZE};

/// Key-derivation context for sealed-box AES keys
const SEAL_CONTEXT: &str = "weft invite seal key";

/// Sealed-box error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SealError {
    /// Recipient public key is not a valid Ed25519 point
    InvalidRecipient,
    /// Envelope is malformed or truncated
    InvalidEnvelope,
    /// Underlying symmetric cipher error
    Crypto(CryptoError),
}

impl std::fmt::Display for SealError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SealError::InvalidRecipient => write!(f, "invalid recipient public key"),
            SealError::InvalidEnvelope => write!(f, "malformed sealed envelope"),
            SealError::Crypto(e) => write!(f, "seal cipher error: {}", e),
        }
    }
}

impl std::error::Error for SealError {}

impl From<CryptoError> for SealError {
    fn from(e: CryptoError) -> Self {
        SealError::Crypto(e)
    }
}

/// Seal a payload to an Ed25519 public key.
pub fn seal(recipient_public: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>, SealError> {
    let verifying =
        VerifyingKey::from_bytes(recipient_public).map_err(|_| SealError::InvalidRecipient)?;
    let recipient_x = X25519Public::from(verifying.to_montgomery().to_bytes());

    let mut eph_bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut eph_bytes);
    let ephemeral = StaticSecret::from(eph_bytes);
    eph_bytes.zeroize();
    let ephemeral_public = X25519Public::from(&ephemeral);

    let shared = ephemeral.diffie_hellman(&recipient_x);
    let mut key = blake3::derive_key(SEAL_CONTEXT, shared.as_bytes());

    let ciphertext = encrypt_aes(plaintext, &key)?;
    key.zeroize();

    let mut out = Vec::with_capacity(32 + ciphertext.len());
    out.extend_from_slice(ephemeral_public.as_bytes());
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Open a sealed envelope with the recipient's Ed25519 secret key.
pub fn open_sealed(recipient_secret: &[u8; 32], envelope: &[u8]) -> Result<Vec<u8>, SealError> {
    if envelope.len() < 32 + IV_SIZE {
        return Err(SealError::InvalidEnvelope);
    }

    let eph_bytes: [u8; 32] = envelope[..32].try_into().expect("length checked");
    let ephemeral_public = X25519Public::from(eph_bytes);

    let secret_x = ed25519_secret_to_x25519(recipient_secret);
    let shared = secret_x.diffie_hellman(&ephemeral_public);
    let mut key = blake3::derive_key(SEAL_CONTEXT, shared.as_bytes());

    let plaintext = decrypt_aes(&envelope[32..], &key)?;
    key.zeroize();
    Ok(plaintext)
}

/// Convert an Ed25519 secret seed into an X25519 static secret.
///
/// Follows the standard RFC 8032 expansion: the first 32 bytes of
/// SHA-512(seed) become the scalar (x25519-dalek clamps on construction).
fn ed25519_secret_to_x25519(secret: &[u8; 32]) -> StaticSecret {
    let hash = Sha512::digest(secret);
    let mut scalar = [0u8; 32];
    scalar.copy_from_slice(&hash[..32]);
    let out = StaticSecret::from(scalar);
    scalar.zeroize();
    out
}
