//! Account identity
//!
//! An account is an Ed25519 key pair derived from a 64-byte wallet seed using
//! SLIP-0010 hardened derivation. Wallet concerns (mnemonic generation and
//! recovery) live outside this crate; the node only ever sees the seed.
//!
//! Two keys are derived from the seed:
//! - the *account key* at `m/44'/406'/0'` - signs blocks, decrypts external
//!   invites, and doubles as the node's peer id on the object-store network
//! - the *address key* at `m/44'/406'/0'/0'` - its public half is the
//!   account address carried in block headers
//!
//! Only hardened derivation is supported, as required by SLIP-0010 for
//! Ed25519.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hmac::{Hmac, Mac};
use sha2::Sha512;
use std::fmt;
use zeroize::Zeroize;

type HmacSha512 = Hmac<Sha512>;

/// The hardened index offset per SLIP-0010.
const HARDENED_OFFSET: u32 = 0x8000_0000;

/// HMAC key for master key generation per SLIP-0010.
const MASTER_HMAC_KEY: &[u8] = b"ed25519 seed";

/// Derivation path of the account key: m/44'/406'/0'
const ACCOUNT_PATH: [u32; 3] = [44, 406, 0];

/// Errors from account derivation or signature checks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountError {
    /// Seed has the wrong length (must be 64 bytes)
    InvalidSeed,
    /// A peer id did not decode to a valid Ed25519 public key
    InvalidPeerId(String),
    /// Signature verification failed
    BadSignature,
}

impl fmt::Display for AccountError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountError::InvalidSeed => write!(f, "account seed must be 64 bytes"),
            AccountError::InvalidPeerId(id) => write!(f, "invalid peer id: {}", id),
            AccountError::BadSignature => write!(f, "signature verification failed"),
        }
    }
}

impl std::error::Error for AccountError {}

/// The node's account identity.
///
/// The secret key is zeroized on drop.
#[derive(Clone, Zeroize, zeroize::ZeroizeOnDrop)]
pub struct Account {
    /// 32-byte Ed25519 secret (keep this secret!)
    secret: [u8; 32],
    /// 32-byte Ed25519 public key
    #[zeroize(skip)]
    public: [u8; 32],
    /// Base58 account address (public half of the address child key)
    #[zeroize(skip)]
    address: String,
}

// Custom Debug to avoid exposing the secret in logs
impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("secret", &"[REDACTED]")
            .field("peer_id", &self.peer_id())
            .field("address", &self.address)
            .finish()
    }
}

impl Account {
    /// Derive the account from a 64-byte wallet seed.
    pub fn from_seed(seed: &[u8]) -> Result<Self, AccountError> {
        if seed.len() != 64 {
            return Err(AccountError::InvalidSeed);
        }

        let (mut key, mut chain) = master_key_from_seed(seed);
        for &index in &ACCOUNT_PATH {
            let (child_key, child_chain) = derive_hardened_child(&key, &chain, index);
            key.zeroize();
            chain.zeroize();
            key = child_key;
            chain = child_chain;
        }

        // Address key is one hardened step below the account key
        let (mut addr_key, mut addr_chain) = derive_hardened_child(&key, &chain, 0);
        let address = peer_id_from_public(
            &SigningKey::from_bytes(&addr_key).verifying_key().to_bytes(),
        );
        addr_key.zeroize();
        addr_chain.zeroize();

        let signing = SigningKey::from_bytes(&key);
        let public = signing.verifying_key().to_bytes();
        let account = Self {
            secret: key,
            public,
            address,
        };
        chain.zeroize();
        Ok(account)
    }

    /// Restore an account directly from a stored secret key and address.
    pub fn from_parts(secret: [u8; 32], address: String) -> Self {
        let public = SigningKey::from_bytes(&secret).verifying_key().to_bytes();
        Self {
            secret,
            public,
            address,
        }
    }

    /// The node's peer id (base58 public key).
    pub fn peer_id(&self) -> String {
        peer_id_from_public(&self.public)
    }

    /// The account address.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Raw public key bytes.
    pub fn public_key(&self) -> [u8; 32] {
        self.public
    }

    /// Raw secret key bytes.
    ///
    /// Needed for opening external invite envelopes.
    pub fn secret_key(&self) -> [u8; 32] {
        self.secret
    }

    /// Sign a message with the account key.
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        let signing = SigningKey::from_bytes(&self.secret);
        signing.sign(message).to_bytes().to_vec()
    }
}

/// Verify a signature against a base58 peer id.
pub fn verify_with_peer_id(
    peer_id: &str,
    message: &[u8],
    signature: &[u8],
) -> Result<(), AccountError> {
    let bytes = bs58::decode(peer_id)
        .into_vec()
        .map_err(|_| AccountError::InvalidPeerId(peer_id.to_string()))?;
    let key: [u8; 32] = bytes
        .try_into()
        .map_err(|_| AccountError::InvalidPeerId(peer_id.to_string()))?;
    let verifying =
        VerifyingKey::from_bytes(&key).map_err(|_| AccountError::InvalidPeerId(peer_id.to_string()))?;
    let sig = Signature::from_slice(signature).map_err(|_| AccountError::BadSignature)?;
    verifying
        .verify(message, &sig)
        .map_err(|_| AccountError::BadSignature)
}

/// Build a signing key pair from raw secret bytes.
///
/// Thread identities use this: the thread secret is an Ed25519 secret and the
/// thread id is the base58 public key derived from it.
pub fn keypair_from_secret(secret: &[u8; 32]) -> (SigningKey, String) {
    let signing = SigningKey::from_bytes(secret);
    let id = peer_id_from_public(&signing.verifying_key().to_bytes());
    (signing, id)
}

/// Base58 peer id from raw public key bytes.
pub fn peer_id_from_public(public: &[u8; 32]) -> String {
    bs58::encode(public).into_string()
}

/// Decode a base58 peer id back into public key bytes.
pub fn public_from_peer_id(peer_id: &str) -> Result<[u8; 32], AccountError> {
    let bytes = bs58::decode(peer_id)
        .into_vec()
        .map_err(|_| AccountError::InvalidPeerId(peer_id.to_string()))?;
    bytes
        .try_into()
        .map_err(|_| AccountError::InvalidPeerId(peer_id.to_string()))
}

/// SLIP-0010 master key: HMAC-SHA512("ed25519 seed", seed).
fn master_key_from_seed(seed: &[u8]) -> ([u8; 32], [u8; 32]) {
    let i = hmac_sha512(MASTER_HMAC_KEY, seed);
    let mut key = [0u8; 32];
    let mut chain = [0u8; 32];
    key.copy_from_slice(&i[..32]);
    chain.copy_from_slice(&i[32..]);
    (key, chain)
}

/// SLIP-0010 hardened child derivation.
fn derive_hardened_child(
    parent_key: &[u8; 32],
    parent_chain: &[u8; 32],
    index: u32,
) -> ([u8; 32], [u8; 32]) {
    let mut data = [0u8; 37];
    data[1..33].copy_from_slice(parent_key);
    data[33..37].copy_from_slice(&(index | HARDENED_OFFSET).to_be_bytes());

    let i = hmac_sha512(parent_chain, &data);
    data.zeroize();

    let mut key = [0u8; 32];
    let mut chain = [0u8; 32];
    key.copy_from_slice(&i[..32]);
    chain.copy_from_slice(&i[32..]);
    (key, chain)
}

fn hmac_sha512(key: &[u8], data: &[u8]) -> [u8; 64] {
    let mut mac = HmacSha512::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(data);
    let result = mac.finalize().into_bytes();
    let mut out = [0u8; 64];
    out.copy_from_slice(&result);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_seed(fill: u8) -> [u8; 64] {
        [fill; 64]
    }

    #[test]
    fn test_from_seed_deterministic() {
        let a = Account::from_seed(&test_seed(7)).unwrap();
        let b = Account::from_seed(&test_seed(7)).unwrap();
        assert_eq!(a.peer_id(), b.peer_id());
        assert_eq!(a.address(), b.address());
    }

    #[test]
    fn test_different_seeds_different_accounts() {
        let a = Account::from_seed(&test_seed(1)).unwrap();
        let b = Account::from_seed(&test_seed(2)).unwrap();
        assert_ne!(a.peer_id(), b.peer_id());
        assert_ne!(a.address(), b.address());
    }

    #[test]
    fn test_rejects_short_seed() {
        assert!(matches!(
            Account::from_seed(&[0u8; 32]),
            Err(AccountError::InvalidSeed)
        ));
    }

    #[test]
    fn test_address_differs_from_peer_id() {
        let a = Account::from_seed(&test_seed(3)).unwrap();
        assert_ne!(a.peer_id(), a.address());
    }

    #[test]
    fn test_sign_and_verify() {
        let a = Account::from_seed(&test_seed(4)).unwrap();
        let sig = a.sign(b"hello weft");
        verify_with_peer_id(&a.peer_id(), b"hello weft", &sig).unwrap();
    }

    #[test]
    fn test_verify_rejects_wrong_message() {
        let a = Account::from_seed(&test_seed(5)).unwrap();
        let sig = a.sign(b"hello");
        assert_eq!(
            verify_with_peer_id(&a.peer_id(), b"tampered", &sig),
            Err(AccountError::BadSignature)
        );
    }

    #[test]
    fn test_verify_rejects_wrong_author() {
        let a = Account::from_seed(&test_seed(6)).unwrap();
        let b = Account::from_seed(&test_seed(7)).unwrap();
        let sig = a.sign(b"hello");
        assert_eq!(
            verify_with_peer_id(&b.peer_id(), b"hello", &sig),
            Err(AccountError::BadSignature)
        );
    }

    #[test]
    fn test_peer_id_round_trip() {
        let a = Account::from_seed(&test_seed(8)).unwrap();
        let public = public_from_peer_id(&a.peer_id()).unwrap();
        assert_eq!(public, a.public_key());
    }

    #[test]
    fn test_from_parts_restores_identity() {
        let a = Account::from_seed(&test_seed(9)).unwrap();
        let restored = Account::from_parts(a.secret_key(), a.address().to_string());
        assert_eq!(restored.peer_id(), a.peer_id());
    }

    #[test]
    fn test_keypair_from_secret_deterministic() {
        let secret = [42u8; 32];
        let (_, id1) = keypair_from_secret(&secret);
        let (_, id2) = keypair_from_secret(&secret);
        assert_eq!(id1, id2);
    }

    #[test]
    fn test_debug_does_not_expose_secret() {
        let a = Account::from_seed(&test_seed(10)).unwrap();
        let debug = format!("{:?}", a);
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains(&hex::encode(a.secret_key())));
    }
}
