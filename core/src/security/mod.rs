//! Cryptography for Weft
//!
//! - `account`: Ed25519 account identity derived from a wallet seed (SLIP-0010)
//! - `encrypt`: AES-256-CTR symmetric encryption for blocks and files
//! - `seal`: asymmetric sealed boxes for invite envelopes
//! - `checksum`: content checksums used by the file pipeline dedup keys
//! - `thread_key`: deterministic block-encryption key derivation for threads

pub mod account;
pub mod checksum;
pub mod encrypt;
pub mod seal;
pub mod thread_key;

pub use account::{
    keypair_from_secret, peer_id_from_public, public_from_peer_id, verify_with_peer_id, Account,
    AccountError,
};
pub use checksum::checksum;
pub use encrypt::{decrypt_aes, encrypt_aes, generate_aes_key, CryptoError};
pub use seal::{open_sealed, seal, SealError};
pub use thread_key::thread_block_key;
