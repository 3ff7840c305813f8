//! Test utilities
//!
//! Deterministic accounts and an in-memory cafe transport for exercising the
//! queues and the invite/join flows without a network.

pub mod cafe;

pub use cafe::MemoryCafe;

use crate::security::Account;

/// A deterministic 64-byte wallet seed
pub fn test_seed(fill: u8) -> [u8; 64] {
    [fill; 64]
}

/// A deterministic account
pub fn test_account(fill: u8) -> Account {
    Account::from_seed(&test_seed(fill)).expect("seed length is fixed")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accounts_deterministic() {
        assert_eq!(test_account(1).peer_id(), test_account(1).peer_id());
        assert_ne!(test_account(1).peer_id(), test_account(2).peer_id());
    }
}
