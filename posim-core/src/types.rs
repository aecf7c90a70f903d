//! Basic ledger types

use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::fmt;

/// Block index (height within one local chain)
pub type BlockIndex = u64;

/// Timestamp in milliseconds since Unix epoch
pub type Timestamp = u64;

/// Monotonically assigned transaction identifier
pub type TransactionId = u64;

/// Token amount (balances, stakes, transfer amounts and rewards)
pub type Amount = f64;

/// Current wall-clock time in milliseconds
pub fn now_millis() -> Timestamp {
    chrono::Utc::now().timestamp_millis().max(0) as Timestamp
}

/// Keccak-256 digest of a block or payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, bincode::Encode)]
pub struct Hash([u8; 32]);

impl Hash {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Hash arbitrary bytes
    pub fn keccak(data: &[u8]) -> Self {
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&Keccak256::digest(data));
        Self(bytes)
    }

    /// Predecessor hash of every genesis block
    pub fn zero() -> Self {
        Self([0u8; 32])
    }

    /// First six hex characters, for log lines
    pub fn short(&self) -> String {
        hex::encode(&self.0[..3])
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// 20-byte participant address
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, bincode::Encode,
)]
pub struct Address([u8; 20]);

impl Address {
    pub fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Last 20 bytes of the Keccak-256 digest of `seed`
    pub fn derive(seed: &[u8]) -> Self {
        let digest = Keccak256::digest(seed);
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&digest[12..]);
        Self(bytes)
    }

    /// Proposer of genesis blocks
    pub fn zero() -> Self {
        Self([0u8; 20])
    }

    pub fn short(&self) -> String {
        hex::encode(&self.0[..3])
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_display() {
        assert_eq!(Hash::zero().to_string(), format!("0x{}", "00".repeat(32)));
        assert_eq!(Hash::new([1u8; 32]).short(), "010101");
    }

    #[test]
    fn test_keccak_of_empty_input() {
        assert_eq!(
            Hash::keccak(b"").to_string(),
            "0xc5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn test_derived_address_is_digest_tail() {
        let addr = Address::derive(b"");
        assert_eq!(addr.to_string(), "0xdcc703c0e500b653ca82273b7bfad8045d85a470");
        assert_eq!(addr.short(), "dcc703");
        assert_ne!(Address::derive(b"a"), addr);
    }

    #[test]
    fn test_now_millis_is_monotone_enough() {
        let a = now_millis();
        let b = now_millis();
        assert!(b >= a);
        assert!(a > 1_600_000_000_000);
    }
}
