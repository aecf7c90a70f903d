//! Key material and address derivation

use crate::{Address, CoreError, CoreResult};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use std::fmt;

/// Signing keypair held by a user
pub struct Keypair {
    signing: SigningKey,
}

impl Keypair {
    /// Generate a new random keypair
    pub fn generate() -> Self {
        let seed: [u8; 32] = rand::random();
        Self::from_seed(&seed)
    }

    /// Create from a 32-byte seed
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing: SigningKey::from_bytes(seed),
        }
    }

    /// Get public key
    pub fn public(&self) -> PublicKey {
        PublicKey(self.signing.verifying_key())
    }

    /// Sign a message, returning the 64 signature bytes
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.signing.sign(message).to_bytes().to_vec()
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("public", &self.public())
            .finish_non_exhaustive()
    }
}

/// Public verification key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicKey(VerifyingKey);

impl PublicKey {
    /// Verify `signature` over `message`
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> CoreResult<()> {
        let signature =
            Signature::from_slice(signature).map_err(|e| CoreError::InvalidKey(e.to_string()))?;
        self.0
            .verify(message, &signature)
            .map_err(|_| CoreError::InvalidSignature)
    }

    /// Serialize public key
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    /// Deserialize public key
    pub fn from_bytes(bytes: &[u8; 32]) -> CoreResult<Self> {
        VerifyingKey::from_bytes(bytes)
            .map(Self)
            .map_err(|e| CoreError::InvalidKey(e.to_string()))
    }
}

/// Derive a participant address from its join time and join sequence number
pub fn address_from_join(joined_at_nanos: i64, sequence: u64) -> Address {
    let mut seed = Vec::with_capacity(16);
    seed.extend_from_slice(&joined_at_nanos.to_be_bytes());
    seed.extend_from_slice(&sequence.to_be_bytes());
    Address::derive(&seed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify() {
        let keypair = Keypair::generate();
        let signature = keypair.sign(b"payload");

        assert!(keypair.public().verify(b"payload", &signature).is_ok());
        assert!(matches!(
            keypair.public().verify(b"other payload", &signature),
            Err(CoreError::InvalidSignature)
        ));
    }

    #[test]
    fn test_verify_rejects_foreign_key() {
        let alice = Keypair::generate();
        let bob = Keypair::generate();
        let signature = alice.sign(b"payload");
        assert!(bob.public().verify(b"payload", &signature).is_err());
    }

    #[test]
    fn test_malformed_signature_bytes() {
        let keypair = Keypair::generate();
        assert!(matches!(
            keypair.public().verify(b"payload", &[1, 2, 3]),
            Err(CoreError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_public_key_bytes() {
        let keypair = Keypair::from_seed(&[7u8; 32]);
        let restored = PublicKey::from_bytes(&keypair.public().to_bytes()).unwrap();
        assert_eq!(restored, keypair.public());
    }

    #[test]
    fn test_join_addresses_differ_by_sequence() {
        let a = address_from_join(1_700_000_000_000_000_000, 0);
        let b = address_from_join(1_700_000_000_000_000_000, 1);
        assert_ne!(a, b);
        assert_eq!(a, address_from_join(1_700_000_000_000_000_000, 0));
    }
}
