//! Ed25519 helpers for signing settlement acknowledgments.

use ed25519_dalek::{Signer, Verifier};
use rand::rngs::OsRng;

// Re-export key types for convenience
pub use ed25519_dalek::{Signature, SignatureError, SigningKey as SecretKey, VerifyingKey as PublicKey};

/// Generates a new Ed25519 keypair.
pub fn generate_keypair() -> SecretKey {
    let mut csprng = OsRng;
    SecretKey::generate(&mut csprng)
}

/// Deterministic keypair from a seed byte. Test and simulation use only.
pub fn keypair_from_seed(seed: u8) -> SecretKey {
    SecretKey::from_bytes(&[seed; 32])
}

/// Signs a message using an Ed25519 secret key.
pub fn sign(message: &[u8], secret_key: &SecretKey) -> Signature {
    secret_key.sign(message)
}

/// Verifies an Ed25519 signature against a message and public key.
pub fn verify(message: &[u8], signature: &Signature, public_key: &PublicKey) -> bool {
    public_key.verify(message, signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify() {
        let keypair = generate_keypair();
        let public_key = keypair.verifying_key();
        let message = b"settlement ack";

        let signature = sign(message, &keypair);
        assert!(verify(message, &signature, &public_key));

        // Wrong key
        let other = generate_keypair();
        assert!(!verify(message, &signature, &other.verifying_key()));

        // Wrong message
        assert!(!verify(b"another message", &signature, &public_key));
    }

    #[test]
    fn seeded_keypair_is_deterministic() {
        let a = keypair_from_seed(7);
        let b = keypair_from_seed(7);
        let c = keypair_from_seed(8);
        assert_eq!(a.to_bytes(), b.to_bytes());
        assert_ne!(a.to_bytes(), c.to_bytes());
    }
}
