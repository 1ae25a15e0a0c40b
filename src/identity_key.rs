use crate::{Error, X25519PublicKey, X25519Secret};
use base64::Engine;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use ed25519_dalek::{SecretKey, Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::TryRngCore;
use rand::rngs::OsRng;
use x25519_dalek::SharedSecret;
use zeroize::Zeroize;

pub fn generate_random_seed() -> Result<[u8; 32], Error> {
    let mut seed = [0u8; 32];
    OsRng.try_fill_bytes(&mut seed).map_err(|_| Error::Random)?;
    Ok(seed)
}

/// The public half of a long-term identity.
///
/// Carries the X25519 key used in the handshake and the Ed25519 key that signs
/// pre-keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IdentityKey {
    pub(crate) dh_key_public: X25519PublicKey,
    pub(crate) signing_key_public: VerifyingKey,
}

impl IdentityKey {
    /// Builds an identity key from its raw parts.
    pub fn from_bytes(dh_key_public: [u8; 32], signing_key_public: [u8; 32]) -> Result<Self, Error> {
        let signing_key_public = VerifyingKey::from_bytes(&signing_key_public)
            .map_err(|err| Error::Crypto(err.to_string()))?;

        Ok(Self {
            dh_key_public: X25519PublicKey::from(dh_key_public),
            signing_key_public,
        })
    }

    /// Returns the X25519 public key for DH operations.
    pub fn dh_key_public(&self) -> X25519PublicKey {
        self.dh_key_public
    }

    /// Returns the public verification key.
    pub fn signing_key_public(&self) -> VerifyingKey {
        self.signing_key_public
    }

    /// A printable fingerprint for out-of-band comparison.
    pub fn fingerprint(&self) -> String {
        STANDARD_NO_PAD.encode(self.signing_key_public.as_bytes())
    }

    /// Verifies an Ed25519 signature made by this identity.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<(), Error> {
        self.signing_key_public
            .verify(message, signature)
            .map_err(|err| Error::Crypto(err.to_string()))
    }
}

/// A long-term identity key pair: an Ed25519 signing key and an X25519 DH key.
#[derive(Clone)]
pub struct IdentityKeyPair {
    signing_key: SigningKey,
    dh_key: X25519Secret,
}

impl IdentityKeyPair {
    /// Generates a new identity from the operating system RNG.
    pub fn new() -> Result<Self, Error> {
        let signing_key = SigningKey::from_bytes(&SecretKey::from(generate_random_seed()?));
        let dh_key = X25519Secret::from(generate_random_seed()?);

        Ok(Self {
            signing_key,
            dh_key,
        })
    }

    /// Returns the public identity.
    pub fn public_key(&self) -> IdentityKey {
        IdentityKey {
            dh_key_public: self.dh_key.public_key(),
            signing_key_public: self.signing_key.verifying_key(),
        }
    }

    /// Signs data with the identity's Ed25519 key.
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }

    pub(crate) fn dh(&self, public_key: &X25519PublicKey) -> SharedSecret {
        self.dh_key.dh(public_key)
    }

    pub(crate) fn to_bytes(&self) -> [u8; 64] {
        let mut bytes = [0u8; 64];
        bytes[0..32].copy_from_slice(self.signing_key.as_bytes());
        bytes[32..64].copy_from_slice(&self.dh_key.to_bytes());

        bytes
    }
}

impl From<[u8; 64]> for IdentityKeyPair {
    fn from(mut bytes: [u8; 64]) -> Self {
        let mut signing_bytes: SecretKey = [0u8; 32];
        signing_bytes.copy_from_slice(&bytes[0..32]);
        let signing_key = SigningKey::from_bytes(&signing_bytes);
        signing_bytes.zeroize();

        let mut dh_bytes = [0u8; 32];
        dh_bytes.copy_from_slice(&bytes[32..64]);
        bytes.zeroize();

        // Wipes its own copy of `dh_bytes`.
        let dh_key = X25519Secret::from(dh_bytes);
        dh_bytes.zeroize();

        Self {
            signing_key,
            dh_key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_key_creation() {
        let identity = IdentityKeyPair::new().unwrap();
        let public = identity.public_key();

        assert!(!public.dh_key_public().as_bytes().iter().all(|&b| b == 0));
        assert!(!public.signing_key_public().as_bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_signing_and_verification() {
        let identity = IdentityKeyPair::new().unwrap();
        let message = b"This is a test message";

        let signature = identity.sign(message);
        assert!(identity.public_key().verify(message, &signature).is_ok());
        assert!(
            identity
                .public_key()
                .verify(b"This is a modified message", &signature)
                .is_err()
        );
    }

    #[test]
    fn test_diffie_hellman() {
        let alice = IdentityKeyPair::new().unwrap();
        let bob = IdentityKeyPair::new().unwrap();

        let alice_shared = alice.dh(&bob.public_key().dh_key_public());
        let bob_shared = bob.dh(&alice.public_key().dh_key_public());

        assert_eq!(alice_shared.as_bytes(), bob_shared.as_bytes());
    }

    #[test]
    fn test_serialization_deserialization() {
        let original = IdentityKeyPair::new().unwrap();
        let restored = IdentityKeyPair::from(original.to_bytes());

        assert_eq!(original.public_key(), restored.public_key());

        let signature = restored.sign(b"restored");
        assert!(original.public_key().verify(b"restored", &signature).is_ok());

        let peer = IdentityKeyPair::new().unwrap().public_key().dh_key_public();
        assert_eq!(original.dh(&peer).as_bytes(), restored.dh(&peer).as_bytes());
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let identity = IdentityKeyPair::new().unwrap().public_key();
        let parts = IdentityKey::from_bytes(
            identity.dh_key_public().to_bytes(),
            identity.signing_key_public().to_bytes(),
        )
        .unwrap();

        assert_eq!(identity.fingerprint(), parts.fingerprint());
        assert_ne!(
            identity.fingerprint(),
            IdentityKeyPair::new().unwrap().public_key().fingerprint()
        );
    }
}
