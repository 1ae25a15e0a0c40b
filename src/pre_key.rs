use crate::{Error, IdentityKey, IdentityKeyPair, KeyPair, X25519PublicKey};
use ed25519_dalek::Signature;

/// A pre-generated key published so peers can open a session while we are offline.
///
/// Pre-keys are normally used once. The last-resort key (id [`PreKey::MAX_PREKEY_ID`])
/// is kept around and reused when every other pre-key has been consumed.
#[derive(Clone)]
pub struct PreKey {
    id: u16,
    key_pair: KeyPair,
}

impl PreKey {
    /// Id reserved for the last-resort pre-key.
    pub const MAX_PREKEY_ID: u16 = 0xFFFF;

    /// Creates a new pre-key with the given id.
    pub fn new(id: u16) -> Result<Self, Error> {
        Ok(Self {
            id,
            key_pair: KeyPair::new()?,
        })
    }

    /// Creates the last-resort pre-key.
    pub fn last_resort() -> Result<Self, Error> {
        Self::new(Self::MAX_PREKEY_ID)
    }

    /// Generates `size` pre-keys with consecutive ids starting at `start`,
    /// wrapping before the last-resort id.
    pub fn generate_prekeys(start: u16, size: u16) -> Result<Vec<Self>, Error> {
        let max = u32::from(Self::MAX_PREKEY_ID);
        (0..u32::from(size))
            .map(|offset| Self::new(((u32::from(start) + offset) % max) as u16))
            .collect()
    }

    /// Returns the id of this pre-key.
    pub fn id(&self) -> u16 {
        self.id
    }

    /// Returns the public key.
    pub fn public_key(&self) -> X25519PublicKey {
        self.key_pair.public_key()
    }

    /// Whether this is the last-resort pre-key.
    pub fn is_last_resort(&self) -> bool {
        self.id == Self::MAX_PREKEY_ID
    }

    pub(crate) fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }

    pub(crate) fn from_parts(id: u16, key_pair: KeyPair) -> Self {
        Self { id, key_pair }
    }
}

/// Outcome of checking a bundle's signature.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PreKeyAuth {
    /// The signature is present and does not match.
    Invalid,
    /// The bundle is not signed.
    Unknown,
    /// The signature is present and valid.
    Valid,
}

/// The public material a peer needs to start a session with us.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreKeyBundle {
    pub(crate) prekey_id: u16,
    pub(crate) public_key: X25519PublicKey,
    pub(crate) identity_key: IdentityKey,
    pub(crate) signature: Option<Signature>,
}

impl PreKeyBundle {
    /// Creates an unsigned bundle.
    pub fn new(identity_key: IdentityKey, prekey: &PreKey) -> Self {
        Self {
            prekey_id: prekey.id(),
            public_key: prekey.public_key(),
            identity_key,
            signature: None,
        }
    }

    /// Creates a bundle whose pre-key is signed by the identity.
    pub fn signed(identity: &IdentityKeyPair, prekey: &PreKey) -> Self {
        let public_key = prekey.public_key();
        Self {
            prekey_id: prekey.id(),
            public_key,
            identity_key: identity.public_key(),
            signature: Some(identity.sign(public_key.as_bytes())),
        }
    }

    /// Checks the pre-key signature against the bundle's identity.
    pub fn verify(&self) -> PreKeyAuth {
        match &self.signature {
            None => PreKeyAuth::Unknown,
            Some(signature) => {
                match self.identity_key.verify(self.public_key.as_bytes(), signature) {
                    Ok(()) => PreKeyAuth::Valid,
                    Err(_) => PreKeyAuth::Invalid,
                }
            }
        }
    }

    /// Returns the pre-key id.
    pub fn prekey_id(&self) -> u16 {
        self.prekey_id
    }

    /// Returns the pre-key public key.
    pub fn public_key(&self) -> X25519PublicKey {
        self.public_key
    }

    /// Returns the identity the bundle belongs to.
    pub fn identity_key(&self) -> IdentityKey {
        self.identity_key
    }

    /// Returns the signature, if any.
    pub fn signature(&self) -> Option<Signature> {
        self.signature
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pre_key_creation() {
        let pre_key = PreKey::new(123).unwrap();

        assert_eq!(pre_key.id(), 123);
        assert!(!pre_key.is_last_resort());
        assert!(!pre_key.public_key().as_bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_last_resort() {
        let pre_key = PreKey::last_resort().unwrap();
        assert_eq!(pre_key.id(), PreKey::MAX_PREKEY_ID);
        assert!(pre_key.is_last_resort());
    }

    #[test]
    fn test_generate_prekeys_wraps_before_last_resort() {
        let keys = PreKey::generate_prekeys(0xFFFD, 4).unwrap();
        let ids: Vec<u16> = keys.iter().map(PreKey::id).collect();

        assert_eq!(ids, vec![0xFFFD, 0xFFFE, 0, 1]);
    }

    #[test]
    fn test_signed_bundle_verification() {
        let identity = IdentityKeyPair::new().unwrap();
        let pre_key = PreKey::new(99).unwrap();

        let bundle = PreKeyBundle::signed(&identity, &pre_key);
        assert_eq!(bundle.verify(), PreKeyAuth::Valid);

        let unsigned = PreKeyBundle::new(identity.public_key(), &pre_key);
        assert_eq!(unsigned.verify(), PreKeyAuth::Unknown);
    }

    #[test]
    fn test_tamper_resistance() {
        let identity = IdentityKeyPair::new().unwrap();
        let pre_key = PreKey::new(77).unwrap();

        let mut bundle = PreKeyBundle::signed(&identity, &pre_key);
        bundle.public_key = PreKey::new(78).unwrap().public_key();
        assert_eq!(bundle.verify(), PreKeyAuth::Invalid);

        let mut bundle = PreKeyBundle::signed(&identity, &pre_key);
        bundle.identity_key = IdentityKeyPair::new().unwrap().public_key();
        assert_eq!(bundle.verify(), PreKeyAuth::Invalid);
    }
}
