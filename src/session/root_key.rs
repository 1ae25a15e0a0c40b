use crate::session::ChainKey;
use crate::{CipherKey, DerivedSecrets, Error, KeyPair, X25519PublicKey};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Top-level ratchet secret. Only moves forward through [`RootKey::dh_ratchet`].
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub(crate) struct RootKey {
    pub(crate) key: CipherKey,
}

impl RootKey {
    pub(crate) fn from_cipher_key(key: CipherKey) -> Self {
        Self { key }
    }

    /// Mixes DH(ours, theirs) into the root secret, yielding the next root key
    /// and a fresh chain key.
    pub(crate) fn dh_ratchet(
        &self,
        ours: &KeyPair,
        theirs: &X25519PublicKey,
    ) -> Result<(RootKey, ChainKey), Error> {
        let secret = ours.dh(theirs);
        let secrets = DerivedSecrets::kdf(secret.as_bytes(), self.key.as_bytes(), b"dh_ratchet")?;

        Ok((
            RootKey::from_cipher_key(secrets.cipher_key()),
            ChainKey::from_mac_key(secrets.mac_key(), 0),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_both_sides_agree() {
        let root_key = RootKey::from_cipher_key(CipherKey::new([9u8; 32]));
        let alice = KeyPair::new().unwrap();
        let bob = KeyPair::new().unwrap();

        let (alice_root, alice_chain) = root_key.dh_ratchet(&alice, &bob.public_key()).unwrap();
        let (bob_root, bob_chain) = root_key.dh_ratchet(&bob, &alice.public_key()).unwrap();

        assert_eq!(alice_root.key.as_bytes(), bob_root.key.as_bytes());
        assert_eq!(alice_chain.key.as_bytes(), bob_chain.key.as_bytes());
        assert_eq!(alice_chain.idx, 0);
    }

    #[test]
    fn test_ratchet_moves_root_forward() {
        let root_key = RootKey::from_cipher_key(CipherKey::new([9u8; 32]));
        let ours = KeyPair::new().unwrap();
        let theirs = KeyPair::new().unwrap().public_key();

        let (next_root, _) = root_key.dh_ratchet(&ours, &theirs).unwrap();
        assert_ne!(next_root.key.as_bytes(), root_key.key.as_bytes());

        let (other_root, _) = root_key
            .dh_ratchet(&KeyPair::new().unwrap(), &theirs)
            .unwrap();
        assert_ne!(next_root.key.as_bytes(), other_root.key.as_bytes());
    }
}
