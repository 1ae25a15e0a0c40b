use crate::session::MessageKeys;
use crate::{DerivedSecrets, Error, MacKey};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Symmetric-key ratchet step: a secret plus the counter of the message it keys.
///
/// `next` and `message_keys` feed the secret through HMAC with distinct
/// constants, so a message key never reveals the following chain key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub(crate) struct ChainKey {
    pub(crate) key: MacKey,
    pub(crate) idx: u32,
}

impl ChainKey {
    pub(crate) fn from_mac_key(key: MacKey, idx: u32) -> Self {
        Self { key, idx }
    }

    /// Advances the chain by one step.
    pub(crate) fn next(&self) -> Result<ChainKey, Error> {
        let idx = self
            .idx
            .checked_add(1)
            .ok_or_else(|| Error::Internal("Chain counter overflow".to_string()))?;

        Ok(Self {
            key: MacKey::new(self.key.sign(&[0x01])?),
            idx,
        })
    }

    /// Derives the message keys for the current counter.
    pub(crate) fn message_keys(&self) -> Result<MessageKeys, Error> {
        let mut base = self.key.sign(&[0x00])?;
        let secrets = DerivedSecrets::kdf_without_salt(&base, b"hash_ratchet");
        base.zeroize();
        let secrets = secrets?;

        Ok(MessageKeys::new(
            secrets.cipher_key(),
            secrets.mac_key(),
            self.idx,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn test_next_increments_counter() {
        let chain_key = ChainKey::from_mac_key(MacKey::new([42u8; 32]), 0);
        let next = chain_key.next().unwrap();

        assert_eq!(next.idx, 1);
        assert_ne!(chain_key.key.as_bytes(), next.key.as_bytes());
    }

    #[test]
    fn test_message_keys_carry_counter() {
        let chain_key = ChainKey::from_mac_key(MacKey::new([42u8; 32]), 7);
        assert_eq!(chain_key.message_keys().unwrap().counter(), 7);
    }

    #[test]
    fn test_message_key_line_differs_from_chain_line() {
        let chain_key = ChainKey::from_mac_key(MacKey::new([42u8; 32]), 0);
        let next = chain_key.next().unwrap();
        let keys = chain_key.message_keys().unwrap();

        assert_ne!(keys.mac_key().as_bytes(), next.key.as_bytes());
    }

    #[test]
    fn test_counter_overflow_is_an_error() {
        let chain_key = ChainKey::from_mac_key(MacKey::new([1u8; 32]), u32::MAX);
        assert!(matches!(chain_key.next(), Err(Error::Internal(_))));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_chain_is_monotonic(seed in any::<[u8; 32]>(), start in 0u32..1_000_000, steps in 1usize..64) {
            let mut chain_key = ChainKey::from_mac_key(MacKey::new(seed), start);
            let mut seen = HashSet::new();
            seen.insert(*chain_key.key.as_bytes());

            for step in 1..=steps {
                chain_key = chain_key.next().unwrap();
                prop_assert_eq!(chain_key.idx as usize, start as usize + step);
                prop_assert!(seen.insert(*chain_key.key.as_bytes()));
            }
        }
    }
}
