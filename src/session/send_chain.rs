use crate::KeyPair;
use crate::session::ChainKey;

/// Outgoing chain bound to our current ratchet key pair.
pub(crate) struct SendChain {
    pub(crate) chain_key: ChainKey,
    pub(crate) ratchet_key: KeyPair,
}

impl SendChain {
    pub(crate) fn new(chain_key: ChainKey, ratchet_key: KeyPair) -> Self {
        Self {
            chain_key,
            ratchet_key,
        }
    }
}
