use crate::session::{ChainKey, MessageKeys};
use crate::{CipherMessage, DecryptError, Envelope, Error, X25519PublicKey};
use std::collections::VecDeque;

/// Incoming chain bound to one of the peer's ratchet keys.
///
/// Keys for messages that were skipped over are cached in ascending counter
/// order, so the oldest entry is always at the front.
pub(crate) struct RecvChain {
    pub(crate) chain_key: ChainKey,
    pub(crate) ratchet_key: X25519PublicKey,
    pub(crate) message_keys: VecDeque<MessageKeys>,
}

/// Keys derived by [`RecvChain::stage_message_keys`] but not yet committed.
pub(crate) struct StagedKeys {
    /// Chain key positioned at the message counter.
    pub(crate) chain_key: ChainKey,
    /// Keys for the message itself.
    pub(crate) message_keys: MessageKeys,
    /// Keys for the counters that were skipped, ascending.
    pub(crate) skipped: Vec<MessageKeys>,
}

impl RecvChain {
    pub(crate) fn new(chain_key: ChainKey, ratchet_key: X25519PublicKey) -> Self {
        Self {
            chain_key,
            ratchet_key,
            message_keys: VecDeque::new(),
        }
    }

    /// Decrypts a message whose counter is behind the chain, using a cached key.
    ///
    /// The cached key is removed only once the message has been verified and
    /// decrypted.
    pub(crate) fn try_message_keys(
        &mut self,
        envelope: &Envelope,
        msg: &CipherMessage,
    ) -> Result<Vec<u8>, Error> {
        if let Some(oldest) = self.message_keys.front() {
            if oldest.counter() > msg.counter {
                return Err(DecryptError::OutdatedMessage {
                    oldest: oldest.counter(),
                    message_counter: msg.counter,
                }
                .into());
            }
        }

        let idx = self
            .message_keys
            .binary_search_by_key(&msg.counter, MessageKeys::counter)
            .map_err(|_| DecryptError::DuplicateMessage)?;

        let keys = self
            .message_keys
            .get(idx)
            .ok_or_else(|| Error::Internal("Cached message keys vanished".to_string()))?;
        if !keys.verify(envelope) {
            return Err(DecryptError::InvalidSignature.into());
        }

        let plaintext = keys.clone().decrypt(&msg.cipher_text)?;
        self.message_keys.remove(idx);

        Ok(plaintext)
    }

    /// Decrypts a message at or ahead of the chain counter.
    ///
    /// Skipped keys are staged and only committed, together with the chain
    /// advance, once the message has been verified and decrypted.
    pub(crate) fn decrypt_forward(
        &mut self,
        envelope: &Envelope,
        msg: &CipherMessage,
        max_counter_gap: u32,
    ) -> Result<Vec<u8>, Error> {
        let staged = self.stage_message_keys(msg, max_counter_gap)?;
        if !staged.message_keys.verify(envelope) {
            return Err(DecryptError::InvalidSignature.into());
        }

        let next = staged.chain_key.next()?;
        let plaintext = staged.message_keys.decrypt(&msg.cipher_text)?;

        self.commit_message_keys(staged.skipped, max_counter_gap)?;
        self.chain_key = next;

        Ok(plaintext)
    }

    /// Derives the keys needed to reach `msg.counter` without touching the chain.
    pub(crate) fn stage_message_keys(
        &self,
        msg: &CipherMessage,
        max_counter_gap: u32,
    ) -> Result<StagedKeys, Error> {
        let num = msg.counter.checked_sub(self.chain_key.idx).ok_or_else(|| {
            Error::Internal("Staging a counter behind the receive chain".to_string())
        })?;

        if num > max_counter_gap {
            return Err(DecryptError::TooDistantFuture {
                chain_counter: self.chain_key.idx,
                message_counter: msg.counter,
                fresh_chain: self.chain_key.idx == 0,
            }
            .into());
        }

        tracing::trace!(
            from = self.chain_key.idx,
            to = msg.counter,
            "staging skipped message keys"
        );

        let mut skipped = Vec::with_capacity(num as usize);
        let mut chain_key = self.chain_key.clone();
        for _ in 0..num {
            skipped.push(chain_key.message_keys()?);
            chain_key = chain_key.next()?;
        }

        let message_keys = chain_key.message_keys()?;
        Ok(StagedKeys {
            chain_key,
            message_keys,
            skipped,
        })
    }

    /// Appends skipped keys to the cache, evicting the oldest entries beyond
    /// `max_counter_gap`.
    pub(crate) fn commit_message_keys(
        &mut self,
        keys: Vec<MessageKeys>,
        max_counter_gap: u32,
    ) -> Result<(), Error> {
        let capacity = max_counter_gap as usize;
        if keys.len() > capacity {
            return Err(Error::Internal(format!(
                "Number of message keys ({}) exceeds the counter gap ({})",
                keys.len(),
                max_counter_gap
            )));
        }

        let excess = (self.message_keys.len() + keys.len()).saturating_sub(capacity);
        if excess > 0 {
            tracing::debug!(evicted = excess, "evicting oldest skipped message keys");
            self.message_keys.drain(..excess);
        }

        self.message_keys.extend(keys);
        Ok(())
    }
}
