use crate::{CipherKey, DecryptError, Envelope, Error, MacKey, Message};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Single-use keys for one message.
///
/// Encryption and decryption take `self` by value, so a key bundle can be used
/// for at most one operation and is wiped as soon as it is consumed.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub(crate) struct MessageKeys {
    pub(crate) cipher_key: CipherKey,
    pub(crate) mac_key: MacKey,
    pub(crate) counter: u32,
}

impl MessageKeys {
    pub(crate) fn new(cipher_key: CipherKey, mac_key: MacKey, counter: u32) -> Self {
        Self {
            cipher_key,
            mac_key,
            counter,
        }
    }

    pub(crate) fn counter(&self) -> u32 {
        self.counter
    }

    pub(crate) fn mac_key(&self) -> &MacKey {
        &self.mac_key
    }

    // 4 zero bytes followed by the big-endian counter.
    fn counter_as_nonce(&self) -> [u8; 12] {
        let mut nonce = [0u8; 12];
        nonce[4..].copy_from_slice(&u64::from(self.counter).to_be_bytes());
        nonce
    }

    /// Encrypts `plaintext`, wraps the ciphertext with `wrap` and authenticates
    /// the resulting message.
    pub(crate) fn seal<F>(self, plaintext: &[u8], wrap: F) -> Result<Envelope, Error>
    where
        F: FnOnce(Vec<u8>) -> Message,
    {
        let cipher_text = self.cipher_key.encrypt(plaintext, &self.counter_as_nonce())?;
        Envelope::new(&self.mac_key, wrap(cipher_text))
    }

    /// Checks the envelope MAC against these keys.
    pub(crate) fn verify(&self, envelope: &Envelope) -> bool {
        envelope.verify(&self.mac_key)
    }

    pub(crate) fn decrypt(self, cipher_text: &[u8]) -> Result<Vec<u8>, Error> {
        self.cipher_key
            .decrypt(cipher_text, &self.counter_as_nonce())
            .map_err(|_| {
                DecryptError::InvalidMessage("Ciphertext authentication failed".to_string()).into()
            })
    }
}
