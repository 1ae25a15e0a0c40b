mod envelope;
pub use envelope::Envelope;

use crate::{Error, IdentityKey, X25519PublicKey, generate_random_seed};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use std::fmt;

/// Identifies one of several concurrently valid session states between two peers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SessionTag([u8; 16]);

impl SessionTag {
    /// Creates a random session tag.
    pub fn new() -> Result<Self, Error> {
        let seed = generate_random_seed()?;
        let mut tag = [0u8; 16];
        tag.copy_from_slice(&seed[..16]);
        Ok(Self(tag))
    }

    /// Returns the raw tag bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl From<[u8; 16]> for SessionTag {
    fn from(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for SessionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&URL_SAFE_NO_PAD.encode(self.0))
    }
}

/// A steady-state ratchet message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CipherMessage {
    /// Session state this message belongs to.
    pub session_tag: SessionTag,
    /// Position in the sender's current chain.
    pub counter: u32,
    /// Length of the sender's previous chain.
    pub prev_counter: u32,
    /// Sender's current ratchet public key.
    pub ratchet_key: X25519PublicKey,
    /// Encrypted payload.
    pub cipher_text: Vec<u8>,
}

/// A message sent while the initiator's pre-key handshake is not yet confirmed.
///
/// Carries everything the recipient needs to derive the session state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreKeyMessage {
    /// Id of the recipient's pre-key used in the handshake.
    pub prekey_id: u16,
    /// Initiator's base key.
    pub base_key: X25519PublicKey,
    /// Initiator's identity.
    pub identity_key: IdentityKey,
    /// The wrapped ciphertext.
    pub message: CipherMessage,
}

/// A message carried inside an [`Envelope`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    /// A plain ratchet message.
    Cipher(CipherMessage),
    /// A ratchet message with pre-key handshake material.
    PreKey(PreKeyMessage),
}

impl Message {
    /// Returns the inner ratchet message.
    pub fn cipher_message(&self) -> &CipherMessage {
        match self {
            Message::Cipher(msg) => msg,
            Message::PreKey(msg) => &msg.message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KeyPair;

    #[test]
    fn test_session_tags_are_unique() {
        let a = SessionTag::new().unwrap();
        let b = SessionTag::new().unwrap();

        assert_ne!(a, b);
        assert_ne!(a.to_string(), b.to_string());
        assert_eq!(SessionTag::from(*a.as_bytes()), a);
    }

    #[test]
    fn test_cipher_message_accessor() {
        let msg = CipherMessage {
            session_tag: SessionTag::new().unwrap(),
            counter: 42,
            prev_counter: 3,
            ratchet_key: KeyPair::new().unwrap().public_key(),
            cipher_text: vec![1, 2, 3],
        };
        let prekey = Message::PreKey(PreKeyMessage {
            prekey_id: 7,
            base_key: KeyPair::new().unwrap().public_key(),
            identity_key: crate::IdentityKeyPair::new().unwrap().public_key(),
            message: msg.clone(),
        });

        assert_eq!(prekey.cipher_message(), &msg);
        assert_eq!(Message::Cipher(msg.clone()).cipher_message(), &msg);
    }
}
