mod chain_key;
mod message_keys;
mod prekey_store;
mod recv_chain;
mod root_key;
mod send_chain;
mod state;

pub(crate) use chain_key::ChainKey;
pub(crate) use message_keys::MessageKeys;
pub use prekey_store::{MemoryPreKeyStore, PreKeyStore};
pub(crate) use recv_chain::RecvChain;
pub(crate) use root_key::RootKey;
pub(crate) use send_chain::SendChain;
pub(crate) use state::SessionState;

use crate::{
    CipherMessage, DecryptError, Envelope, Error, IdentityKey, IdentityKeyPair, KeyPair, Message,
    PreKeyAuth, PreKeyBundle, PreKeyMessage, SessionConfig, SessionTag, X25519PublicKey,
};
use std::collections::{HashMap, VecDeque};

/// Handshake material the initiator attaches to its messages until the peer
/// has answered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingPreKey {
    /// Id of the peer's pre-key used in the handshake.
    pub prekey_id: u16,
    /// Our base public key.
    pub base_key: X25519PublicKey,
}

/// All ratchet states shared with one remote identity.
///
/// Several states can be valid at once, for instance when both sides started
/// a handshake concurrently. New messages are always sent on the current
/// (most recently inserted) state, while incoming messages are routed by
/// their session tag.
///
/// Every mutating operation takes `&mut self`; a session must not be used
/// from two tasks at once.
pub struct Session {
    pub(crate) session_tag: SessionTag,
    pub(crate) local_identity: IdentityKeyPair,
    pub(crate) remote_identity: IdentityKey,
    pub(crate) pending_prekey: Option<PendingPreKey>,
    pub(crate) session_states: HashMap<SessionTag, SessionState>,
    pub(crate) insertion_order: VecDeque<SessionTag>,
    pub(crate) config: SessionConfig,
}

impl Session {
    /// Starts a session as the initiator from the peer's pre-key bundle.
    ///
    /// Messages are sent as pre-key messages until the peer replies. Bundles
    /// whose signature does not verify are rejected; unsigned bundles are
    /// accepted.
    pub fn init_from_prekey(
        local_identity: &IdentityKeyPair,
        bundle: &PreKeyBundle,
        config: Option<SessionConfig>,
    ) -> Result<Self, Error> {
        if bundle.verify() == PreKeyAuth::Invalid {
            return Err(Error::PreKey("Invalid pre-key bundle signature".to_string()));
        }

        let alice_base = KeyPair::new()?;
        let state = SessionState::init_as_alice(local_identity, &alice_base, bundle)?;
        let session_tag = SessionTag::new()?;

        let mut session = Self {
            session_tag,
            local_identity: local_identity.clone(),
            remote_identity: bundle.identity_key,
            pending_prekey: Some(PendingPreKey {
                prekey_id: bundle.prekey_id,
                base_key: alice_base.public_key(),
            }),
            session_states: HashMap::new(),
            insertion_order: VecDeque::new(),
            config: config.unwrap_or_default(),
        };
        session.insert_session_state(session_tag, state);

        tracing::debug!(
            session_tag = %session_tag,
            prekey_id = bundle.prekey_id,
            "initialised session from pre-key bundle"
        );

        Ok(session)
    }

    /// Creates a session as the responder from the peer's first message.
    ///
    /// The envelope must carry a pre-key message. The referenced pre-key is
    /// removed from `store` unless it is the last-resort key. Returns the new
    /// session along with the decrypted payload.
    pub async fn init_from_message<S>(
        local_identity: &IdentityKeyPair,
        store: &mut S,
        envelope: &Envelope,
        config: Option<SessionConfig>,
    ) -> Result<(Self, Vec<u8>), Error>
    where
        S: PreKeyStore + ?Sized,
    {
        let msg = match envelope.message() {
            Message::PreKey(msg) => msg,
            Message::Cipher(_) => {
                return Err(DecryptError::InvalidMessage(
                    "Can't initialise a session from a cipher message".to_string(),
                )
                .into());
            }
        };

        let mut session = Self {
            session_tag: msg.message.session_tag,
            local_identity: local_identity.clone(),
            remote_identity: msg.identity_key,
            pending_prekey: None,
            session_states: HashMap::new(),
            insertion_order: VecDeque::new(),
            config: config.unwrap_or_default(),
        };

        let plaintext = session.decrypt_prekey_message(store, envelope, msg).await?;
        Ok((session, plaintext))
    }

    /// Tag of the state new messages are sent on.
    pub fn session_tag(&self) -> SessionTag {
        self.session_tag
    }

    /// Our public identity.
    pub fn local_identity(&self) -> IdentityKey {
        self.local_identity.public_key()
    }

    /// The peer's public identity.
    pub fn remote_identity(&self) -> IdentityKey {
        self.remote_identity
    }

    /// Handshake material still attached to outgoing messages, if any.
    pub fn pending_prekey(&self) -> Option<PendingPreKey> {
        self.pending_prekey
    }

    /// Bounds this session runs with.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Encrypts `plaintext` on the current state.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Envelope, Error> {
        let identity_key = self.local_identity.public_key();
        let state = self
            .session_states
            .get_mut(&self.session_tag)
            .ok_or(Error::Session)?;

        state.encrypt(
            identity_key,
            self.pending_prekey.as_ref(),
            self.session_tag,
            plaintext,
        )
    }

    /// Decrypts an envelope from the peer.
    ///
    /// A pre-key message for a session tag we have no state for creates a new
    /// state, in which case its pre-key is looked up in (and removed from)
    /// `store`. Messages for a known tag only ever decrypt through that state.
    /// Nothing changes when an error is returned.
    pub async fn decrypt<S>(
        &mut self,
        store: &mut S,
        envelope: &Envelope,
    ) -> Result<Vec<u8>, Error>
    where
        S: PreKeyStore + ?Sized,
    {
        match envelope.message() {
            Message::Cipher(msg) => self.decrypt_cipher_message(envelope, msg),
            Message::PreKey(msg) => {
                if msg.identity_key != self.remote_identity {
                    return Err(DecryptError::RemoteIdentityChanged.into());
                }
                self.decrypt_prekey_message(store, envelope, msg).await
            }
        }
    }

    async fn decrypt_prekey_message<S>(
        &mut self,
        store: &mut S,
        envelope: &Envelope,
        msg: &PreKeyMessage,
    ) -> Result<Vec<u8>, Error>
    where
        S: PreKeyStore + ?Sized,
    {
        if self.session_states.contains_key(&msg.message.session_tag) {
            return self.decrypt_cipher_message(envelope, &msg.message);
        }

        tracing::debug!(
            session_tag = %msg.message.session_tag,
            prekey_id = msg.prekey_id,
            "deriving session state from pre-key message"
        );

        let prekey = store
            .prekey(msg.prekey_id)
            .await?
            .ok_or(DecryptError::PrekeyNotFound(msg.prekey_id))?;

        let mut state = SessionState::init_as_bob(
            &self.local_identity,
            prekey.key_pair(),
            &msg.identity_key,
            &msg.base_key,
        )?;
        let plaintext = state.decrypt(envelope, &msg.message, &self.config)?;

        if !prekey.is_last_resort() {
            store.remove(msg.prekey_id).await?;
        }

        self.pending_prekey = None;
        self.insert_session_state(msg.message.session_tag, state);

        Ok(plaintext)
    }

    fn decrypt_cipher_message(
        &mut self,
        envelope: &Envelope,
        msg: &CipherMessage,
    ) -> Result<Vec<u8>, Error> {
        let state = self.session_states.get_mut(&msg.session_tag).ok_or_else(|| {
            DecryptError::InvalidMessage(format!("Unknown session tag {}", msg.session_tag))
        })?;

        let plaintext = state.decrypt(envelope, msg, &self.config)?;
        self.pending_prekey = None;

        Ok(plaintext)
    }

    /// Makes `state` the current state, evicting the oldest non-current
    /// states beyond the configured bound.
    fn insert_session_state(&mut self, tag: SessionTag, state: SessionState) {
        if self.session_states.insert(tag, state).is_none() {
            self.insertion_order.push_back(tag);
        }
        self.session_tag = tag;

        tracing::debug!(
            session_tag = %tag,
            states = self.session_states.len(),
            "inserted session state"
        );

        while self.session_states.len() > self.config.max_session_states {
            let Some(pos) = self.insertion_order.iter().position(|t| *t != tag) else {
                break;
            };
            if let Some(evicted) = self.insertion_order.remove(pos) {
                self.session_states.remove(&evicted);
                tracing::debug!(session_tag = %evicted, "evicted session state");
            }
        }
    }
}


#[cfg(test)]
impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("session_tag", &self.session_tag)
            .finish_non_exhaustive()
    }
}
