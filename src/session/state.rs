use crate::session::{ChainKey, PendingPreKey, RecvChain, RootKey, SendChain};
use crate::{
    CipherMessage, DerivedSecrets, Envelope, Error, IdentityKey, IdentityKeyPair, KeyPair, Message,
    PreKeyBundle, PreKeyMessage, SessionConfig, SessionTag, X25519PublicKey,
};
use std::collections::VecDeque;
use zeroize::Zeroize;

/// One ratchet conversation between two identities.
///
/// Holds the root key, the chain we currently send on and a bounded list of
/// receive chains, newest first.
pub(crate) struct SessionState {
    pub(crate) recv_chains: VecDeque<RecvChain>,
    pub(crate) send_chain: SendChain,
    pub(crate) root_key: RootKey,
    pub(crate) prev_counter: u32,
}

// Outcome of a DH ratchet step, applied only once a message decrypts on it.
struct StagedRatchet {
    root_key: RootKey,
    send_chain: SendChain,
    recv_chain: RecvChain,
}

// Concatenated DH outputs of the handshake, wiped once the KDF has run.
fn derive_handshake(master: &mut [u8; 96]) -> Result<(RootKey, ChainKey), Error> {
    let secrets = DerivedSecrets::kdf_without_salt(master.as_slice(), b"handshake");
    master.zeroize();
    let secrets = secrets?;

    Ok((
        RootKey::from_cipher_key(secrets.cipher_key()),
        ChainKey::from_mac_key(secrets.mac_key(), 0),
    ))
}

impl SessionState {
    /// Initiator side of the handshake.
    ///
    /// The first send chain already uses a fresh ratchet key, so Alice's first
    /// message ratchets Bob forward.
    pub(crate) fn init_as_alice(
        alice_identity: &IdentityKeyPair,
        alice_base: &KeyPair,
        bob: &PreKeyBundle,
    ) -> Result<Self, Error> {
        let mut master = [0u8; 96];
        master[0..32].copy_from_slice(alice_identity.dh(&bob.public_key).as_bytes());
        master[32..64].copy_from_slice(alice_base.dh(&bob.identity_key.dh_key_public).as_bytes());
        master[64..96].copy_from_slice(alice_base.dh(&bob.public_key).as_bytes());

        let (root_key, chain_key) = derive_handshake(&mut master)?;

        let mut recv_chains = VecDeque::new();
        recv_chains.push_front(RecvChain::new(chain_key, bob.public_key));

        let send_ratchet = KeyPair::new()?;
        let (root_key, send_chain_key) = root_key.dh_ratchet(&send_ratchet, &bob.public_key)?;

        Ok(Self {
            recv_chains,
            send_chain: SendChain::new(send_chain_key, send_ratchet),
            root_key,
            prev_counter: 0,
        })
    }

    /// Responder side of the handshake.
    ///
    /// Bob sends on the handshake chain under his pre-key and starts without
    /// receive chains. Alice's first message carries a new ratchet key, which
    /// makes the first decrypt perform the DH ratchet.
    pub(crate) fn init_as_bob(
        bob_identity: &IdentityKeyPair,
        bob_prekey: &KeyPair,
        alice_identity: &IdentityKey,
        alice_base: &X25519PublicKey,
    ) -> Result<Self, Error> {
        let mut master = [0u8; 96];
        master[0..32].copy_from_slice(bob_prekey.dh(&alice_identity.dh_key_public).as_bytes());
        master[32..64].copy_from_slice(bob_identity.dh(alice_base).as_bytes());
        master[64..96].copy_from_slice(bob_prekey.dh(alice_base).as_bytes());

        let (root_key, chain_key) = derive_handshake(&mut master)?;

        Ok(Self {
            recv_chains: VecDeque::new(),
            send_chain: SendChain::new(chain_key, bob_prekey.clone()),
            root_key,
            prev_counter: 0,
        })
    }

    /// Derives the DH ratchet step for a ratchet key we have not seen before,
    /// without applying it.
    fn stage_ratchet(&self, ratchet_key: X25519PublicKey) -> Result<StagedRatchet, Error> {
        let new_ratchet = KeyPair::new()?;

        let (recv_root_key, recv_chain_key) = self
            .root_key
            .dh_ratchet(&self.send_chain.ratchet_key, &ratchet_key)?;
        let (send_root_key, send_chain_key) =
            recv_root_key.dh_ratchet(&new_ratchet, &ratchet_key)?;

        Ok(StagedRatchet {
            root_key: send_root_key,
            send_chain: SendChain::new(send_chain_key, new_ratchet),
            recv_chain: RecvChain::new(recv_chain_key, ratchet_key),
        })
    }

    fn commit_ratchet(&mut self, staged: StagedRatchet, max_recv_chains: usize) {
        self.root_key = staged.root_key;
        self.prev_counter = self.send_chain.chain_key.idx;
        self.send_chain = staged.send_chain;
        self.recv_chains.push_front(staged.recv_chain);

        tracing::debug!(
            prev_counter = self.prev_counter,
            recv_chains = self.recv_chains.len(),
            "performed DH ratchet step"
        );

        if self.recv_chains.len() > max_recv_chains {
            tracing::debug!(
                evicted = self.recv_chains.len() - max_recv_chains,
                "evicting oldest receive chains"
            );
            self.recv_chains.truncate(max_recv_chains);
        }
    }

    /// Encrypts on the current send chain.
    ///
    /// While `pending` is set the message is wrapped in a [`PreKeyMessage`] so
    /// the peer can complete the handshake from it.
    pub(crate) fn encrypt(
        &mut self,
        identity_key: IdentityKey,
        pending: Option<&PendingPreKey>,
        session_tag: SessionTag,
        plaintext: &[u8],
    ) -> Result<Envelope, Error> {
        let chain_key = &self.send_chain.chain_key;
        let message_keys = chain_key.message_keys()?;
        let next = chain_key.next()?;

        let counter = chain_key.idx;
        let prev_counter = self.prev_counter;
        let ratchet_key = self.send_chain.ratchet_key.public_key();

        let envelope = message_keys.seal(plaintext, |cipher_text| {
            let message = CipherMessage {
                session_tag,
                counter,
                prev_counter,
                ratchet_key,
                cipher_text,
            };
            match pending {
                Some(pending) => Message::PreKey(PreKeyMessage {
                    prekey_id: pending.prekey_id,
                    base_key: pending.base_key,
                    identity_key,
                    message,
                }),
                None => Message::Cipher(message),
            }
        })?;

        self.send_chain.chain_key = next;
        Ok(envelope)
    }

    /// Decrypts `msg`, ratcheting first if it carries an unknown ratchet key.
    ///
    /// The state is left unchanged when an error is returned.
    pub(crate) fn decrypt(
        &mut self,
        envelope: &Envelope,
        msg: &CipherMessage,
        config: &SessionConfig,
    ) -> Result<Vec<u8>, Error> {
        if let Some(chain) = self
            .recv_chains
            .iter_mut()
            .find(|chain| chain.ratchet_key == msg.ratchet_key)
        {
            return if msg.counter < chain.chain_key.idx {
                chain.try_message_keys(envelope, msg)
            } else {
                chain.decrypt_forward(envelope, msg, config.max_counter_gap)
            };
        }

        let mut staged = self.stage_ratchet(msg.ratchet_key)?;
        let plaintext = staged
            .recv_chain
            .decrypt_forward(envelope, msg, config.max_counter_gap)?;
        self.commit_ratchet(staged, config.max_recv_chains);

        Ok(plaintext)
    }
}
