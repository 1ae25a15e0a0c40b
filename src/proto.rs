use crate::session::{ChainKey, MessageKeys, RecvChain, RootKey, SendChain, SessionState};
use crate::{
    CipherKey, CipherMessage, DecodeError, Envelope, Error, IdentityKey, IdentityKeyPair, KeyPair,
    MacKey, Message, PendingPreKey, PreKey, PreKeyBundle, PreKeyMessage, Session, SessionConfig,
    SessionTag, X25519PublicKey, X25519Secret,
};
use ed25519_dalek::{Signature, VerifyingKey};
use prost::Message as _;
use std::collections::{HashMap, VecDeque};
use zeroize::Zeroize;

/// Current storage schema version.
const SCHEMA_VERSION: u32 = 1;

#[derive(Clone, PartialEq, prost::Message)]
struct IdentityKeyProto {
    #[prost(bytes = "vec", tag = "1")]
    dh_key_public: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    signing_key_public: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
struct IdentityKeyPairProto {
    #[prost(uint32, tag = "1")]
    version: u32,
    #[prost(bytes = "vec", tag = "2")]
    secret: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
struct PreKeyProto {
    #[prost(uint32, tag = "1")]
    version: u32,
    #[prost(uint32, tag = "2")]
    id: u32,
    #[prost(bytes = "vec", tag = "3")]
    secret: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
struct PreKeyBundleProto {
    #[prost(uint32, tag = "1")]
    version: u32,
    #[prost(uint32, tag = "2")]
    prekey_id: u32,
    #[prost(bytes = "vec", tag = "3")]
    public_key: Vec<u8>,
    #[prost(message, optional, tag = "4")]
    identity_key: Option<IdentityKeyProto>,
    #[prost(bytes = "vec", optional, tag = "5")]
    signature: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, prost::Message)]
struct CipherMessageProto {
    #[prost(bytes = "vec", tag = "1")]
    session_tag: Vec<u8>,
    #[prost(uint32, tag = "2")]
    counter: u32,
    #[prost(uint32, tag = "3")]
    prev_counter: u32,
    #[prost(bytes = "vec", tag = "4")]
    ratchet_key: Vec<u8>,
    #[prost(bytes = "vec", tag = "5")]
    cipher_text: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
struct PreKeyMessageProto {
    #[prost(uint32, tag = "1")]
    prekey_id: u32,
    #[prost(bytes = "vec", tag = "2")]
    base_key: Vec<u8>,
    #[prost(message, optional, tag = "3")]
    identity_key: Option<IdentityKeyProto>,
    #[prost(message, optional, tag = "4")]
    message: Option<CipherMessageProto>,
}

#[derive(Clone, PartialEq, prost::Oneof)]
enum MessageBody {
    #[prost(message, tag = "1")]
    Cipher(CipherMessageProto),
    #[prost(message, tag = "2")]
    PreKey(PreKeyMessageProto),
}

#[derive(Clone, PartialEq, prost::Message)]
struct MessageProto {
    #[prost(oneof = "MessageBody", tags = "1, 2")]
    body: Option<MessageBody>,
}

#[derive(Clone, PartialEq, prost::Message)]
struct EnvelopeProto {
    #[prost(uint32, tag = "1")]
    version: u32,
    #[prost(bytes = "vec", tag = "2")]
    mac: Vec<u8>,
    #[prost(bytes = "vec", tag = "3")]
    message: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
struct ChainKeyProto {
    #[prost(uint32, tag = "1")]
    idx: u32,
    #[prost(bytes = "vec", tag = "2")]
    key: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
struct MessageKeysProto {
    #[prost(bytes = "vec", tag = "1")]
    cipher_key: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    mac_key: Vec<u8>,
    #[prost(uint32, tag = "3")]
    counter: u32,
}

#[derive(Clone, PartialEq, prost::Message)]
struct RecvChainProto {
    #[prost(message, optional, tag = "1")]
    chain_key: Option<ChainKeyProto>,
    #[prost(bytes = "vec", tag = "2")]
    ratchet_key: Vec<u8>,
    #[prost(message, repeated, tag = "3")]
    message_keys: Vec<MessageKeysProto>,
}

#[derive(Clone, PartialEq, prost::Message)]
struct SendChainProto {
    #[prost(message, optional, tag = "1")]
    chain_key: Option<ChainKeyProto>,
    #[prost(bytes = "vec", tag = "2")]
    ratchet_secret: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
struct SessionStateProto {
    #[prost(message, repeated, tag = "1")]
    recv_chains: Vec<RecvChainProto>,
    #[prost(message, optional, tag = "2")]
    send_chain: Option<SendChainProto>,
    #[prost(bytes = "vec", tag = "3")]
    root_key: Vec<u8>,
    #[prost(uint32, tag = "4")]
    prev_counter: u32,
}

#[derive(Clone, PartialEq, prost::Message)]
struct SessionStateEntryProto {
    #[prost(bytes = "vec", tag = "1")]
    tag: Vec<u8>,
    #[prost(message, optional, tag = "2")]
    state: Option<SessionStateProto>,
}

#[derive(Clone, PartialEq, prost::Message)]
struct PendingPreKeyProto {
    #[prost(uint32, tag = "1")]
    prekey_id: u32,
    #[prost(bytes = "vec", tag = "2")]
    base_key: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
struct SessionConfigProto {
    #[prost(uint32, tag = "1")]
    max_counter_gap: u32,
    #[prost(uint32, tag = "2")]
    max_recv_chains: u32,
    #[prost(uint32, tag = "3")]
    max_session_states: u32,
}

#[derive(Clone, PartialEq, prost::Message)]
struct SessionProto {
    #[prost(uint32, tag = "1")]
    version: u32,
    #[prost(bytes = "vec", tag = "2")]
    session_tag: Vec<u8>,
    #[prost(message, optional, tag = "3")]
    local_identity: Option<IdentityKeyProto>,
    #[prost(message, optional, tag = "4")]
    remote_identity: Option<IdentityKeyProto>,
    #[prost(message, optional, tag = "5")]
    pending_prekey: Option<PendingPreKeyProto>,
    /// States in insertion order, oldest first.
    #[prost(message, repeated, tag = "6")]
    session_states: Vec<SessionStateEntryProto>,
    #[prost(message, optional, tag = "7")]
    config: Option<SessionConfigProto>,
}

fn fixed<const N: usize>(bytes: &[u8]) -> Result<[u8; N], Error> {
    <[u8; N]>::try_from(bytes).map_err(|_| {
        DecodeError::InvalidArrayLen {
            expected: N,
            actual: bytes.len(),
        }
        .into()
    })
}

fn required<T>(field: Option<T>, name: &str) -> Result<T, Error> {
    field.ok_or_else(|| DecodeError::Malformed(format!("Missing field: {name}")).into())
}

fn check_version(version: u32) -> Result<(), Error> {
    if version != SCHEMA_VERSION {
        return Err(DecodeError::Malformed(format!("Unsupported schema version: {version}")).into());
    }
    Ok(())
}

fn decode_prekey_id(id: u32) -> Result<u16, Error> {
    u16::try_from(id)
        .map_err(|_| DecodeError::Malformed(format!("Pre-key id out of range: {id}")).into())
}

fn decode_public_key(bytes: &[u8]) -> Result<X25519PublicKey, Error> {
    Ok(X25519PublicKey::from(fixed::<32>(bytes)?))
}

impl From<&IdentityKey> for IdentityKeyProto {
    fn from(key: &IdentityKey) -> Self {
        Self {
            dh_key_public: key.dh_key_public.to_bytes().to_vec(),
            signing_key_public: key.signing_key_public.to_bytes().to_vec(),
        }
    }
}

impl TryFrom<IdentityKeyProto> for IdentityKey {
    type Error = Error;

    fn try_from(proto: IdentityKeyProto) -> Result<Self, Self::Error> {
        let dh_key_public = decode_public_key(&proto.dh_key_public)?;
        let signing_key_public = VerifyingKey::from_bytes(&fixed(&proto.signing_key_public)?)
            .map_err(|err| DecodeError::Malformed(err.to_string()))?;

        Ok(Self {
            dh_key_public,
            signing_key_public,
        })
    }
}

impl IdentityKey {
    /// Encodes the public identity.
    pub fn serialise(&self) -> Vec<u8> {
        IdentityKeyProto::from(self).encode_to_vec()
    }

    /// Decodes a public identity.
    pub fn deserialise(bytes: &[u8]) -> Result<Self, Error> {
        IdentityKeyProto::decode(bytes)?.try_into()
    }
}

impl IdentityKeyPair {
    /// Encodes the key pair, private halves included.
    pub fn serialise(&self) -> Vec<u8> {
        let mut secret = self.to_bytes();
        let mut proto = IdentityKeyPairProto {
            version: SCHEMA_VERSION,
            secret: secret.to_vec(),
        };
        secret.zeroize();

        let bytes = proto.encode_to_vec();
        proto.secret.zeroize();
        bytes
    }

    /// Decodes a key pair written by [`IdentityKeyPair::serialise`].
    pub fn deserialise(bytes: &[u8]) -> Result<Self, Error> {
        let mut proto = IdentityKeyPairProto::decode(bytes)?;
        check_version(proto.version)?;

        let secret = fixed::<64>(&proto.secret);
        proto.secret.zeroize();
        Ok(Self::from(secret?))
    }
}

impl PreKey {
    /// Encodes the pre-key, private key included.
    pub fn serialise(&self) -> Vec<u8> {
        let mut proto = PreKeyProto {
            version: SCHEMA_VERSION,
            id: u32::from(self.id()),
            secret: self.key_pair().secret().to_bytes().to_vec(),
        };
        let bytes = proto.encode_to_vec();
        proto.secret.zeroize();
        bytes
    }

    /// Decodes a pre-key written by [`PreKey::serialise`].
    pub fn deserialise(bytes: &[u8]) -> Result<Self, Error> {
        let mut proto = PreKeyProto::decode(bytes)?;
        check_version(proto.version)?;

        let secret = fixed::<32>(&proto.secret);
        proto.secret.zeroize();
        let key_pair = KeyPair::from(X25519Secret::from(secret?));

        Ok(Self::from_parts(decode_prekey_id(proto.id)?, key_pair))
    }
}

impl PreKeyBundle {
    /// Encodes the bundle for publishing.
    pub fn serialise(&self) -> Vec<u8> {
        PreKeyBundleProto {
            version: SCHEMA_VERSION,
            prekey_id: u32::from(self.prekey_id),
            public_key: self.public_key.to_bytes().to_vec(),
            identity_key: Some(IdentityKeyProto::from(&self.identity_key)),
            signature: self.signature.map(|signature| signature.to_bytes().to_vec()),
        }
        .encode_to_vec()
    }

    /// Decodes a published bundle. The signature is not checked here; see
    /// [`PreKeyBundle::verify`].
    pub fn deserialise(bytes: &[u8]) -> Result<Self, Error> {
        let proto = PreKeyBundleProto::decode(bytes)?;
        check_version(proto.version)?;

        let signature = match proto.signature {
            Some(bytes) => Some(Signature::from_bytes(&fixed(&bytes)?)),
            None => None,
        };

        Ok(Self {
            prekey_id: decode_prekey_id(proto.prekey_id)?,
            public_key: decode_public_key(&proto.public_key)?,
            identity_key: required(proto.identity_key, "identity_key")?.try_into()?,
            signature,
        })
    }
}

impl From<&CipherMessage> for CipherMessageProto {
    fn from(msg: &CipherMessage) -> Self {
        Self {
            session_tag: msg.session_tag.as_bytes().to_vec(),
            counter: msg.counter,
            prev_counter: msg.prev_counter,
            ratchet_key: msg.ratchet_key.to_bytes().to_vec(),
            cipher_text: msg.cipher_text.clone(),
        }
    }
}

impl TryFrom<CipherMessageProto> for CipherMessage {
    type Error = Error;

    fn try_from(proto: CipherMessageProto) -> Result<Self, Self::Error> {
        Ok(Self {
            session_tag: SessionTag::from(fixed::<16>(&proto.session_tag)?),
            counter: proto.counter,
            prev_counter: proto.prev_counter,
            ratchet_key: decode_public_key(&proto.ratchet_key)?,
            cipher_text: proto.cipher_text,
        })
    }
}

impl From<&Message> for MessageProto {
    fn from(msg: &Message) -> Self {
        let body = match msg {
            Message::Cipher(msg) => MessageBody::Cipher(msg.into()),
            Message::PreKey(msg) => MessageBody::PreKey(PreKeyMessageProto {
                prekey_id: u32::from(msg.prekey_id),
                base_key: msg.base_key.to_bytes().to_vec(),
                identity_key: Some((&msg.identity_key).into()),
                message: Some((&msg.message).into()),
            }),
        };

        Self { body: Some(body) }
    }
}

impl TryFrom<MessageProto> for Message {
    type Error = Error;

    fn try_from(proto: MessageProto) -> Result<Self, Self::Error> {
        match proto.body {
            Some(MessageBody::Cipher(msg)) => Ok(Message::Cipher(msg.try_into()?)),
            Some(MessageBody::PreKey(msg)) => Ok(Message::PreKey(PreKeyMessage {
                prekey_id: decode_prekey_id(msg.prekey_id)?,
                base_key: decode_public_key(&msg.base_key)?,
                identity_key: required(msg.identity_key, "identity_key")?.try_into()?,
                message: required(msg.message, "message")?.try_into()?,
            })),
            None => Err(DecodeError::InvalidType("Message carries no body".to_string()).into()),
        }
    }
}

impl Message {
    /// Encodes the message. These are the bytes an envelope MAC covers.
    pub fn serialise(&self) -> Vec<u8> {
        MessageProto::from(self).encode_to_vec()
    }

    /// Decodes a message.
    pub fn deserialise(bytes: &[u8]) -> Result<Self, Error> {
        MessageProto::decode(bytes)?.try_into()
    }
}

impl Envelope {
    /// Encodes the envelope for the wire.
    pub fn serialise(&self) -> Vec<u8> {
        EnvelopeProto {
            version: u32::from(self.version),
            mac: self.mac.to_vec(),
            message: self.message_enc.clone(),
        }
        .encode_to_vec()
    }

    /// Decodes an envelope. The MAC is checked later, against the message keys.
    pub fn deserialise(bytes: &[u8]) -> Result<Self, Error> {
        let proto = EnvelopeProto::decode(bytes)?;
        if proto.version != u32::from(Self::VERSION) {
            return Err(DecodeError::Malformed(format!(
                "Unsupported envelope version: {}",
                proto.version
            ))
            .into());
        }

        Ok(Self {
            version: Self::VERSION,
            mac: fixed(&proto.mac)?,
            message: Message::deserialise(&proto.message)?,
            message_enc: proto.message,
        })
    }
}

impl From<&ChainKey> for ChainKeyProto {
    fn from(chain_key: &ChainKey) -> Self {
        Self {
            idx: chain_key.idx,
            key: chain_key.key.as_bytes().to_vec(),
        }
    }
}

impl TryFrom<ChainKeyProto> for ChainKey {
    type Error = Error;

    fn try_from(proto: ChainKeyProto) -> Result<Self, Self::Error> {
        Ok(ChainKey::from_mac_key(MacKey::new(fixed(&proto.key)?), proto.idx))
    }
}

impl From<&RecvChain> for RecvChainProto {
    fn from(chain: &RecvChain) -> Self {
        Self {
            chain_key: Some((&chain.chain_key).into()),
            ratchet_key: chain.ratchet_key.to_bytes().to_vec(),
            message_keys: chain
                .message_keys
                .iter()
                .map(|keys| MessageKeysProto {
                    cipher_key: keys.cipher_key.as_bytes().to_vec(),
                    mac_key: keys.mac_key().as_bytes().to_vec(),
                    counter: keys.counter(),
                })
                .collect(),
        }
    }
}

impl TryFrom<RecvChainProto> for RecvChain {
    type Error = Error;

    fn try_from(proto: RecvChainProto) -> Result<Self, Self::Error> {
        let chain_key: ChainKey = required(proto.chain_key, "chain_key")?.try_into()?;

        let message_keys = proto
            .message_keys
            .iter()
            .map(|keys| {
                Ok(MessageKeys::new(
                    CipherKey::new(fixed(&keys.cipher_key)?),
                    MacKey::new(fixed(&keys.mac_key)?),
                    keys.counter,
                ))
            })
            .collect::<Result<VecDeque<_>, Error>>()?;

        let ascending = message_keys
            .iter()
            .zip(message_keys.iter().skip(1))
            .all(|(a, b)| a.counter() < b.counter());
        let behind_chain = message_keys
            .back()
            .is_none_or(|keys| keys.counter() < chain_key.idx);
        if !ascending || !behind_chain {
            return Err(DecodeError::Malformed("Skipped message keys out of order".to_string()).into());
        }

        Ok(RecvChain {
            chain_key,
            ratchet_key: decode_public_key(&proto.ratchet_key)?,
            message_keys,
        })
    }
}

impl From<&SessionState> for SessionStateProto {
    fn from(state: &SessionState) -> Self {
        Self {
            recv_chains: state.recv_chains.iter().map(RecvChainProto::from).collect(),
            send_chain: Some(SendChainProto {
                chain_key: Some((&state.send_chain.chain_key).into()),
                ratchet_secret: state.send_chain.ratchet_key.secret().to_bytes().to_vec(),
            }),
            root_key: state.root_key.key.as_bytes().to_vec(),
            prev_counter: state.prev_counter,
        }
    }
}

impl TryFrom<SessionStateProto> for SessionState {
    type Error = Error;

    fn try_from(proto: SessionStateProto) -> Result<Self, Self::Error> {
        let send_chain = required(proto.send_chain, "send_chain")?;
        let ratchet_key = KeyPair::from(X25519Secret::from(fixed(&send_chain.ratchet_secret)?));

        Ok(Self {
            recv_chains: proto
                .recv_chains
                .into_iter()
                .map(RecvChain::try_from)
                .collect::<Result<_, _>>()?,
            send_chain: SendChain::new(
                required(send_chain.chain_key, "chain_key")?.try_into()?,
                ratchet_key,
            ),
            root_key: RootKey::from_cipher_key(CipherKey::new(fixed(&proto.root_key)?)),
            prev_counter: proto.prev_counter,
        })
    }
}

impl From<&SessionConfig> for SessionConfigProto {
    fn from(config: &SessionConfig) -> Self {
        Self {
            max_counter_gap: config.max_counter_gap,
            max_recv_chains: u32::try_from(config.max_recv_chains).unwrap_or(u32::MAX),
            max_session_states: u32::try_from(config.max_session_states).unwrap_or(u32::MAX),
        }
    }
}

impl From<SessionConfigProto> for SessionConfig {
    fn from(proto: SessionConfigProto) -> Self {
        Self {
            max_counter_gap: proto.max_counter_gap,
            max_recv_chains: proto.max_recv_chains as usize,
            max_session_states: proto.max_session_states as usize,
        }
    }
}

impl Session {
    /// Encodes the whole session, every state and cached key included.
    ///
    /// The result holds secret key material and must be stored accordingly.
    pub fn serialise(&self) -> Vec<u8> {
        let session_states = self
            .insertion_order
            .iter()
            .filter_map(|tag| {
                self.session_states
                    .get(tag)
                    .map(|state| SessionStateEntryProto {
                        tag: tag.as_bytes().to_vec(),
                        state: Some(state.into()),
                    })
            })
            .collect();

        let mut proto = SessionProto {
            version: SCHEMA_VERSION,
            session_tag: self.session_tag.as_bytes().to_vec(),
            local_identity: Some((&self.local_identity.public_key()).into()),
            remote_identity: Some((&self.remote_identity).into()),
            pending_prekey: self.pending_prekey.map(|pending| PendingPreKeyProto {
                prekey_id: u32::from(pending.prekey_id),
                base_key: pending.base_key.to_bytes().to_vec(),
            }),
            session_states,
            config: Some((&self.config).into()),
        };

        let bytes = proto.encode_to_vec();
        zeroize_states(&mut proto.session_states);
        bytes
    }

    /// Restores a session for `local_identity`.
    ///
    /// Fails with [`DecodeError::LocalIdentityChanged`] if the session was
    /// written for a different identity.
    pub fn deserialise(local_identity: &IdentityKeyPair, bytes: &[u8]) -> Result<Self, Error> {
        let mut proto = SessionProto::decode(bytes)?;
        let result = Self::from_proto(local_identity, &mut proto);
        zeroize_states(&mut proto.session_states);
        result
    }

    fn from_proto(local_identity: &IdentityKeyPair, proto: &mut SessionProto) -> Result<Self, Error> {
        check_version(proto.version)?;

        let stored_identity: IdentityKey =
            required(proto.local_identity.take(), "local_identity")?.try_into()?;
        if stored_identity != local_identity.public_key() {
            return Err(DecodeError::LocalIdentityChanged.into());
        }

        let pending_prekey = match proto.pending_prekey.take() {
            Some(pending) => Some(PendingPreKey {
                prekey_id: decode_prekey_id(pending.prekey_id)?,
                base_key: decode_public_key(&pending.base_key)?,
            }),
            None => None,
        };

        let config: SessionConfig = required(proto.config.take(), "config")?.into();
        if proto.session_states.len() > config.max_session_states {
            return Err(DecodeError::Malformed(format!(
                "{} session states exceed the bound of {}",
                proto.session_states.len(),
                config.max_session_states
            ))
            .into());
        }

        let mut session_states = HashMap::with_capacity(proto.session_states.len());
        let mut insertion_order = VecDeque::with_capacity(proto.session_states.len());
        for entry in &mut proto.session_states {
            let tag = SessionTag::from(fixed::<16>(&entry.tag)?);
            let state = required(entry.state.take(), "state")?;
            check_state_bounds(&state, &config)?;
            let state = SessionState::try_from(state)?;
            if session_states.insert(tag, state).is_none() {
                insertion_order.push_back(tag);
            }
        }

        let session_tag = SessionTag::from(fixed::<16>(&proto.session_tag)?);
        if !session_states.contains_key(&session_tag) {
            return Err(DecodeError::Malformed("Current session state missing".to_string()).into());
        }

        Ok(Self {
            session_tag,
            local_identity: local_identity.clone(),
            remote_identity: required(proto.remote_identity.take(), "remote_identity")?
                .try_into()?,
            pending_prekey,
            session_states,
            insertion_order,
            config,
        })
    }
}

fn check_state_bounds(state: &SessionStateProto, config: &SessionConfig) -> Result<(), Error> {
    if state.recv_chains.len() > config.max_recv_chains {
        return Err(DecodeError::Malformed(format!(
            "{} receive chains exceed the bound of {}",
            state.recv_chains.len(),
            config.max_recv_chains
        ))
        .into());
    }

    let max_keys = config.max_counter_gap as usize;
    if let Some(chain) = state
        .recv_chains
        .iter()
        .find(|chain| chain.message_keys.len() > max_keys)
    {
        return Err(DecodeError::Malformed(format!(
            "{} skipped message keys exceed the bound of {}",
            chain.message_keys.len(),
            max_keys
        ))
        .into());
    }

    Ok(())
}

// Wipes the secret bytes left in encoded state protos.
fn zeroize_states(entries: &mut [SessionStateEntryProto]) {
    for state in entries.iter_mut().filter_map(|entry| entry.state.as_mut()) {
        state.root_key.zeroize();
        if let Some(send_chain) = state.send_chain.as_mut() {
            send_chain.ratchet_secret.zeroize();
            if let Some(chain_key) = send_chain.chain_key.as_mut() {
                chain_key.key.zeroize();
            }
        }
        for chain in &mut state.recv_chains {
            if let Some(chain_key) = chain.chain_key.as_mut() {
                chain_key.key.zeroize();
            }
            for keys in &mut chain.message_keys {
                keys.cipher_key.zeroize();
                keys.mac_key.zeroize();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DecryptError, MemoryPreKeyStore, PreKeyAuth};

    #[test]
    fn test_identity_key_pair_round_trip() {
        let identity = IdentityKeyPair::new().unwrap();
        let restored = IdentityKeyPair::deserialise(&identity.serialise()).unwrap();

        assert_eq!(identity.public_key(), restored.public_key());
        let signature = restored.sign(b"message");
        assert!(identity.public_key().verify(b"message", &signature).is_ok());
    }

    #[test]
    fn test_identity_key_rejects_short_keys() {
        let bytes = IdentityKeyProto {
            dh_key_public: vec![1u8; 31],
            signing_key_public: vec![2u8; 32],
        }
        .encode_to_vec();

        assert_eq!(
            IdentityKey::deserialise(&bytes).unwrap_err(),
            Error::Decode(DecodeError::InvalidArrayLen {
                expected: 32,
                actual: 31
            })
        );
    }

    #[test]
    fn test_prekey_round_trip() {
        let prekey = PreKey::new(4242).unwrap();
        let restored = PreKey::deserialise(&prekey.serialise()).unwrap();

        assert_eq!(restored.id(), 4242);
        assert_eq!(restored.public_key(), prekey.public_key());
    }

    #[test]
    fn test_bundle_round_trip_keeps_signature() {
        let identity = IdentityKeyPair::new().unwrap();
        let prekey = PreKey::new(7).unwrap();

        let signed = PreKeyBundle::deserialise(&PreKeyBundle::signed(&identity, &prekey).serialise())
            .unwrap();
        assert_eq!(signed.verify(), PreKeyAuth::Valid);
        assert_eq!(signed.prekey_id(), 7);

        let unsigned =
            PreKeyBundle::deserialise(&PreKeyBundle::new(identity.public_key(), &prekey).serialise())
                .unwrap();
        assert_eq!(unsigned.verify(), PreKeyAuth::Unknown);
    }

    #[test]
    fn test_message_without_body() {
        let bytes = MessageProto { body: None }.encode_to_vec();

        assert!(matches!(
            Message::deserialise(&bytes),
            Err(Error::Decode(DecodeError::InvalidType(_)))
        ));
    }

    #[test]
    fn test_envelope_with_short_mac() {
        let message = Message::Cipher(CipherMessage {
            session_tag: SessionTag::new().unwrap(),
            counter: 0,
            prev_counter: 0,
            ratchet_key: KeyPair::new().unwrap().public_key(),
            cipher_text: vec![0u8; 8],
        });
        let bytes = EnvelopeProto {
            version: 1,
            mac: vec![0u8; 16],
            message: message.serialise(),
        }
        .encode_to_vec();

        assert_eq!(
            Envelope::deserialise(&bytes).unwrap_err(),
            Error::Decode(DecodeError::InvalidArrayLen {
                expected: 32,
                actual: 16
            })
        );
    }

    #[test]
    fn test_envelope_garbage() {
        assert!(matches!(
            Envelope::deserialise(&[0xFF, 0xFF, 0xFF]),
            Err(Error::Decode(DecodeError::Malformed(_)))
        ));
    }

    #[test]
    fn test_envelope_unknown_version() {
        let bytes = EnvelopeProto {
            version: 2,
            mac: vec![0u8; 32],
            message: Vec::new(),
        }
        .encode_to_vec();

        assert!(matches!(
            Envelope::deserialise(&bytes),
            Err(Error::Decode(DecodeError::Malformed(_)))
        ));
    }

    #[test]
    fn test_recv_chain_rejects_unordered_cache() {
        let key = |counter| MessageKeysProto {
            cipher_key: vec![1u8; 32],
            mac_key: vec![2u8; 32],
            counter,
        };
        let proto = RecvChainProto {
            chain_key: Some(ChainKeyProto {
                idx: 10,
                key: vec![3u8; 32],
            }),
            ratchet_key: vec![4u8; 32],
            message_keys: vec![key(5), key(3)],
        };

        assert!(matches!(
            RecvChain::try_from(proto),
            Err(Error::Decode(DecodeError::Malformed(_)))
        ));
    }

    async fn established() -> (Session, Session, MemoryPreKeyStore, Vec<Envelope>) {
        let alice_identity = IdentityKeyPair::new().unwrap();
        let bob_identity = IdentityKeyPair::new().unwrap();
        let mut store = MemoryPreKeyStore::new(2).unwrap();
        let bundle = PreKeyBundle::signed(&bob_identity, store.get(0).unwrap());

        let mut alice = Session::init_from_prekey(&alice_identity, &bundle, None).unwrap();
        let sent: Vec<_> = (0..4)
            .map(|i| alice.encrypt(format!("message {i}").as_bytes()).unwrap())
            .collect();

        // Deliver counter 3 first so Bob caches the keys for 0..=2.
        let (bob, plaintext) = Session::init_from_message(&bob_identity, &mut store, &sent[3], None)
            .await
            .unwrap();
        assert_eq!(plaintext, b"message 3");

        (alice, bob, store, sent)
    }

    #[tokio::test]
    async fn test_session_round_trip() {
        let (mut alice, mut bob, mut store, sent) = established().await;
        let bob_identity = bob.local_identity.clone();

        let bytes = bob.serialise();
        let mut restored = Session::deserialise(&bob_identity, &bytes).unwrap();
        assert_eq!(restored.session_tag(), bob.session_tag());
        assert_eq!(restored.remote_identity(), bob.remote_identity());
        assert_eq!(restored.config(), bob.config());
        assert_eq!(restored.insertion_order, bob.insertion_order);
        assert_eq!(restored.serialise(), bytes);

        assert_eq!(
            bob.decrypt(&mut store, &sent[1]).await.unwrap(),
            restored.decrypt(&mut store, &sent[1]).await.unwrap()
        );

        let reply = bob.encrypt(b"reply").unwrap();
        let restored_reply = restored.encrypt(b"reply").unwrap();
        assert_eq!(reply.serialise(), restored_reply.serialise());

        assert_eq!(alice.decrypt(&mut store, &restored_reply).await.unwrap(), b"reply");
        assert!(matches!(
            restored.decrypt(&mut store, &sent[1]).await,
            Err(Error::Decrypt(DecryptError::DuplicateMessage))
        ));
    }

    #[tokio::test]
    async fn test_session_for_other_identity() {
        let (_, bob, _, _) = established().await;

        assert_eq!(
            Session::deserialise(&IdentityKeyPair::new().unwrap(), &bob.serialise()).unwrap_err(),
            Error::Decode(DecodeError::LocalIdentityChanged)
        );
    }

    #[tokio::test]
    async fn test_pending_prekey_survives_round_trip() {
        let (alice, _, _, _) = established().await;
        let alice_identity = alice.local_identity.clone();

        let restored = Session::deserialise(&alice_identity, &alice.serialise()).unwrap();
        assert_eq!(restored.pending_prekey(), alice.pending_prekey());
        assert!(restored.pending_prekey().is_some());
    }

    // Re-encodes `bytes` with a config narrowed by `narrow`.
    fn with_config(bytes: &[u8], narrow: impl FnOnce(&mut SessionConfigProto)) -> Vec<u8> {
        let mut proto = SessionProto::decode(bytes).unwrap();
        narrow(proto.config.as_mut().unwrap());
        proto.encode_to_vec()
    }

    #[tokio::test]
    async fn test_session_rejects_oversized_cache() {
        let (_, bob, _, _) = established().await;
        let bob_identity = bob.local_identity.clone();

        // Bob holds three skipped keys.
        let bytes = with_config(&bob.serialise(), |config| config.max_counter_gap = 2);
        assert!(matches!(
            Session::deserialise(&bob_identity, &bytes),
            Err(Error::Decode(DecodeError::Malformed(_)))
        ));

        let bytes = with_config(&bob.serialise(), |config| config.max_counter_gap = 3);
        assert!(Session::deserialise(&bob_identity, &bytes).is_ok());
    }

    #[tokio::test]
    async fn test_session_rejects_too_many_recv_chains() {
        let (_, bob, _, _) = established().await;
        let bob_identity = bob.local_identity.clone();

        let bytes = with_config(&bob.serialise(), |config| config.max_recv_chains = 0);
        assert!(matches!(
            Session::deserialise(&bob_identity, &bytes),
            Err(Error::Decode(DecodeError::Malformed(_)))
        ));
    }

    #[tokio::test]
    async fn test_session_rejects_too_many_states() {
        let (_, bob, _, _) = established().await;
        let bob_identity = bob.local_identity.clone();

        let bytes = with_config(&bob.serialise(), |config| config.max_session_states = 0);
        assert!(matches!(
            Session::deserialise(&bob_identity, &bytes),
            Err(Error::Decode(DecodeError::Malformed(_)))
        ));
    }
}
