/// Errors that can occur while running the session ratchet.
///
/// Decoding failures and decryption failures are kept apart: a malformed input
/// never reports the same error as a message that failed authentication.
#[derive(thiserror::Error, Debug, Clone, Eq, PartialEq)]
pub enum Error {
    /// Structurally invalid input.
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// A message was rejected by the ratchet.
    #[error("Decrypt error: {0}")]
    Decrypt(#[from] DecryptError),

    /// A cryptographic operation failed.
    #[error("Cryptographic operation failed: {0}")]
    Crypto(String),

    /// Pre-key operation failed.
    #[error("Pre-key error: {0}")]
    PreKey(String),

    /// The session has no state to encrypt with.
    #[error("Session state error")]
    Session,

    /// An internal consistency check failed.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Random number generation failed.
    #[error("Random number generation failed")]
    Random,
}

/// Malformed wire or storage input.
#[derive(thiserror::Error, Debug, Clone, Eq, PartialEq)]
pub enum DecodeError {
    /// Unknown or missing type discriminator.
    #[error("Invalid type: {0}")]
    InvalidType(String),

    /// A fixed-length field had the wrong length.
    #[error("Invalid array length: expected {expected}, got {actual}")]
    InvalidArrayLen {
        /// Expected length in bytes.
        expected: usize,
        /// Actual length in bytes.
        actual: usize,
    },

    /// The session was serialised for a different local identity.
    #[error("Local identity changed")]
    LocalIdentityChanged,

    /// The bytes could not be parsed at all.
    #[error("Malformed input: {0}")]
    Malformed(String),
}

/// Reasons a message could not be decrypted.
///
/// All of these are terminal for the message in question. Retrying the same
/// bytes reproduces the same error.
#[derive(thiserror::Error, Debug, Clone, Eq, PartialEq)]
pub enum DecryptError {
    /// The identity key in a pre-key message is not the session's remote identity.
    #[error("Remote identity changed")]
    RemoteIdentityChanged,

    /// Envelope MAC verification failed.
    #[error("Invalid signature")]
    InvalidSignature,

    /// The message does not fit any known session state.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// The message keys for this counter were already consumed.
    #[error("Duplicate message")]
    DuplicateMessage,

    /// The counter is too far ahead of the receive chain.
    #[error(
        "Too distant future: chain at {chain_counter}, message at {message_counter}, fresh chain: {fresh_chain}"
    )]
    TooDistantFuture {
        /// Current receive chain counter.
        chain_counter: u32,
        /// Counter carried by the message.
        message_counter: u32,
        /// Whether the chain had not received anything yet.
        fresh_chain: bool,
    },

    /// The counter is older than every cached message key.
    #[error("Outdated message: oldest staged counter is {oldest}, message counter is {message_counter}")]
    OutdatedMessage {
        /// Smallest counter still cached.
        oldest: u32,
        /// Counter carried by the message.
        message_counter: u32,
    },

    /// The referenced pre-key is not in the store.
    #[error("Pre-key {0} not found")]
    PrekeyNotFound(u16),
}

impl From<aes_gcm_siv::Error> for Error {
    fn from(value: aes_gcm_siv::Error) -> Self {
        Self::Crypto(value.to_string())
    }
}

impl From<prost::DecodeError> for Error {
    fn from(value: prost::DecodeError) -> Self {
        Self::Decode(DecodeError::Malformed(value.to_string()))
    }
}
