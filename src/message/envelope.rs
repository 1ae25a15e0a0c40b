use crate::{Error, MacKey, Message};

/// Authenticated container for a [`Message`].
///
/// The MAC covers the exact serialised bytes of the inner message, which are kept
/// alongside the decoded message so verification never re-encodes.
#[derive(Clone, Debug)]
pub struct Envelope {
    pub(crate) version: u16,
    pub(crate) mac: [u8; 32],
    pub(crate) message: Message,
    pub(crate) message_enc: Vec<u8>,
}

impl Envelope {
    /// Current envelope format version.
    pub const VERSION: u16 = 1;

    /// Serialises `message` and authenticates it with `mac_key`.
    pub fn new(mac_key: &MacKey, message: Message) -> Result<Self, Error> {
        let message_enc = message.serialise();
        let mac = mac_key.sign(&message_enc)?;

        Ok(Self {
            version: Self::VERSION,
            mac,
            message,
            message_enc,
        })
    }

    /// Checks the envelope MAC.
    pub fn verify(&self, mac_key: &MacKey) -> bool {
        mac_key.verify(&self.mac, &self.message_enc)
    }

    /// Returns the format version.
    pub fn version(&self) -> u16 {
        self.version
    }

    /// Returns the inner message.
    pub fn message(&self) -> &Message {
        &self.message
    }
}
