use crate::{Error, generate_random_seed};
use x25519_dalek::{PublicKey, SharedSecret, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// An X25519 public key, encoded as its raw 32 bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct X25519PublicKey(PublicKey);

impl X25519PublicKey {
    /// Returns the raw key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }

    /// Returns a copy of the raw key bytes.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }
}

impl From<[u8; 32]> for X25519PublicKey {
    fn from(bytes: [u8; 32]) -> Self {
        Self(PublicKey::from(bytes))
    }
}

impl From<PublicKey> for X25519PublicKey {
    fn from(value: PublicKey) -> Self {
        Self(value)
    }
}

impl AsRef<PublicKey> for X25519PublicKey {
    fn as_ref(&self) -> &PublicKey {
        &self.0
    }
}

/// An X25519 private key. Wiped on drop.
#[derive(Clone)]
pub struct X25519Secret(StaticSecret);

impl X25519Secret {
    pub(crate) fn dh(&self, public_key: &X25519PublicKey) -> SharedSecret {
        self.0.diffie_hellman(public_key.as_ref())
    }

    pub(crate) fn public_key(&self) -> X25519PublicKey {
        let pub_key = PublicKey::from(&self.0);
        pub_key.into()
    }

    pub(crate) fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }
}

impl From<[u8; 32]> for X25519Secret {
    fn from(mut bytes: [u8; 32]) -> Self {
        let secret = Self(StaticSecret::from(bytes));
        bytes.zeroize();
        secret
    }
}

impl Zeroize for X25519Secret {
    fn zeroize(&mut self) {
        self.0.zeroize()
    }
}

impl ZeroizeOnDrop for X25519Secret {}

/// An X25519 key pair used for pre-keys, base keys and ratchet keys.
#[derive(Clone)]
pub struct KeyPair {
    secret: X25519Secret,
    public: X25519PublicKey,
}

impl KeyPair {
    /// Generates a fresh key pair from the operating system RNG.
    pub fn new() -> Result<Self, Error> {
        Ok(Self::from(X25519Secret::from(generate_random_seed()?)))
    }

    /// Returns the public half.
    pub fn public_key(&self) -> X25519PublicKey {
        self.public
    }

    pub(crate) fn secret(&self) -> &X25519Secret {
        &self.secret
    }

    /// Diffie-Hellman with the other party's public key.
    pub(crate) fn dh(&self, public_key: &X25519PublicKey) -> SharedSecret {
        self.secret.dh(public_key)
    }
}

impl From<X25519Secret> for KeyPair {
    fn from(secret: X25519Secret) -> Self {
        let public = secret.public_key();
        Self { secret, public }
    }
}
