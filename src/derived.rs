use crate::Error;
use aes_gcm_siv::aead::Aead;
use aes_gcm_siv::{Aes256GcmSiv, KeyInit, Nonce};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

type HmacSha256 = Hmac<Sha256>;

/// Symmetric key used to encrypt message payloads (AES-256-GCM-SIV).
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct CipherKey([u8; 32]);

impl CipherKey {
    pub(crate) fn new(key: [u8; 32]) -> Self {
        Self(key)
    }

    pub(crate) fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Encrypts `plaintext` under this key and the given nonce.
    pub fn encrypt(&self, plaintext: &[u8], nonce: &[u8; 12]) -> Result<Vec<u8>, Error> {
        let cipher = Aes256GcmSiv::new(aes_gcm_siv::Key::<Aes256GcmSiv>::from_slice(&self.0));
        Ok(cipher.encrypt(Nonce::from_slice(nonce), plaintext)?)
    }

    /// Decrypts `ciphertext` under this key and the given nonce.
    pub fn decrypt(&self, ciphertext: &[u8], nonce: &[u8; 12]) -> Result<Vec<u8>, Error> {
        let cipher = Aes256GcmSiv::new(aes_gcm_siv::Key::<Aes256GcmSiv>::from_slice(&self.0));
        Ok(cipher.decrypt(Nonce::from_slice(nonce), ciphertext)?)
    }
}

/// HMAC-SHA256 key. Authenticates envelopes and drives chain key advancement.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MacKey([u8; 32]);

impl MacKey {
    /// Wraps raw key bytes.
    pub fn new(key: [u8; 32]) -> Self {
        Self(key)
    }

    pub(crate) fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Computes the MAC of `msg`.
    pub fn sign(&self, msg: &[u8]) -> Result<[u8; 32], Error> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.0)
            .map_err(|err| Error::Crypto(err.to_string()))?;
        mac.update(msg);

        let mut signature = [0u8; 32];
        signature.copy_from_slice(&mac.finalize().into_bytes());
        Ok(signature)
    }

    /// Checks `signature` against the MAC of `msg` in constant time.
    pub fn verify(&self, signature: &[u8], msg: &[u8]) -> bool {
        match <HmacSha256 as Mac>::new_from_slice(&self.0) {
            Ok(mut mac) => {
                mac.update(msg);
                mac.verify_slice(signature).is_ok()
            }
            Err(_) => false,
        }
    }
}

/// Output of one KDF invocation: a cipher key and a MAC key.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DerivedSecrets {
    cipher_key: [u8; 32],
    mac_key: [u8; 32],
}

impl DerivedSecrets {
    /// HKDF-SHA256 over `input` with `salt` and the context label `info`.
    pub fn kdf(input: &[u8], salt: &[u8], info: &[u8]) -> Result<Self, Error> {
        Self::expand(Hkdf::<Sha256>::new(Some(salt), input), info)
    }

    /// HKDF-SHA256 over `input` with the default all-zero salt.
    pub fn kdf_without_salt(input: &[u8], info: &[u8]) -> Result<Self, Error> {
        Self::expand(Hkdf::<Sha256>::new(None, input), info)
    }

    fn expand(hkdf: Hkdf<Sha256>, info: &[u8]) -> Result<Self, Error> {
        let mut okm = [0u8; 64];
        hkdf.expand(info, &mut okm)
            .map_err(|_| Error::Crypto("HKDF expansion failed".to_string()))?;

        let mut secrets = Self {
            cipher_key: [0u8; 32],
            mac_key: [0u8; 32],
        };
        secrets.cipher_key.copy_from_slice(&okm[0..32]);
        secrets.mac_key.copy_from_slice(&okm[32..64]);
        okm.zeroize();

        Ok(secrets)
    }

    /// Returns the derived cipher key.
    pub fn cipher_key(&self) -> CipherKey {
        CipherKey(self.cipher_key)
    }

    /// Returns the derived MAC key.
    pub fn mac_key(&self) -> MacKey {
        MacKey(self.mac_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kdf_is_deterministic() {
        let a = DerivedSecrets::kdf(b"input", b"salt", b"info").unwrap();
        let b = DerivedSecrets::kdf(b"input", b"salt", b"info").unwrap();

        assert_eq!(a.cipher_key().as_bytes(), b.cipher_key().as_bytes());
        assert_eq!(a.mac_key().as_bytes(), b.mac_key().as_bytes());
        assert_ne!(a.cipher_key().as_bytes(), a.mac_key().as_bytes());
    }

    #[test]
    fn test_kdf_context_separation() {
        let base = DerivedSecrets::kdf(b"input", b"salt", b"info").unwrap();
        let other_salt = DerivedSecrets::kdf(b"input", b"pepper", b"info").unwrap();
        let other_info = DerivedSecrets::kdf(b"input", b"salt", b"other").unwrap();
        let no_salt = DerivedSecrets::kdf_without_salt(b"input", b"info").unwrap();

        assert_ne!(base.cipher_key().as_bytes(), other_salt.cipher_key().as_bytes());
        assert_ne!(base.cipher_key().as_bytes(), other_info.cipher_key().as_bytes());
        assert_ne!(base.cipher_key().as_bytes(), no_salt.cipher_key().as_bytes());
    }

    #[test]
    fn test_mac_sign_verify() {
        let key = MacKey::new([1u8; 32]);
        let signature = key.sign(b"payload").unwrap();

        assert!(key.verify(&signature, b"payload"));
        assert!(!key.verify(&signature, b"tampered"));
        assert!(!MacKey::new([2u8; 32]).verify(&signature, b"payload"));
        assert!(!key.verify(&signature[..16], b"payload"));
    }

    #[test]
    fn test_cipher_round_trip() {
        let key = CipherKey::new([7u8; 32]);
        let nonce = [3u8; 12];

        let ciphertext = key.encrypt(b"secret", &nonce).unwrap();
        assert_eq!(key.decrypt(&ciphertext, &nonce).unwrap(), b"secret");
        assert!(key.decrypt(&ciphertext, &[4u8; 12]).is_err());
    }
}
