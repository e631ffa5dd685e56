/*!
Crypto things

Session data persisted outside the process is sealed with AES_256_GCM
using the application `ENC_KEY`, and session cookies are only ever
stored as their hmac.
*/
use ring::aead::BoundKey;

use crate::{Result, CONFIG};

/// ring requires an implementor of `NonceSequence`,
/// which if a wrapping trait around `ring::aead::Nonce`.
/// We have to make a wrapper that can pass ownership
/// of the nonce exactly once.
struct OneNonceSequence {
    inner: Option<ring::aead::Nonce>,
}
impl OneNonceSequence {
    fn new(inner: ring::aead::Nonce) -> Self {
        Self { inner: Some(inner) }
    }
}

impl ring::aead::NonceSequence for OneNonceSequence {
    fn advance(&mut self) -> std::result::Result<ring::aead::Nonce, ring::error::Unspecified> {
        self.inner.take().ok_or(ring::error::Unspecified)
    }
}

/// Hex encoded ciphertext and the nonce it was sealed with
#[derive(Debug, Clone)]
pub struct Enc {
    pub value: String,
    pub nonce: String,
}

/// Return a `Vec` of secure random bytes of size `n`
pub fn rand_bytes(n: usize) -> Result<Vec<u8>> {
    use ring::rand::SecureRandom;
    let mut buf = vec![0; n];
    let sysrand = ring::rand::SystemRandom::new();
    sysrand
        .fill(&mut buf)
        .map_err(|_| "Error getting random bytes")?;
    Ok(buf)
}

pub fn new_nonce() -> Result<Vec<u8>> {
    rand_bytes(12)
}

/// A fresh opaque token for session ids and oauth `state` values
pub fn new_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

pub fn hmac_sign(s: &str) -> String {
    // using a 32 byte key
    let s_key = ring::hmac::Key::new(ring::hmac::HMAC_SHA256, CONFIG.enc_key.as_bytes());
    let tag = ring::hmac::sign(&s_key, s.as_bytes());
    hex::encode(tag.as_ref())
}

/// Encrypt `s` with a new nonce and the application key
pub fn encrypt(s: &str) -> Result<Enc> {
    let nonce = new_nonce()?;
    let b = encrypt_bytes(s.as_bytes(), &nonce, CONFIG.enc_key.as_bytes())?;
    Ok(Enc {
        value: hex::encode(&b),
        nonce: hex::encode(&nonce),
    })
}

pub fn decrypt(enc: &Enc) -> Result<String> {
    let nonce = hex::decode(&enc.nonce).map_err(|e| se!("nonce hex decode error {}", e))?;
    let mut value = hex::decode(&enc.value).map_err(|e| se!("value hex decode error {}", e))?;
    let bytes = decrypt_bytes(value.as_mut_slice(), &nonce, CONFIG.enc_key.as_bytes())?;
    String::from_utf8(bytes.to_owned()).map_err(|e| se!("decrypted utf8 error {}", e))
}

/// Encrypt `bytes` with the given `nonce` and `pass`
///
/// `bytes` are encrypted using AES_256_GCM, `nonce` is expected to be
/// 12-bytes, and `pass` 32-bytes
fn encrypt_bytes(bytes: &[u8], nonce: &[u8], pass: &[u8]) -> Result<Vec<u8>> {
    let alg = &ring::aead::AES_256_GCM;
    let nonce = ring::aead::Nonce::try_assume_unique_for_key(nonce)
        .map_err(|_| "Encryption nonce not unique")?;
    let nonce = OneNonceSequence::new(nonce);
    let key = ring::aead::UnboundKey::new(alg, pass).map_err(|_| "Error building sealing key")?;
    let mut key = ring::aead::SealingKey::new(key, nonce);
    let mut in_out = bytes.to_vec();
    key.seal_in_place_append_tag(ring::aead::Aad::empty(), &mut in_out)
        .map_err(|_| "Failed encrypting bytes")?;
    Ok(in_out)
}

/// Decrypt `bytes` with the given `nonce` and `pass`
fn decrypt_bytes<'a>(bytes: &'a mut [u8], nonce: &[u8], pass: &[u8]) -> Result<&'a [u8]> {
    let alg = &ring::aead::AES_256_GCM;
    let nonce = ring::aead::Nonce::try_assume_unique_for_key(nonce)
        .map_err(|_| "Decryption nonce not unique")?;
    let nonce = OneNonceSequence::new(nonce);
    let key = ring::aead::UnboundKey::new(alg, pass).map_err(|_| "Error build opening key")?;
    let mut key = ring::aead::OpeningKey::new(key, nonce);
    let out_slice = key
        .open_in_place(ring::aead::Aad::empty(), bytes)
        .map_err(|_| "Failed decrypting bytes")?;
    Ok(out_slice)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sealed_values_open_with_the_same_key() {
        let enc = encrypt(r#"{"token_info":{"access_token":"abc"}}"#).unwrap();
        assert_eq!(enc.nonce.len(), 24);
        assert_ne!(enc.value, "abc");
        let plain = decrypt(&enc).unwrap();
        assert_eq!(plain, r#"{"token_info":{"access_token":"abc"}}"#);
    }

    #[test]
    fn tampered_values_fail_to_open() {
        let mut enc = encrypt("session").unwrap();
        let mut raw = hex::decode(&enc.value).unwrap();
        raw[0] ^= 0xff;
        enc.value = hex::encode(raw);
        assert!(decrypt(&enc).is_err());
    }

    #[test]
    fn hmac_is_stable_and_distinct() {
        assert_eq!(hmac_sign("a"), hmac_sign("a"));
        assert_ne!(hmac_sign("a"), hmac_sign("b"));
        assert_eq!(hmac_sign("a").len(), 64);
    }

    #[test]
    fn tokens_are_unique() {
        let a = new_token();
        let b = new_token();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
    }
}
