//! AES wrapper that supports variable length strings in CBC mode.
//!
//! Used for session-scoped token material: the key is derived from the
//! session token, not a raw high-entropy key, so keys of arbitrary length
//! are normalized to the cipher key size. A fresh IV is generated per call
//! and prefixed to the ciphertext; the whole value is base64-encoded.
//! Two encryptions of the same plaintext therefore never compare equal,
//! which the antiforgery scheme relies on.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::{rngs::OsRng, RngCore};
use thiserror::Error;

const BLOCK_SIZE: usize = 16;
const KEY_SIZE: usize = 32;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("invalid base64 encoding")]
    Encoding,
    #[error("ciphertext too short")]
    TooShort,
    #[error("decryption failed")]
    Decryption,
    #[error("plaintext is not valid utf-8")]
    Utf8,
}

/// Encrypts `plaintext` under `key`, returning base64 of `iv || ciphertext`.
///
/// Every call draws a fresh IV, so repeated calls with the same input
/// produce different outputs.
#[must_use]
pub fn encrypt(plaintext: &str, key: &str) -> String {
    let key = normalize_key(key);
    let mut iv = [0u8; BLOCK_SIZE];
    OsRng.fill_bytes(&mut iv);

    let ciphertext = Aes256CbcEnc::new(&key.into(), &iv.into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

    let mut raw = Vec::with_capacity(BLOCK_SIZE + ciphertext.len());
    raw.extend_from_slice(&iv);
    raw.extend_from_slice(&ciphertext);
    STANDARD.encode(raw)
}

/// Decrypts a value produced by [`encrypt`] with the same key.
///
/// # Errors
/// Returns an error for malformed encodings, truncated input, a wrong key,
/// or padding failures.
pub fn decrypt(encrypted: &str, key: &str) -> Result<String, CipherError> {
    let key = normalize_key(key);
    let raw = STANDARD
        .decode(encrypted)
        .map_err(|_| CipherError::Encoding)?;
    if raw.len() < BLOCK_SIZE {
        return Err(CipherError::TooShort);
    }

    let (iv, data) = raw.split_at(BLOCK_SIZE);
    let plaintext = Aes256CbcDec::new_from_slices(&key, iv)
        .map_err(|_| CipherError::Decryption)?
        .decrypt_padded_vec_mut::<Pkcs7>(data)
        .map_err(|_| CipherError::Decryption)?;

    String::from_utf8(plaintext).map_err(|_| CipherError::Utf8)
}

/// Decryption that never fails loudly: any malformed input, wrong key, or
/// empty plaintext yields `None`.
#[must_use]
pub fn try_decrypt(encrypted: &str, key: &str) -> Option<String> {
    match decrypt(encrypted, key) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => None,
    }
}

/// Truncates long keys to the cipher key size, zero-pads short ones.
fn normalize_key(key: &str) -> [u8; KEY_SIZE] {
    let mut normalized = [0u8; KEY_SIZE];
    let bytes = key.as_bytes();
    let len = bytes.len().min(KEY_SIZE);
    normalized[..len].copy_from_slice(&bytes[..len]);
    normalized
}

#[cfg(test)]
mod tests {
    use super::{decrypt, encrypt, try_decrypt, CipherError};

    #[test]
    #[allow(clippy::unwrap_used)]
    fn encrypt_decrypt_roundtrip() {
        let encrypted = encrypt("some session bound value", "a-session-token");
        let decrypted = decrypt(&encrypted, "a-session-token").unwrap();
        assert_eq!(decrypted, "some session bound value");
    }

    #[test]
    fn repeated_encryption_differs() {
        let first = encrypt("same value", "same key");
        let second = encrypt("same value", "same key");
        assert_ne!(first, second);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn keys_of_any_length_roundtrip() {
        let long_key = "long".repeat(32);
        for key in ["", "k", "0123456789abcdef", long_key.as_str()] {
            let encrypted = encrypt("payload", key);
            assert_eq!(decrypt(&encrypted, key).unwrap(), "payload");
        }
    }

    #[test]
    fn wrong_key_does_not_reveal_plaintext() {
        let encrypted = encrypt("payload", "the right key");
        // A wrong key may occasionally survive padding checks; it must never
        // yield the original plaintext.
        assert_ne!(
            try_decrypt(&encrypted, "the wrong key"),
            Some("payload".to_string())
        );
    }

    #[test]
    fn try_decrypt_is_total_on_garbage() {
        assert_eq!(try_decrypt("not even base64!!", "key"), None);
        assert_eq!(try_decrypt("", "key"), None);
        // Valid base64, but too short to carry an IV.
        assert_eq!(try_decrypt("aGVsbG8=", "key"), None);
        // Valid base64 long enough to look like iv+block: must not panic,
        // and must not decrypt to anything meaningful.
        let garbage = try_decrypt("AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=", "key");
        assert_ne!(garbage.as_deref(), Some("payload"));
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn empty_plaintext_roundtrips_but_try_decrypt_rejects_it() {
        let encrypted = encrypt("", "key");
        assert_eq!(decrypt(&encrypted, "key").unwrap(), "");
        assert_eq!(try_decrypt(&encrypted, "key"), None);
    }

    #[test]
    fn decrypt_reports_encoding_errors() {
        assert!(matches!(
            decrypt("%%%", "key"),
            Err(CipherError::Encoding)
        ));
        assert!(matches!(
            decrypt("aGVsbG8=", "key"),
            Err(CipherError::TooShort)
        ));
    }
}
