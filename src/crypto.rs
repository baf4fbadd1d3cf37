//! Tenant-secret encryption: AES-256-CBC with an OpenSSL `EVP_BytesToKey`-style key/IV
//! derivation, compatible with payloads produced by CryptoJS's `AES.encrypt(plaintext, passphrase)`
//! (spec §6 "Environment", §8 "Encrypt then decrypt ... accepts legacy AES-CBC payloads produced
//! by CryptoJS-compatible encoders").
//!
//! Wire format: `"Salted__" || salt(8) || ciphertext`, base64-encoded, matching CryptoJS's default
//! `OpenSSL` kdf envelope.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use md5::{Digest, Md5};

use crate::error::{StorageError, Result};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const SALT_MAGIC: &[u8] = b"Salted__";
const SALT_LEN: usize = 8;
const KEY_LEN: usize = 32;
const IV_LEN: usize = 16;

/// Derives `(key, iv)` from a passphrase and salt using the OpenSSL `EVP_BytesToKey` scheme with
/// MD5, the same derivation CryptoJS's `OpenSSL`-kdf mode uses.
fn evp_bytes_to_key(passphrase: &[u8], salt: &[u8]) -> ([u8; KEY_LEN], [u8; IV_LEN]) {
    let mut derived = Vec::with_capacity(KEY_LEN + IV_LEN);
    let mut prev: Vec<u8> = Vec::new();
    while derived.len() < KEY_LEN + IV_LEN {
        let mut hasher = Md5::new();
        hasher.update(&prev);
        hasher.update(passphrase);
        hasher.update(salt);
        let digest = hasher.finalize();
        prev = digest.to_vec();
        derived.extend_from_slice(&prev);
    }
    let mut key = [0u8; KEY_LEN];
    let mut iv = [0u8; IV_LEN];
    key.copy_from_slice(&derived[..KEY_LEN]);
    iv.copy_from_slice(&derived[KEY_LEN..KEY_LEN + IV_LEN]);
    (key, iv)
}

/// Encrypts `plaintext` under `passphrase`, returning the base64 `Salted__`-prefixed envelope.
pub fn encrypt(passphrase: &str, plaintext: &[u8]) -> Result<String> {
    let mut salt = [0u8; SALT_LEN];
    rand::Rng::fill(&mut rand::thread_rng(), &mut salt);
    let (key, iv) = evp_bytes_to_key(passphrase.as_bytes(), &salt);

    let ciphertext = Aes256CbcEnc::new(&key.into(), &iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut envelope = Vec::with_capacity(SALT_MAGIC.len() + SALT_LEN + ciphertext.len());
    envelope.extend_from_slice(SALT_MAGIC);
    envelope.extend_from_slice(&salt);
    envelope.extend_from_slice(&ciphertext);

    Ok(base64::Engine::encode(&base64::engine::general_purpose::STANDARD, envelope))
}

/// Decrypts a `Salted__` envelope produced by [`encrypt`] or by a CryptoJS-compatible encoder.
pub fn decrypt(passphrase: &str, encoded: &str) -> Result<Vec<u8>> {
    let raw = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, encoded)
        .map_err(|e| StorageError::InvalidParameter(format!("malformed ciphertext: {e}")))?;

    if raw.len() < SALT_MAGIC.len() + SALT_LEN || &raw[..SALT_MAGIC.len()] != SALT_MAGIC {
        return Err(StorageError::InvalidParameter("ciphertext is missing the Salted__ header".into()));
    }

    let salt = &raw[SALT_MAGIC.len()..SALT_MAGIC.len() + SALT_LEN];
    let ciphertext = &raw[SALT_MAGIC.len() + SALT_LEN..];
    let (key, iv) = evp_bytes_to_key(passphrase.as_bytes(), salt);

    Aes256CbcDec::new(&key.into(), &iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| StorageError::InvalidParameter("ciphertext failed to decrypt/unpad".into()))
}

pub fn encrypt_str(passphrase: &str, plaintext: &str) -> Result<String> {
    encrypt(passphrase, plaintext.as_bytes())
}

pub fn decrypt_str(passphrase: &str, encoded: &str) -> Result<String> {
    let bytes = decrypt(passphrase, encoded)?;
    String::from_utf8(bytes).map_err(|e| StorageError::InternalError(format!("decrypted payload is not utf-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_is_identity() {
        let secret = "correct horse battery staple";
        let plaintext = "postgresql://tenant:pw@db.internal:5432/tenant_7";
        let encrypted = encrypt_str(secret, plaintext).expect("encrypt");
        let decrypted = decrypt_str(secret, &encrypted).expect("decrypt");
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn wrong_passphrase_fails_to_decrypt() {
        let encrypted = encrypt_str("right-key", "some secret").expect("encrypt");
        assert!(decrypt_str("wrong-key", &encrypted).is_err());
    }

    #[test]
    fn rejects_payload_without_salted_header() {
        let bogus = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, b"not an envelope at all!!");
        assert!(decrypt_str("any-key", &bogus).is_err());
    }
}
