//! Encrypted filename transform.
//!
//! Filenames are AES-SIV encrypted with the parent directory's IV as
//! associated data, then base64url encoded (`Raw64` selects the unpadded
//! alphabet). SIV is deterministic, so decryption is referentially
//! transparent in `(cipher_name, iv)` and results can be cached forever.
//!
//! Decryption failures are how foreign files are recognized: directory
//! iteration silently skips any entry whose name does not decrypt, which is
//! also what keeps `gocryptfs.diriv` itself out of plaintext listings.

use aes_siv::aead::generic_array::GenericArray;
use aes_siv::{siv::Aes256Siv, KeyInit};
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine as _;
use hkdf::Hkdf;
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::coalesce::NameDecrypter;

/// HKDF info string for the filename subkey.
const NAME_KEY_INFO: &[u8] = b"AES-SIV filename encryption";

/// Errors from filename encryption or decryption.
///
/// `Clone` so a failure can be recorded in a coalescer cache entry and
/// shared with every waiter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NameError {
    /// The encrypted name is not valid base64url.
    #[error("invalid encrypted name encoding: {0}")]
    BadEncoding(String),
    /// Authentication failed: tampered name, wrong key, or wrong IV.
    #[error("failed to decrypt name: authentication failed")]
    DecryptFailed,
    /// The decrypted bytes are not valid UTF-8.
    #[error("decrypted name is not valid UTF-8")]
    NotUtf8,
    /// Encryption failed unexpectedly.
    #[error("failed to encrypt name")]
    EncryptFailed,
}

/// Filename encrypter/decrypter keyed by an HKDF subkey of the master key.
pub struct NameTransform {
    name_key: Zeroizing<[u8; 64]>,
    raw64: bool,
}

impl NameTransform {
    /// Derive the filename subkey from the master key. The caller may (and
    /// should) zeroize the master key afterwards.
    pub fn new(master_key: &[u8; 32], raw64: bool) -> Self {
        let mut name_key = Zeroizing::new([0u8; 64]);
        Hkdf::<Sha256>::new(None, master_key)
            .expand(NAME_KEY_INFO, name_key.as_mut_slice())
            .expect("64 bytes is a valid HKDF-SHA256 output length");
        NameTransform { name_key, raw64 }
    }

    fn decode(&self, name: &str) -> Result<Vec<u8>, NameError> {
        let result = if self.raw64 {
            URL_SAFE_NO_PAD.decode(name)
        } else {
            URL_SAFE.decode(name)
        };
        result.map_err(|e| NameError::BadEncoding(e.to_string()))
    }

    fn encode(&self, data: &[u8]) -> String {
        if self.raw64 {
            URL_SAFE_NO_PAD.encode(data)
        } else {
            URL_SAFE.encode(data)
        }
    }

    /// Decrypt one encrypted filename under the given directory IV.
    pub fn decrypt_name(&self, cipher_name: &str, iv: &[u8]) -> Result<String, NameError> {
        let decoded = self.decode(cipher_name)?;

        let mut cipher = Aes256Siv::new(GenericArray::from_slice(self.name_key.as_slice()));
        let associated_data: &[&[u8]] = &[iv];
        let decrypted = cipher
            .decrypt(associated_data, &decoded)
            .map_err(|_| NameError::DecryptFailed)?;

        String::from_utf8(decrypted).map_err(|_| NameError::NotUtf8)
    }

    /// Encrypt one plaintext filename under the given directory IV.
    pub fn encrypt_name(&self, plain_name: &str, iv: &[u8]) -> Result<String, NameError> {
        let mut cipher = Aes256Siv::new(GenericArray::from_slice(self.name_key.as_slice()));
        let associated_data: &[&[u8]] = &[iv];
        let encrypted = cipher
            .encrypt(associated_data, plain_name.as_bytes())
            .map_err(|_| NameError::EncryptFailed)?;

        Ok(self.encode(&encrypted))
    }
}

impl NameDecrypter for NameTransform {
    fn decrypt_name(&self, cipher_name: &str, iv: &[u8]) -> Result<String, NameError> {
        NameTransform::decrypt_name(self, cipher_name, iv)
    }
}
