//! File content codec.
//!
//! An encrypted file is an 18-byte header (2-byte version, 16-byte random
//! file id) followed by independently sealed blocks: each 4096-byte
//! plaintext block becomes 16-byte nonce ‖ ciphertext ‖ 16-byte tag under
//! AES-256-GCM with a 128-bit nonce and `be64(block_no) ‖ file_id` as
//! associated data, binding every block to its position and its file.
//!
//! The size projection (`cipher_size_to_plain_size`) is pure arithmetic over
//! this geometry, which lets listings report plaintext sizes without
//! touching file contents.

use aes_gcm::aead::generic_array::typenum::U16;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::aes::Aes256;
use aes_gcm::{AesGcm, Key, Nonce};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;
use tracing::trace;
use zeroize::Zeroizing;

/// AES-256-GCM with the format's 128-bit nonce.
pub(crate) type ContentCipher = AesGcm<Aes256, U16>;

/// Length of the file header: version plus file id.
pub const HEADER_LEN: usize = 18;
/// The only header version this codec understands.
const HEADER_VERSION: u16 = 2;
/// Plaintext bytes per block.
pub const BLOCK_SIZE: usize = 4096;
/// Per-block ciphertext overhead: nonce plus GCM tag.
pub const BLOCK_OVERHEAD: usize = 32;
/// Ciphertext bytes per full block.
pub const CIPHER_BLOCK_SIZE: usize = BLOCK_SIZE + BLOCK_OVERHEAD;

const NONCE_LEN: usize = 16;
const FILE_ID_LEN: usize = 16;

/// HKDF info string for the content subkey.
const CONTENT_KEY_INFO: &[u8] = b"AES-GCM file content encryption";

/// Errors from content decryption.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The content is shorter than the fixed header.
    #[error("content of {actual} bytes is shorter than the {HEADER_LEN}-byte header")]
    HeaderTruncated { actual: usize },
    /// The header parsed but is not one this codec understands.
    #[error("invalid content header: {0}")]
    BadHeader(String),
    /// A ciphertext block is shorter than its fixed overhead.
    #[error("ciphertext block {block} is too short ({len} bytes)")]
    TruncatedBlock { block: u64, len: usize },
    /// Authentication failed on a block: tampering or wrong key.
    #[error("failed to decrypt block {block}: authentication failed")]
    DecryptFailed { block: u64 },
    /// Encryption failed unexpectedly.
    #[error("failed to encrypt block {block}")]
    EncryptFailed { block: u64 },
}

/// Parsed file header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub version: u16,
    /// Per-file random id, mixed into every block's associated data.
    pub file_id: [u8; FILE_ID_LEN],
}

/// Content encrypter/decrypter keyed by a subkey of the master key.
///
/// Self-contained once constructed: the master key is only needed here, and
/// the caller is expected to zeroize it after building the codec.
pub struct ContentCodec {
    content_key: Zeroizing<[u8; 32]>,
}

impl ContentCodec {
    /// Derive the content subkey. With `hkdf` unset the master key is used
    /// directly, matching vaults created without the `HKDF` feature flag.
    pub fn new(master_key: &[u8; 32], hkdf: bool) -> Self {
        let mut content_key = Zeroizing::new([0u8; 32]);
        if hkdf {
            Hkdf::<Sha256>::new(None, master_key)
                .expand(CONTENT_KEY_INFO, content_key.as_mut_slice())
                .expect("32 bytes is a valid HKDF-SHA256 output length");
        } else {
            content_key.copy_from_slice(master_key);
        }
        ContentCodec { content_key }
    }

    /// Pure projection from ciphertext length to plaintext length.
    pub fn cipher_size_to_plain_size(&self, cipher_size: u64) -> u64 {
        if cipher_size <= HEADER_LEN as u64 {
            return 0;
        }
        let payload = cipher_size - HEADER_LEN as u64;
        let blocks = payload.div_ceil(CIPHER_BLOCK_SIZE as u64);
        payload.saturating_sub(blocks * BLOCK_OVERHEAD as u64)
    }

    /// Parse the fixed-size header. Fails on truncated input.
    pub fn parse_header(bytes: &[u8]) -> Result<FileHeader, CodecError> {
        if bytes.len() < HEADER_LEN {
            return Err(CodecError::HeaderTruncated {
                actual: bytes.len(),
            });
        }
        let version = u16::from_be_bytes([bytes[0], bytes[1]]);
        if version != HEADER_VERSION {
            return Err(CodecError::BadHeader(format!(
                "unsupported version {version}"
            )));
        }
        let mut file_id = [0u8; FILE_ID_LEN];
        file_id.copy_from_slice(&bytes[2..HEADER_LEN]);
        Ok(FileHeader { version, file_id })
    }

    /// Decrypt a block-aligned ciphertext run that starts at block
    /// `first_block` of the file identified by `file_id`.
    pub fn decrypt_blocks(
        &self,
        ciphertext: &[u8],
        first_block: u64,
        file_id: &[u8; FILE_ID_LEN],
    ) -> Result<Vec<u8>, CodecError> {
        let cipher = ContentCipher::new(Key::<ContentCipher>::from_slice(self.content_key.as_slice()));
        let mut plaintext =
            Vec::with_capacity(self.cipher_size_to_plain_size(ciphertext.len() as u64) as usize);

        for (i, block) in ciphertext.chunks(CIPHER_BLOCK_SIZE).enumerate() {
            let block_no = first_block + i as u64;
            if block.len() <= BLOCK_OVERHEAD {
                return Err(CodecError::TruncatedBlock {
                    block: block_no,
                    len: block.len(),
                });
            }

            let nonce = Nonce::<U16>::from_slice(&block[..NONCE_LEN]);
            let mut aad = [0u8; 8 + FILE_ID_LEN];
            aad[..8].copy_from_slice(&block_no.to_be_bytes());
            aad[8..].copy_from_slice(file_id);

            let decrypted = cipher
                .decrypt(
                    nonce,
                    Payload {
                        msg: &block[NONCE_LEN..],
                        aad: &aad,
                    },
                )
                .map_err(|_| CodecError::DecryptFailed { block: block_no })?;
            plaintext.extend_from_slice(&decrypted);
        }

        trace!(
            blocks = ciphertext.len().div_ceil(CIPHER_BLOCK_SIZE),
            plaintext_len = plaintext.len(),
            "decrypted content blocks"
        );
        Ok(plaintext)
    }

    /// Decrypt a whole file: parse the header, then decrypt every block.
    pub fn decrypt_file(&self, content: &[u8]) -> Result<Vec<u8>, CodecError> {
        if content.len() <= HEADER_LEN {
            return Err(CodecError::HeaderTruncated {
                actual: content.len(),
            });
        }
        let header = Self::parse_header(content)?;
        self.decrypt_blocks(&content[HEADER_LEN..], 0, &header.file_id)
    }

    /// Encrypt a whole file under a fresh random file id. Used by vault
    /// creation tooling and test fixtures; the read path never calls it.
    pub fn encrypt_file(
        &self,
        plaintext: &[u8],
        rng: &mut impl RngCore,
    ) -> Result<Vec<u8>, CodecError> {
        let mut file_id = [0u8; FILE_ID_LEN];
        rng.fill_bytes(&mut file_id);

        let mut out =
            Vec::with_capacity(HEADER_LEN + plaintext.len().div_ceil(BLOCK_SIZE) * CIPHER_BLOCK_SIZE);
        out.extend_from_slice(&HEADER_VERSION.to_be_bytes());
        out.extend_from_slice(&file_id);

        let cipher = ContentCipher::new(Key::<ContentCipher>::from_slice(self.content_key.as_slice()));
        for (i, block) in plaintext.chunks(BLOCK_SIZE).enumerate() {
            let block_no = i as u64;
            let mut nonce = [0u8; NONCE_LEN];
            rng.fill_bytes(&mut nonce);

            let mut aad = [0u8; 8 + FILE_ID_LEN];
            aad[..8].copy_from_slice(&block_no.to_be_bytes());
            aad[8..].copy_from_slice(&file_id);

            let sealed = cipher
                .encrypt(
                    Nonce::<U16>::from_slice(&nonce),
                    Payload {
                        msg: block,
                        aad: &aad,
                    },
                )
                .map_err(|_| CodecError::EncryptFailed { block: block_no })?;
            out.extend_from_slice(&nonce);
            out.extend_from_slice(&sealed);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    fn codec() -> ContentCodec {
        ContentCodec::new(&[9u8; 32], true)
    }

    #[test]
    fn size_projection_matches_block_geometry() {
        let c = codec();
        assert_eq!(c.cipher_size_to_plain_size(0), 0);
        assert_eq!(c.cipher_size_to_plain_size(HEADER_LEN as u64), 0);
        // One byte of plaintext: header + nonce + 1 + tag.
        assert_eq!(c.cipher_size_to_plain_size((HEADER_LEN + BLOCK_OVERHEAD + 1) as u64), 1);
        // One full block.
        assert_eq!(
            c.cipher_size_to_plain_size((HEADER_LEN + CIPHER_BLOCK_SIZE) as u64),
            BLOCK_SIZE as u64
        );
        // One full block plus one byte.
        assert_eq!(
            c.cipher_size_to_plain_size((HEADER_LEN + CIPHER_BLOCK_SIZE + BLOCK_OVERHEAD + 1) as u64),
            BLOCK_SIZE as u64 + 1
        );
    }

    #[test]
    fn decrypts_multi_block_content() {
        let c = codec();
        let mut rng = StdRng::seed_from_u64(42);
        let plaintext: Vec<u8> = (0..BLOCK_SIZE * 2 + 123).map(|i| (i % 251) as u8).collect();

        let encrypted = c.encrypt_file(&plaintext, &mut rng).unwrap();
        assert_eq!(
            c.cipher_size_to_plain_size(encrypted.len() as u64),
            plaintext.len() as u64
        );
        assert_eq!(c.decrypt_file(&encrypted).unwrap(), plaintext);
    }

    #[test]
    fn truncated_header_is_rejected() {
        let c = codec();
        assert!(matches!(
            c.decrypt_file(&[0u8; HEADER_LEN]),
            Err(CodecError::HeaderTruncated { actual: 18 })
        ));
        assert!(matches!(
            ContentCodec::parse_header(&[2u8; 5]),
            Err(CodecError::HeaderTruncated { actual: 5 })
        ));
    }

    #[test]
    fn unknown_header_version_is_rejected() {
        let mut content = vec![0u8; HEADER_LEN + 40];
        content[1] = 9;
        assert!(matches!(
            codec().decrypt_file(&content),
            Err(CodecError::BadHeader(_))
        ));
    }

    #[test]
    fn tampered_block_fails_authentication() {
        let c = codec();
        let mut rng = StdRng::seed_from_u64(7);
        let mut encrypted = c.encrypt_file(b"attack at dawn", &mut rng).unwrap();
        let last = encrypted.len() - 1;
        encrypted[last] ^= 1;

        assert!(matches!(
            c.decrypt_file(&encrypted),
            Err(CodecError::DecryptFailed { block: 0 })
        ));
    }

    #[test]
    fn block_bound_to_position() {
        // Swapping two well-formed blocks must break authentication because
        // the block number is part of the associated data.
        let c = codec();
        let mut rng = StdRng::seed_from_u64(8);
        let plaintext = vec![0xA5u8; BLOCK_SIZE * 2];
        let encrypted = c.encrypt_file(&plaintext, &mut rng).unwrap();

        let mut swapped = encrypted.clone();
        swapped[HEADER_LEN..HEADER_LEN + CIPHER_BLOCK_SIZE]
            .copy_from_slice(&encrypted[HEADER_LEN + CIPHER_BLOCK_SIZE..]);
        swapped[HEADER_LEN + CIPHER_BLOCK_SIZE..]
            .copy_from_slice(&encrypted[HEADER_LEN..HEADER_LEN + CIPHER_BLOCK_SIZE]);

        assert!(matches!(
            c.decrypt_file(&swapped),
            Err(CodecError::DecryptFailed { .. })
        ));
    }

    #[test]
    fn hkdf_and_direct_keys_differ() {
        let mut rng = StdRng::seed_from_u64(9);
        let derived = ContentCodec::new(&[9u8; 32], true);
        let direct = ContentCodec::new(&[9u8; 32], false);

        let encrypted = derived.encrypt_file(b"subkey test", &mut rng).unwrap();
        assert!(direct.decrypt_file(&encrypted).is_err());
    }
}
