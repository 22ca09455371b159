//! Vault configuration document.
//!
//! The encrypted root carries a `gocryptfs.conf` JSON document holding the
//! feature flags and the master key, wrapped with a key derived from the
//! user passphrase via scrypt. [`VaultConfig::unlock`] recovers the master
//! key; [`VaultConfig::seal`] is the inverse, used by vault creation tooling
//! and test fixtures.

use aes_gcm::aead::generic_array::typenum::U16;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Key, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rand::RngCore;
use scrypt::Params;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use zeroize::Zeroizing;

use super::content::ContentCipher;

/// Vault format version this implementation reads and writes.
const VAULT_VERSION: u16 = 2;

/// Length of the wrapped master key blob: nonce ‖ key ‖ tag.
const WRAPPED_KEY_LEN: usize = 16 + MASTER_KEY_LEN + 16;

/// Length of the master key in bytes.
pub const MASTER_KEY_LEN: usize = 32;

/// Derive the content subkey with HKDF instead of using the master key raw.
pub const FLAG_HKDF: &str = "HKDF";
/// Encode encrypted names with unpadded base64url.
pub const FLAG_RAW64: &str = "Raw64";
/// Overlong encrypted names are stored out of line.
pub const FLAG_LONG_NAMES: &str = "LongNames";
/// Each directory carries its own name-encryption IV.
pub const FLAG_DIRIV: &str = "DirIV";
/// Content blocks use 128-bit GCM nonces.
pub const FLAG_GCMIV128: &str = "GCMIV128";

/// Errors from parsing or unlocking a vault configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse vault config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid vault config: {0}")]
    Invalid(String),
    #[error("unsupported vault version {0}")]
    UnsupportedVersion(u16),
    #[error("invalid scrypt parameters")]
    BadKdfParams,
    #[error("incorrect passphrase")]
    IncorrectPassphrase,
}

/// scrypt parameters as stored in the config document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ScryptObject {
    /// Base64-encoded random salt.
    pub salt: String,
    /// Cost parameter; must be a power of two.
    pub n: u32,
    pub r: u32,
    pub p: u32,
    pub key_len: u32,
}

/// The `gocryptfs.conf` document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VaultConfig {
    pub creator: String,
    pub encrypted_key: String,
    pub scrypt_object: ScryptObject,
    pub version: u16,
    pub feature_flags: Vec<String>,
}

impl VaultConfig {
    /// Parse and validate a config document.
    pub fn parse(bytes: &[u8]) -> Result<VaultConfig, ConfigError> {
        let config: VaultConfig = serde_json::from_slice(bytes)?;
        if config.version != VAULT_VERSION {
            return Err(ConfigError::UnsupportedVersion(config.version));
        }
        if config.scrypt_object.key_len as usize != MASTER_KEY_LEN {
            return Err(ConfigError::Invalid(format!(
                "unexpected key length {}",
                config.scrypt_object.key_len
            )));
        }
        Ok(config)
    }

    /// Whether a feature flag is present.
    pub fn is_flag_set(&self, flag: &str) -> bool {
        self.feature_flags.iter().any(|f| f == flag)
    }

    /// Recover the master key with the user passphrase.
    ///
    /// The returned buffer zeroizes itself on drop; callers should drop it
    /// as soon as the codec and name transform are constructed.
    pub fn unlock(&self, passphrase: &[u8]) -> Result<Zeroizing<[u8; MASTER_KEY_LEN]>, ConfigError> {
        let kek = self.derive_kek(passphrase)?;

        let wrapped = STANDARD
            .decode(&self.encrypted_key)
            .map_err(|e| ConfigError::Invalid(format!("bad encrypted key encoding: {e}")))?;
        if wrapped.len() != WRAPPED_KEY_LEN {
            return Err(ConfigError::Invalid(format!(
                "wrapped key is {} bytes, expected {WRAPPED_KEY_LEN}",
                wrapped.len()
            )));
        }

        let cipher = ContentCipher::new(Key::<ContentCipher>::from_slice(kek.as_slice()));
        let nonce = Nonce::<U16>::from_slice(&wrapped[..16]);
        let unwrapped = cipher
            .decrypt(nonce, &wrapped[16..])
            .map_err(|_| ConfigError::IncorrectPassphrase)?;

        let mut master_key = Zeroizing::new([0u8; MASTER_KEY_LEN]);
        if unwrapped.len() != MASTER_KEY_LEN {
            return Err(ConfigError::Invalid(format!(
                "unwrapped key is {} bytes, expected {MASTER_KEY_LEN}",
                unwrapped.len()
            )));
        }
        master_key.copy_from_slice(&unwrapped);
        drop(Zeroizing::new(unwrapped));

        debug!(flags = ?self.feature_flags, "vault configuration unlocked");
        Ok(master_key)
    }

    /// Build a config document wrapping `master_key` under `passphrase`.
    ///
    /// `log2_n` is the scrypt cost exponent (16 for production vaults; tests
    /// use a small value to stay fast).
    pub fn seal(
        master_key: &[u8; MASTER_KEY_LEN],
        passphrase: &[u8],
        log2_n: u8,
        feature_flags: Vec<String>,
        rng: &mut impl RngCore,
    ) -> Result<VaultConfig, ConfigError> {
        let mut salt = [0u8; 32];
        rng.fill_bytes(&mut salt);

        let scrypt_object = ScryptObject {
            salt: STANDARD.encode(salt),
            n: 1u32
                .checked_shl(log2_n.into())
                .ok_or(ConfigError::BadKdfParams)?,
            r: 8,
            p: 1,
            key_len: MASTER_KEY_LEN as u32,
        };

        let mut config = VaultConfig {
            creator: format!("plainview {}", env!("CARGO_PKG_VERSION")),
            encrypted_key: String::new(),
            scrypt_object,
            version: VAULT_VERSION,
            feature_flags,
        };

        let kek = config.derive_kek(passphrase)?;
        let cipher = ContentCipher::new(Key::<ContentCipher>::from_slice(kek.as_slice()));
        let mut nonce = [0u8; 16];
        rng.fill_bytes(&mut nonce);
        let sealed = cipher
            .encrypt(Nonce::<U16>::from_slice(&nonce), master_key.as_slice())
            .map_err(|_| ConfigError::Invalid("failed to wrap master key".into()))?;

        let mut wrapped = Vec::with_capacity(WRAPPED_KEY_LEN);
        wrapped.extend_from_slice(&nonce);
        wrapped.extend_from_slice(&sealed);
        config.encrypted_key = STANDARD.encode(wrapped);
        Ok(config)
    }

    /// scrypt the passphrase into the key-encryption key.
    fn derive_kek(&self, passphrase: &[u8]) -> Result<Zeroizing<[u8; MASTER_KEY_LEN]>, ConfigError> {
        let salt = STANDARD
            .decode(&self.scrypt_object.salt)
            .map_err(|e| ConfigError::Invalid(format!("bad salt encoding: {e}")))?;

        let n = self.scrypt_object.n;
        if !n.is_power_of_two() || n < 2 {
            return Err(ConfigError::BadKdfParams);
        }
        let params = Params::new(
            n.ilog2() as u8,
            self.scrypt_object.r,
            self.scrypt_object.p,
            MASTER_KEY_LEN,
        )
        .map_err(|_| ConfigError::BadKdfParams)?;

        let mut kek = Zeroizing::new([0u8; MASTER_KEY_LEN]);
        scrypt::scrypt(passphrase, &salt, &params, kek.as_mut_slice())
            .map_err(|_| ConfigError::BadKdfParams)?;
        Ok(kek)
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    const TEST_LOG2_N: u8 = 10;

    fn test_config() -> (VaultConfig, [u8; MASTER_KEY_LEN]) {
        let mut rng = StdRng::seed_from_u64(1);
        let mut master_key = [0u8; MASTER_KEY_LEN];
        rng.fill_bytes(&mut master_key);
        let config = VaultConfig::seal(
            &master_key,
            b"test passphrase",
            TEST_LOG2_N,
            vec![FLAG_DIRIV.into(), FLAG_HKDF.into(), FLAG_RAW64.into()],
            &mut rng,
        )
        .unwrap();
        (config, master_key)
    }

    #[test]
    fn seal_then_unlock_recovers_the_master_key() {
        let (config, master_key) = test_config();

        // Through a JSON round trip, as the accessor would deliver it.
        let json = serde_json::to_vec(&config).unwrap();
        let parsed = VaultConfig::parse(&json).unwrap();

        let unlocked = parsed.unlock(b"test passphrase").unwrap();
        assert_eq!(*unlocked, master_key);
    }

    #[test]
    fn wrong_passphrase_is_rejected() {
        let (config, _) = test_config();
        assert!(matches!(
            config.unlock(b"wrong passphrase"),
            Err(ConfigError::IncorrectPassphrase)
        ));
    }

    #[test]
    fn document_uses_the_conventional_field_names() {
        let (config, _) = test_config();
        let json = serde_json::to_string(&config).unwrap();
        for field in ["Creator", "EncryptedKey", "ScryptObject", "Salt", "N", "KeyLen", "FeatureFlags"] {
            assert!(json.contains(field), "missing field {field} in {json}");
        }
    }

    #[test]
    fn version_and_kdf_params_are_validated() {
        let (mut config, _) = test_config();
        config.version = 1;
        let json = serde_json::to_vec(&config).unwrap();
        assert!(matches!(
            VaultConfig::parse(&json),
            Err(ConfigError::UnsupportedVersion(1))
        ));

        let (mut config, _) = test_config();
        config.scrypt_object.n = 1000; // not a power of two
        assert!(matches!(
            config.unlock(b"test passphrase"),
            Err(ConfigError::BadKdfParams)
        ));
    }

    #[test]
    fn feature_flags_are_queryable() {
        let (config, _) = test_config();
        assert!(config.is_flag_set(FLAG_HKDF));
        assert!(config.is_flag_set(FLAG_DIRIV));
        assert!(!config.is_flag_set(FLAG_LONG_NAMES));
    }
}
