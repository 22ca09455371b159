//! Plaintext view over the encrypted tree.
//!
//! [`FileTree`] is the top-level facade: it resolves plaintext paths to
//! their ciphertext counterparts (walking the tree through the coalescer and
//! memoizing directory translations in a bounded LRU), and implements the
//! three read operations the frontend serves.

pub mod fast_cache;
pub mod path;

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, instrument, trace};

use crate::backend::{Backend, BackendError, FileEntry, FsAccessor};
use crate::coalesce::{CoalesceError, RequestCoalescer};
use crate::gocrypt::config::{ConfigError, VaultConfig, FLAG_HKDF, FLAG_RAW64};
use crate::gocrypt::content::{CodecError, ContentCodec};
use crate::gocrypt::names::NameTransform;
use crate::gocrypt::{CONFIG_FILE, DIRIV_FILE};

pub use fast_cache::{DirCache, DirMapping};

/// Workers the coalescer spawns when the caller does not choose.
pub const DEFAULT_NUM_WORKERS: usize = 32;

/// Errors surfaced by the plaintext facade.
#[derive(Debug, Error)]
pub enum TreeError {
    /// No entry in the parent directory decrypts to the requested name.
    #[error("{name} not found in {dir}")]
    NotFound { name: String, dir: String },
    /// A non-final path component (or a path required to be a directory)
    /// resolved to a file.
    #[error("{0} is not a directory")]
    NotADirectory(String),
    /// A file operation hit a directory.
    #[error("{0} is a directory")]
    IsADirectory(String),
    /// A direct (non-coalesced) backend call failed.
    #[error("error accessing {path}: {source}")]
    Backend {
        path: String,
        #[source]
        source: BackendError,
    },
    /// A coalesced fetch failed.
    #[error("error fetching {path}: {source}")]
    Fetch {
        path: String,
        #[source]
        source: CoalesceError,
    },
    /// Content decryption failed.
    #[error("error decrypting {path}: {source}")]
    Decrypt {
        path: String,
        #[source]
        source: CodecError,
    },
    /// The vault configuration could not be loaded or unlocked.
    #[error("failed to load vault configuration: {0}")]
    Config(#[from] ConfigError),
}

/// A plaintext view of the encrypted tree served by the accessor.
pub struct FileTree {
    encrypted_root: String,
    fast_cache: DirCache,
    accessor: Arc<dyn FsAccessor>,
    coalescer: RequestCoalescer,
    codec: ContentCodec,
}

impl FileTree {
    /// Open the vault rooted at `encrypted_root`.
    ///
    /// Reads and unlocks `gocryptfs.conf` through the accessor, derives the
    /// content codec and name transform, zeroizes the master key, and starts
    /// a coalescer with `num_workers` workers.
    pub fn open(
        encrypted_root: &str,
        passphrase: &[u8],
        num_workers: usize,
        accessor: Arc<dyn FsAccessor>,
    ) -> Result<FileTree, TreeError> {
        let encrypted_root = path::clean(encrypted_root);

        let conf_path = path::join(&encrypted_root, CONFIG_FILE);
        let conf_bytes = accessor.read_file(&conf_path).map_err(|e| TreeError::Backend {
            path: conf_path.clone(),
            source: e,
        })?;
        let config = VaultConfig::parse(&conf_bytes)?;

        let master_key = config.unlock(passphrase)?;
        let codec = ContentCodec::new(&master_key, config.is_flag_set(FLAG_HKDF));
        let transform = Arc::new(NameTransform::new(
            &master_key,
            config.is_flag_set(FLAG_RAW64),
        ));
        // The subkeys are derived; the master key buffer zeroizes here.
        drop(master_key);

        let backend: Arc<dyn Backend> = accessor.clone();
        let coalescer = RequestCoalescer::new(num_workers, backend, transform);
        coalescer.start();

        info!(root = %encrypted_root, workers = num_workers, "file tree opened");
        Ok(FileTree {
            encrypted_root,
            fast_cache: DirCache::default(),
            accessor,
            coalescer,
            codec,
        })
    }

    /// Read and decrypt the file at the plaintext path.
    #[instrument(level = "debug", skip(self))]
    pub fn read_file(&self, plain_path: &str) -> Result<Vec<u8>, TreeError> {
        let clean_path = path::clean(plain_path);
        if clean_path == "/" {
            return Err(TreeError::IsADirectory(clean_path));
        }

        let cipher_dir = self.find_path(&path::parent(&clean_path))?;
        let item = self.find_in_dir(&cipher_dir, &path::base_name(&clean_path))?;
        let cipher_path = path::join(&cipher_dir, &item.name);
        if item.is_dir {
            return Err(TreeError::IsADirectory(cipher_path));
        }

        let cipher_bytes = self
            .coalescer
            .read_file(&cipher_path)
            .map_err(|e| TreeError::Fetch {
                path: cipher_path.clone(),
                source: e,
            })?;
        self.codec
            .decrypt_file(&cipher_bytes)
            .map_err(|e| TreeError::Decrypt {
                path: cipher_path,
                source: e,
            })
    }

    /// List the directory at the plaintext path.
    ///
    /// Entries whose names fail to decrypt are skipped; the rest are
    /// re-labeled with their plaintext names and plaintext-projected sizes.
    #[instrument(level = "debug", skip(self))]
    pub fn read_dir(&self, plain_path: &str) -> Result<Vec<FileEntry>, TreeError> {
        let clean_path = path::clean(plain_path);
        let cipher_path = self.find_path(&clean_path)?;

        let mut listing = Vec::new();
        self.range_in_dir(&cipher_path, |entry, plain_name| {
            listing.push(
                entry.with_plaintext(plain_name, self.codec.cipher_size_to_plain_size(entry.size)),
            );
            false
        })?;
        Ok(listing)
    }

    /// Stat the plaintext path.
    #[instrument(level = "debug", skip(self))]
    pub fn stat(&self, plain_path: &str) -> Result<FileEntry, TreeError> {
        let clean_path = path::clean(plain_path);
        if clean_path == "/" {
            let root = self.stat_backend(&self.encrypted_root)?;
            return Ok(root.with_plaintext("/", self.codec.cipher_size_to_plain_size(root.size)));
        }

        let cipher_dir = self.find_path(&path::parent(&clean_path))?;
        let base = path::base_name(&clean_path);
        let item = self.find_in_dir(&cipher_dir, &base)?;
        let cipher_path = path::join(&cipher_dir, &item.name);

        let fresh = self.stat_backend(&cipher_path)?;
        Ok(fresh.with_plaintext(base, self.codec.cipher_size_to_plain_size(fresh.size)))
    }

    /// Drop every cached translation and fetched result.
    pub fn clear_caches(&self) {
        self.fast_cache.clear();
        self.coalescer.clear_cache();
        debug!("file tree caches cleared");
    }

    /// Stop the coalescer workers, draining any queued requests.
    pub fn shutdown(&self) {
        self.coalescer.stop();
    }

    fn stat_backend(&self, cipher_path: &str) -> Result<FileEntry, TreeError> {
        self.accessor.stat(cipher_path).map_err(|e| TreeError::Backend {
            path: cipher_path.to_owned(),
            source: e,
        })
    }

    /// Resolve a plaintext path to its ciphertext path.
    ///
    /// Discovers as much as possible from the LRU, then walks the remaining
    /// components down from the nearest cached ancestor. Every directory
    /// resolved on the way is stored back into the LRU.
    fn find_path(&self, plain_path: &str) -> Result<String, TreeError> {
        let clean_path = path::clean(plain_path);
        if clean_path == "/" {
            return Ok(self.encrypted_root.clone());
        }

        if let Some(mapping) = self.fast_cache.find(&clean_path) {
            trace!(plain = %clean_path, "directory mapping cache hit");
            return Ok(mapping.ciphertext_path);
        }

        let cipher_parent = self.find_path(&path::parent(&clean_path))?;
        let item = self.find_in_dir(&cipher_parent, &path::base_name(&clean_path))?;
        let cipher_path = path::join(&cipher_parent, &item.name);
        if !item.is_dir {
            return Err(TreeError::NotADirectory(cipher_path));
        }

        self.fast_cache.store(&clean_path, &cipher_path);
        Ok(cipher_path)
    }

    /// Find the entry in the ciphertext directory whose decrypted name is
    /// `plain_name`.
    fn find_in_dir(&self, cipher_path: &str, plain_name: &str) -> Result<FileEntry, TreeError> {
        let mut found = None;
        self.range_in_dir(cipher_path, |entry, decrypted_name| {
            if decrypted_name == plain_name {
                found = Some(entry.clone());
                true
            } else {
                false
            }
        })?;
        found.ok_or_else(|| TreeError::NotFound {
            name: plain_name.to_owned(),
            dir: cipher_path.to_owned(),
        })
    }

    /// Iterate the ciphertext directory, calling `visit` with each entry and
    /// its decrypted name. Entries that fail to decrypt are foreign files
    /// and are skipped. `visit` returns `true` to stop early.
    fn range_in_dir(
        &self,
        cipher_path: &str,
        mut visit: impl FnMut(&FileEntry, &str) -> bool,
    ) -> Result<(), TreeError> {
        let iv_path = path::join(cipher_path, DIRIV_FILE);
        let iv = self
            .coalescer
            .read_file(&iv_path)
            .map_err(|e| TreeError::Fetch {
                path: iv_path.clone(),
                source: e,
            })?;

        let listing = self
            .coalescer
            .read_dir(cipher_path)
            .map_err(|e| TreeError::Fetch {
                path: cipher_path.to_owned(),
                source: e,
            })?;

        for entry in listing.iter() {
            let plain_name = match self.coalescer.decrypt_name(&entry.name, &iv) {
                Ok(name) => name,
                Err(_) => continue,
            };
            if visit(entry, &plain_name) {
                break;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for FileTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileTree")
            .field("encrypted_root", &self.encrypted_root)
            .finish_non_exhaustive()
    }
}
