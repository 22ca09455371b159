//! In-memory vault fixtures for integration tests.
//!
//! [`MemoryFs`] is a complete [`FsAccessor`] over a hash map, with
//! per-operation call counters and an optional artificial read delay so
//! tests can assert coalescing behavior. [`TestVault`] builds a real
//! encrypted tree inside one — sealed config, per-directory IVs, encrypted
//! names and contents — and opens [`FileTree`]s over it.
//!
//! Lives in the library (not `#[cfg(test)]`) so the frontend crate's tests
//! can drive a full stack without duplicating the harness.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use crate::backend::{Backend, BackendError, FileEntry, FsAccessor};
use crate::gocrypt::config::{
    VaultConfig, FLAG_DIRIV, FLAG_GCMIV128, FLAG_HKDF, FLAG_RAW64, MASTER_KEY_LEN,
};
use crate::gocrypt::content::ContentCodec;
use crate::gocrypt::names::NameTransform;
use crate::gocrypt::{CONFIG_FILE, DIRIV_FILE, DIRIV_LEN};
use crate::tree::{path, FileTree};

/// scrypt cost exponent for fixtures; small to keep tests fast.
const FIXTURE_LOG2_N: u8 = 10;

#[derive(Debug)]
struct Node {
    entry: FileEntry,
    content: Option<Vec<u8>>,
}

/// An in-memory filesystem accessor with call counters.
#[derive(Debug, Default)]
pub struct MemoryFs {
    nodes: Mutex<HashMap<String, Node>>,
    read_delay: Mutex<Option<Duration>>,
    pub read_file_calls: AtomicUsize,
    pub read_dir_calls: AtomicUsize,
    pub stat_calls: AtomicUsize,
}

impl MemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a directory node at `path`.
    pub fn add_dir(&self, dir_path: &str) {
        let dir_path = path::clean(dir_path);
        self.nodes.lock().insert(
            dir_path.clone(),
            Node {
                entry: FileEntry {
                    name: path::base_name(&dir_path),
                    size: 0,
                    is_dir: true,
                    mode: 0o755,
                    modified: SystemTime::now(),
                },
                content: None,
            },
        );
    }

    /// Create (or replace) a file node at `path`.
    pub fn add_file(&self, file_path: &str, content: Vec<u8>) {
        let file_path = path::clean(file_path);
        self.nodes.lock().insert(
            file_path.clone(),
            Node {
                entry: FileEntry {
                    name: path::base_name(&file_path),
                    size: content.len() as u64,
                    is_dir: false,
                    mode: 0o644,
                    modified: SystemTime::now(),
                },
                content: Some(content),
            },
        );
    }

    /// Remove the node at `path`.
    pub fn remove(&self, node_path: &str) {
        self.nodes.lock().remove(&path::clean(node_path));
    }

    /// Delay every `read_file` by `delay`, for coalescing-window tests.
    pub fn set_read_delay(&self, delay: Duration) {
        *self.read_delay.lock() = Some(delay);
    }

    fn sleep_if_configured(&self) {
        let delay = *self.read_delay.lock();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
    }
}

impl Backend for MemoryFs {
    fn read_file(&self, file_path: &str) -> Result<Vec<u8>, BackendError> {
        self.read_file_calls.fetch_add(1, Ordering::SeqCst);
        self.sleep_if_configured();

        let nodes = self.nodes.lock();
        let node = nodes
            .get(&path::clean(file_path))
            .ok_or_else(|| BackendError::NotFound(file_path.to_owned()))?;
        node.content
            .clone()
            .ok_or_else(|| BackendError::Io {
                path: file_path.to_owned(),
                message: "is a directory".into(),
            })
    }

    fn read_dir(&self, dir_path: &str) -> Result<Vec<FileEntry>, BackendError> {
        self.read_dir_calls.fetch_add(1, Ordering::SeqCst);

        let dir_path = path::clean(dir_path);
        let nodes = self.nodes.lock();
        let node = nodes
            .get(&dir_path)
            .ok_or_else(|| BackendError::NotFound(dir_path.clone()))?;
        if !node.entry.is_dir {
            return Err(BackendError::Io {
                path: dir_path,
                message: "not a directory".into(),
            });
        }

        let mut listing: Vec<FileEntry> = nodes
            .iter()
            .filter(|(p, _)| **p != dir_path && path::parent(p) == dir_path)
            .map(|(_, node)| node.entry.clone())
            .collect();
        listing.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(listing)
    }
}

impl FsAccessor for MemoryFs {
    fn stat(&self, node_path: &str) -> Result<FileEntry, BackendError> {
        self.stat_calls.fetch_add(1, Ordering::SeqCst);
        self.nodes
            .lock()
            .get(&path::clean(node_path))
            .map(|node| node.entry.clone())
            .ok_or_else(|| BackendError::NotFound(node_path.to_owned()))
    }
}

struct DirKeys {
    cipher_path: String,
    iv: [u8; DIRIV_LEN],
}

/// A complete encrypted vault living in a [`MemoryFs`].
pub struct TestVault {
    pub fs: Arc<MemoryFs>,
    pub root: String,
    pub passphrase: String,
    transform: NameTransform,
    codec: ContentCodec,
    dirs: Mutex<HashMap<String, DirKeys>>,
    rng: Mutex<StdRng>,
}

impl TestVault {
    /// Build an empty vault rooted at `/vault`.
    pub fn new() -> Self {
        let fs = Arc::new(MemoryFs::new());
        let root = "/vault".to_owned();
        let passphrase = "correct horse battery staple".to_owned();
        let mut rng = StdRng::seed_from_u64(0xA11CE);

        let mut master_key = [0u8; MASTER_KEY_LEN];
        rng.fill_bytes(&mut master_key);

        let config = VaultConfig::seal(
            &master_key,
            passphrase.as_bytes(),
            FIXTURE_LOG2_N,
            vec![
                FLAG_DIRIV.into(),
                FLAG_GCMIV128.into(),
                FLAG_HKDF.into(),
                FLAG_RAW64.into(),
            ],
            &mut rng,
        )
        .expect("sealing a fixture vault config cannot fail");

        fs.add_dir(&root);
        fs.add_file(
            &path::join(&root, CONFIG_FILE),
            serde_json::to_vec_pretty(&config).expect("config serializes"),
        );

        let mut root_iv = [0u8; DIRIV_LEN];
        rng.fill_bytes(&mut root_iv);
        fs.add_file(&path::join(&root, DIRIV_FILE), root_iv.to_vec());

        let transform = NameTransform::new(&master_key, true);
        let codec = ContentCodec::new(&master_key, true);

        let mut dirs = HashMap::new();
        dirs.insert(
            "/".to_owned(),
            DirKeys {
                cipher_path: root.clone(),
                iv: root_iv,
            },
        );

        TestVault {
            fs,
            root,
            passphrase,
            transform,
            codec,
            dirs: Mutex::new(dirs),
            rng: Mutex::new(rng),
        }
    }

    /// Create the plaintext directory (the parent must already exist).
    pub fn mkdir(&self, plain_path: &str) {
        let plain_path = path::clean(plain_path);
        let cipher_path = {
            let dirs = self.dirs.lock();
            let parent = dirs
                .get(&path::parent(&plain_path))
                .expect("parent directory must be created first");
            let cipher_name = self
                .transform
                .encrypt_name(&path::base_name(&plain_path), &parent.iv)
                .expect("fixture names encrypt");
            path::join(&parent.cipher_path, &cipher_name)
        };

        self.fs.add_dir(&cipher_path);
        let mut iv = [0u8; DIRIV_LEN];
        self.rng.lock().fill_bytes(&mut iv);
        self.fs.add_file(&path::join(&cipher_path, DIRIV_FILE), iv.to_vec());

        self.dirs.lock().insert(plain_path, DirKeys { cipher_path, iv });
    }

    /// Create the plaintext file with the given contents.
    pub fn write_file(&self, plain_path: &str, content: &[u8]) {
        let plain_path = path::clean(plain_path);
        let dirs = self.dirs.lock();
        let parent = dirs
            .get(&path::parent(&plain_path))
            .expect("parent directory must be created first");
        let cipher_name = self
            .transform
            .encrypt_name(&path::base_name(&plain_path), &parent.iv)
            .expect("fixture names encrypt");

        let encrypted = self
            .codec
            .encrypt_file(content, &mut *self.rng.lock())
            .expect("fixture contents encrypt");
        self.fs
            .add_file(&path::join(&parent.cipher_path, &cipher_name), encrypted);
    }

    /// Drop a file with a raw (non-encrypted) name into a plaintext
    /// directory — a foreign file whose name will not decrypt.
    pub fn add_stray_file(&self, plain_dir: &str, raw_name: &str, content: &[u8]) {
        let dirs = self.dirs.lock();
        let dir = dirs
            .get(&path::clean(plain_dir))
            .expect("directory must be created first");
        self.fs
            .add_file(&path::join(&dir.cipher_path, raw_name), content.to_vec());
    }

    /// The ciphertext path backing a plaintext directory.
    pub fn cipher_dir(&self, plain_dir: &str) -> String {
        self.dirs
            .lock()
            .get(&path::clean(plain_dir))
            .expect("directory must be created first")
            .cipher_path
            .clone()
    }

    /// Open a [`FileTree`] over this vault.
    pub fn open_tree(&self, num_workers: usize) -> FileTree {
        let accessor: Arc<dyn FsAccessor> = Arc::clone(&self.fs) as Arc<dyn FsAccessor>;
        FileTree::open(&self.root, self.passphrase.as_bytes(), num_workers, accessor)
            .expect("fixture vault opens")
    }
}

impl Default for TestVault {
    fn default() -> Self {
        TestVault::new()
    }
}
