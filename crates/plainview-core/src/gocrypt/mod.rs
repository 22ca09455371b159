//! The encrypted vault format: config document, content codec and filename
//! transform.
//!
//! The rest of the crate treats these as collaborators behind small
//! contracts — the codec is a pure function over bytes, the name transform
//! is referentially transparent in `(cipher_name, iv)` — so the coalescer
//! and resolver never see key material.

pub mod config;
pub mod content;
pub mod names;

/// Name of the vault configuration document in the encrypted root.
pub const CONFIG_FILE: &str = "gocryptfs.conf";

/// Name of the per-directory IV file present in every ciphertext directory.
pub const DIRIV_FILE: &str = "gocryptfs.diriv";

/// Length in bytes of a directory IV.
pub const DIRIV_LEN: usize = 16;
