//! Read-only NFSv3 frontend for plainview.
//!
//! Translates NFS requests into [`plainview_core::FileTree`] calls:
//! `read` → `read_file`, `readdir` → `read_dir`, `lookup`/`getattr` →
//! `stat`. Every mutating request is answered with a non-fatal
//! read-only/unsupported status.

pub mod error;
pub mod filesystem;
pub mod inode;
pub mod volume;

pub use filesystem::PlainViewNfs;
pub use volume::LocalVolume;
