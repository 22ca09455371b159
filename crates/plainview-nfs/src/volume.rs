//! Local-volume backend: the encrypted tree lives on a mounted filesystem.
//!
//! This is the deployment seam where a network dialer (SFTP, object store)
//! would plug in: [`LocalVolume`] implements the pool's `Dialer` contract
//! over `std::fs`, so the rest of the stack — pooled borrowing, liveness
//! probing, the coalescer above it — is exercised identically either way.

use std::path::PathBuf;
use std::time::UNIX_EPOCH;

use plainview_core::backend::{BackendError, FileEntry};
use plainview_core::pool::{Dialer, RemoteConnection};

#[cfg(unix)]
fn entry_mode(meta: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn entry_mode(meta: &std::fs::Metadata) -> u32 {
    if meta.is_dir() {
        0o755
    } else {
        0o644
    }
}

fn entry_from_metadata(name: String, meta: &std::fs::Metadata) -> FileEntry {
    FileEntry {
        name,
        size: meta.len(),
        is_dir: meta.is_dir(),
        mode: entry_mode(meta),
        modified: meta.modified().unwrap_or(UNIX_EPOCH),
    }
}

/// Dialer for a locally mounted encrypted tree.
pub struct LocalVolume {
    /// Probed for liveness after failed operations.
    root: PathBuf,
}

impl LocalVolume {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LocalVolume { root: root.into() }
    }
}

impl Dialer for LocalVolume {
    type Conn = LocalConn;

    fn dial(&self) -> Result<LocalConn, BackendError> {
        Ok(LocalConn {
            root: self.root.clone(),
        })
    }
}

/// One borrowed handle on the local volume.
pub struct LocalConn {
    root: PathBuf,
}

impl RemoteConnection for LocalConn {
    fn read_file(&mut self, path: &str) -> Result<Vec<u8>, BackendError> {
        std::fs::read(path).map_err(|e| BackendError::io(path, &e))
    }

    fn read_dir(&mut self, path: &str) -> Result<Vec<FileEntry>, BackendError> {
        let mut listing = Vec::new();
        for entry in std::fs::read_dir(path).map_err(|e| BackendError::io(path, &e))? {
            let entry = entry.map_err(|e| BackendError::io(path, &e))?;
            let meta = entry.metadata().map_err(|e| BackendError::io(path, &e))?;
            listing.push(entry_from_metadata(
                entry.file_name().to_string_lossy().into_owned(),
                &meta,
            ));
        }
        Ok(listing)
    }

    fn stat(&mut self, path: &str) -> Result<FileEntry, BackendError> {
        let meta = std::fs::metadata(path).map_err(|e| BackendError::io(path, &e))?;
        let name = std::path::Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "/".to_owned());
        Ok(entry_from_metadata(name, &meta))
    }

    fn ping(&mut self) -> Result<(), BackendError> {
        std::fs::metadata(&self.root)
            .map(|_| ())
            .map_err(|e| BackendError::io(self.root.to_string_lossy(), &e))
    }
}

#[cfg(test)]
mod tests {
    use plainview_core::backend::FsAccessor;
    use plainview_core::pool::PooledBackend;

    use super::*;

    #[test]
    fn reads_files_and_listings_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::write(root.join("a.bin"), b"contents").unwrap();
        std::fs::create_dir(root.join("sub")).unwrap();

        let backend = PooledBackend::new(LocalVolume::new(root));

        let file_path = root.join("a.bin");
        let bytes = plainview_core::backend::Backend::read_file(
            &backend,
            file_path.to_str().unwrap(),
        )
        .unwrap();
        assert_eq!(bytes, b"contents");

        let mut listing =
            plainview_core::backend::Backend::read_dir(&backend, root.to_str().unwrap()).unwrap();
        listing.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(listing.len(), 2);
        assert_eq!(listing[0].name, "a.bin");
        assert!(!listing[0].is_dir);
        assert_eq!(listing[0].size, 8);
        assert_eq!(listing[1].name, "sub");
        assert!(listing[1].is_dir);

        let stat = backend.stat(file_path.to_str().unwrap()).unwrap();
        assert_eq!(stat.name, "a.bin");
        assert_eq!(stat.size, 8);
    }

    #[test]
    fn missing_paths_surface_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let backend = PooledBackend::new(LocalVolume::new(dir.path()));

        let missing = dir.path().join("missing");
        let err = plainview_core::backend::Backend::read_file(
            &backend,
            missing.to_str().unwrap(),
        )
        .unwrap_err();
        assert!(matches!(err, BackendError::NotFound(_)));
    }
}
