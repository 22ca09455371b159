//! NFS filesystem implementation over a [`FileTree`].
//!
//! Implements the `NFSFileSystem` trait from `nfsserve`. The export is
//! read-only: `lookup`, `getattr`, `read` and `readdir` delegate into the
//! core facade (bridged with `spawn_blocking`, since the coalescer parks
//! callers on condition variables), and every mutating request is answered
//! with `NFS3ERR_ROFS`.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use nfsserve::nfs::{
    fattr3, fileid3, filename3, ftype3, nfspath3, nfsstat3, nfsstring, nfstime3, sattr3, specdata3,
};
use nfsserve::vfs::{DirEntry, NFSFileSystem, ReadDirResult, VFSCapabilities};
use plainview_core::backend::FileEntry;
use plainview_core::tree::{path, FileTree};
use tracing::{debug, trace};

use crate::error::tree_error_to_nfsstat;
use crate::inode::{InodeTable, ROOT_FILEID};

/// Read-only NFS filesystem over a plaintext [`FileTree`] view.
pub struct PlainViewNfs {
    tree: Arc<FileTree>,
    inodes: InodeTable,
    /// Server generation number (for cookieverf3).
    generation: u64,
    uid: u32,
    gid: u32,
}

impl PlainViewNfs {
    pub fn new(tree: Arc<FileTree>) -> Self {
        let generation = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        PlainViewNfs {
            tree,
            inodes: InodeTable::new(),
            generation,
            uid: unsafe { libc::getuid() },
            gid: unsafe { libc::getgid() },
        }
    }

    /// Run a blocking facade call off the async executor.
    async fn blocking<T, F>(&self, op: F) -> Result<T, nfsstat3>
    where
        T: Send + 'static,
        F: FnOnce(&FileTree) -> T + Send + 'static,
    {
        let tree = Arc::clone(&self.tree);
        tokio::task::spawn_blocking(move || op(&tree))
            .await
            .map_err(|_| nfsstat3::NFS3ERR_SERVERFAULT)
    }

    fn lookup_path(&self, id: fileid3) -> Result<String, nfsstat3> {
        self.inodes.get_path(id).ok_or(nfsstat3::NFS3ERR_STALE)
    }

    fn entry_to_attr(&self, id: fileid3, entry: &FileEntry) -> fattr3 {
        let time = system_time_to_nfs(entry.modified);
        let (ftype, nlink) = if entry.is_dir {
            (ftype3::NF3DIR, 2)
        } else {
            (ftype3::NF3REG, 1)
        };
        fattr3 {
            ftype,
            mode: entry.mode & 0o7777,
            nlink,
            uid: self.uid,
            gid: self.gid,
            size: entry.size,
            used: entry.size,
            rdev: specdata3::default(),
            fsid: 0,
            fileid: id,
            atime: time,
            mtime: time,
            ctime: time,
        }
    }

    fn filename_to_str(filename: &filename3) -> Result<&str, nfsstat3> {
        std::str::from_utf8(filename).map_err(|_| nfsstat3::NFS3ERR_INVAL)
    }
}

fn system_time_to_nfs(t: SystemTime) -> nfstime3 {
    let duration = t.duration_since(UNIX_EPOCH).unwrap_or_default();
    // NFS carries 32-bit seconds; wrapping is acceptable at that horizon.
    #[allow(clippy::cast_possible_truncation)]
    nfstime3 {
        seconds: duration.as_secs() as u32,
        nseconds: duration.subsec_nanos(),
    }
}

#[async_trait]
impl NFSFileSystem for PlainViewNfs {
    fn capabilities(&self) -> VFSCapabilities {
        VFSCapabilities::ReadOnly
    }

    fn root_dir(&self) -> fileid3 {
        ROOT_FILEID
    }

    fn serverid(&self) -> [u8; 8] {
        self.generation.to_be_bytes()
    }

    async fn lookup(&self, dirid: fileid3, filename: &filename3) -> Result<fileid3, nfsstat3> {
        let name = Self::filename_to_str(filename)?;
        trace!(dirid, name, "lookup");

        if name == "." {
            return Ok(dirid);
        }

        let parent_path = self.lookup_path(dirid)?;
        if name == ".." {
            let parent = path::parent(&parent_path);
            return Ok(self.inodes.get_or_insert(&parent));
        }

        let child_path = path::join(&parent_path, name);
        let lookup_target = child_path.clone();
        self.blocking(move |tree| tree.stat(&lookup_target))
            .await?
            .map_err(|e| {
                trace!(dirid, name, error = %e, "lookup failed");
                tree_error_to_nfsstat(&e)
            })?;

        Ok(self.inodes.get_or_insert(&child_path))
    }

    async fn getattr(&self, id: fileid3) -> Result<fattr3, nfsstat3> {
        trace!(id, "getattr");
        let node_path = self.lookup_path(id)?;

        let entry = self
            .blocking(move |tree| tree.stat(&node_path))
            .await?
            .map_err(|e| tree_error_to_nfsstat(&e))?;
        Ok(self.entry_to_attr(id, &entry))
    }

    async fn setattr(&self, id: fileid3, _setattr: sattr3) -> Result<fattr3, nfsstat3> {
        debug!(id, "setattr rejected on read-only export");
        Err(nfsstat3::NFS3ERR_ROFS)
    }

    async fn read(
        &self,
        id: fileid3,
        offset: u64,
        count: u32,
    ) -> Result<(Vec<u8>, bool), nfsstat3> {
        trace!(id, offset, count, "read");
        let node_path = self.lookup_path(id)?;

        let content = self
            .blocking(move |tree| tree.read_file(&node_path))
            .await?
            .map_err(|e| tree_error_to_nfsstat(&e))?;

        #[allow(clippy::cast_possible_truncation)]
        let start = offset as usize;
        let end = start.saturating_add(count as usize).min(content.len());
        if start >= content.len() {
            return Ok((vec![], true));
        }

        let eof = end >= content.len();
        Ok((content[start..end].to_vec(), eof))
    }

    async fn write(&self, id: fileid3, _offset: u64, _data: &[u8]) -> Result<fattr3, nfsstat3> {
        debug!(id, "write rejected on read-only export");
        Err(nfsstat3::NFS3ERR_ROFS)
    }

    async fn create(
        &self,
        dirid: fileid3,
        _filename: &filename3,
        _attr: sattr3,
    ) -> Result<(fileid3, fattr3), nfsstat3> {
        debug!(dirid, "create rejected on read-only export");
        Err(nfsstat3::NFS3ERR_ROFS)
    }

    async fn create_exclusive(
        &self,
        dirid: fileid3,
        _filename: &filename3,
    ) -> Result<fileid3, nfsstat3> {
        debug!(dirid, "create_exclusive rejected on read-only export");
        Err(nfsstat3::NFS3ERR_ROFS)
    }

    async fn mkdir(
        &self,
        dirid: fileid3,
        _dirname: &filename3,
    ) -> Result<(fileid3, fattr3), nfsstat3> {
        debug!(dirid, "mkdir rejected on read-only export");
        Err(nfsstat3::NFS3ERR_ROFS)
    }

    async fn remove(&self, dirid: fileid3, _filename: &filename3) -> Result<(), nfsstat3> {
        debug!(dirid, "remove rejected on read-only export");
        Err(nfsstat3::NFS3ERR_ROFS)
    }

    async fn rename(
        &self,
        from_dirid: fileid3,
        _from_filename: &filename3,
        _to_dirid: fileid3,
        _to_filename: &filename3,
    ) -> Result<(), nfsstat3> {
        debug!(from_dirid, "rename rejected on read-only export");
        Err(nfsstat3::NFS3ERR_ROFS)
    }

    async fn readdir(
        &self,
        dirid: fileid3,
        start_after: fileid3,
        max_entries: usize,
    ) -> Result<ReadDirResult, nfsstat3> {
        trace!(dirid, start_after, max_entries, "readdir");
        let dir_path = self.lookup_path(dirid)?;

        let listing_path = dir_path.clone();
        let mut listing = self
            .blocking(move |tree| tree.read_dir(&listing_path))
            .await?
            .map_err(|e| tree_error_to_nfsstat(&e))?;
        listing.sort_by(|a, b| a.name.cmp(&b.name));

        let mut entries: Vec<DirEntry> = Vec::with_capacity(listing.len());
        for entry in &listing {
            let id = self.inodes.get_or_insert(&path::join(&dir_path, &entry.name));
            entries.push(DirEntry {
                fileid: id,
                name: nfsstring(entry.name.as_bytes().to_vec()),
                attr: self.entry_to_attr(id, entry),
            });
        }

        let start_idx = if start_after == 0 {
            0
        } else {
            entries
                .iter()
                .position(|e| e.fileid == start_after)
                .map_or(0, |i| i + 1)
        };
        let entries: Vec<DirEntry> = entries.into_iter().skip(start_idx).take(max_entries).collect();
        let end = entries.len() < max_entries;

        Ok(ReadDirResult { entries, end })
    }

    async fn symlink(
        &self,
        dirid: fileid3,
        _linkname: &filename3,
        _symlink: &nfspath3,
        _attr: &sattr3,
    ) -> Result<(fileid3, fattr3), nfsstat3> {
        debug!(dirid, "symlink rejected on read-only export");
        Err(nfsstat3::NFS3ERR_ROFS)
    }

    async fn readlink(&self, id: fileid3) -> Result<nfspath3, nfsstat3> {
        debug!(id, "readlink not supported");
        Err(nfsstat3::NFS3ERR_NOTSUPP)
    }
}
