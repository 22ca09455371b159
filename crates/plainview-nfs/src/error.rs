//! Mapping core errors onto NFSv3 status codes.

use nfsserve::nfs::nfsstat3;
use plainview_core::backend::BackendError;
use plainview_core::coalesce::{CoalesceError, FetchError};
use plainview_core::tree::TreeError;

/// Translate a facade error into the closest NFSv3 status.
pub fn tree_error_to_nfsstat(err: &TreeError) -> nfsstat3 {
    match err {
        TreeError::NotFound { .. } => nfsstat3::NFS3ERR_NOENT,
        TreeError::NotADirectory(_) => nfsstat3::NFS3ERR_NOTDIR,
        TreeError::IsADirectory(_) => nfsstat3::NFS3ERR_ISDIR,
        TreeError::Backend { source, .. } => backend_error_to_nfsstat(source),
        TreeError::Fetch { source, .. } => coalesce_error_to_nfsstat(source),
        TreeError::Decrypt { .. } => nfsstat3::NFS3ERR_IO,
        TreeError::Config(_) => nfsstat3::NFS3ERR_IO,
    }
}

fn coalesce_error_to_nfsstat(err: &CoalesceError) -> nfsstat3 {
    match err {
        CoalesceError::Fetch(FetchError::Backend(source)) => backend_error_to_nfsstat(source),
        CoalesceError::Fetch(FetchError::Name(_)) => nfsstat3::NFS3ERR_IO,
        // The request may succeed once the queue drains; ask the client to
        // retry rather than reporting hard failure.
        CoalesceError::QueueTimeout => nfsstat3::NFS3ERR_JUKEBOX,
        CoalesceError::Closed => nfsstat3::NFS3ERR_IO,
        CoalesceError::Exhausted { .. } => nfsstat3::NFS3ERR_IO,
    }
}

fn backend_error_to_nfsstat(err: &BackendError) -> nfsstat3 {
    match err {
        BackendError::NotFound(_) => nfsstat3::NFS3ERR_NOENT,
        BackendError::Io { .. } | BackendError::Unavailable(_) => nfsstat3::NFS3ERR_IO,
    }
}
