//! Tests driving the NFS adapter over an in-memory encrypted vault.

use std::sync::Arc;

use nfsserve::nfs::{filename3, ftype3, nfsstat3, nfsstring, sattr3};
use nfsserve::vfs::{NFSFileSystem, VFSCapabilities};
use plainview_core::testkit::TestVault;
use plainview_nfs::inode::ROOT_FILEID;
use plainview_nfs::PlainViewNfs;

const SONG: &[u8] = b"I am the very model of a modern major general";

fn fixture() -> (TestVault, PlainViewNfs) {
    let vault = TestVault::new();
    vault.mkdir("/music");
    vault.write_file("/music/song.txt", SONG);
    vault.write_file("/readme.md", b"# hello");
    let fs = PlainViewNfs::new(Arc::new(vault.open_tree(8)));
    (vault, fs)
}

fn name(s: &str) -> filename3 {
    nfsstring(s.as_bytes().to_vec())
}

#[tokio::test(flavor = "multi_thread")]
async fn export_is_read_only() {
    let (_vault, fs) = fixture();
    assert!(matches!(fs.capabilities(), VFSCapabilities::ReadOnly));
}

#[tokio::test(flavor = "multi_thread")]
async fn lookup_and_getattr_walk_the_tree() {
    let (_vault, fs) = fixture();

    let music = fs.lookup(ROOT_FILEID, &name("music")).await.unwrap();
    let song = fs.lookup(music, &name("song.txt")).await.unwrap();

    let attr = fs.getattr(song).await.unwrap();
    assert!(matches!(attr.ftype, ftype3::NF3REG));
    assert_eq!(attr.size, SONG.len() as u64);

    let dir_attr = fs.getattr(music).await.unwrap();
    assert!(matches!(dir_attr.ftype, ftype3::NF3DIR));

    // Dot and dotdot resolve without touching the backend.
    assert_eq!(fs.lookup(music, &name(".")).await.unwrap(), music);
    assert_eq!(fs.lookup(music, &name("..")).await.unwrap(), ROOT_FILEID);

    assert!(matches!(
        fs.lookup(music, &name("missing.txt")).await.unwrap_err(),
        nfsstat3::NFS3ERR_NOENT
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn read_returns_decrypted_slices() {
    let (_vault, fs) = fixture();

    let music = fs.lookup(ROOT_FILEID, &name("music")).await.unwrap();
    let song = fs.lookup(music, &name("song.txt")).await.unwrap();

    let (all, eof) = fs.read(song, 0, 4096).await.unwrap();
    assert_eq!(all, SONG);
    assert!(eof);

    let (head, eof) = fs.read(song, 0, 8).await.unwrap();
    assert_eq!(head, &SONG[..8]);
    assert!(!eof);

    let (tail, eof) = fs.read(song, 8, 4096).await.unwrap();
    assert_eq!(tail, &SONG[8..]);
    assert!(eof);

    let (past, eof) = fs.read(song, 10_000, 16).await.unwrap();
    assert!(past.is_empty());
    assert!(eof);
}

#[tokio::test(flavor = "multi_thread")]
async fn readdir_lists_plaintext_entries() {
    let (_vault, fs) = fixture();

    let result = fs.readdir(ROOT_FILEID, 0, 100).await.unwrap();
    assert!(result.end);
    let names: Vec<String> = result
        .entries
        .iter()
        .map(|e| String::from_utf8(e.name.0.clone()).unwrap())
        .collect();
    // The diriv and conf control files never appear.
    assert_eq!(names, ["music", "readme.md"]);

    // Pagination picks up after the given cookie.
    let first = fs.readdir(ROOT_FILEID, 0, 1).await.unwrap();
    assert_eq!(first.entries.len(), 1);
    assert!(!first.end);
    let rest = fs
        .readdir(ROOT_FILEID, first.entries[0].fileid, 100)
        .await
        .unwrap();
    assert_eq!(rest.entries.len(), 1);
    assert!(rest.end);
}

#[tokio::test(flavor = "multi_thread")]
async fn mutating_operations_are_unsupported() {
    let (_vault, fs) = fixture();

    assert!(matches!(
        fs.write(ROOT_FILEID, 0, b"nope").await.unwrap_err(),
        nfsstat3::NFS3ERR_ROFS
    ));
    assert!(matches!(
        fs.create(ROOT_FILEID, &name("new"), sattr3::default())
            .await
            .unwrap_err(),
        nfsstat3::NFS3ERR_ROFS
    ));
    assert!(matches!(
        fs.create_exclusive(ROOT_FILEID, &name("new")).await.unwrap_err(),
        nfsstat3::NFS3ERR_ROFS
    ));
    assert!(matches!(
        fs.mkdir(ROOT_FILEID, &name("new")).await.unwrap_err(),
        nfsstat3::NFS3ERR_ROFS
    ));
    assert!(matches!(
        fs.remove(ROOT_FILEID, &name("readme.md")).await.unwrap_err(),
        nfsstat3::NFS3ERR_ROFS
    ));
    assert!(matches!(
        fs.rename(ROOT_FILEID, &name("readme.md"), ROOT_FILEID, &name("x"))
            .await
            .unwrap_err(),
        nfsstat3::NFS3ERR_ROFS
    ));
    assert!(matches!(
        fs.symlink(ROOT_FILEID, &name("link"), &name("target"), &sattr3::default())
            .await
            .unwrap_err(),
        nfsstat3::NFS3ERR_ROFS
    ));
    assert!(matches!(
        fs.setattr(ROOT_FILEID, sattr3::default()).await.unwrap_err(),
        nfsstat3::NFS3ERR_ROFS
    ));
    assert!(matches!(
        fs.readlink(ROOT_FILEID).await.unwrap_err(),
        nfsstat3::NFS3ERR_NOTSUPP
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn stale_ids_are_rejected() {
    let (_vault, fs) = fixture();
    assert!(matches!(
        fs.getattr(424242).await.unwrap_err(),
        nfsstat3::NFS3ERR_STALE
    ));
    assert!(matches!(
        fs.read(424242, 0, 16).await.unwrap_err(),
        nfsstat3::NFS3ERR_STALE
    ));
}
