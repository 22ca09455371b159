//! Integration tests for the path resolver and the read/list/stat facade,
//! running against a fully encrypted in-memory vault.

use std::sync::atomic::Ordering;

use plainview_core::backend::BackendError;
use plainview_core::coalesce::CoalesceError;
use plainview_core::testkit::TestVault;
use plainview_core::tree::TreeError;

const REPORT: &[u8] = b"quarterly numbers: all of them fabricated";

fn sample_vault() -> TestVault {
    let vault = TestVault::new();
    vault.mkdir("/docs");
    vault.mkdir("/docs/archive");
    vault.write_file("/docs/report.txt", REPORT);
    vault.write_file("/docs/archive/old.txt", b"older numbers");
    vault.write_file("/top.bin", &[0u8; 5000]);
    vault
}

#[test]
fn read_file_round_trips_through_the_vault() {
    let vault = sample_vault();
    let tree = vault.open_tree(8);

    assert_eq!(tree.read_file("/docs/report.txt").unwrap(), REPORT);
    assert_eq!(tree.read_file("/top.bin").unwrap(), vec![0u8; 5000]);
    tree.shutdown();
}

#[test]
fn read_file_rejects_directories() {
    let vault = sample_vault();
    let tree = vault.open_tree(8);

    assert!(matches!(
        tree.read_file("/").unwrap_err(),
        TreeError::IsADirectory(_)
    ));
    assert!(matches!(
        tree.read_file("/docs").unwrap_err(),
        TreeError::IsADirectory(_)
    ));
    tree.shutdown();
}

#[test]
fn missing_entries_are_not_found() {
    let vault = sample_vault();
    let tree = vault.open_tree(8);

    assert!(matches!(
        tree.read_file("/docs/absent.txt").unwrap_err(),
        TreeError::NotFound { .. }
    ));
    assert!(matches!(
        tree.read_dir("/no/such/dir").unwrap_err(),
        TreeError::NotFound { .. }
    ));
    tree.shutdown();
}

#[test]
fn file_components_cannot_be_traversed() {
    let vault = sample_vault();
    let tree = vault.open_tree(8);

    assert!(matches!(
        tree.read_file("/docs/report.txt/nested").unwrap_err(),
        TreeError::NotADirectory(_)
    ));
    tree.shutdown();
}

#[test]
fn read_dir_lists_plaintext_names_with_projected_sizes() {
    let vault = TestVault::new();
    vault.write_file("/alpha", b"alpha contents");
    vault.write_file("/beta", b"beta!");
    // A foreign file: its raw name fails base64url decoding, so it is
    // silently skipped, exactly like the diriv and conf files themselves.
    vault.add_stray_file("/", "stray~file", b"junk");
    // Well-formed base64 that is not a valid SIV ciphertext for this vault.
    vault.add_stray_file("/", "AAAAAAAAAAAAAAAAAAAAAA", b"junk");

    let tree = vault.open_tree(8);
    let mut listing = tree.read_dir("/").unwrap();
    listing.sort_by(|a, b| a.name.cmp(&b.name));

    let names: Vec<&str> = listing.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, ["alpha", "beta"]);
    assert_eq!(listing[0].size, b"alpha contents".len() as u64);
    assert_eq!(listing[1].size, b"beta!".len() as u64);
    assert!(!listing[0].is_dir);
    assert_eq!(listing[0].mode, 0o644);
    tree.shutdown();
}

#[test]
fn read_dir_marks_directories() {
    let vault = sample_vault();
    let tree = vault.open_tree(8);

    let mut listing = tree.read_dir("/docs").unwrap();
    listing.sort_by(|a, b| a.name.cmp(&b.name));

    let archive = listing.iter().find(|e| e.name == "archive").unwrap();
    assert!(archive.is_dir);
    let report = listing.iter().find(|e| e.name == "report.txt").unwrap();
    assert!(!report.is_dir);
    assert_eq!(report.size, REPORT.len() as u64);
    tree.shutdown();
}

#[test]
fn stat_reports_plaintext_name_and_size() {
    let vault = sample_vault();
    let tree = vault.open_tree(8);

    let report = tree.stat("/docs/report.txt").unwrap();
    assert_eq!(report.name, "report.txt");
    assert_eq!(report.size, REPORT.len() as u64);
    assert!(!report.is_dir);

    let docs = tree.stat("/docs").unwrap();
    assert_eq!(docs.name, "docs");
    assert!(docs.is_dir);

    let root = tree.stat("/").unwrap();
    assert_eq!(root.name, "/");
    assert!(root.is_dir);
    tree.shutdown();
}

#[test]
fn repeated_resolution_touches_no_new_backend_calls() {
    let vault = sample_vault();
    let tree = vault.open_tree(8);

    let first = tree.read_file("/docs/archive/old.txt").unwrap();
    let reads = vault.fs.read_file_calls.load(Ordering::SeqCst);
    let lists = vault.fs.read_dir_calls.load(Ordering::SeqCst);

    // Same plaintext path again: the directory LRU short-circuits the walk
    // and the coalescer caches hold everything else.
    let second = tree.read_file("/docs/archive/old.txt").unwrap();
    assert_eq!(first, second);
    assert_eq!(vault.fs.read_file_calls.load(Ordering::SeqCst), reads);
    assert_eq!(vault.fs.read_dir_calls.load(Ordering::SeqCst), lists);

    // After a cache clear the walk is repeated and still agrees.
    tree.clear_caches();
    let third = tree.read_file("/docs/archive/old.txt").unwrap();
    assert_eq!(first, third);
    assert!(vault.fs.read_file_calls.load(Ordering::SeqCst) > reads);
    tree.shutdown();
}

#[test]
fn messy_paths_resolve_like_clean_ones() {
    let vault = sample_vault();
    let tree = vault.open_tree(8);

    let clean = tree.read_file("/docs/archive/old.txt").unwrap();
    let reads = vault.fs.read_file_calls.load(Ordering::SeqCst);

    let messy = tree
        .read_file("/docs/../docs/./archive//old.txt")
        .unwrap();
    assert_eq!(clean, messy);
    // The cleaned path hits the same cache keys: no new backend traffic.
    assert_eq!(vault.fs.read_file_calls.load(Ordering::SeqCst), reads);
    tree.shutdown();
}

#[test]
fn wrong_passphrase_fails_to_open() {
    use plainview_core::backend::FsAccessor;
    use plainview_core::tree::FileTree;
    use std::sync::Arc;

    let vault = sample_vault();
    let accessor: Arc<dyn FsAccessor> = Arc::clone(&vault.fs) as Arc<dyn FsAccessor>;
    let err = FileTree::open(&vault.root, b"definitely wrong", 4, accessor).unwrap_err();
    assert!(matches!(err, TreeError::Config(_)));
}

#[test]
fn reads_after_shutdown_fail_fast() {
    let vault = sample_vault();
    let tree = vault.open_tree(4);
    tree.shutdown();

    assert!(matches!(
        tree.read_file("/docs/report.txt").unwrap_err(),
        TreeError::Fetch {
            source: CoalesceError::Closed,
            ..
        }
    ));
}

#[test]
fn backend_errors_carry_their_cause() {
    let vault = sample_vault();
    let tree = vault.open_tree(4);

    // Remove the ciphertext behind an already-resolvable path, then clear
    // caches so the next read reaches the backend again.
    let cipher_docs = vault.cipher_dir("/docs");
    vault.fs.remove(&cipher_docs);
    tree.clear_caches();

    match tree.read_dir("/docs").unwrap_err() {
        TreeError::NotFound { .. } => {}
        TreeError::Fetch { source, .. } => {
            assert!(matches!(
                source,
                CoalesceError::Fetch(plainview_core::coalesce::FetchError::Backend(
                    BackendError::NotFound(_)
                ))
            ));
        }
        other => panic!("unexpected error: {other}"),
    }
    tree.shutdown();
}
