//! Integration tests for the directory-backed working copy.
//!
//! Verifies:
//! - Nested writes create intermediate directories
//! - Binary content is stored byte-for-byte
//! - Listing reports relative forward-slash paths and SHA-256 hashes
//! - In-flight temp files are hidden from listings
//! - Deletes prune empty parents but keep the root

use bridge_desktop::LocalDirectory;
use bridge_traits::storage::{ContentHash, LocalStorage};
use bytes::Bytes;

const PNG_HEADER: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0xFF, 0xFE];

#[tokio::test]
async fn test_write_creates_parents_and_roundtrips_binary() {
    let dir = tempfile::tempdir().unwrap();
    let local = LocalDirectory::open(dir.path()).await.unwrap();

    local
        .write_file("assets/img/logo.png", Bytes::from_static(PNG_HEADER), "image/png")
        .await
        .unwrap();

    assert!(dir.path().join("assets").join("img").join("logo.png").is_file());

    let content = local.read_file("assets/img/logo.png").await.unwrap();
    assert_eq!(content.data.as_ref(), PNG_HEADER);
    assert_eq!(content.mime_type, "image/png");
}

#[tokio::test]
async fn test_list_tree_reports_relative_paths_and_hashes() {
    let dir = tempfile::tempdir().unwrap();
    let local = LocalDirectory::open(dir.path()).await.unwrap();

    local
        .write_file("notes/a.md", Bytes::from_static(b"# A"), "text/markdown")
        .await
        .unwrap();
    local
        .write_file("b.json", Bytes::from_static(b"{}"), "application/json")
        .await
        .unwrap();
    std::fs::write(dir.path().join("notes").join("c.md.sync-tmp"), b"partial").unwrap();

    let mut tree = local.list_tree().await.unwrap();
    tree.sort_by(|a, b| a.path.cmp(&b.path));

    let paths: Vec<&str> = tree.iter().map(|f| f.path.as_str()).collect();
    assert_eq!(paths, vec!["b.json", "notes/a.md"]);

    let note = &tree[1];
    assert_eq!(note.size, 3);
    assert_eq!(note.content_hash, ContentHash::of(b"# A"));
    assert_eq!(note.mime_type, "text/markdown");
    assert!(note.modified_at > 0);
}

#[tokio::test]
async fn test_fingerprint_single_path() {
    let dir = tempfile::tempdir().unwrap();
    let local = LocalDirectory::open(dir.path()).await.unwrap();

    assert!(local.fingerprint("missing.md").await.unwrap().is_none());

    local
        .write_file("x.md", Bytes::from_static(b"x"), "text/markdown")
        .await
        .unwrap();
    let fp = local.fingerprint("x.md").await.unwrap().unwrap();
    assert_eq!(fp.content_hash, ContentHash::of(b"x"));
}

#[tokio::test]
async fn test_delete_prunes_empty_directories() {
    let dir = tempfile::tempdir().unwrap();
    let local = LocalDirectory::open(dir.path()).await.unwrap();

    local
        .write_file("a/b/c.md", Bytes::from_static(b"c"), "text/markdown")
        .await
        .unwrap();
    local
        .write_file("a/keep.md", Bytes::from_static(b"k"), "text/markdown")
        .await
        .unwrap();

    local.delete_file("a/b/c.md").await.unwrap();

    assert!(!dir.path().join("a").join("b").exists());
    assert!(dir.path().join("a").join("keep.md").exists());
    assert!(dir.path().exists());
}

#[tokio::test]
async fn test_delete_missing_file_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let local = LocalDirectory::open(dir.path()).await.unwrap();

    let err = local.delete_file("ghost.md").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_missing_root_fails_listing() {
    let dir = tempfile::tempdir().unwrap();
    let local = LocalDirectory::new(dir.path().join("not-created"));
    assert!(local.list_tree().await.is_err());
}
