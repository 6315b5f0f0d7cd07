//! Filesystem backend behavior tests.

use bytes::Bytes;
use easel_storage::{FilesystemBackend, ObjectStore, StorageError};
use tempfile::tempdir;

async fn backend() -> (tempfile::TempDir, FilesystemBackend) {
    let temp = tempdir().unwrap();
    let backend = FilesystemBackend::new(temp.path()).await.unwrap();
    (temp, backend)
}

#[tokio::test]
async fn put_get_round_trip() {
    let (_temp, backend) = backend().await;

    backend
        .put("hd/orders/a.png", Bytes::from_static(b"pixels"))
        .await
        .unwrap();

    assert!(backend.exists("hd/orders/a.png").await.unwrap());
    let data = backend.get("hd/orders/a.png").await.unwrap();
    assert_eq!(&data[..], b"pixels");

    let meta = backend.head("hd/orders/a.png").await.unwrap();
    assert_eq!(meta.size, 6);
}

#[tokio::test]
async fn get_missing_is_not_found() {
    let (_temp, backend) = backend().await;

    let err = backend.get("missing.png").await.unwrap_err();
    assert!(matches!(err, StorageError::NotFound(_)));
    assert!(!backend.exists("missing.png").await.unwrap());
}

#[tokio::test]
async fn put_if_not_exists_is_first_writer_wins() {
    let (_temp, backend) = backend().await;

    let wrote = backend
        .put_if_not_exists("k", Bytes::from_static(b"first"))
        .await
        .unwrap();
    assert!(wrote);

    let wrote = backend
        .put_if_not_exists("k", Bytes::from_static(b"second"))
        .await
        .unwrap();
    assert!(!wrote);

    let data = backend.get("k").await.unwrap();
    assert_eq!(&data[..], b"first");
}

#[tokio::test]
async fn delete_is_idempotent() {
    let (_temp, backend) = backend().await;

    backend.put("k", Bytes::from_static(b"x")).await.unwrap();
    backend.delete("k").await.unwrap();
    assert!(!backend.exists("k").await.unwrap());

    // Second delete is not an error
    backend.delete("k").await.unwrap();
}

#[tokio::test]
async fn traversal_keys_are_rejected() {
    let (_temp, backend) = backend().await;

    for key in ["../escape", "/abs", "a/../b", ""] {
        let err = backend.put(key, Bytes::from_static(b"x")).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey(_)), "key: {key:?}");
    }
}

#[tokio::test]
async fn list_filters_by_prefix_and_sorts() {
    let (_temp, backend) = backend().await;

    backend
        .put("hd/a.png", Bytes::from_static(b"1"))
        .await
        .unwrap();
    backend
        .put("hd/b.png", Bytes::from_static(b"2"))
        .await
        .unwrap();
    backend
        .put("previews/a.png", Bytes::from_static(b"3"))
        .await
        .unwrap();

    let keys = backend.list("hd/").await.unwrap();
    assert_eq!(keys, vec!["hd/a.png".to_string(), "hd/b.png".to_string()]);

    let all = backend.list("").await.unwrap();
    assert_eq!(all.len(), 3);
}

#[tokio::test]
async fn health_check_passes_for_fresh_backend() {
    let (_temp, backend) = backend().await;
    backend.health_check().await.unwrap();
}
