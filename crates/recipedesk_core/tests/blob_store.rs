use recipedesk_core::db::open_db_in_memory;
use recipedesk_core::{BlobKind, BlobStore, SqliteBlobStore, StoreError};
use rusqlite::Connection;

#[test]
fn store_get_exists_delete_cycle() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteBlobStore::try_new(&conn).unwrap();

    store
        .store(BlobKind::Image, "batch-retrieve-image", &[1, 2, 3])
        .unwrap();
    assert!(store.exists(BlobKind::Image, "batch-retrieve-image").unwrap());

    let blob = store
        .get(BlobKind::Image, "batch-retrieve-image")
        .unwrap()
        .unwrap();
    assert_eq!(blob.key, "batch-retrieve-image");
    assert_eq!(blob.payload, vec![1, 2, 3]);
    assert!(blob.timestamp > 0);

    assert!(store.delete(BlobKind::Image, "batch-retrieve-image").unwrap());
    assert!(!store.exists(BlobKind::Image, "batch-retrieve-image").unwrap());
    assert!(store
        .get(BlobKind::Image, "batch-retrieve-image")
        .unwrap()
        .is_none());
}

#[test]
fn storing_existing_key_replaces_payload() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteBlobStore::try_new(&conn).unwrap();

    store.store(BlobKind::Image, "general-image", b"old").unwrap();
    store.store(BlobKind::Image, "general-image", b"new").unwrap();

    let blob = store.get(BlobKind::Image, "general-image").unwrap().unwrap();
    assert_eq!(blob.payload, b"new".to_vec());
    assert_eq!(store.keys(BlobKind::Image).unwrap(), vec!["general-image"]);
}

#[test]
fn delete_of_unknown_key_reports_false() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteBlobStore::try_new(&conn).unwrap();

    assert!(!store.delete(BlobKind::AttachmentFile, "missing.sh").unwrap());
}

#[test]
fn kinds_are_stored_independently() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteBlobStore::try_new(&conn).unwrap();

    store
        .store(BlobKind::AttachmentFile, "run.sh", b"#!/bin/sh")
        .unwrap();
    store.store(BlobKind::Image, "b-image", &[9]).unwrap();
    store.store(BlobKind::Image, "a-image", &[8]).unwrap();

    assert!(!store.exists(BlobKind::Image, "run.sh").unwrap());
    assert_eq!(
        store.keys(BlobKind::Image).unwrap(),
        vec!["a-image", "b-image"]
    );
    assert_eq!(
        store.keys(BlobKind::AttachmentFile).unwrap(),
        vec!["run.sh"]
    );
}

#[test]
fn unmigrated_connection_is_rejected() {
    let conn = Connection::open_in_memory().unwrap();

    match SqliteBlobStore::try_new(&conn) {
        Err(StoreError::SchemaOutdated { found, .. }) => assert_eq!(found, 0),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("unmigrated connection must be rejected"),
    }
}
