use std::fs;
use std::path::{Path, PathBuf};

use gantry_store::{ContentStore, Error};
use gantry_verify::ContentHash;
use proptest::prelude::*;
use tempfile::tempdir;

fn write_temp(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, data).unwrap();
    path
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_commits_of_same_hash_leave_one_blob() {
    let dir = tempdir().unwrap();
    let store = ContentStore::open(dir.path().join("cache")).unwrap();
    let data = b"shared mesh".repeat(4096);
    let hash = ContentHash::digest(&data);

    let commits = (0..8).map(|i| {
        let store = store.clone();
        let temp = write_temp(dir.path(), &format!("writer-{i}.part"), &data);
        tokio::spawn(async move { store.commit(&temp, &hash).await })
    });
    let results: Vec<_> = join_all(commits).await;

    for result in results {
        let blob = result.unwrap();
        assert_eq!(blob.size_bytes, data.len() as u64);
    }
    let shard = store.blob_path(&hash).parent().unwrap().to_path_buf();
    assert_eq!(fs::read_dir(shard).unwrap().count(), 1);
    assert_eq!(fs::read(store.blob_path(&hash)).unwrap(), data);
    assert_eq!(fs::read_dir(store.root().join("tmp")).unwrap().count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_commits_of_different_hashes_all_land() {
    let dir = tempdir().unwrap();
    let store = ContentStore::open(dir.path().join("cache")).unwrap();
    let pieces: Vec<Vec<u8>> = (0..16u8).map(|i| vec![i; 10_000 + i as usize]).collect();

    let commits = pieces.iter().enumerate().map(|(i, data)| {
        let store = store.clone();
        let hash = ContentHash::digest(data);
        let temp = write_temp(dir.path(), &format!("piece-{i}.part"), data);
        tokio::spawn(async move { store.commit(&temp, &hash).await })
    });
    let blobs: Vec<_> = join_all(commits).await.into_iter().map(|r| r.unwrap()).collect();

    for (blob, data) in blobs.iter().zip(&pieces) {
        assert_eq!(blob.hash, ContentHash::digest(data));
        assert_eq!(fs::read(&blob.storage_path).unwrap(), *data);
    }
    assert_eq!(fs::read_dir(store.root().join("tmp")).unwrap().count(), 0);
}

async fn join_all<T>(
    handles: impl Iterator<Item = tokio::task::JoinHandle<T>>,
) -> Vec<T> {
    let mut out = Vec::new();
    for handle in handles {
        out.push(handle.await.unwrap());
    }
    out
}

#[tokio::test]
async fn verify_removes_corrupt_blob() {
    let dir = tempdir().unwrap();
    let store = ContentStore::open(dir.path().join("cache")).unwrap();
    let hash = ContentHash::digest(b"original");
    let blob = store
        .commit(&write_temp(dir.path(), "a.part", b"original"), &hash)
        .await
        .unwrap();

    assert!(store.verify(&hash).await.unwrap());

    fs::write(&blob.storage_path, b"bit rot").unwrap();
    assert!(!store.verify(&hash).await.unwrap());
    assert!(!store.has(&hash));
}

#[tokio::test]
async fn verify_and_open_missing_blob() {
    let dir = tempdir().unwrap();
    let store = ContentStore::open(dir.path()).unwrap();
    let hash = ContentHash::digest(b"never stored");

    assert!(matches!(store.verify(&hash).await, Err(Error::NotFound(_))));
    assert!(matches!(store.open_read(&hash).await, Err(Error::NotFound(_))));
}

#[tokio::test]
async fn open_read_returns_blob_bytes() {
    use tokio::io::AsyncReadExt;

    let dir = tempdir().unwrap();
    let store = ContentStore::open(dir.path().join("cache")).unwrap();
    let hash = ContentHash::digest(b"sound bank");
    store
        .commit(&write_temp(dir.path(), "s.part", b"sound bank"), &hash)
        .await
        .unwrap();

    let mut file = store.open_read(&hash).await.unwrap();
    let mut buf = Vec::new();
    file.read_to_end(&mut buf).await.unwrap();
    assert_eq!(buf, b"sound bank");
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn commit_succeeds_only_for_matching_hash(
        data in proptest::collection::vec(any::<u8>(), 0..4096),
        other in proptest::collection::vec(any::<u8>(), 1..64),
    ) {
        let dir = tempdir().unwrap();
        let store = ContentStore::open(dir.path().join("cache")).unwrap();
        let actual = ContentHash::digest(&data);
        let mut wrong_data = data.clone();
        wrong_data.extend_from_slice(&other);
        let wrong = ContentHash::digest(&wrong_data);

        let mismatch = store.commit_blocking(&write_temp(dir.path(), "bad.part", &data), &wrong);
        let is_mismatch = matches!(mismatch, Err(Error::HashMismatch { .. }));
        prop_assert!(is_mismatch);
        prop_assert!(!store.has(&wrong));

        let blob = store
            .commit_blocking(&write_temp(dir.path(), "good.part", &data), &actual)
            .unwrap();
        prop_assert_eq!(fs::read(blob.storage_path).unwrap(), data);
    }
}
