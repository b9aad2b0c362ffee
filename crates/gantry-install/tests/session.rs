use std::fs;
use std::path::Path;
use std::slice;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use gantry_fetch::{MemoryClient, MemoryResponse};
use gantry_fs::FolderLock;
use gantry_install::{InstallConfig, InstallError, Installer, SessionState};
use gantry_manifest::{DownloadableInfo, Manifest, ManifestEntry, StaticSource, VersionHandle};
use gantry_progress::Step;
use gantry_verify::ContentHash;
use tempfile::{TempDir, tempdir};
use url::Url;

const BASE: &str = "https://cdn.test/builds/1.0";

struct Piece {
    name: &'static str,
    data: Vec<u8>,
}

impl Piece {
    fn new(name: &'static str, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name,
            data: data.into(),
        }
    }

    fn url(&self) -> String { format!("{BASE}/{}", self.name.replace('/', "_")) }

    fn hash(&self) -> ContentHash { ContentHash::digest(&self.data) }

    fn entry(&self) -> ManifestEntry { ManifestEntry::remote(self.name, Url::parse(&self.url()).unwrap(), self.hash()) }
}

fn pieces() -> Vec<Piece> {
    vec![
        Piece::new("bin/game.exe", vec![0x4du8; 300_000]),
        Piece::new("data/level1.pak", b"level one".to_vec()),
        Piece::new("data/level2.pak", (0..=255u8).cycle().take(70_000).collect::<Vec<_>>()),
    ]
}

fn info(pieces: &[Piece]) -> DownloadableInfo {
    DownloadableInfo::new("1.0", "game-1.0", Manifest::new(pieces.iter().map(Piece::entry).collect()))
}

fn serve_all(client: &MemoryClient, pieces: &[Piece]) {
    for piece in pieces {
        client.serve(piece.url(), piece.data.clone());
    }
}

fn config(root: &Path) -> InstallConfig {
    InstallConfig::rooted_at(root).with_retry_backoff(Duration::from_millis(5))
}

fn setup() -> (TempDir, MemoryClient, Installer<MemoryClient>) {
    let dir = tempdir().unwrap();
    let client = MemoryClient::new();
    let installer = Installer::new(config(dir.path()), client.clone()).unwrap();
    (dir, client, installer)
}

fn assert_installed(install_path: &Path, pieces: &[Piece]) {
    for piece in pieces {
        assert_eq!(fs::read(install_path.join(piece.name)).unwrap(), piece.data, "{}", piece.name);
    }
}

fn leftovers(dir: &Path) -> Vec<String> {
    match fs::read_dir(dir) {
        Ok(entries) => entries
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| !name.ends_with(".lock"))
            .collect(),
        Err(_) => Vec::new(),
    }
}

#[tokio::test]
async fn installs_from_an_empty_cache() {
    let (dir, client, installer) = setup();
    let pieces = pieces();
    serve_all(&client, &pieces);

    let outcome = installer.session(info(&pieces)).run().await.unwrap();

    assert_eq!(outcome.fetched, 3);
    assert_eq!(outcome.reused, 0);
    assert_eq!(outcome.files_extracted, 3);
    assert_eq!(outcome.bytes_downloaded, 300_000 + 9 + 70_000);
    assert_eq!(outcome.install_path, dir.path().join("versions/game-1.0"));
    assert_installed(&outcome.install_path, &pieces);
    for piece in &pieces {
        assert!(installer.store().has(&piece.hash()));
    }
    assert!(leftovers(&installer.config().temp_dir).is_empty());
    assert_eq!(leftovers(&installer.config().install_root), vec!["game-1.0".to_owned()]);
}

#[tokio::test]
async fn reinstall_is_served_from_the_store() {
    let (_dir, client, installer) = setup();
    let pieces = pieces();
    serve_all(&client, &pieces);
    installer.session(info(&pieces)).run().await.unwrap();

    let outcome = installer.session(info(&pieces)).run().await.unwrap();

    assert_eq!(outcome.fetched, 0);
    assert_eq!(outcome.reused, 3);
    assert_installed(&outcome.install_path, &pieces);
    for piece in &pieces {
        assert_eq!(client.requests(&piece.url()), 1);
    }
}

#[tokio::test]
async fn install_through_a_version_handle() {
    let (_dir, client, installer) = setup();
    let pieces = pieces();
    serve_all(&client, &pieces);
    let handle = VersionHandle::new("1.0", Arc::new(StaticSource::new().with(info(&pieces))));

    let outcome = installer.install(&handle).await.unwrap();

    assert_eq!(outcome.version, "1.0");
    assert!(handle.is_resolved());
    assert_installed(&outcome.install_path, &pieces);
}

#[tokio::test]
async fn duplicate_hashes_are_downloaded_once() {
    let (_dir, client, installer) = setup();
    let pieces = [Piece::new("a.txt", "same bytes"), Piece::new("b.txt", "same bytes")];
    serve_all(&client, &pieces);

    let outcome = installer.session(info(&pieces)).run().await.unwrap();

    assert_eq!(outcome.fetched, 2);
    assert_eq!(outcome.bytes_downloaded, 10);
    assert_eq!(
        client.requests(&format!("{BASE}/a.txt")) + client.requests(&format!("{BASE}/b.txt")),
        1
    );
    assert_eq!(fs::read_to_string(outcome.install_path.join("b.txt")).unwrap(), "same bytes");
}

#[tokio::test]
async fn hash_only_entries_use_the_blob_mirror() {
    let dir = tempdir().unwrap();
    let client = MemoryClient::new();
    let mirror = Url::parse("https://mirror.test/blobs/").unwrap();
    let installer = Installer::new(config(dir.path()).with_blob_base_url(mirror), client.clone()).unwrap();
    let data = b"mirrored".to_vec();
    let hash = ContentHash::digest(&data);
    client.serve(format!("https://mirror.test/blobs/{hash}"), data.clone());
    let info = DownloadableInfo::new("2.0", "game-2.0", Manifest::new(vec![ManifestEntry::content("readme.txt", hash)]));

    let outcome = installer.session(info).run().await.unwrap();

    assert_eq!(fs::read(outcome.install_path.join("readme.txt")).unwrap(), data);
}

#[tokio::test]
async fn failed_download_leaves_no_install_folder_but_keeps_committed_blobs() {
    let dir = tempdir().unwrap();
    let client = MemoryClient::new();
    let installer =
        Installer::new(config(dir.path()).with_max_concurrent_downloads(1), client.clone()).unwrap();
    let pieces = [Piece::new("good.bin", "fine"), Piece::new("missing.bin", "never served")];
    serve_all(&client, &pieces[..1]);
    let session = installer.session(info(&pieces));

    let err = session.run().await.unwrap_err();

    assert_eq!(session.state(), SessionState::Failed);
    assert_eq!(err.target(), Some("missing.bin"));
    assert!(!err.is_retryable());
    assert!(!session.install_path().exists());
    assert!(installer.store().has(&pieces[0].hash()));
    assert!(leftovers(&installer.config().temp_dir).is_empty());
    assert!(leftovers(&installer.config().install_root).is_empty());
}

#[tokio::test]
async fn failed_reinstall_keeps_the_previous_version() {
    let (_dir, client, installer) = setup();
    let pieces = pieces();
    serve_all(&client, &pieces);
    let first = installer.session(info(&pieces)).run().await.unwrap();

    let broken = Piece::new("data/level3.pak", "not served");
    let mut manifest: Vec<ManifestEntry> = pieces.iter().map(Piece::entry).collect();
    manifest.push(broken.entry());
    let info = DownloadableInfo::new("1.0", "game-1.0", Manifest::new(manifest));
    installer.session(info).run().await.unwrap_err();

    assert_installed(&first.install_path, &pieces);
    assert!(!first.install_path.join("data/level3.pak").exists());
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let (_dir, client, installer) = setup();
    let piece = Piece::new("flaky.bin", vec![1u8; 5000]);
    client.respond(piece.url(), MemoryResponse::ok(piece.data.clone()).fail_times(2));

    let outcome = installer.session(info(slice::from_ref(&piece))).run().await.unwrap();

    assert_eq!(outcome.fetched, 1);
    assert_eq!(client.requests(&piece.url()), 3);
}

#[tokio::test]
async fn retries_are_bounded() {
    let dir = tempdir().unwrap();
    let client = MemoryClient::new();
    let installer = Installer::new(config(dir.path()).with_max_retries(1), client.clone()).unwrap();
    let piece = Piece::new("flaky.bin", "x");
    client.respond(piece.url(), MemoryResponse::ok("x").fail_times(5));

    let err = installer.session(info(slice::from_ref(&piece))).run().await.unwrap_err();

    assert!(matches!(err.root_cause(), InstallError::Network(_)));
    assert_eq!(client.requests(&piece.url()), 2);
}

#[tokio::test]
async fn html_error_page_fails_without_retry() {
    let (_dir, client, installer) = setup();
    let piece = Piece::new("a.bin", "payload");
    client.respond(
        piece.url(),
        MemoryResponse::ok("<html>maintenance</html>").content_type("text/html"),
    );
    let session = installer.session(info(slice::from_ref(&piece)));

    let err = session.run().await.unwrap_err();

    assert_eq!(session.state(), SessionState::Failed);
    assert!(err.to_string().starts_with("a.bin: Downloading failed"));
    assert_eq!(client.requests(&piece.url()), 1);
    assert!(!installer.store().has(&piece.hash()));
}

#[tokio::test]
async fn corrupted_bytes_are_never_committed() {
    let dir = tempdir().unwrap();
    let client = MemoryClient::new();
    let installer = Installer::new(config(dir.path()).with_max_retries(0), client.clone()).unwrap();
    let piece = Piece::new("a.bin", "expected");
    client.serve(piece.url(), "tampered");

    let err = installer.session(info(slice::from_ref(&piece))).run().await.unwrap_err();

    assert!(matches!(err.root_cause(), InstallError::HashMismatch { .. }));
    assert!(!installer.store().has(&piece.hash()));
    assert!(!installer.store().has(&ContentHash::digest(b"tampered")));
}

#[tokio::test]
async fn cancel_during_download() {
    let (_dir, client, installer) = setup();
    let piece = Piece::new("big.bin", vec![9u8; 1 << 20]);
    client.respond(piece.url(), MemoryResponse::ok(piece.data.clone()).stall_after(4096));
    let session = installer.session(info(slice::from_ref(&piece)));
    let token = session.cancel_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
    });

    let err = session.run().await.unwrap_err();

    assert!(err.is_cancellation());
    assert_eq!(session.state(), SessionState::Canceled);
    assert!(!session.install_path().exists());
    assert!(!installer.store().has(&piece.hash()));
    assert!(leftovers(&installer.config().temp_dir).is_empty());
}

#[tokio::test]
async fn cancel_before_run_touches_nothing() {
    let (_dir, client, installer) = setup();
    let pieces = pieces();
    serve_all(&client, &pieces);
    let session = installer.session(info(&pieces));
    session.cancel();

    let err = session.run().await.unwrap_err();

    assert!(err.is_cancellation());
    assert_eq!(session.state(), SessionState::Canceled);
    for piece in &pieces {
        assert_eq!(client.requests(&piece.url()), 0);
    }
}

#[tokio::test]
async fn locked_folder_is_busy() {
    let (_dir, client, installer) = setup();
    let pieces = pieces();
    serve_all(&client, &pieces);
    let _held = FolderLock::try_acquire(&installer.config().install_root, "game-1.0").unwrap();

    let err = installer.session(info(&pieces)).run().await.unwrap_err();

    assert!(matches!(err, InstallError::Busy { ref folder } if folder == "game-1.0"));
}

#[tokio::test]
async fn invalid_manifest_fails_before_any_request() {
    let (_dir, client, installer) = setup();
    let piece = Piece::new("../escape.bin", "x");
    client.serve(piece.url(), "x");

    let err = installer.session(info(slice::from_ref(&piece))).run().await.unwrap_err();

    assert!(matches!(err, InstallError::ManifestInvalid(_)));
    assert_eq!(client.requests(&piece.url()), 0);
}

#[tokio::test]
async fn states_are_reported_in_order() {
    let (_dir, client, installer) = setup();
    let pieces = pieces();
    serve_all(&client, &pieces);
    let session = installer.session(info(&pieces));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    session.on_state_change(move |state| sink.lock().unwrap().push(state));

    session.run().await.unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            SessionState::Resolving,
            SessionState::Fetching,
            SessionState::Assembling,
            SessionState::Extracting,
            SessionState::Finalizing,
            SessionState::Completed,
        ]
    );
    assert!(matches!(
        session.run().await,
        Err(InstallError::InvalidState {
            from: SessionState::Completed,
            ..
        })
    ));
}

#[tokio::test]
async fn channels_follow_the_step_machine() {
    let (_dir, client, installer) = setup();
    let pieces = pieces();
    serve_all(&client, &pieces);
    let session = installer.session(info(&pieces));
    let steps = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&steps);
    session.on_channel_added(move |channel| {
        let sink = Arc::clone(&sink);
        channel.subscribe(move |c| sink.lock().unwrap().push((c.file_identifier().to_owned(), c.step())));
    });

    session.run().await.unwrap();

    let channels = session.channels();
    let names: Vec<_> = channels.iter().map(|c| c.file_identifier().to_owned()).collect();
    assert_eq!(names, ["bin/game.exe", "data/level1.pak", "data/level2.pak", "package.zip"]);
    for channel in &channels {
        assert_eq!(channel.step(), Step::Processing);
        assert_eq!(channel.current_progress(), channel.finished_progress());
    }

    let steps_of = |file: &str| {
        let mut seen: Vec<Step> = steps.lock().unwrap().iter().filter(|(f, _)| f == file).map(|(_, s)| *s).collect();
        seen.dedup();
        seen
    };
    assert_eq!(steps_of("data/level1.pak"), [Step::Downloading, Step::Verifying, Step::Processing]);
    assert_eq!(steps_of("package.zip"), [Step::Extracting, Step::Processing]);
}

#[tokio::test]
async fn cached_entries_start_verifying() {
    let (_dir, client, installer) = setup();
    let pieces = pieces();
    serve_all(&client, &pieces);
    installer.session(info(&pieces)).run().await.unwrap();

    let session = installer.session(info(&pieces));
    let initial = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&initial);
    session.on_channel_added(move |channel| sink.lock().unwrap().push((channel.step(), channel.finished_progress())));
    session.run().await.unwrap();

    let initial = initial.lock().unwrap();
    assert_eq!(initial[0], (Step::Verifying, Some(300_000)));
    assert_eq!(initial[1], (Step::Verifying, Some(9)));
}

#[tokio::test]
async fn corrupt_cache_entry_is_downloaded_again() {
    let (_dir, client, installer) = setup();
    let pieces = pieces();
    serve_all(&client, &pieces);
    installer.session(info(&pieces)).run().await.unwrap();
    fs::write(installer.store().blob_path(&pieces[1].hash()), "CORRUPTED").unwrap();

    let outcome = installer.session(info(&pieces)).run().await.unwrap();

    assert_eq!(outcome.fetched, 1);
    assert_eq!(outcome.reused, 2);
    assert_eq!(client.requests(&pieces[1].url()), 2);
    assert_eq!(client.requests(&pieces[0].url()), 1);
    assert_installed(&outcome.install_path, &pieces);
}

#[tokio::test]
async fn stored_hash_only_entry_installs_without_a_mirror() {
    let dir = tempdir().unwrap();
    let client = MemoryClient::new();
    let mirror = Url::parse("https://mirror.test/blobs/").unwrap();
    let seeded = Installer::new(config(dir.path()).with_blob_base_url(mirror), client.clone()).unwrap();
    let data = b"shared readme".to_vec();
    let hash = ContentHash::digest(&data);
    client.serve(format!("https://mirror.test/blobs/{hash}"), data.clone());
    let manifest = || Manifest::new(vec![ManifestEntry::content("readme.txt", hash)]);
    seeded
        .session(DownloadableInfo::new("1.0", "docs-1.0", manifest()))
        .run()
        .await
        .unwrap();

    let installer = Installer::new(config(dir.path()), client.clone()).unwrap();
    let outcome = installer
        .session(DownloadableInfo::new("2.0", "docs-2.0", manifest()))
        .run()
        .await
        .unwrap();

    assert_eq!(outcome.reused, 1);
    assert_eq!(fs::read(outcome.install_path.join("readme.txt")).unwrap(), data);
}
