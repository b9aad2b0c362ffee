use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use gantry_archive::{
    ArchiveExtractor, AssemblyError, CommandOutput, CommandRunner, ExtractProgress, ExtractionError, PackageAssembler,
    PackagePiece, ProgressFn, TarGzAssembler, TarGzExtractor, ToolAssembler, ToolCommand, ToolError, ToolExtractor, ZipAssembler,
    ZipExtractor,
};
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

fn recorder() -> (ProgressFn, Arc<Mutex<Vec<ExtractProgress>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    (Arc::new(move |p| sink.lock().unwrap().push(p)), seen)
}

fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
    for (name, data) in entries {
        zip.start_file(*name, zip::write::SimpleFileOptions::default()).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap();
}

#[tokio::test]
async fn assembled_zip_round_trips_through_extractor() {
    let dir = tempdir().unwrap();
    let a = dir.path().join("a");
    let b = dir.path().join("b");
    fs::write(&a, b"level one").unwrap();
    fs::write(&b, vec![5u8; 100_000]).unwrap();
    let package = dir.path().join("package.zip");
    let pieces = [PackagePiece::new(&a, "data/level1.pak"), PackagePiece::new(&b, "bin/game")];

    ZipAssembler.assemble(&pieces, &package).await.unwrap();

    let dest = dir.path().join("staging");
    fs::create_dir(&dest).unwrap();
    let (progress, seen) = recorder();
    let report = ZipExtractor
        .extract(&package, &dest, progress, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.files, 2);
    assert_eq!(fs::read(dest.join("data/level1.pak")).unwrap(), b"level one");
    assert_eq!(fs::read(dest.join("bin/game")).unwrap().len(), 100_000);
    let seen = seen.lock().unwrap();
    assert_eq!(seen.first().unwrap().entries_done, 0);
    assert_eq!(
        *seen.last().unwrap(),
        ExtractProgress {
            entries_done:  2,
            entries_total: Some(2),
        }
    );
}

#[tokio::test]
async fn zip_slip_entry_is_rejected() {
    let dir = tempdir().unwrap();
    let package = dir.path().join("evil.zip");
    write_zip(&package, &[("ok.txt", b"fine"), ("../../escape.txt", b"gotcha")]);
    let dest = dir.path().join("staging");
    fs::create_dir(&dest).unwrap();

    let (progress, _) = recorder();
    let err = ZipExtractor
        .extract(&package, &dest, progress, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ExtractionError::UnsafePath { .. }));
    assert!(!dir.path().join("escape.txt").exists());
}

#[tokio::test]
async fn corrupt_zip_is_reported() {
    let dir = tempdir().unwrap();
    let package = dir.path().join("bad.zip");
    fs::write(&package, b"<html>not a zip</html>").unwrap();
    let (progress, _) = recorder();

    let err = ZipExtractor
        .extract(&package, dir.path(), progress, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ExtractionError::Corrupted { .. }));
}

#[tokio::test]
async fn canceled_before_first_entry() {
    let dir = tempdir().unwrap();
    let package = dir.path().join("p.zip");
    write_zip(&package, &[("a", b"a")]);
    let cancel = CancellationToken::new();
    cancel.cancel();
    let (progress, _) = recorder();

    let err = ZipExtractor.extract(&package, dir.path(), progress, &cancel).await.unwrap_err();

    assert!(matches!(err, ExtractionError::Canceled));
    assert!(!dir.path().join("a").exists());
}

#[tokio::test]
async fn tarball_round_trip_has_unknown_total() {
    let dir = tempdir().unwrap();
    let package = dir.path().join("package.tar.gz");
    let (bin, pak) = (dir.path().join("bin"), dir.path().join("pak"));
    fs::write(&bin, b"elf").unwrap();
    fs::write(&pak, b"pak").unwrap();
    TarGzAssembler
        .assemble(&[PackagePiece::new(&bin, "bin/game"), PackagePiece::new(&pak, "data/a.pak")], &package)
        .await
        .unwrap();
    let dest = dir.path().join("staging");
    fs::create_dir(&dest).unwrap();
    let (progress, seen) = recorder();

    let report = TarGzExtractor
        .extract(&package, &dest, progress, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.files, 2);
    assert_eq!(fs::read(dest.join("data/a.pak")).unwrap(), b"pak");
    assert!(seen.lock().unwrap().iter().all(|p| p.entries_total.is_none()));
}

/// Records invocations and answers with a canned result.
#[derive(Clone)]
struct FakeRunner {
    calls:  Arc<Mutex<Vec<(String, Vec<OsString>)>>>,
    output: CommandOutput,
    create: Option<&'static str>,
}

impl FakeRunner {
    fn new(code: i32, stderr: &str) -> Self {
        Self {
            calls:  Arc::default(),
            output: CommandOutput {
                code:   Some(code),
                stdout: String::new(),
                stderr: stderr.to_owned(),
            },
            create: None,
        }
    }
}

impl CommandRunner for FakeRunner {
    async fn run(&self, program: &str, args: &[OsString]) -> io::Result<CommandOutput> {
        self.calls.lock().unwrap().push((program.to_owned(), args.to_vec()));
        if let Some(placeholder_arg) = self.create {
            let target = args
                .iter()
                .find(|a| a.to_string_lossy().ends_with(placeholder_arg))
                .expect("output argument");
            fs::write(target, b"made by tool")?;
        }
        Ok(self.output.clone())
    }
}

#[tokio::test]
async fn tool_assembler_passes_list_and_package() {
    let dir = tempdir().unwrap();
    let package = dir.path().join("package.bin");
    let mut runner = FakeRunner::new(0, "");
    runner.create = Some("package.bin");
    let assembler = ToolAssembler::new(runner.clone(), ToolCommand::new("packer", ["{list}", "{package}"]));

    assembler
        .assemble(&[PackagePiece::new("/cache/ab/abcd", "data/a.pak")], &package)
        .await
        .unwrap();

    let calls = runner.calls.lock().unwrap();
    assert_eq!(calls[0].0, "packer");
    assert_eq!(calls[0].1[1], package.as_os_str());
    assert!(!dir.path().join("package.pieces").exists());
}

#[tokio::test]
async fn tool_assembler_failure_keeps_diagnostics() {
    let dir = tempdir().unwrap();
    let assembler = ToolAssembler::new(FakeRunner::new(3, "piece missing"), ToolCommand::new("packer", ["{list}"]));

    let err = assembler
        .assemble(&[PackagePiece::new("/nowhere", "a")], &dir.path().join("p.bin"))
        .await
        .unwrap_err();

    match err {
        AssemblyError::Tool(ToolError::Failed { output, status, .. }) => {
            assert_eq!(status, "status 3");
            assert!(output.contains("piece missing"));
        }
        other => panic!("unexpected: {other}"),
    }
}

#[tokio::test]
async fn tool_extractor_reports_final_counts() {
    let dir = tempdir().unwrap();
    let dest = dir.path().join("staging");
    fs::create_dir(&dest).unwrap();
    let mut runner = FakeRunner::new(0, "");
    runner.create = Some("out.txt");
    let extractor = ToolExtractor::new(runner, ToolCommand::new("unpack", ["{archive}", "{dest}/out.txt"]));
    let (progress, seen) = recorder();

    let report = extractor
        .extract(Path::new("/tmp/p.zip"), &dest, progress, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.files, 1);
    assert_eq!(
        *seen.lock().unwrap(),
        vec![ExtractProgress {
            entries_done:  1,
            entries_total: Some(1),
        }]
    );
}

fn append_dir(builder: &mut tar::Builder<impl Write>, path: &str) {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Directory);
    header.set_mode(0o755);
    header.set_size(0);
    builder.append_data(&mut header, path, io::empty()).unwrap();
}

fn append_link(builder: &mut tar::Builder<impl Write>, path: &str, target: &str) {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Symlink);
    header.set_mode(0o777);
    header.set_size(0);
    builder.append_link(&mut header, path, target).unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn chained_symlinks_cannot_escape_the_destination() {
    let dir = tempdir().unwrap();
    let package = dir.path().join("evil.tar.gz");
    let mut builder = tar::Builder::new(flate2::write::GzEncoder::new(
        File::create(&package).unwrap(),
        flate2::Compression::default(),
    ));
    append_dir(&mut builder, "a/b");
    append_dir(&mut builder, "c");
    append_link(&mut builder, "a/b/s", "../../c");
    append_link(&mut builder, "a/b/s/t", "../..");
    let mut header = tar::Header::new_gnu();
    header.set_mode(0o644);
    header.set_size(5);
    builder.append_data(&mut header, "a/b/s/t/pwned", &b"owned"[..]).unwrap();
    builder.into_inner().unwrap().finish().unwrap();

    let dest = dir.path().join("out/staging");
    fs::create_dir_all(&dest).unwrap();
    let (progress, _) = recorder();
    let err = TarGzExtractor
        .extract(&package, &dest, progress, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ExtractionError::UnsafePath { .. }));
    assert!(!dir.path().join("out/pwned").exists());
    assert!(!dir.path().join("pwned").exists());
    assert!(!dest.join("c/pwned").exists());
}
