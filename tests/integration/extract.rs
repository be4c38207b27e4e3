use std::path::Path;
use tempfile::TempDir;
use upkeep_cli::archive::{ArchiveFormat, extract_archive};
use upkeep_cli::core::UpkeepError;
use upkeep_cli::test_utils::{ArchiveBuilder, snapshot};

type WriteArchive = fn(&ArchiveBuilder, &Path) -> anyhow::Result<()>;

fn sample() -> ArchiveBuilder {
    ArchiveBuilder::new()
        .dir("data/")
        .file("readme.txt", b"hello")
        .file("data/levels/1.dat", b"level one")
        .executable("bin/app", b"#!/bin/sh\necho v2\n")
}

fn assert_sample_extracted(dest: &Path) {
    let files = snapshot(dest);
    assert_eq!(files.len(), 3);
    assert_eq!(files["readme.txt"], b"hello");
    assert_eq!(files["data/levels/1.dat"], b"level one");
    assert!(dest.join("data").is_dir());

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(dest.join("bin/app")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }
}

#[test]
fn test_extract_zip() {
    let temp = TempDir::new().unwrap();
    let archive = temp.path().join("update.zip");
    sample().write_zip(&archive).unwrap();

    let dest = temp.path().join("update_temp");
    let summary = extract_archive(&archive, &dest).unwrap();

    assert_eq!(summary.format, ArchiveFormat::Zip);
    assert_eq!(summary.files, 3);
    assert_sample_extracted(&dest);
}

#[test]
fn test_extract_tar_and_tar_gz() {
    let temp = TempDir::new().unwrap();

    let tar = temp.path().join("update.tar");
    sample().write_tar(&tar).unwrap();
    let dest = temp.path().join("from-tar");
    assert_eq!(extract_archive(&tar, &dest).unwrap().format, ArchiveFormat::Tar);
    assert_sample_extracted(&dest);

    let tgz = temp.path().join("update.tgz");
    sample().write_tar_gz(&tgz).unwrap();
    let dest = temp.path().join("from-tgz");
    assert_eq!(extract_archive(&tgz, &dest).unwrap().format, ArchiveFormat::TarGz);
    assert_sample_extracted(&dest);
}

#[cfg(unix)]
#[test]
fn test_recorded_modes_are_kept_even_when_empty() {
    use std::os::unix::fs::PermissionsExt;

    let temp = TempDir::new().unwrap();
    let archive = temp.path().join("update.tar");
    ArchiveBuilder::new()
        .file_with_mode("locked.bin", b"sealed", 0o000)
        .file_with_mode("private.key", b"secret", 0o600)
        .write_tar(&archive)
        .unwrap();

    let dest = temp.path().join("update_temp");
    extract_archive(&archive, &dest).unwrap();

    let mode_of = |name: &str| {
        std::fs::metadata(dest.join(name)).unwrap().permissions().mode() & 0o777
    };
    assert_eq!(mode_of("locked.bin"), 0o000);
    assert_eq!(mode_of("private.key"), 0o600);
}

#[test]
fn test_format_detected_from_content_not_name() {
    let temp = TempDir::new().unwrap();
    let archive = temp.path().join("update.bin");
    sample().write_tar_gz(&archive).unwrap();

    let summary = extract_archive(&archive, &temp.path().join("out")).unwrap();
    assert_eq!(summary.format, ArchiveFormat::TarGz);
}

#[test]
fn test_traversal_entry_writes_nothing() {
    let both: &[(&str, WriteArchive)] =
        &[("evil.zip", ArchiveBuilder::write_zip), ("evil.tar", ArchiveBuilder::write_tar)];
    let tar_only: &[(&str, WriteArchive)] = &[("evil.tar", ArchiveBuilder::write_tar)];
    let cases = [
        ("../escape.txt", both),
        ("data/../../escape.txt", both),
        ("/etc/escape.txt", tar_only),
    ];

    for (name, writers) in cases {
        let temp = TempDir::new().unwrap();
        let builder = ArchiveBuilder::new()
            .file("first.txt", b"precedes the bad entry in archive order")
            .file(name, b"pwned");

        for (archive, write) in writers {
            let archive = temp.path().join(archive);
            write(&builder, &archive).unwrap();

            let dest = temp.path().join("nested").join("update_temp");
            let err = extract_archive(&archive, &dest).unwrap_err();
            assert!(
                matches!(
                    err.downcast_ref::<UpkeepError>(),
                    Some(UpkeepError::PathTraversal { .. })
                ),
                "{name} in {}: {err:#}",
                archive.display()
            );
            assert!(!dest.exists(), "destination must not be created for {name}");
            assert!(!temp.path().join("escape.txt").exists());
            assert!(!temp.path().join("nested").join("escape.txt").exists());
        }
    }
}

#[test]
fn test_traversal_leaves_existing_destination_untouched() {
    let temp = TempDir::new().unwrap();
    let dest = temp.path().join("update_temp");
    std::fs::create_dir_all(&dest).unwrap();
    std::fs::write(dest.join("keep.txt"), "kept").unwrap();

    let archive = temp.path().join("evil.tar.gz");
    ArchiveBuilder::new()
        .file("new.txt", b"new")
        .file("../outside.txt", b"pwned")
        .write_tar_gz(&archive)
        .unwrap();

    assert!(extract_archive(&archive, &dest).is_err());
    let files = snapshot(&dest);
    assert_eq!(files.len(), 1);
    assert_eq!(files["keep.txt"], b"kept");
    assert!(!temp.path().join("outside.txt").exists());
}

#[test]
fn test_symlink_entries_are_rejected() {
    let temp = TempDir::new().unwrap();
    let builder = ArchiveBuilder::new().file("a.txt", b"a").symlink("link", "/etc/passwd");

    let zip = temp.path().join("link.zip");
    builder.write_zip(&zip).unwrap();
    let err = extract_archive(&zip, &temp.path().join("z")).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<UpkeepError>(),
        Some(UpkeepError::UnsupportedEntryType { .. })
    ));

    let tar = temp.path().join("link.tar");
    builder.write_tar(&tar).unwrap();
    let err = extract_archive(&tar, &temp.path().join("t")).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<UpkeepError>(),
        Some(UpkeepError::UnsupportedEntryType { .. })
    ));
    assert!(!temp.path().join("t").exists());
}

#[test]
fn test_unsupported_formats() {
    let temp = TempDir::new().unwrap();

    let seven_zip = temp.path().join("update.7z");
    std::fs::write(&seven_zip, b"7z\xBC\xAF\x27\x1Cpayload").unwrap();
    let err = extract_archive(&seven_zip, &temp.path().join("a")).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<UpkeepError>(),
        Some(UpkeepError::UnsupportedArchiveFormat { .. })
    ));

    let text = temp.path().join("notes.txt");
    std::fs::write(&text, b"just some text").unwrap();
    assert!(extract_archive(&text, &temp.path().join("b")).is_err());
    assert!(!temp.path().join("b").exists());
}

#[test]
fn test_corrupt_zip_is_reported() {
    let temp = TempDir::new().unwrap();
    let archive = temp.path().join("broken.zip");
    std::fs::write(&archive, b"PK\x03\x04 this is not really a zip").unwrap();

    let err = extract_archive(&archive, &temp.path().join("out")).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<UpkeepError>(),
        Some(UpkeepError::ArchiveCorrupt { .. })
    ));
}
