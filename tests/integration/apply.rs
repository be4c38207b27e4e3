use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use upkeep_cli::apply::{Journal, apply_changes};
use upkeep_cli::changes::{ChangeManifest, IgnoreRules, diff_trees};
use upkeep_cli::core::UpkeepError;
use upkeep_cli::test_utils::TreeFixture;

fn manifest(added: &[&str], deleted: &[&str], modified: &[&str]) -> ChangeManifest {
    let owned = |items: &[&str]| items.iter().map(|s| (*s).to_string()).collect();
    ChangeManifest {
        added: owned(added),
        deleted: owned(deleted),
        modified: owned(modified),
    }
}

#[tokio::test]
async fn test_apply_makes_install_match_staging() {
    let install = TreeFixture::with_files(&[
        ("bin/app", "v1"),
        ("data/keep.dat", "same"),
        ("data/old/obsolete.dat", "obsolete"),
        ("config/settings.ini", "user"),
    ])
    .unwrap();
    let staging = TreeFixture::with_files(&[
        ("bin/app", "v2"),
        ("data/keep.dat", "same"),
        ("data/new/fresh.dat", "fresh"),
    ])
    .unwrap();

    let changes =
        diff_trees(install.path(), staging.path(), &IgnoreRules::defaults(), 2).await.unwrap();
    let summary = apply_changes(install.path(), staging.path(), &changes).unwrap();

    assert_eq!(summary.installed, 2);
    assert_eq!(summary.removed, 1);
    assert_eq!(install.read("bin/app").unwrap(), "v2");
    assert_eq!(install.read("data/new/fresh.dat").unwrap(), "fresh");
    assert_eq!(install.read("config/settings.ini").unwrap(), "user");
    assert!(!install.exists("data/old/obsolete.dat"));
    assert!(!install.exists("data/old"), "emptied directory should be pruned");
    assert!(install.exists("data"));

    // No journal or backup directory survives a commit
    assert!(Journal::read(install.path()).unwrap().is_none());
    let leftovers: Vec<_> = std::fs::read_dir(install.path())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().starts_with(".upkeep-"))
        .collect();
    assert!(leftovers.is_empty());

    let again =
        diff_trees(install.path(), staging.path(), &IgnoreRules::defaults(), 2).await.unwrap();
    assert!(again.is_empty(), "{again:?}");
}

#[test]
fn test_failure_at_any_step_restores_install_byte_for_byte() {
    let added = ["a/one.txt", "a/b/two.txt", "three.txt", "c/four.txt"];

    // The i-th added entry has no staged source, so the apply fails at step i
    for missing in 0..added.len() {
        let install = TreeFixture::with_files(&[
            ("keep.txt", "keep"),
            ("mod1.txt", "old 1"),
            ("mod2.txt", "old 2"),
            ("del/gone.txt", "still here"),
        ])
        .unwrap();
        let staging = TreeFixture::with_files(&[("mod1.txt", "new 1"), ("mod2.txt", "new 2")])
            .unwrap();
        for (i, relative) in added.iter().enumerate() {
            if i != missing {
                staging.write(relative, relative.as_bytes()).unwrap();
            }
        }

        let before = install.snapshot();
        let changes = manifest(&added, &["del/gone.txt"], &["mod1.txt", "mod2.txt"]);

        let err = apply_changes(install.path(), staging.path(), &changes).unwrap_err();
        match err.downcast_ref::<UpkeepError>() {
            Some(UpkeepError::ApplyFailed {
                path,
            }) => assert_eq!(path, added[missing]),
            other => panic!("expected ApplyFailed, got {other:?}: {err:#}"),
        }

        assert_eq!(install.snapshot(), before, "failure at step {missing}");
        assert!(!install.exists("a"), "created directories are removed (step {missing})");
        assert!(!install.exists("c"));
        assert!(Journal::read(install.path()).unwrap().is_none());
    }
}

#[test]
fn test_failure_after_modifications_restores_them() {
    let install =
        TreeFixture::with_files(&[("mod1.txt", "old 1"), ("bin/app", "old app")]).unwrap();
    let staging = TreeFixture::with_files(&[("bin/app", "new app")]).unwrap();
    let before = install.snapshot();

    // Modified entries run after added ones; mod1.txt has no staged source
    let changes = manifest(&[], &[], &["bin/app", "mod1.txt"]);
    assert!(apply_changes(install.path(), staging.path(), &changes).is_err());

    assert_eq!(install.snapshot(), before);
}

#[test]
fn test_failed_deletion_restores_earlier_steps() {
    let install = TreeFixture::with_files(&[
        ("bin/app", "old app"),
        ("old/a.txt", "retired a"),
        ("old/b.txt", "retired b"),
        ("notes.txt", "a plain file"),
    ])
    .unwrap();
    let staging =
        TreeFixture::with_files(&[("bin/app", "new app"), ("new/added.txt", "added")]).unwrap();
    let before = install.snapshot();

    // notes.txt is a file, so the last deletion cannot walk into it
    let changes =
        manifest(&["new/added.txt"], &["old/a.txt", "old/b.txt", "notes.txt/inner"], &["bin/app"]);
    let err = apply_changes(install.path(), staging.path(), &changes).unwrap_err();

    match err.downcast_ref::<UpkeepError>() {
        Some(UpkeepError::ApplyFailed {
            path,
        }) => assert_eq!(path, "notes.txt/inner"),
        other => panic!("expected ApplyFailed, got {other:?}: {err:#}"),
    }
    assert_eq!(install.snapshot(), before);
    assert!(!install.exists("new"));
    assert!(Journal::read(install.path()).unwrap().is_none());
}

#[test]
fn test_deleting_missing_file_is_not_an_error() {
    let install = TreeFixture::with_files(&[("present.txt", "x")]).unwrap();
    let staging = TreeFixture::new().unwrap();

    let summary = apply_changes(
        install.path(),
        staging.path(),
        &manifest(&[], &["present.txt", "already/gone.txt"], &[]),
    )
    .unwrap();

    assert_eq!(summary.removed, 2);
    assert!(!install.exists("present.txt"));
}

#[test]
fn test_interrupted_previous_apply_blocks_new_one() {
    let install = TreeFixture::with_files(&[("a.txt", "old")]).unwrap();
    let staging = TreeFixture::with_files(&[("a.txt", "new")]).unwrap();
    Journal::new(".upkeep-backup-deadbeef").write(install.path()).unwrap();

    let err = apply_changes(install.path(), staging.path(), &manifest(&[], &[], &["a.txt"]))
        .unwrap_err();

    assert!(matches!(
        err.downcast_ref::<UpkeepError>(),
        Some(UpkeepError::RollbackIncomplete { .. })
    ));
    assert_eq!(install.read("a.txt").unwrap(), "old");
}

#[test]
fn test_concurrent_reader_never_sees_partial_file() {
    let old = "o".repeat(256 * 1024);
    let new = "n".repeat(512 * 1024);
    let install = TreeFixture::with_files(&[("data/big.dat", old.as_str())]).unwrap();
    let staging_new = TreeFixture::with_files(&[("data/big.dat", new.as_str())]).unwrap();
    let staging_old = TreeFixture::with_files(&[("data/big.dat", old.as_str())]).unwrap();
    let target = install.join("data/big.dat");

    let done = Arc::new(AtomicBool::new(false));
    let reader = {
        let done = Arc::clone(&done);
        let (old_len, new_len) = (old.len(), new.len());
        thread::spawn(move || {
            let mut reads = 0usize;
            while !done.load(Ordering::SeqCst) || reads == 0 {
                let content = std::fs::read(&target).expect("file must always exist");
                let uniform = content.iter().all(|b| *b == content[0]);
                assert!(
                    (content.len() == old_len || content.len() == new_len) && uniform,
                    "observed a partial file of {} bytes",
                    content.len()
                );
                reads += 1;
            }
            reads
        })
    };

    let changes = manifest(&[], &[], &["data/big.dat"]);
    for _ in 0..5 {
        apply_changes(install.path(), staging_new.path(), &changes).unwrap();
        apply_changes(install.path(), staging_old.path(), &changes).unwrap();
    }
    apply_changes(install.path(), staging_new.path(), &changes).unwrap();
    done.store(true, Ordering::SeqCst);

    assert!(reader.join().unwrap() > 0);
    assert_eq!(install.read("data/big.dat").unwrap(), new);
}
