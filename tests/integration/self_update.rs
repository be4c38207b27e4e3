use std::path::PathBuf;
use upkeep_cli::archive::extract_archive;
use upkeep_cli::upgrade::{
    ReplaceStrategy, SelfUpdateOutcome, SelfUpdater, cleanup_previous_version,
    complete_pending_swap,
};
use upkeep_cli::test_utils::{ArchiveBuilder, TreeFixture};

fn updater(install: &TreeFixture, staging: PathBuf, exe: &str) -> SelfUpdater {
    SelfUpdater::new(install.join(exe), install.path().to_path_buf(), staging)
}

#[tokio::test]
async fn test_identical_candidate_touches_nothing() {
    let install = TreeFixture::with_files(&[("bin/upkeep", "updater v1")]).unwrap();
    let staging = TreeFixture::with_files(&[("bin/upkeep", "updater v1")]).unwrap();
    let before = install.snapshot();

    let outcome = updater(&install, staging.path().to_path_buf(), "bin/upkeep")
        .strategy(ReplaceStrategy::Immediate)
        .run()
        .await
        .unwrap();

    assert_eq!(outcome, SelfUpdateOutcome::NotNeeded);
    assert!(!outcome.requires_restart());
    assert_eq!(install.snapshot(), before);
}

#[tokio::test]
async fn test_immediate_replacement_from_extracted_archive() {
    let install = TreeFixture::with_files(&[("bin/upkeep", "updater v1")]).unwrap();
    let archive = install.join("update.tar.gz");
    ArchiveBuilder::new()
        .executable("bin/upkeep", b"updater v2")
        .file("readme.txt", b"docs")
        .write_tar_gz(&archive)
        .unwrap();
    let staging = install.join("update_temp");
    extract_archive(&archive, &staging).unwrap();

    let outcome = updater(&install, staging, "bin/upkeep")
        .strategy(ReplaceStrategy::Immediate)
        .run()
        .await
        .unwrap();

    assert_eq!(outcome, SelfUpdateOutcome::Applied);
    assert!(outcome.record().applied);
    assert_eq!(install.read("bin/upkeep").unwrap(), "updater v2");
    assert_eq!(install.read("bin/upkeep.old").unwrap(), "updater v1");

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(install.join("bin/upkeep")).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111);
    }

    // Next start removes the previous version
    assert!(cleanup_previous_version(&install.join("bin/upkeep")).await);
    assert!(!install.exists("bin/upkeep.old"));
    assert!(!cleanup_previous_version(&install.join("bin/upkeep")).await);
}

#[tokio::test]
async fn test_deferred_stage_then_finalize() {
    let install = TreeFixture::with_files(&[("upkeep", "updater v1")]).unwrap();
    let staging = TreeFixture::with_files(&[("upkeep", "updater v2")]).unwrap();

    let outcome = updater(&install, staging.path().to_path_buf(), "upkeep")
        .strategy(ReplaceStrategy::Deferred)
        .run()
        .await
        .unwrap();

    let SelfUpdateOutcome::Pending {
        staged_path,
    } = &outcome
    else {
        panic!("expected a pending swap, got {outcome:?}");
    };
    assert_eq!(staged_path, &install.join("upkeep.new"));
    assert!(outcome.requires_restart());
    assert_eq!(install.read("upkeep").unwrap(), "updater v1");
    assert_eq!(install.read("upkeep.new").unwrap(), "updater v2");

    assert!(complete_pending_swap(&install.join("upkeep")).await.unwrap());
    assert_eq!(install.read("upkeep").unwrap(), "updater v2");
    assert!(!install.exists("upkeep.new"));

    // Nothing left to swap
    assert!(!complete_pending_swap(&install.join("upkeep")).await.unwrap());
}

#[tokio::test]
async fn test_candidate_found_by_name_at_staging_root() {
    let install = TreeFixture::with_files(&[("tools/upkeep", "updater v1")]).unwrap();
    let staging = TreeFixture::with_files(&[("upkeep", "updater v2")]).unwrap();

    let outcome = updater(&install, staging.path().to_path_buf(), "tools/upkeep")
        .strategy(ReplaceStrategy::Deferred)
        .run()
        .await
        .unwrap();

    assert!(matches!(outcome, SelfUpdateOutcome::Pending { .. }));
    assert_eq!(install.read("tools/upkeep.new").unwrap(), "updater v2");
}

#[tokio::test]
async fn test_executable_outside_install_root_is_left_alone() {
    let install = TreeFixture::with_files(&[("upkeep", "updater v1")]).unwrap();
    let elsewhere = TreeFixture::with_files(&[("upkeep", "system copy")]).unwrap();
    let staging = TreeFixture::with_files(&[("upkeep", "updater v2")]).unwrap();

    let outcome = SelfUpdater::new(
        elsewhere.join("upkeep"),
        install.path().to_path_buf(),
        staging.path().to_path_buf(),
    )
    .strategy(ReplaceStrategy::Immediate)
    .run()
    .await
    .unwrap();

    assert_eq!(outcome, SelfUpdateOutcome::NotNeeded);
    assert_eq!(elsewhere.read("upkeep").unwrap(), "system copy");
    assert_eq!(install.read("upkeep").unwrap(), "updater v1");
}

#[tokio::test]
async fn test_update_without_executable_is_not_needed() {
    let install = TreeFixture::with_files(&[("bin/upkeep", "updater v1")]).unwrap();
    let staging = TreeFixture::with_files(&[("data/a.dat", "a")]).unwrap();

    let outcome =
        updater(&install, staging.path().to_path_buf(), "bin/upkeep").run().await.unwrap();
    assert_eq!(outcome, SelfUpdateOutcome::NotNeeded);
}
