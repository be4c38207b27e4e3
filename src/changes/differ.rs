//! Concurrent comparison of the staging tree against the install tree.
//!
//! The install tree is indexed first. Staging entries are then streamed by a
//! producer into a bounded channel and fingerprinted by a fixed pool of blocking
//! workers. Each worker accumulates its own partial result; the partials are
//! unioned after every worker has finished and the lists are sorted, so worker
//! scheduling can never change the manifest.

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, Sender, bounded};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use walkdir::WalkDir;

use super::{ChangeManifest, IgnoreRules};
use crate::constants::{
    DIFF_QUEUE_CAPACITY, FALLBACK_CORE_COUNT, MAX_DIFF_WORKERS, MIN_DIFF_WORKERS,
};
use crate::fingerprint::fingerprint_file;
use crate::utils::fs::relative_slash_path;

/// A regular file found while walking a tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Slash-separated path relative to the walked root.
    pub relative: String,
    /// Absolute path on disk.
    pub path: PathBuf,
}

/// Worker count for the fingerprinting pool.
///
/// A configured count is used as given (at least one, at most
/// [`MAX_DIFF_WORKERS`]). Otherwise the hardware parallelism is clamped to
/// `[MIN_DIFF_WORKERS, MAX_DIFF_WORKERS]`.
#[must_use]
pub fn effective_workers(configured: Option<usize>) -> usize {
    match configured {
        Some(count) => count.clamp(1, MAX_DIFF_WORKERS),
        None => std::thread::available_parallelism()
            .map_or(FALLBACK_CORE_COUNT, std::num::NonZeroUsize::get)
            .clamp(MIN_DIFF_WORKERS, MAX_DIFF_WORKERS),
    }
}

/// Walks `root` and calls `visit` for every regular, non-ignored file.
///
/// Symlinks are neither followed nor reported. Ignored directories are pruned.
fn walk_files(
    root: &Path,
    rules: &IgnoreRules,
    mut visit: impl FnMut(FileEntry) -> bool,
) -> Result<()> {
    let walker = WalkDir::new(root).follow_links(false).into_iter().filter_entry(|entry| {
        relative_slash_path(root, entry.path())
            .is_none_or(|rel| rel.is_empty() || !rules.is_ignored(&rel))
    });

    for entry in walker {
        let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(relative) = relative_slash_path(root, entry.path()) else {
            continue;
        };
        let keep_going = visit(FileEntry {
            relative,
            path: entry.into_path(),
        });
        if !keep_going {
            break;
        }
    }
    Ok(())
}

/// Collects every regular, non-ignored file below `root`.
pub fn collect_files(root: &Path, rules: &IgnoreRules) -> Result<Vec<FileEntry>> {
    let mut files = Vec::new();
    walk_files(root, rules, |entry| {
        files.push(entry);
        true
    })?;
    Ok(files)
}

#[derive(Debug, Default)]
struct Partial {
    added: Vec<String>,
    modified: Vec<String>,
    seen: Vec<String>,
}

fn fingerprint_worker(
    queue: Receiver<FileEntry>,
    installed: &HashMap<String, PathBuf>,
) -> Result<Partial> {
    let mut partial = Partial::default();

    for staged in queue {
        match installed.get(&staged.relative) {
            None => partial.added.push(staged.relative),
            Some(install_path) => {
                let new = fingerprint_file(&staged.path)?;
                let old = fingerprint_file(install_path)?;
                if new != old {
                    debug!("Modified: {} ({} -> {})", staged.relative, old, new);
                    partial.modified.push(staged.relative.clone());
                }
                partial.seen.push(staged.relative);
            }
        }
    }

    Ok(partial)
}

fn produce(staging_root: &Path, rules: &IgnoreRules, queue: Sender<FileEntry>) -> Result<usize> {
    let mut produced = 0;
    walk_files(staging_root, rules, |entry| {
        produced += 1;
        // Every worker has gone away, which only happens after a worker error
        queue.send(entry).is_ok()
    })?;
    Ok(produced)
}

/// Compares `staging_root` against `install_root`.
///
/// # Errors
///
/// Any walk or fingerprint failure fails the whole diff. A file that cannot be
/// read is never classified as changed or unchanged.
pub async fn diff_trees(
    install_root: &Path,
    staging_root: &Path,
    rules: &IgnoreRules,
    workers: usize,
) -> Result<ChangeManifest> {
    let workers = workers.max(1);
    info!(
        "Comparing {} against {} with {} workers",
        staging_root.display(),
        install_root.display(),
        workers
    );

    let install_root = install_root.to_path_buf();
    let staging_root = staging_root.to_path_buf();
    let rules = Arc::new(rules.clone());

    let installed: HashMap<String, PathBuf> = {
        let root = install_root.clone();
        let rules = Arc::clone(&rules);
        tokio::task::spawn_blocking(move || collect_files(&root, &rules))
            .await
            .context("Install tree walk panicked")??
            .into_iter()
            .map(|entry| (entry.relative, entry.path))
            .collect()
    };
    let installed = Arc::new(installed);
    debug!("Indexed {} installed files", installed.len());

    let (tx, rx) = bounded::<FileEntry>(DIFF_QUEUE_CAPACITY);

    let producer = {
        let rules = Arc::clone(&rules);
        tokio::task::spawn_blocking(move || produce(&staging_root, &rules, tx))
    };

    let handles: Vec<_> = (0..workers)
        .map(|_| {
            let queue = rx.clone();
            let installed = Arc::clone(&installed);
            tokio::task::spawn_blocking(move || fingerprint_worker(queue, &installed))
        })
        .collect();
    drop(rx);

    let partials = futures::future::join_all(handles).await;
    let produced = producer.await.context("Staging tree walk panicked")??;

    let mut manifest = ChangeManifest::default();
    let mut seen = HashSet::new();
    for partial in partials {
        let partial = partial.context("Fingerprint worker panicked")??;
        manifest.added.extend(partial.added);
        manifest.modified.extend(partial.modified);
        seen.extend(partial.seen);
    }

    manifest.deleted =
        installed.keys().filter(|relative| !seen.contains(*relative)).cloned().collect();
    manifest.sort();

    info!(
        "Scanned {} staged files: {} added, {} modified, {} deleted",
        produced,
        manifest.added.len(),
        manifest.modified.len(),
        manifest.deleted.len()
    );
    Ok(manifest)
}

/// Uses the staging tree's `changes.json` when present, otherwise computes the diff.
///
/// A shipped manifest is trusted: it is normalized, filtered through `rules` and
/// checked for overlapping lists, but not compared against the trees.
pub async fn load_or_diff(
    install_root: &Path,
    staging_root: &Path,
    rules: &IgnoreRules,
    workers: usize,
) -> Result<ChangeManifest> {
    if let Some(mut manifest) = ChangeManifest::load(staging_root)? {
        info!("Using change manifest shipped with the update ({} entries)", manifest.len());
        manifest.retain_tracked(rules);
        return Ok(manifest);
    }

    diff_trees(install_root, staging_root, rules, workers).await
}
