//! ZIP reader for both extraction passes.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use zip::ZipArchive;

use super::{EntryKind, EntryWriter, PlannedEntry, corrupt, plan_entry};
use crate::core::UpkeepError;

const S_IFMT: u32 = 0o170_000;
const S_IFREG: u32 = 0o100_000;
const S_IFDIR: u32 = 0o040_000;
const S_IFLNK: u32 = 0o120_000;

fn open(archive: &Path) -> Result<ZipArchive<BufReader<File>>> {
    let file = File::open(archive)
        .with_context(|| format!("Failed to open archive: {}", archive.display()))?;
    Ok(ZipArchive::new(BufReader::new(file)).map_err(|e| corrupt(archive, e))?)
}

/// Classifies an entry from its directory flag and Unix mode, if the archiver recorded one.
fn classify(name: &str, is_dir: bool, unix_mode: Option<u32>) -> Result<EntryKind> {
    let file_type = unix_mode.map_or(0, |mode| mode & S_IFMT);
    match file_type {
        0 | S_IFREG | S_IFDIR => {}
        S_IFLNK => {
            return Err(UpkeepError::UnsupportedEntryType {
                entry: name.to_string(),
                kind: "symlink".to_string(),
            }
            .into());
        }
        other => {
            return Err(UpkeepError::UnsupportedEntryType {
                entry: name.to_string(),
                kind: format!("special file (mode {other:o})"),
            }
            .into());
        }
    }

    if is_dir || file_type == S_IFDIR {
        Ok(EntryKind::Directory)
    } else {
        Ok(EntryKind::File { mode: unix_mode })
    }
}

pub(super) fn plan(archive: &Path) -> Result<Vec<PlannedEntry>> {
    let mut zip = open(archive)?;
    let mut plan = Vec::with_capacity(zip.len());

    for index in 0..zip.len() {
        let entry = zip.by_index_raw(index).map_err(|e| corrupt(archive, e))?;
        let kind = classify(entry.name(), entry.is_dir(), entry.unix_mode())?;
        if let Some(planned) = plan_entry(index, entry.name(), kind)? {
            plan.push(planned);
        }
    }

    Ok(plan)
}

pub(super) fn write(archive: &Path, plan: &[PlannedEntry], writer: &mut EntryWriter) -> Result<()> {
    let mut zip = open(archive)?;

    for planned in plan {
        match planned.kind {
            EntryKind::Directory => writer.directory(&planned.relative)?,
            EntryKind::File { mode } => {
                let mut entry = zip.by_index(planned.index).map_err(|e| corrupt(archive, e))?;
                writer.file(&planned.relative, mode, &mut entry)?;
            }
        }
    }

    Ok(())
}
