//! TAR and gzip-compressed TAR reader for both extraction passes.
//!
//! TAR is a stream, so each pass reopens the file and walks the entries from the
//! start. Entry indices are positions in that walk, which is deterministic.

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tar::{Archive, EntryType};

use super::{EntryKind, EntryWriter, PlannedEntry, corrupt, plan_entry};
use crate::core::UpkeepError;

fn open(archive: &Path, gzip: bool) -> Result<Archive<Box<dyn Read>>> {
    let file = File::open(archive)
        .with_context(|| format!("Failed to open archive: {}", archive.display()))?;
    let reader: Box<dyn Read> = if gzip {
        Box::new(GzDecoder::new(BufReader::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };
    Ok(Archive::new(reader))
}

enum Classified {
    Entry(EntryKind),
    Metadata,
}

fn classify(name: &str, entry_type: EntryType, mode: Option<u32>) -> Result<Classified> {
    if entry_type.is_pax_global_extensions()
        || entry_type.is_pax_local_extensions()
        || entry_type.is_gnu_longname()
        || entry_type.is_gnu_longlink()
    {
        return Ok(Classified::Metadata);
    }
    if entry_type.is_dir() {
        return Ok(Classified::Entry(EntryKind::Directory));
    }
    if entry_type.is_file() {
        return Ok(Classified::Entry(EntryKind::File { mode }));
    }

    let kind = if entry_type.is_symlink() {
        "symlink".to_string()
    } else if entry_type.is_hard_link() {
        "hard link".to_string()
    } else if entry_type.is_character_special() || entry_type.is_block_special() {
        "device".to_string()
    } else if entry_type.is_fifo() {
        "fifo".to_string()
    } else {
        format!("{entry_type:?}")
    };
    Err(UpkeepError::UnsupportedEntryType {
        entry: name.to_string(),
        kind,
    }
    .into())
}

pub(super) fn plan(archive: &Path, gzip: bool) -> Result<Vec<PlannedEntry>> {
    let mut tar = open(archive, gzip)?;
    let mut plan = Vec::new();

    for (index, entry) in tar.entries().map_err(|e| corrupt(archive, e))?.enumerate() {
        let entry = entry.map_err(|e| corrupt(archive, e))?;
        let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        let header = entry.header();

        match classify(&name, header.entry_type(), header.mode().ok())? {
            Classified::Metadata => {}
            Classified::Entry(kind) => {
                if let Some(planned) = plan_entry(index, &name, kind)? {
                    plan.push(planned);
                }
            }
        }
    }

    Ok(plan)
}

pub(super) fn write(
    archive: &Path,
    gzip: bool,
    plan: &[PlannedEntry],
    writer: &mut EntryWriter,
) -> Result<()> {
    let by_index: HashMap<usize, &PlannedEntry> = plan.iter().map(|p| (p.index, p)).collect();
    let mut tar = open(archive, gzip)?;

    for (index, entry) in tar.entries().map_err(|e| corrupt(archive, e))?.enumerate() {
        let mut entry = entry.map_err(|e| corrupt(archive, e))?;
        let Some(planned) = by_index.get(&index) else {
            continue;
        };

        match planned.kind {
            EntryKind::Directory => writer.directory(&planned.relative)?,
            EntryKind::File { mode } => writer.file(&planned.relative, mode, &mut entry)?,
        }
    }

    Ok(())
}
