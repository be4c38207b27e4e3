//! File tree and archive fixtures.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use walkdir::WalkDir;

/// A temporary directory populated with files.
///
/// # Example
///
/// ```rust,no_run
/// use upkeep_cli::test_utils::TreeFixture;
///
/// let install = TreeFixture::with_files(&[("bin/app", "v1"), ("readme.txt", "hi")]).unwrap();
/// assert_eq!(install.read("bin/app").unwrap(), "v1");
/// ```
pub struct TreeFixture {
    dir: TempDir,
}

impl TreeFixture {
    pub fn new() -> Result<Self> {
        Ok(Self {
            dir: TempDir::new().context("Failed to create temp dir")?,
        })
    }

    /// A tree holding `files`, given as `(relative path, content)` pairs.
    pub fn with_files(files: &[(&str, &str)]) -> Result<Self> {
        let fixture = Self::new()?;
        for (relative, content) in files {
            fixture.write(relative, content.as_bytes())?;
        }
        Ok(fixture)
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn join(&self, relative: &str) -> PathBuf {
        self.dir.path().join(relative)
    }

    /// Writes `content` at `relative`, creating parent directories.
    pub fn write(&self, relative: &str, content: &[u8]) -> Result<PathBuf> {
        let path = self.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, content).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }

    pub fn mkdir(&self, relative: &str) -> Result<PathBuf> {
        let path = self.join(relative);
        fs::create_dir_all(&path)?;
        Ok(path)
    }

    pub fn read(&self, relative: &str) -> Result<String> {
        fs::read_to_string(self.join(relative))
            .with_context(|| format!("Failed to read {relative}"))
    }

    pub fn exists(&self, relative: &str) -> bool {
        self.join(relative).exists()
    }

    /// Every file below the root with its content.
    pub fn snapshot(&self) -> BTreeMap<String, Vec<u8>> {
        snapshot(self.path())
    }
}

/// Every file below `root`, keyed by slash-separated relative path.
pub fn snapshot(root: &Path) -> BTreeMap<String, Vec<u8>> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let relative = entry.path().strip_prefix(root).ok()?;
            let key = relative.to_string_lossy().replace('\\', "/");
            let content = fs::read(entry.path()).ok()?;
            Some((key, content))
        })
        .collect()
}

#[derive(Debug, Clone)]
enum Entry {
    File { name: String, content: Vec<u8>, mode: u32 },
    Dir { name: String },
    Symlink { name: String, target: String },
}

/// Builds archives with arbitrary, possibly hostile, entry names.
///
/// Entry names are written verbatim, so `../escape` or `/abs` end up in the
/// archive exactly as given.
///
/// # Example
///
/// ```rust,no_run
/// use upkeep_cli::test_utils::ArchiveBuilder;
/// use std::path::Path;
///
/// ArchiveBuilder::new()
///     .file("bin/app", b"v2")
///     .dir("data/")
///     .write_tar_gz(Path::new("update.tar.gz"))
///     .unwrap();
/// ```
#[derive(Debug, Clone, Default)]
pub struct ArchiveBuilder {
    entries: Vec<Entry>,
}

impl ArchiveBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds every `(name, content)` pair as a regular file.
    pub fn files(mut self, files: &[(&str, &str)]) -> Self {
        for (name, content) in files {
            self = self.file(name, content.as_bytes());
        }
        self
    }

    pub fn file(self, name: &str, content: &[u8]) -> Self {
        self.file_with_mode(name, content, 0o644)
    }

    pub fn executable(self, name: &str, content: &[u8]) -> Self {
        self.file_with_mode(name, content, 0o755)
    }

    pub fn file_with_mode(mut self, name: &str, content: &[u8], mode: u32) -> Self {
        self.entries.push(Entry::File {
            name: name.to_string(),
            content: content.to_vec(),
            mode,
        });
        self
    }

    pub fn dir(mut self, name: &str) -> Self {
        self.entries.push(Entry::Dir {
            name: name.to_string(),
        });
        self
    }

    pub fn symlink(mut self, name: &str, target: &str) -> Self {
        self.entries.push(Entry::Symlink {
            name: name.to_string(),
            target: target.to_string(),
        });
        self
    }

    pub fn write_zip(&self, path: &Path) -> Result<()> {
        use zip::write::SimpleFileOptions;

        let mut writer = zip::ZipWriter::new(File::create(path)?);
        for entry in &self.entries {
            match entry {
                Entry::File {
                    name,
                    content,
                    mode,
                } => {
                    let options = SimpleFileOptions::default().unix_permissions(*mode);
                    writer.start_file(name.as_str(), options)?;
                    writer.write_all(content)?;
                }
                Entry::Dir {
                    name,
                } => {
                    writer.add_directory(name.as_str(), SimpleFileOptions::default())?;
                }
                Entry::Symlink {
                    name,
                    target,
                } => {
                    let options = SimpleFileOptions::default();
                    writer.add_symlink(name.as_str(), target.as_str(), options)?;
                }
            }
        }
        writer.finish()?;
        Ok(())
    }

    pub fn write_tar(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        self.append_tar(file)?.flush()?;
        Ok(())
    }

    pub fn write_tar_gz(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        self.append_tar(encoder)?.finish()?;
        Ok(())
    }

    fn append_tar<W: Write>(&self, writer: W) -> Result<W> {
        let mut builder = tar::Builder::new(writer);
        for entry in &self.entries {
            let mut header = tar::Header::new_old();
            let (name, entry_type, size, mode) = match entry {
                Entry::File {
                    name,
                    content,
                    mode,
                } => (name, tar::EntryType::Regular, content.len() as u64, *mode),
                Entry::Dir {
                    name,
                } => (name, tar::EntryType::Directory, 0, 0o755),
                Entry::Symlink {
                    name,
                    target,
                } => {
                    header.set_link_name(target)?;
                    (name, tar::EntryType::Symlink, 0, 0o777)
                }
            };

            // Written into the raw header so hostile names survive
            let raw = name.as_bytes();
            let field = &mut header.as_old_mut().name;
            anyhow::ensure!(raw.len() < field.len(), "tar entry name too long: {name}");
            field[..raw.len()].copy_from_slice(raw);

            header.set_entry_type(entry_type);
            header.set_size(size);
            header.set_mode(mode);
            header.set_mtime(0);
            header.set_cksum();

            match entry {
                Entry::File {
                    content,
                    ..
                } => builder.append(&header, content.as_slice())?,
                _ => builder.append(&header, std::io::empty())?,
            }
        }
        Ok(builder.into_inner()?)
    }
}
