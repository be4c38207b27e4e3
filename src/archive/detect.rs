//! Container format identification.
//!
//! Magic bytes decide first. The file name is consulted only when the content
//! carries no recognizable signature (old pre-POSIX tar files have none).

use anyhow::{Context, Result};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::core::UpkeepError;

/// Archive formats the extractor can unpack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchiveFormat {
    /// ZIP archive.
    Zip,
    /// Uncompressed TAR archive.
    Tar,
    /// gzip-compressed TAR archive.
    TarGz,
}

impl ArchiveFormat {
    /// Human-readable name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Zip => "ZIP",
            Self::Tar => "TAR",
            Self::TarGz => "TAR.GZ",
        }
    }

    /// Whether a file name carries one of this crate's supported extensions.
    #[must_use]
    pub fn has_supported_extension(file_name: &str) -> bool {
        from_file_name(file_name).is_some()
    }
}

impl std::fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// What the leading bytes of a file say about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signature {
    Supported(ArchiveFormat),
    Foreign(&'static str),
    Unknown,
}

const SIGNATURES: &[(&[u8], Signature)] = &[
    // ZIP local file header, empty archive, spanned archive
    (b"PK\x03\x04", Signature::Supported(ArchiveFormat::Zip)),
    (b"PK\x05\x06", Signature::Supported(ArchiveFormat::Zip)),
    (b"PK\x07\x08", Signature::Supported(ArchiveFormat::Zip)),
    (&[0x1F, 0x8B], Signature::Supported(ArchiveFormat::TarGz)),
    (&[0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C], Signature::Foreign("7-Zip")),
    (b"Rar!\x1A\x07", Signature::Foreign("RAR")),
    (&[0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00], Signature::Foreign("XZ")),
    (b"BZh", Signature::Foreign("bzip2")),
    (&[0x28, 0xB5, 0x2F, 0xFD], Signature::Foreign("Zstandard")),
];

/// USTAR magic lives at this offset of the first header block.
const TAR_MAGIC_OFFSET: usize = 257;
const TAR_MAGIC: &[u8] = b"ustar";
const PROBE_LEN: usize = 512;

fn match_signature(header: &[u8]) -> Signature {
    for (magic, signature) in SIGNATURES {
        if header.starts_with(magic) {
            return *signature;
        }
    }

    if header.len() >= TAR_MAGIC_OFFSET + TAR_MAGIC.len()
        && &header[TAR_MAGIC_OFFSET..TAR_MAGIC_OFFSET + TAR_MAGIC.len()] == TAR_MAGIC
    {
        return Signature::Supported(ArchiveFormat::Tar);
    }

    Signature::Unknown
}

const EXTENSIONS: &[(&str, ArchiveFormat)] = &[
    (".tar.gz", ArchiveFormat::TarGz),
    (".tgz", ArchiveFormat::TarGz),
    (".tar", ArchiveFormat::Tar),
    (".zip", ArchiveFormat::Zip),
];

fn split_extension(file_name: &str) -> Option<(usize, ArchiveFormat)> {
    let lower = file_name.to_ascii_lowercase();
    EXTENSIONS
        .iter()
        .find(|(ext, _)| lower.ends_with(ext))
        .map(|(ext, format)| (file_name.len() - ext.len(), *format))
}

fn from_file_name(file_name: &str) -> Option<ArchiveFormat> {
    split_extension(file_name).map(|(_, format)| format)
}

/// `file_name` without its supported archive extension.
///
/// `None` when the name carries no supported extension.
#[must_use]
pub fn strip_supported_extension(file_name: &str) -> Option<&str> {
    split_extension(file_name).and_then(|(stem_len, _)| file_name.get(..stem_len))
}

/// Identifies the container format of the file at `path`.
///
/// # Errors
///
/// [`UpkeepError::UnsupportedArchiveFormat`] when the content is a known foreign
/// format (7z, RAR, ...) or neither content nor name identify a supported one.
pub fn detect_format(path: &Path) -> Result<ArchiveFormat> {
    let mut file =
        File::open(path).with_context(|| format!("Failed to open archive: {}", path.display()))?;

    let mut header = Vec::with_capacity(PROBE_LEN);
    file.by_ref()
        .take(PROBE_LEN as u64)
        .read_to_end(&mut header)
        .with_context(|| format!("Failed to read archive header: {}", path.display()))?;

    let unsupported = || UpkeepError::UnsupportedArchiveFormat {
        path: path.display().to_string(),
    };

    match match_signature(&header) {
        Signature::Supported(format) => Ok(format),
        Signature::Foreign(name) => {
            let context = format!("{name} archives are not supported");
            Err(anyhow::Error::new(unsupported()).context(context))
        }
        Signature::Unknown => {
            let file_name =
                path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
            from_file_name(&file_name).ok_or_else(|| unsupported().into())
        }
    }
}
