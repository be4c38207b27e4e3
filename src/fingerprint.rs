//! Content fingerprints for change detection.
//!
//! A [`Fingerprint`] is the XXH3-128 digest of a file's full byte content,
//! rendered as 32 lowercase hex characters. It is fast enough to hash every
//! file of an install on each update, and it is used only to decide whether two
//! files differ. It is not a security checksum: release integrity is delegated to
//! the transport.

use anyhow::{Context, Result};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use xxhash_rust::xxh3::Xxh3;

use crate::constants::HASH_BUFFER_SIZE;

/// Fixed-width hexadecimal content fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Length of the hex representation.
    pub const HEX_LEN: usize = 32;

    fn from_digest(digest: u128) -> Self {
        Self(hex::encode(digest.to_be_bytes()))
    }

    /// Fingerprint an in-memory buffer.
    #[must_use]
    pub fn of_bytes(content: &[u8]) -> Self {
        let mut hasher = Xxh3::new();
        hasher.update(content);
        Self::from_digest(hasher.digest128())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stream a file through XXH3-128 and return its fingerprint.
///
/// # Errors
///
/// Any open or read failure is returned with the path attached. Callers must
/// propagate it: an unreadable file is neither "changed" nor "unchanged".
pub fn fingerprint_file(path: &Path) -> Result<Fingerprint> {
    let file = File::open(path)
        .with_context(|| format!("Cannot open file for fingerprinting: {}", path.display()))?;
    let mut reader = BufReader::with_capacity(HASH_BUFFER_SIZE, file);
    let mut hasher = Xxh3::new();
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];

    loop {
        let read = reader
            .read(&mut buffer)
            .with_context(|| format!("Failed to read file: {}", path.display()))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(Fingerprint::from_digest(hasher.digest128()))
}
