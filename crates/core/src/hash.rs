//! Content hashing using XXH64
//!
//! Digests are for change detection only. The hex form matches what the
//! publisher writes into `version.json`, so local and remote digests compare
//! as plain strings.

use std::fmt;
use std::path::Path;

use xxhash_rust::xxh64::xxh64;

/// Seed used for every digest; publisher and installer must agree on it.
const SEED: u64 = 0;

/// A 64-bit content digest
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash(u64);

impl ContentHash {
    /// Hash arbitrary bytes
    #[must_use]
    pub fn from_bytes(data: &[u8]) -> Self {
        Self(xxh64(data, SEED))
    }

    /// Hash a file by path
    ///
    /// Reads the whole file; packaged assets are small enough that streaming
    /// buys nothing.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let data = std::fs::read(path)?;
        Ok(Self::from_bytes(&data))
    }

    /// Convert to a 16-character lowercase hex string
    #[must_use]
    pub fn to_hex(&self) -> String {
        format!("{:016x}", self.0)
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.to_hex())
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}
