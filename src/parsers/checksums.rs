//! `CHECKSUMS.md5` checksum index

use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::Path;

use md5::Md5;
use sha2::{Digest, Sha256};
use tracing::{debug, error};

use crate::error::{Result, TidepkgError};

/// Expected digests keyed by canonical relative name (e.g. `./PACKAGES.TXT`)
#[derive(Debug, Clone, Default)]
pub struct ChecksumIndex {
    entries: HashMap<String, String>,
}

impl ChecksumIndex {
    /// Parse `<hex digest> <name>` lines; anything else is ignored
    pub fn parse(text: &str) -> Self {
        let entries = text
            .lines()
            .filter_map(|line| {
                let mut fields = line.split_whitespace();
                match (fields.next(), fields.next(), fields.next()) {
                    (Some(digest), Some(name), None) if is_digest(digest) => {
                        Some((name.to_string(), digest.to_ascii_lowercase()))
                    }
                    _ => None,
                }
            })
            .collect();

        Self { entries }
    }

    /// Load a checksum index file
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read(path)?;
        let index = Self::parse(&String::from_utf8_lossy(&data));
        debug!("Loaded {} checksums from {}", index.len(), path.display());
        Ok(index)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the index has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Expected digest for a name, accepting it with or without the `./` prefix
    pub fn get(&self, name: &str) -> Option<&str> {
        let canonical = canonical_name(name);
        self.entries.get(&canonical).map(String::as_str)
    }

    /// Verify a local file against the entry for `name`
    pub fn verify(&self, path: &Path, name: &str) -> Result<()> {
        let expected = self
            .get(name)
            .ok_or_else(|| TidepkgError::ChecksumMissing(canonical_name(name)))?;

        let actual = file_digest(path, expected.len())?;
        if actual != expected {
            error!("Incorrect checksum for {}", path.display());
            return Err(TidepkgError::ChecksumMismatch {
                name: canonical_name(name),
                expected: expected.to_string(),
                actual,
            });
        }

        debug!("Checksum OK for {}", name);
        Ok(())
    }
}

/// Canonical index key: `./` followed by the relative path
fn canonical_name(name: &str) -> String {
    format!("./{}", name.trim_start_matches("./").trim_start_matches('/'))
}

fn is_digest(text: &str) -> bool {
    matches!(text.len(), 32 | 64) && text.chars().all(|c| c.is_ascii_hexdigit())
}

/// Hex digest of a file; the digest length selects MD5 (32) or SHA-256 (64)
fn file_digest(path: &Path, hex_len: usize) -> Result<String> {
    let mut file = fs::File::open(path)?;
    let mut buffer = [0u8; 8192];

    if hex_len == 64 {
        let mut hasher = Sha256::new();
        loop {
            let n = file.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }
        Ok(hex::encode(hasher.finalize()))
    } else {
        let mut hasher = Md5::new();
        loop {
            let n = file.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }
        Ok(hex::encode(hasher.finalize()))
    }
}
