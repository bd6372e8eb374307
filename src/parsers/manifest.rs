//! `MANIFEST.bz2` parser
//!
//! A manifest is a `tar tvf` listing of every package archive, each block
//! preceded by a boundary line naming the archive:
//!
//! ```text
//! ++========================================
//! ||
//! ||   Package:  ./a/bash-5.1.016-x86_64-1.txz
//! ||
//! ++========================================
//! drwxr-xr-x root/root         0 2022-01-04 13:43 ./
//! -rw-r--r-- root/root      3113 2022-01-04 13:43 bin/bash
//! ```

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use bzip2::read::MultiBzDecoder;
use flate2::read::MultiGzDecoder;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::package::PackageId;

/// Path of the archive root entry
const ROOT_MARKER: &str = "/./";

/// Prefix reserved for installer scripts, never owned as a file
const INSTALL_PREFIX: &str = "/install/";

/// Files parsed from a manifest
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Package name to the absolute paths it owns
    pub packages: BTreeMap<String, Vec<String>>,
    /// Absolute path to the names of the packages owning it
    pub owners: BTreeMap<String, Vec<String>>,
}

/// Load a manifest, decompressing according to its extension
pub fn load_manifest(path: &Path) -> Result<Manifest> {
    let file = File::open(path)?;
    let reader: Box<dyn Read> = match path.extension().and_then(|e| e.to_str()) {
        Some("bz2") => Box::new(MultiBzDecoder::new(file)),
        Some("gz") => Box::new(MultiGzDecoder::new(file)),
        _ => Box::new(file),
    };

    let manifest = parse_manifest(BufReader::new(reader))?;
    debug!(
        "Loaded manifest {} ({} packages, {} files)",
        path.display(),
        manifest.packages.len(),
        manifest.owners.len()
    );
    Ok(manifest)
}

/// Parse an uncompressed manifest stream
pub fn parse_manifest<R: BufRead>(mut reader: R) -> Result<Manifest> {
    let mut manifest = Manifest::default();
    let mut current: Option<String> = None;
    let mut buf = Vec::new();

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf);

        if line.starts_with("|| ") {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() == 3 {
                current = PackageId::from_filename(fields[2]).map(|id| id.name);
                if let Some(name) = &current {
                    manifest.packages.entry(name.clone()).or_default();
                }
            }
            continue;
        }

        let Some(name) = &current else { continue };
        let Some(path) = entry_path(&line) else { continue };

        if path == ROOT_MARKER || path.starts_with(INSTALL_PREFIX) {
            continue;
        }

        manifest.owners.entry(path.clone()).or_default().push(name.clone());
        manifest.packages.entry(name.clone()).or_default().push(path);
    }

    Ok(manifest)
}

/// Extract the absolute path from a listing line.
///
/// The path is everything after the fifth field (the time), so paths with
/// embedded spaces or time-like substrings survive intact.
fn entry_path(line: &str) -> Option<String> {
    if line.split_whitespace().count() < 6 {
        return None;
    }

    let mut rest = line;
    for _ in 0..5 {
        rest = rest.trim_start();
        let end = rest.find(char::is_whitespace)?;
        rest = &rest[end..];
    }

    Some(format!("/{}", rest.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    const SAMPLE: &str = "\
++========================================
||
||   Package:  ./a/bash-5.1.016-x86_64-1.txz
||
++========================================
drwxr-xr-x root/root         0 2022-01-04 13:43 ./
drwxr-xr-x root/root         0 2022-01-04 13:43 bin/
-rwxr-xr-x root/root   1190856 2022-01-04 13:43 bin/bash4.new
-rw-r--r-- root/root      3113 2022-01-04 13:43 install/doinst.sh
-rw-r--r-- root/root       100 2022-01-04 13:43 usr/doc/bash/12:00 notes.txt

++========================================
||
||   Package:  ./l/glib2-2.70.2-x86_64-1.txz
||
++========================================
drwxr-xr-x root/root         0 2022-01-04 13:43 ./
drwxr-xr-x root/root         0 2022-01-04 13:43 bin/
-rwxr-xr-x root/root     21000 2022-01-04 13:43 usr/bin/gio
";

    #[test]
    fn test_parse_manifest() {
        let manifest = parse_manifest(Cursor::new(SAMPLE)).unwrap();

        assert_eq!(manifest.packages.len(), 2);
        assert_eq!(
            manifest.packages["bash"],
            vec!["/bin/", "/bin/bash4.new", "/usr/doc/bash/12:00 notes.txt"]
        );
        assert_eq!(manifest.packages["glib2"], vec!["/bin/", "/usr/bin/gio"]);

        assert_eq!(manifest.owners["/bin/"], vec!["bash", "glib2"]);
        assert_eq!(manifest.owners["/usr/bin/gio"], vec!["glib2"]);
        assert!(!manifest.owners.contains_key("/./"));
        assert!(!manifest.owners.contains_key("/install/doinst.sh"));
    }

    #[test]
    fn test_lines_before_first_boundary_are_ignored() {
        let text = "-rw-r--r-- root/root 1 2022-01-04 13:43 etc/stray\n";
        let manifest = parse_manifest(Cursor::new(text)).unwrap();
        assert!(manifest.owners.is_empty());
    }

    #[test]
    fn test_load_bzip2_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("MANIFEST.bz2");

        let mut encoder =
            bzip2::write::BzEncoder::new(File::create(&path).unwrap(), bzip2::Compression::default());
        encoder.write_all(SAMPLE.as_bytes()).unwrap();
        encoder.finish().unwrap();

        let manifest = load_manifest(&path).unwrap();
        assert_eq!(manifest.packages.len(), 2);
        assert!(manifest.owners.contains_key("/usr/bin/gio"));
    }

    #[test]
    fn test_load_plain_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("MANIFEST");
        std::fs::write(&path, SAMPLE).unwrap();

        let manifest = load_manifest(&path).unwrap();
        assert_eq!(manifest.packages["glib2"].len(), 2);
    }
}
