//! Installed package database
//!
//! pkgtools keeps one text record per installed package under
//! `/var/lib/pkgtools/packages`, named `name-version-arch-build`:
//!
//! ```text
//! PACKAGE NAME:     bash-5.1.016-x86_64-1
//! COMPRESSED PACKAGE SIZE:     1.5M
//! UNCOMPRESSED PACKAGE SIZE:     7.3M
//! PACKAGE LOCATION: /tmp/bash-5.1.016-x86_64-1.txz
//! PACKAGE DESCRIPTION:
//! bash: bash (sh-compatible shell)
//! FILE LIST:
//! ./
//! bin/
//! bin/bash4.new
//! ```
//!
//! Records are read fresh on every open; no snapshot isolation is provided
//! against a concurrently running transaction.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use crate::error::Result;
use crate::package::{Package, PackageId};
use crate::parsers::parse_size;

const CSIZE_PREFIX: &str = "COMPRESSED PACKAGE SIZE:";
const USIZE_PREFIX: &str = "UNCOMPRESSED PACKAGE SIZE:";
const FILE_LIST: &str = "FILE LIST:";

/// Installed packages and the files they own
#[derive(Debug, Clone, Default)]
pub struct InstalledDb {
    packages: BTreeMap<String, Package>,
    owners: BTreeMap<String, Vec<String>>,
}

impl InstalledDb {
    /// Load every record in a pkgtools database directory.
    ///
    /// A missing directory yields an empty database.
    pub fn open(dir: &Path) -> Result<Self> {
        let mut db = Self::default();

        if !dir.is_dir() {
            warn!("Package database {} not found", dir.display());
            return Ok(db);
        }

        let mut entries: Vec<_> = fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .collect();
        entries.sort();

        for path in entries {
            // Record names have no extension, so the whole name is the stem
            let Some(stem) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(id) = PackageId::parse(stem) else {
                warn!("Skipping unrecognized package record {}", path.display());
                continue;
            };

            let data = fs::read(&path)?;
            let package = parse_record(&id, &String::from_utf8_lossy(&data));
            db.insert(package);
        }

        debug!("Loaded {} installed packages from {}", db.packages.len(), dir.display());
        Ok(db)
    }

    /// Add a package, indexing its files
    pub fn insert(&mut self, package: Package) {
        for file in &package.files {
            self.owners.entry(file.clone()).or_default().push(package.name.clone());
        }
        self.packages.insert(package.name.clone(), package);
    }

    /// Get an installed package by name
    pub fn get_package(&self, name: &str) -> Option<&Package> {
        self.packages.get(name)
    }

    /// All installed packages, sorted by name
    pub fn list_packages(&self) -> impl Iterator<Item = &Package> {
        self.packages.values()
    }

    /// Names of the packages owning a path
    pub fn file_owners(&self, path: &str) -> &[String] {
        self.owners.get(path).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Path to owner names for every installed file
    pub fn owners(&self) -> &BTreeMap<String, Vec<String>> {
        &self.owners
    }

    /// Number of installed packages
    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}

fn parse_record(id: &PackageId, text: &str) -> Package {
    let mut package = Package::from_id(id);
    let desc_prefix = format!("{}: ", id.name);
    let mut in_file_list = false;

    for line in text.lines() {
        if in_file_list {
            let path = format!("/{}", line.trim());
            if path != "/./" && path != "/" && !path.starts_with("/install/") {
                package.files.push(path);
            }
        } else if let Some(rest) = line.strip_prefix(CSIZE_PREFIX) {
            package.compressed_size = parse_size(rest);
        } else if let Some(rest) = line.strip_prefix(USIZE_PREFIX) {
            package.uncompressed_size = parse_size(rest);
        } else if let Some(rest) = line.strip_prefix(&desc_prefix) {
            if package.description.is_empty() {
                package.summary = rest
                    .split_once('(')
                    .and_then(|(_, after)| after.rsplit_once(')'))
                    .map(|(inner, _)| inner.trim().to_string())
                    .unwrap_or_default();
            }
            package.description.push(rest.trim().to_string());
        } else if line.starts_with(FILE_LIST) {
            in_file_list = true;
        }
    }

    package
}
