//! Package types and operations

use serde::{Deserialize, Serialize};

use crate::fetch::FileHandle;

/// A package, either installed on this system or listed by a repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    /// Package name (unique within one inventory)
    pub name: String,

    /// Version string
    pub version: String,

    /// Architecture (x86_64, noarch, ...)
    pub arch: String,

    /// Build tag (e.g. "1", "2_slack15.0")
    pub build: String,

    /// Short summary taken from the first description line
    #[serde(default)]
    pub summary: String,

    /// Full description, one entry per line
    #[serde(default)]
    pub description: Vec<String>,

    /// Absolute paths of the files this package owns
    #[serde(default)]
    pub files: Vec<String>,

    /// Compressed size in bytes
    #[serde(default)]
    pub compressed_size: u64,

    /// Uncompressed size in bytes
    #[serde(default)]
    pub uncompressed_size: u64,

    /// Path of the archive relative to a repository mirror
    #[serde(default)]
    pub relpath: Option<String>,

    /// Group (series) tag, when the repository extracts groups
    #[serde(default)]
    pub group: Option<String>,

    /// Id of the repository this package came from (empty if installed)
    #[serde(default)]
    pub repo: String,
}

impl Package {
    /// Create a package with only its identity filled in
    pub fn new(name: &str, version: &str, arch: &str, build: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            arch: arch.to_string(),
            build: build.to_string(),
            summary: String::new(),
            description: Vec::new(),
            files: Vec::new(),
            compressed_size: 0,
            uncompressed_size: 0,
            relpath: None,
            group: None,
            repo: String::new(),
        }
    }

    /// Create a package from its parsed filename identity
    pub fn from_id(id: &PackageId) -> Self {
        Self::new(&id.name, &id.version, &id.arch, &id.build)
    }

    /// Get the full version string
    pub fn full_version(&self) -> String {
        format!("{}-{}", self.version, self.build)
    }

    /// Get the package file stem (name-version-arch-build)
    pub fn full_name(&self) -> String {
        format!("{}-{}-{}-{}", self.name, self.version, self.arch, self.build)
    }
}

/// Identity decomposed from a package filename stem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageId {
    pub name: String,
    pub version: String,
    pub arch: String,
    pub build: String,
}

impl PackageId {
    /// Split `name-version-arch-build` into its parts.
    ///
    /// The last three hyphen-separated components are always version, arch and
    /// build; everything before them is the name, so names containing hyphens
    /// or digits decompose the same way every time. Returns `None` when there
    /// are fewer than four components.
    pub fn parse(stem: &str) -> Option<Self> {
        let pieces: Vec<&str> = stem.split('-').collect();
        if pieces.len() < 4 {
            return None;
        }

        let split = pieces.len() - 3;
        let name = pieces[..split].join("-");
        if name.is_empty() {
            return None;
        }

        Some(Self {
            name,
            version: pieces[split].to_string(),
            arch: pieces[split + 1].to_string(),
            build: pieces[split + 2].to_string(),
        })
    }

    /// Parse the identity from a package archive filename or path, dropping
    /// any directory and the final extension (`.txz`, `.tgz`, ...)
    pub fn from_filename(filename: &str) -> Option<Self> {
        let base = filename.rsplit('/').next().unwrap_or(filename);
        let stem = match base.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => base,
        };
        Self::parse(stem)
    }
}

/// The installed and available sides of one package name
#[derive(Debug, Clone)]
pub struct PackagePair {
    /// Package name
    pub name: String,

    /// Installed package, if any
    pub installed: Option<Package>,

    /// Available package from the highest-precedence repository, if any
    pub available: Option<Package>,

    /// Lazy handle for the available package archive
    pub source: Option<FileHandle>,
}

impl PackagePair {
    /// Create an empty pair
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            installed: None,
            available: None,
            source: None,
        }
    }

    /// True if both sides exist and their (version, build) differ
    pub fn has_upgrade(&self) -> bool {
        match (&self.installed, &self.available) {
            (Some(installed), Some(available)) => {
                installed.version != available.version || installed.build != available.build
            }
            _ => false,
        }
    }
}
