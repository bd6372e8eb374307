//! Repository management for tidepkg
//!
//! Handles remote package repositories, metadata synchronization, and mirror support.
//!
//! ## Repository Structure
//!
//! A repository mirror (local directory or remote URL) contains:
//! - `CHECKSUMS.md5` - Digests of every file in the tree
//! - `CHECKSUMS.md5.asc` - Detached signature of the checksums
//! - `PACKAGES.TXT` - Package list with an embedded generation timestamp
//! - `MANIFEST.bz2` - Every file of every package
//! - `GPG-KEY` - The repository signing key
//! - the package archives (`*.txz`) with their `.asc` signatures
//!
//! ## Cache Layout
//!
//! Each repository caches into `<cache_dir>/<id>/`: the downloaded metadata
//! and archives, `__index__.json` (the parsed manifest, keyed by the
//! manifest's modification time) and `__timestamp__`, the last accepted
//! generation timestamp. The timestamp file is never cleaned, so metadata
//! older than what was once accepted is always rejected.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::Utc;
use glob::Pattern;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::download::Downloader;
use crate::error::{Result, TidepkgError};
use crate::fetch::{FileHandle, FileRequest, FileResolver};
use crate::package::Package;
use crate::parsers::checksums::ChecksumIndex;
use crate::parsers::manifest::{load_manifest, Manifest};
use crate::parsers::packages::{parse_packages, PackageListOptions};
use crate::signing::GpgVerifier;

pub const CHECKSUMS_FILE: &str = "CHECKSUMS.md5";
pub const PACKAGES_FILE: &str = "PACKAGES.TXT";
pub const GPG_KEY_FILE: &str = "GPG-KEY";
pub const TIMESTAMP_FILE: &str = "__timestamp__";
pub const INDEX_FILE: &str = "__index__.json";

/// Version of the `__index__.json` layout
const INDEX_SCHEMA: u32 = 1;

/// Everything needed to construct a repository
#[derive(Debug, Clone)]
pub struct RepositoryDescriptor {
    /// Unique id, also the cache directory name
    pub id: String,
    /// Display name
    pub name: String,
    /// Mirrors, tried in order
    pub mirrors: Vec<String>,
    /// Manifest path relative to a mirror
    pub manifest: String,
    /// Where the signing key lives, if not `GPG-KEY` on the mirrors
    pub gpg_key_url: Option<String>,
    /// Expected signing key fingerprint
    pub fingerprint: Option<String>,
    pub enabled: bool,
    /// Lower values take precedence
    pub priority: i32,
    /// Metadata cache expiry
    pub expiry: Option<Duration>,
    /// Maximum accepted metadata age in seconds (0 disables)
    pub max_age: u64,
    /// Leading package location components to drop
    pub strip_path: usize,
    /// Derive groups from package locations
    pub extract_groups: bool,
}

/// Where a repository is in its metadata lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoState {
    Unloaded,
    Fetching,
    Verifying,
    Loaded,
    Failed,
    RollbackRejected,
    StaleRejected,
}

/// On-disk cache of the parsed manifest
#[derive(Debug, Serialize, Deserialize)]
struct IndexCache {
    schema: u32,
    manifest_mtime: SystemTime,
    files: Manifest,
}

/// A package found in a repository, with a lazy handle on its archive
#[derive(Debug, Clone)]
pub struct PackageMatch {
    pub package: Package,
    pub handle: FileHandle,
}

/// A configured repository
pub struct Repository {
    descriptor: RepositoryDescriptor,
    cache_dir: PathBuf,
    gpg_dir: PathBuf,
    downloader: Arc<dyn Downloader>,
    resolver: FileResolver,
    state: RepoState,
    timestamp: i64,
    packages: BTreeMap<String, Package>,
    owners: BTreeMap<String, Vec<String>>,
    groups: BTreeMap<String, Vec<String>>,
}

impl Repository {
    /// Create an unloaded repository caching under `cache_base/<id>`
    pub fn new(
        descriptor: RepositoryDescriptor,
        cache_base: &Path,
        gpg_dir: &Path,
        downloader: Arc<dyn Downloader>,
    ) -> Self {
        let cache_dir = cache_base.join(&descriptor.id);
        Self {
            descriptor,
            cache_dir,
            gpg_dir: gpg_dir.to_path_buf(),
            resolver: FileResolver::new(downloader.clone(), None),
            downloader,
            state: RepoState::Unloaded,
            timestamp: 0,
            packages: BTreeMap::new(),
            owners: BTreeMap::new(),
            groups: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn priority(&self) -> i32 {
        self.descriptor.priority
    }

    pub fn enabled(&self) -> bool {
        self.descriptor.enabled
    }

    pub fn descriptor(&self) -> &RepositoryDescriptor {
        &self.descriptor
    }

    pub fn state(&self) -> RepoState {
        self.state
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Generation timestamp of the committed inventory
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Committed inventory
    pub fn packages(&self) -> &BTreeMap<String, Package> {
        &self.packages
    }

    /// Group to member package names
    pub fn groups(&self) -> &BTreeMap<String, Vec<String>> {
        &self.groups
    }

    /// Import the signing key, if a fingerprint is configured.
    ///
    /// The key is fetched from `gpg_key_url` or the mirrors' `GPG-KEY`
    /// and cached under the repository id. It is not itself verified and
    /// never expires; the fingerprint check is what pins it.
    pub fn load_gpg(&mut self) -> Result<()> {
        let Some(fingerprint) = self.descriptor.fingerprint.clone() else {
            warn!(
                "GPG verification disabled for {} ({})",
                self.descriptor.id, self.descriptor.name
            );
            return Ok(());
        };

        let (mirrors, relpath) = match &self.descriptor.gpg_key_url {
            Some(url) => match url.rsplit_once('/') {
                Some((parent, name)) => (vec![parent.to_string()], name.to_string()),
                None => (vec![".".to_string()], url.clone()),
            },
            None => (self.descriptor.mirrors.clone(), GPG_KEY_FILE.to_string()),
        };

        fs::create_dir_all(&self.gpg_dir)?;
        let request = FileRequest::new(&mirrors, &relpath, &self.gpg_dir).named(&self.descriptor.id);
        let key_path = FileResolver::new(self.downloader.clone(), None).resolve(&request)?;

        let verifier = GpgVerifier::load(&key_path, &fingerprint)?;
        self.resolver = FileResolver::new(self.downloader.clone(), Some(Arc::new(verifier)));
        Ok(())
    }

    /// Fetch, verify and commit the repository metadata.
    ///
    /// On any failure the previously committed inventory is kept and the
    /// state records why.
    pub fn sync(&mut self) -> Result<()> {
        info!("Updating repository: {}", self.descriptor.id);
        self.state = RepoState::Fetching;

        match self.try_sync() {
            Ok(()) => {
                self.state = RepoState::Loaded;
                info!(
                    "Loaded {} packages from {} (timestamp {})",
                    self.packages.len(),
                    self.descriptor.id,
                    self.timestamp
                );
                Ok(())
            }
            Err(e) => {
                self.state = match e {
                    TidepkgError::RollbackDetected { .. } => RepoState::RollbackRejected,
                    TidepkgError::StaleMirror { .. } => RepoState::StaleRejected,
                    _ => RepoState::Failed,
                };
                error!("Failed to load metadata for repository {}: {}", self.descriptor.id, e);
                Err(e)
            }
        }
    }

    fn try_sync(&mut self) -> Result<()> {
        fs::create_dir_all(&self.cache_dir)?;

        if self.descriptor.fingerprint.is_some() && !self.resolver.can_verify() {
            self.load_gpg()?;
        }

        let manifest_relpath = format!("./{}", self.descriptor.manifest.trim_start_matches("./"));
        let checksums = self.resolve_metadata(&format!("./{}", CHECKSUMS_FILE), true)?;
        let package_list = self.resolve_metadata(&format!("./{}", PACKAGES_FILE), false)?;
        let manifest = self.resolve_metadata(&manifest_relpath, false)?;
        debug!("{}: {}", CHECKSUMS_FILE, checksums.display());
        debug!("{}: {}", PACKAGES_FILE, package_list.display());
        debug!("Manifest: {}", manifest.display());

        self.state = RepoState::Verifying;
        let index = ChecksumIndex::load(&checksums)?;
        index.verify(&package_list, PACKAGES_FILE)?;
        index.verify(&manifest, &manifest_relpath)?;

        let options = PackageListOptions {
            repo: &self.descriptor.id,
            extract_groups: self.descriptor.extract_groups,
            strip_path: self.descriptor.strip_path,
        };
        let list = parse_packages(&fs::read(&package_list)?, &options)?;

        let last = self.read_timestamp()?;
        debug!("Last timestamp was {}", last);
        if list.timestamp < last {
            return Err(TidepkgError::RollbackDetected {
                repo: self.descriptor.id.clone(),
                found: list.timestamp,
                last,
            });
        }

        let age = Utc::now().timestamp() - list.timestamp;
        if self.descriptor.max_age > 0 && age > self.descriptor.max_age as i64 {
            return Err(TidepkgError::StaleMirror {
                repo: self.descriptor.id.clone(),
                age,
            });
        }

        let files = self.load_index(&manifest)?;

        let mut packages = list.packages;
        for (name, paths) in &files.packages {
            if let Some(package) = packages.get_mut(name) {
                let mut paths = paths.clone();
                paths.sort();
                package.files.extend(paths);
            }
        }

        let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
        if self.descriptor.extract_groups {
            for package in packages.values() {
                if let Some(group) = &package.group {
                    groups.entry(group.clone()).or_default().push(package.name.clone());
                }
            }
        }

        if list.timestamp != last {
            fs::write(self.cache_dir.join(TIMESTAMP_FILE), format!("{}\n", list.timestamp))?;
        }

        self.timestamp = list.timestamp;
        self.packages = packages;
        self.owners = files.owners;
        self.groups = groups;
        Ok(())
    }

    fn resolve_metadata(&self, relpath: &str, verify: bool) -> Result<PathBuf> {
        let request = FileRequest::new(&self.descriptor.mirrors, relpath, &self.cache_dir)
            .verified(verify)
            .expiring(self.descriptor.expiry);
        self.resolver.resolve(&request)
    }

    /// Last accepted generation timestamp (0 if none)
    fn read_timestamp(&self) -> Result<i64> {
        match fs::read_to_string(self.cache_dir.join(TIMESTAMP_FILE)) {
            Ok(text) => text
                .trim()
                .parse()
                .map_err(|e| TidepkgError::Parse(format!("corrupt {}: {}", TIMESTAMP_FILE, e))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    /// Parsed manifest, from the index cache when it matches the manifest
    fn load_index(&self, manifest: &Path) -> Result<Manifest> {
        let mtime = fs::metadata(manifest)?.modified()?;
        let index_path = self.cache_dir.join(INDEX_FILE);

        let cached = fs::read(&index_path)
            .ok()
            .and_then(|data| serde_json::from_slice::<IndexCache>(&data).ok());
        match cached {
            Some(cache) if cache.schema == INDEX_SCHEMA && cache.manifest_mtime == mtime => {
                debug!("Using cached manifest index for {}", self.descriptor.id);
                return Ok(cache.files);
            }
            Some(_) => debug!("Manifest index for {} is out of date", self.descriptor.id),
            None => debug!("No usable manifest index for {}", self.descriptor.id),
        }

        let files = load_manifest(manifest)?;
        let cache = IndexCache {
            schema: INDEX_SCHEMA,
            manifest_mtime: mtime,
            files,
        };
        match serde_json::to_vec(&cache) {
            Ok(data) => {
                if let Err(e) = fs::write(&index_path, data) {
                    warn!("Cannot write {}: {}", index_path.display(), e);
                }
            }
            Err(e) => warn!("Cannot serialize manifest index: {}", e),
        }
        Ok(cache.files)
    }

    /// Remove cached metadata and/or downloaded packages.
    ///
    /// `__timestamp__` is always kept.
    pub fn clean(&self, metadata: bool, packages: bool) -> Result<()> {
        if metadata {
            let manifest = self
                .descriptor
                .manifest
                .rsplit('/')
                .next()
                .unwrap_or(&self.descriptor.manifest)
                .to_string();
            let checksums_sig = format!("{}.asc", CHECKSUMS_FILE);
            for name in [CHECKSUMS_FILE, checksums_sig.as_str(), manifest.as_str(), PACKAGES_FILE, INDEX_FILE] {
                remove_if_exists(&self.cache_dir.join(name))?;
            }
        }

        if packages {
            let base = Pattern::escape(&self.cache_dir.to_string_lossy());
            for suffix in ["*.t?z", "*.t?z.asc"] {
                let pattern = format!("{}/{}", base, suffix);
                let paths = glob::glob(&pattern).map_err(|e| TidepkgError::Parse(e.to_string()))?;
                for path in paths.flatten() {
                    remove_if_exists(&path)?;
                }
            }
        }

        Ok(())
    }

    /// Packages whose names match `pattern`.
    ///
    /// A pattern containing `/` names groups instead: `ap/` or `x*/` expand
    /// to every member of the matching groups.
    pub fn find_package(&self, pattern: &str) -> Result<BTreeMap<String, PackageMatch>> {
        let mut names: BTreeSet<&str> = BTreeSet::new();

        if pattern.contains('/') {
            let group_glob = compile(pattern.trim_end_matches('/'))?;
            for (group, members) in &self.groups {
                if group_glob.matches(group) {
                    names.extend(members.iter().map(String::as_str));
                }
            }
        } else {
            let glob = compile(pattern)?;
            names.extend(self.packages.keys().map(String::as_str).filter(|n| glob.matches(n)));
        }

        Ok(names
            .into_iter()
            .filter_map(|name| self.packages.get(name))
            .map(|package| {
                let found = PackageMatch {
                    package: package.clone(),
                    handle: self.package_handle(package),
                };
                (package.name.clone(), found)
            })
            .collect())
    }

    /// Names of the packages owning a file matching `pattern`
    pub fn find_file(&self, pattern: &str) -> Result<BTreeSet<String>> {
        let glob = compile(pattern)?;
        Ok(self
            .owners
            .iter()
            .filter(|(path, _)| glob.matches(path))
            .flat_map(|(_, names)| names.iter().cloned())
            .collect())
    }

    /// Lazy handle on a package archive, signature-checked when possible
    pub fn package_handle(&self, package: &Package) -> FileHandle {
        let relpath = package
            .relpath
            .clone()
            .unwrap_or_else(|| format!("{}.txz", package.full_name()));
        let request = FileRequest::new(&self.descriptor.mirrors, &relpath, &self.cache_dir)
            .verified(self.resolver.can_verify());
        FileHandle::new(request, self.resolver.clone())
    }

    #[cfg(test)]
    pub(crate) fn set_inventory(&mut self, packages: BTreeMap<String, Package>) {
        self.packages = packages;
        self.state = RepoState::Loaded;
    }
}

fn compile(pattern: &str) -> Result<Pattern> {
    Pattern::new(pattern).map_err(|e| TidepkgError::Parse(format!("invalid pattern '{}': {}", pattern, e)))
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!("Removed {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// All configured repositories, ordered by priority
pub struct RepositorySet {
    enabled: Vec<Repository>,
    disabled: Vec<Repository>,
}

impl RepositorySet {
    /// Split into enabled and disabled sets, each stable-sorted by priority.
    /// Ids must be unique across both.
    pub fn new(repos: Vec<Repository>) -> Result<Self> {
        let mut seen = BTreeSet::new();
        for repo in &repos {
            if !seen.insert(repo.id().to_string()) {
                return Err(TidepkgError::Config(format!("duplicate repository id: {}", repo.id())));
            }
        }

        let (mut enabled, mut disabled): (Vec<_>, Vec<_>) = repos.into_iter().partition(|r| r.enabled());
        enabled.sort_by_key(|r| r.priority());
        disabled.sort_by_key(|r| r.priority());

        Ok(Self { enabled, disabled })
    }

    /// Build repositories from descriptors
    pub fn from_descriptors(
        descriptors: Vec<RepositoryDescriptor>,
        cache_dir: &Path,
        gpg_dir: &Path,
        downloader: Arc<dyn Downloader>,
    ) -> Result<Self> {
        let repos = descriptors
            .into_iter()
            .map(|d| Repository::new(d, cache_dir, gpg_dir, downloader.clone()))
            .collect();
        Self::new(repos)
    }

    /// Enabled repositories, highest precedence first
    pub fn enabled(&self) -> &[Repository] {
        &self.enabled
    }

    pub fn disabled(&self) -> &[Repository] {
        &self.disabled
    }

    /// Find an enabled or disabled repository by id
    pub fn get(&self, id: &str) -> Option<&Repository> {
        self.enabled.iter().chain(&self.disabled).find(|r| r.id() == id)
    }

    /// Sync every enabled repository; failures are independent
    pub fn sync_all(&mut self) -> SyncReport {
        let mut report = SyncReport::default();

        for repo in &mut self.enabled {
            match repo.sync() {
                Ok(()) => report.loaded.push(repo.id().to_string()),
                Err(e) => report.failed.push((repo.id().to_string(), e.to_string())),
            }
        }

        report
    }

    /// Clean every repository, enabled or not
    pub fn clean(&self, metadata: bool, packages: bool) -> Result<()> {
        for repo in self.enabled.iter().chain(&self.disabled) {
            repo.clean(metadata, packages)?;
        }
        Ok(())
    }
}

/// Result of syncing a repository set
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Repositories whose metadata was committed
    pub loaded: Vec<String>,
    /// Repositories that failed, with the reason
    pub failed: Vec<(String, String)>,
}

impl SyncReport {
    /// Check if all syncs succeeded
    pub fn all_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Get total number of repositories processed
    pub fn total(&self) -> usize {
        self.loaded.len() + self.failed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use md5::{Digest, Md5};

    struct NoNetwork;

    impl Downloader for NoNetwork {
        fn download(&self, url: &str, _dest: &Path) -> Result<()> {
            Err(TidepkgError::Download(format!("offline: {}", url)))
        }
    }

    const NEWER: &str = "Mon Jun 14 20:16:47 UTC 2021";
    const OLDER: &str = "Mon Jun 14 20:16:46 UTC 2021";

    const MANIFEST: &str = "\
||   Package:  ./a/bash-5.1.016-x86_64-1.txz
drwxr-xr-x root/root         0 2022-01-04 13:43 ./
-rwxr-xr-x root/root   1190856 2022-01-04 13:43 bin/bash4.new
-rw-r--r-- root/root       100 2022-01-04 13:43 etc/bashrc.new
||   Package:  ./ap/vim-8.2.4256-x86_64-1.txz
-rwxr-xr-x root/root   1190856 2022-01-04 13:43 usr/bin/vim
";

    fn package_list(date: &str) -> String {
        format!(
            "PACKAGES.TXT;  {}\n\n\
             PACKAGE NAME:  bash-5.1.016-x86_64-1.txz\n\
             PACKAGE LOCATION:  ./a\n\
             PACKAGE SIZE (compressed):  1500 K\n\
             PACKAGE DESCRIPTION:\n\
             bash: bash (sh-compatible shell)\n\n\
             PACKAGE NAME:  vim-8.2.4256-x86_64-1.txz\n\
             PACKAGE LOCATION:  ./ap\n\
             PACKAGE DESCRIPTION:\n\
             vim: vim (Vi IMproved)\n\n",
            date
        )
    }

    /// Write a local mirror with consistent checksums
    fn write_mirror(dir: &Path, date: &str) {
        let list = package_list(date);
        fs::write(dir.join(PACKAGES_FILE), &list).unwrap();
        fs::write(dir.join("MANIFEST"), MANIFEST).unwrap();
        fs::write(
            dir.join(CHECKSUMS_FILE),
            format!(
                "{}  ./PACKAGES.TXT\n{}  ./MANIFEST\n",
                hex::encode(Md5::digest(list.as_bytes())),
                hex::encode(Md5::digest(MANIFEST.as_bytes()))
            ),
        )
        .unwrap();
    }

    fn descriptor(id: &str, mirror: &Path, priority: i32) -> RepositoryDescriptor {
        RepositoryDescriptor {
            id: id.to_string(),
            name: id.to_string(),
            mirrors: vec![mirror.display().to_string()],
            manifest: "MANIFEST".to_string(),
            gpg_key_url: None,
            fingerprint: None,
            enabled: true,
            priority,
            expiry: Some(Duration::from_secs(3600)),
            max_age: 0,
            strip_path: 0,
            extract_groups: true,
        }
    }

    fn repository(mirror: &Path, cache: &Path) -> Repository {
        Repository::new(descriptor("test", mirror, 10), cache, &cache.join("gpg"), Arc::new(NoNetwork))
    }

    #[test]
    fn test_sync_local_mirror() {
        let mirror = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        write_mirror(mirror.path(), NEWER);

        let mut repo = repository(mirror.path(), cache.path());
        assert_eq!(repo.state(), RepoState::Unloaded);
        repo.sync().unwrap();

        assert_eq!(repo.state(), RepoState::Loaded);
        assert_eq!(repo.timestamp(), 1623701807);
        assert_eq!(repo.packages().len(), 2);
        assert_eq!(repo.packages()["bash"].files, vec!["/bin/bash4.new", "/etc/bashrc.new"]);
        assert_eq!(repo.packages()["bash"].repo, "test");
        assert_eq!(repo.groups()["ap"], vec!["vim"]);

        let stamp = fs::read_to_string(cache.path().join("test").join(TIMESTAMP_FILE)).unwrap();
        assert_eq!(stamp, "1623701807\n");
        assert!(cache.path().join("test").join(INDEX_FILE).exists());
    }

    #[test]
    fn test_rollback_is_rejected() {
        let mirror = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        write_mirror(mirror.path(), NEWER);

        let mut repo = repository(mirror.path(), cache.path());
        repo.sync().unwrap();

        write_mirror(mirror.path(), OLDER);
        let result = repo.sync();

        assert!(matches!(result, Err(TidepkgError::RollbackDetected { .. })));
        assert_eq!(repo.state(), RepoState::RollbackRejected);
        assert_eq!(repo.timestamp(), 1623701807);
        assert_eq!(repo.packages().len(), 2);

        // A fresh process sees the persisted timestamp too
        let mut again = repository(mirror.path(), cache.path());
        assert!(again.sync().is_err());
        assert!(again.packages().is_empty());
    }

    #[test]
    fn test_stale_mirror_is_rejected() {
        let mirror = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        write_mirror(mirror.path(), NEWER);

        let mut desc = descriptor("test", mirror.path(), 10);
        desc.max_age = 86400;
        let mut repo = Repository::new(desc, cache.path(), cache.path(), Arc::new(NoNetwork));

        assert!(matches!(repo.sync(), Err(TidepkgError::StaleMirror { .. })));
        assert_eq!(repo.state(), RepoState::StaleRejected);
        assert!(repo.packages().is_empty());
    }

    #[test]
    fn test_checksum_mismatch_fails() {
        let mirror = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        write_mirror(mirror.path(), NEWER);
        fs::write(mirror.path().join("MANIFEST"), "tampered").unwrap();

        let mut repo = repository(mirror.path(), cache.path());
        assert!(matches!(repo.sync(), Err(TidepkgError::ChecksumMismatch { .. })));
        assert_eq!(repo.state(), RepoState::Failed);
    }

    #[test]
    fn test_missing_metadata_fails() {
        let mirror = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();

        let mut repo = repository(mirror.path(), cache.path());
        assert!(matches!(repo.sync(), Err(TidepkgError::ResolutionFailure(_))));
        assert_eq!(repo.state(), RepoState::Failed);
    }

    #[test]
    fn test_index_cache_is_reused() {
        let mirror = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        write_mirror(mirror.path(), NEWER);

        let mut repo = repository(mirror.path(), cache.path());
        repo.sync().unwrap();

        // Plant a marker in the cached index; a reused cache surfaces it
        let index_path = cache.path().join("test").join(INDEX_FILE);
        let mut cached: IndexCache = serde_json::from_slice(&fs::read(&index_path).unwrap()).unwrap();
        cached.files.packages.get_mut("vim").unwrap().push("/marker".to_string());
        fs::write(&index_path, serde_json::to_vec(&cached).unwrap()).unwrap();

        repo.sync().unwrap();
        assert!(repo.packages()["vim"].files.contains(&"/marker".to_string()));

        // A foreign schema forces a rebuild
        cached.schema = INDEX_SCHEMA + 1;
        fs::write(&index_path, serde_json::to_vec(&cached).unwrap()).unwrap();
        repo.sync().unwrap();
        assert_eq!(repo.packages()["vim"].files, vec!["/usr/bin/vim"]);
    }

    #[test]
    fn test_clean_keeps_timestamp() {
        let cache = tempfile::tempdir().unwrap();
        let repo = repository(cache.path(), cache.path());
        let dir = repo.cache_dir().to_path_buf();
        fs::create_dir_all(&dir).unwrap();

        for name in [
            CHECKSUMS_FILE,
            "CHECKSUMS.md5.asc",
            "MANIFEST",
            PACKAGES_FILE,
            INDEX_FILE,
            TIMESTAMP_FILE,
            "bash-5.1.016-x86_64-1.txz",
            "bash-5.1.016-x86_64-1.txz.asc",
            "old-1.0-x86_64-1.tgz",
        ] {
            fs::write(dir.join(name), "x").unwrap();
        }

        repo.clean(true, false).unwrap();
        assert!(!dir.join(CHECKSUMS_FILE).exists());
        assert!(!dir.join("MANIFEST").exists());
        assert!(!dir.join(INDEX_FILE).exists());
        assert!(dir.join(TIMESTAMP_FILE).exists());
        assert!(dir.join("old-1.0-x86_64-1.tgz").exists());

        repo.clean(false, true).unwrap();
        assert!(!dir.join("bash-5.1.016-x86_64-1.txz").exists());
        assert!(!dir.join("bash-5.1.016-x86_64-1.txz.asc").exists());
        assert!(!dir.join("old-1.0-x86_64-1.tgz").exists());
        assert!(dir.join(TIMESTAMP_FILE).exists());
    }

    #[test]
    fn test_find_package_and_file() {
        let mirror = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        write_mirror(mirror.path(), NEWER);

        let mut repo = repository(mirror.path(), cache.path());
        repo.sync().unwrap();

        let found = repo.find_package("b*").unwrap();
        assert_eq!(found.keys().collect::<Vec<_>>(), vec!["bash"]);
        let handle = &found["bash"].handle;
        assert_eq!(handle.request().relpath, "a/bash-5.1.016-x86_64-1.txz");
        assert!(!handle.request().verify);

        let group = repo.find_package("ap/").unwrap();
        assert_eq!(group.keys().collect::<Vec<_>>(), vec!["vim"]);
        assert!(repo.find_package("nothing/").unwrap().is_empty());

        let owners = repo.find_file("*/vim").unwrap();
        assert_eq!(owners.into_iter().collect::<Vec<_>>(), vec!["vim"]);
        assert!(repo.find_file("/etc/*").unwrap().contains("bash"));
    }

    #[test]
    fn test_repository_set_ordering() {
        let cache = tempfile::tempdir().unwrap();
        let net: Arc<dyn Downloader> = Arc::new(NoNetwork);

        let mut disabled = descriptor("off", cache.path(), 1);
        disabled.enabled = false;
        let descriptors = vec![
            descriptor("c", cache.path(), 30),
            descriptor("a", cache.path(), 10),
            disabled,
            descriptor("b", cache.path(), 10),
        ];
        let set = RepositorySet::from_descriptors(descriptors, cache.path(), cache.path(), net.clone()).unwrap();

        let ids: Vec<_> = set.enabled().iter().map(|r| r.id()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(set.disabled()[0].id(), "off");
        assert!(set.get("off").is_some());

        let duplicate = vec![descriptor("a", cache.path(), 1), descriptor("a", cache.path(), 2)];
        assert!(RepositorySet::from_descriptors(duplicate, cache.path(), cache.path(), net).is_err());
    }

    #[test]
    fn test_sync_all_is_independent() {
        let good = tempfile::tempdir().unwrap();
        let bad = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        write_mirror(good.path(), NEWER);

        let descriptors = vec![descriptor("bad", bad.path(), 1), descriptor("good", good.path(), 2)];
        let mut set =
            RepositorySet::from_descriptors(descriptors, cache.path(), cache.path(), Arc::new(NoNetwork)).unwrap();

        let report = set.sync_all();
        assert!(!report.all_success());
        assert_eq!(report.loaded, vec!["good"]);
        assert_eq!(report.failed[0].0, "bad");
        assert_eq!(report.total(), 2);
    }
}
