//! Configuration management for tidepkg
//!
//! The main file is TOML:
//!
//! ```toml
//! [paths]
//! cache_dir = "/var/cache/tidepkg"
//! package_db = "/var/lib/pkgtools/packages"
//!
//! [settings]
//! search_fields = ["name", "summary"]
//!
//! [[repositories]]
//! id = "slackware64"
//! name = "Slackware64 15.0"
//! baseurl = "https://mirrors.slackware.com/slackware/slackware64-15.0"
//! fingerprint = "EC56 49DA 401E 22AB FA67 36EF 6A44 63C0 4010 2233"
//! enabled = true
//! priority = 10
//! metadata_expire = "1d"
//! extract_groups = true
//! ```
//!
//! Further repositories may be dropped into `paths.repos_dir` as `*.toml`
//! files holding a single `[repository]` table.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use glob::Pattern;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::repository::RepositoryDescriptor;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Filesystem locations
    #[serde(default)]
    pub paths: PathsConfig,

    /// Behaviour switches
    #[serde(default)]
    pub settings: SettingsConfig,

    /// External installer command lines
    #[serde(default)]
    pub commands: CommandsConfig,

    /// Repository definitions
    #[serde(default)]
    pub repositories: Vec<RepositoryConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Repository metadata and package cache
    pub cache_dir: PathBuf,

    /// Log file (stderr when unset or not writable)
    pub log_file: Option<PathBuf>,

    /// Imported repository signing keys
    pub gpg_keys: PathBuf,

    /// pkgtools installed package database
    pub package_db: PathBuf,

    /// Hook scripts run after each transaction
    pub scripts: PathBuf,

    /// File of package globs never to touch
    pub exclude: Option<PathBuf>,

    /// Transaction lock (pid file)
    pub lock_file: PathBuf,

    /// Directory of additional `*.toml` repository files
    pub repos_dir: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        let system = Self {
            cache_dir: PathBuf::from("/var/cache/tidepkg"),
            log_file: Some(PathBuf::from("/var/log/tidepkg/tidepkg.log")),
            gpg_keys: PathBuf::from("/etc/tidepkg/gpg"),
            package_db: PathBuf::from("/var/lib/pkgtools/packages"),
            scripts: PathBuf::from("/etc/tidepkg/scripts"),
            exclude: None,
            lock_file: PathBuf::from("/run/lock/tidepkg"),
            repos_dir: Some(PathBuf::from("/etc/tidepkg/repos.d")),
        };

        if is_root() {
            return system;
        }

        // Unprivileged users get private caches, logs and keys
        match directories::ProjectDirs::from("org", "tidepkg", "tidepkg") {
            Some(dirs) => Self {
                cache_dir: dirs.cache_dir().join("cache"),
                log_file: Some(dirs.cache_dir().join("log")),
                gpg_keys: dirs.cache_dir().join("gpg"),
                ..system
            },
            None => system,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsConfig {
    /// Log hook script output
    pub log_scripts: bool,

    /// Log installer output
    pub log_installer: bool,

    /// Package fields matched by `search`
    pub search_fields: Vec<String>,

    /// Colored terminal output
    pub use_color: bool,

    /// Artificial delay of each dry-run step, in milliseconds
    pub dry_run_delay_ms: u64,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            log_scripts: false,
            log_installer: false,
            search_fields: vec!["name".to_string(), "summary".to_string()],
            use_color: true,
            dry_run_delay_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandsConfig {
    /// Installs a new package
    pub install: String,

    /// Upgrades an installed package
    pub upgrade: String,

    /// Removes a package by name
    pub remove: String,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            install: "/sbin/upgradepkg --install-new --reinstall".to_string(),
            upgrade: "/sbin/upgradepkg".to_string(),
            remove: "/sbin/removepkg".to_string(),
        }
    }
}

/// A time value: plain seconds or a unit string such as `"1d 12h"`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimeSpec {
    Seconds(u64),
    Text(String),
}

impl TimeSpec {
    pub fn seconds(&self) -> Result<u64> {
        match self {
            TimeSpec::Seconds(s) => Ok(*s),
            TimeSpec::Text(text) => parse_time(text),
        }
    }
}

/// One repository as written in configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Unique repository id
    pub id: String,

    /// Display name (defaults to the id)
    #[serde(default)]
    pub name: Option<String>,

    /// Primary mirror
    #[serde(default)]
    pub baseurl: Option<String>,

    /// Further mirrors, tried in order after `baseurl`
    #[serde(default)]
    pub mirrors: Vec<String>,

    /// File listing more mirrors, one per line
    #[serde(default)]
    pub mirrorlist: Option<PathBuf>,

    /// Appended to every mirror
    #[serde(default)]
    pub subdirectory: Option<String>,

    /// Manifest path relative to the mirror
    #[serde(default = "default_manifest")]
    pub manifest: String,

    /// Signing key location (defaults to `GPG-KEY` on the mirrors)
    #[serde(default)]
    pub gpg_key_url: Option<String>,

    /// Expected signing key fingerprint; verification is off without one
    #[serde(default)]
    pub fingerprint: Option<String>,

    #[serde(default)]
    pub enabled: bool,

    /// Lower values take precedence
    #[serde(default = "default_priority")]
    pub priority: i32,

    #[serde(default = "default_expire")]
    pub metadata_expire: TimeSpec,

    /// Reject metadata older than this (0 disables the check)
    #[serde(default = "default_max_age")]
    pub max_age: TimeSpec,

    /// Leading package location components to drop
    #[serde(default)]
    pub strip_path: usize,

    /// Derive groups from package locations
    #[serde(default)]
    pub extract_groups: bool,

    /// Directory relative paths in this definition are resolved against
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

fn default_manifest() -> String {
    "MANIFEST.bz2".to_string()
}

fn default_priority() -> i32 {
    99
}

fn default_expire() -> TimeSpec {
    TimeSpec::Seconds(3600)
}

fn default_max_age() -> TimeSpec {
    TimeSpec::Seconds(0)
}

/// A repository file in `repos_dir`
#[derive(Debug, Deserialize)]
struct RepositoryFile {
    repository: RepositoryConfig,
}

/// Per-invocation overrides from the command line
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    /// Package globs included even when excluded
    pub include: Vec<String>,
    /// Package globs to exclude
    pub exclude: Vec<String>,
    /// Repository id globs to enable
    pub force_enable: Vec<String>,
    /// Repository id globs to disable (applied before `force_enable`)
    pub force_disable: Vec<String>,
    /// Metadata expiry replacing every repository's own
    pub force_expire: Option<u64>,
}

impl RepositoryConfig {
    /// Resolve into a descriptor, applying overrides
    pub fn to_descriptor(&self, overrides: &Overrides) -> Result<RepositoryDescriptor> {
        let mut enabled = self.enabled;
        if matches_any(&self.id, &overrides.force_disable)? {
            debug!("Forcing repository disabled: {}", self.id);
            enabled = false;
        }
        if matches_any(&self.id, &overrides.force_enable)? {
            debug!("Forcing repository enabled: {}", self.id);
            enabled = true;
        }

        let mirrors = self.mirror_list()?;
        if enabled && mirrors.is_empty() {
            warn!("Repository {} has no mirrors defined and is disabled", self.id);
            enabled = false;
        }

        let expire = match overrides.force_expire {
            Some(seconds) => seconds,
            None => self
                .metadata_expire
                .seconds()
                .with_context(|| format!("Invalid metadata_expire for repository {}", self.id))?,
        };
        let max_age = self
            .max_age
            .seconds()
            .with_context(|| format!("Invalid max_age for repository {}", self.id))?;

        Ok(RepositoryDescriptor {
            id: self.id.clone(),
            name: self.name.clone().unwrap_or_else(|| self.id.clone()),
            mirrors,
            manifest: self.manifest.clone(),
            gpg_key_url: self.gpg_key_url.clone(),
            fingerprint: self.fingerprint.clone().filter(|f| !f.trim().is_empty()),
            enabled,
            priority: self.priority,
            expiry: Some(Duration::from_secs(expire)),
            max_age,
            strip_path: self.strip_path,
            extract_groups: self.extract_groups,
        })
    }

    /// All mirrors in order, with the subdirectory appended
    fn mirror_list(&self) -> Result<Vec<String>> {
        let mut mirrors: Vec<String> = self.baseurl.iter().cloned().collect();
        mirrors.extend(self.mirrors.iter().cloned());

        if let Some(list) = &self.mirrorlist {
            let path = match &self.base_dir {
                Some(dir) if list.is_relative() => dir.join(list),
                _ => list.clone(),
            };
            match fs::read_to_string(&path) {
                Ok(text) => mirrors.extend(
                    text.lines()
                        .map(|line| line.split('#').next().unwrap_or("").trim())
                        .filter(|line| !line.is_empty())
                        .map(str::to_string),
                ),
                Err(e) => warn!("Mirrorlist {} not readable: {}", path.display(), e),
            }
        }

        let subdirectory = self.subdirectory.as_deref().unwrap_or("").trim_matches('/');
        Ok(mirrors
            .into_iter()
            .map(|m| {
                let base = m.trim_end_matches('/');
                if subdirectory.is_empty() {
                    base.to_string()
                } else {
                    format!("{}/{}", base, subdirectory)
                }
            })
            .collect())
    }
}

impl Config {
    /// Load configuration from file, or use defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path.map(PathBuf::from).or_else(|| {
            // Try system config
            let system_config = PathBuf::from("/etc/tidepkg/tidepkg.conf");
            if system_config.exists() {
                return Some(system_config);
            }

            // Try user config
            directories::ProjectDirs::from("org", "tidepkg", "tidepkg")
                .map(|d| d.config_dir().join("tidepkg.conf"))
                .filter(|p| p.exists())
        });

        let mut config = match &config_path {
            Some(path) => {
                let content = fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config: {}", path.display()))?;
                Self::parse(&content, path.parent())
                    .with_context(|| format!("Failed to parse config: {}", path.display()))?
            }
            None => Config::default(),
        };

        config.load_repos_dir()?;
        Ok(config)
    }

    /// Parse configuration text; relative mirrorlists resolve against `base_dir`
    pub fn parse(content: &str, base_dir: Option<&Path>) -> Result<Self> {
        let mut config: Config = toml::from_str(content)?;
        for repo in &mut config.repositories {
            repo.base_dir = base_dir.map(Path::to_path_buf);
        }
        Ok(config)
    }

    /// Append the repositories defined in `paths.repos_dir`
    fn load_repos_dir(&mut self) -> Result<()> {
        let Some(dir) = self.paths.repos_dir.clone() else {
            return Ok(());
        };
        if !dir.is_dir() {
            return Ok(());
        }

        let mut files: Vec<PathBuf> = fs::read_dir(&dir)
            .with_context(|| format!("Failed to read {}", dir.display()))?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().map(|e| e == "toml").unwrap_or(false))
            .collect();
        files.sort();

        for path in files {
            debug!("Reading repository configuration {}", path.display());
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let file: RepositoryFile = toml::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?;
            let mut repo = file.repository;
            repo.base_dir = path.parent().map(Path::to_path_buf);
            self.repositories.push(repo);
        }

        Ok(())
    }

    /// Descriptors for every configured repository, in definition order
    pub fn repository_descriptors(&self, overrides: &Overrides) -> Result<Vec<RepositoryDescriptor>> {
        self.repositories
            .iter()
            .map(|r| r.to_descriptor(overrides))
            .collect()
    }

    /// Exclude globs from `paths.exclude` plus the runtime ones, de-duplicated
    pub fn exclude_patterns(&self, overrides: &Overrides) -> Result<Vec<String>> {
        let mut patterns = overrides.exclude.clone();

        if let Some(path) = &self.paths.exclude {
            if path.exists() {
                let text = fs::read_to_string(path)
                    .with_context(|| format!("Failed to read exclude file {}", path.display()))?;
                for line in text.lines() {
                    let pattern = line.split('#').next().unwrap_or("").trim();
                    if !pattern.is_empty() && !patterns.iter().any(|p| p == pattern) {
                        patterns.push(pattern.to_string());
                    }
                }
            }
        }

        Ok(patterns)
    }
}

fn matches_any(id: &str, globs: &[String]) -> Result<bool> {
    for glob in globs {
        let pattern = Pattern::new(glob).with_context(|| format!("Invalid repository pattern: {}", glob))?;
        if pattern.matches(id) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Total seconds in a time string.
///
/// Digits accumulate a count; a unit letter multiplies and adds it:
/// `y` (365 days), `b` (30 days), `f` (14 days), `w`, `d`, `h`, `m`, `s`.
/// Trailing digits without a unit are seconds. Whitespace is ignored.
pub fn parse_time(text: &str) -> Result<u64> {
    let mut total: u64 = 0;
    let mut count = String::new();

    for c in text.chars() {
        if c.is_ascii_digit() {
            count.push(c);
        } else if !c.is_whitespace() {
            let value: u64 = if count.is_empty() { 0 } else { count.parse()? };
            count.clear();

            let unit = match c.to_ascii_lowercase() {
                'y' => 365 * 86400,
                'b' => 30 * 86400,
                'f' => 14 * 86400,
                'w' => 7 * 86400,
                'd' => 86400,
                'h' => 3600,
                'm' => 60,
                's' => 1,
                other => bail!("Invalid time specifier: {}", other),
            };
            total = value
                .checked_mul(unit)
                .and_then(|seconds| total.checked_add(seconds))
                .ok_or_else(|| anyhow!("Time value out of range: {}", text))?;
        }
    }

    if !count.is_empty() {
        total = total
            .checked_add(count.parse::<u64>()?)
            .ok_or_else(|| anyhow!("Time value out of range: {}", text))?;
    }

    Ok(total)
}

/// True when running with an effective uid of 0
pub fn is_root() -> bool {
    #[cfg(unix)]
    {
        // SAFETY: geteuid has no preconditions and cannot fail
        unsafe { libc::geteuid() == 0 }
    }

    #[cfg(not(unix))]
    {
        false
    }
}
