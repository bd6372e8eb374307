//! Command-line interface for tidepkg

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Subcommand, ValueEnum};
use colored::Colorize;
use tracing::debug;

use crate::config::{is_root, Config, Overrides};
use crate::database::InstalledDb;
use crate::download::HttpDownloader;
use crate::hooks::HookRunner;
use crate::installer::{CommandRunner, Pkgtools};
use crate::lock::TransactionLock;
use crate::package::PackagePair;
use crate::parsers::tagfile::TagAction;
use crate::repository::RepositorySet;
use crate::resolver::{FindOptions, Resolver, SearchFields};
use crate::transaction::{Operation, Transaction, TransactionReport};

mod clean;
mod info;
mod install;
mod list;
mod remove;
mod repolist;
mod reporter;
mod search;
mod update;

pub use reporter::ConsoleReporter;

/// Exit status when a mutating command is run without root privileges
pub const EXIT_NOT_ROOT: i32 = 2;

/// Options accepted by every command
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalOptions {
    /// Configuration file (default: /etc/tidepkg/tidepkg.conf)
    #[arg(short, long, global = true, env = "TIDEPKG_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log at debug level
    #[arg(long, global = true)]
    pub debug: bool,

    /// Show what would run without running it
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Suppress normal output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Package globs to include even if excluded
    #[arg(long, global = true, value_delimiter = ',')]
    pub include: Vec<String>,

    /// Package globs to exclude
    #[arg(long, global = true, value_delimiter = ',')]
    pub exclude: Vec<String>,

    /// Repository id globs to enable for this run
    #[arg(long, global = true, value_delimiter = ',')]
    pub enablerepo: Vec<String>,

    /// Repository id globs to disable for this run
    #[arg(long, global = true, value_delimiter = ',')]
    pub disablerepo: Vec<String>,

    /// Treat cached metadata as expired
    #[arg(long, global = true)]
    pub refresh: bool,
}

impl GlobalOptions {
    fn overrides(&self) -> Overrides {
        Overrides {
            include: self.include.clone(),
            exclude: self.exclude.clone(),
            force_enable: self.enablerepo.clone(),
            force_disable: self.disablerepo.clone(),
            force_expire: self.refresh.then_some(0),
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Upgrade installed packages (all, or the named ones)
    #[command(visible_aliases = ["update", "upgrade"])]
    Sync {
        /// Package names or globs
        names: Vec<String>,
    },

    /// List available upgrades
    CheckUpdate,

    /// Install packages
    Install {
        /// Package names, globs, or group references such as `ap/`
        names: Vec<String>,

        /// Also install the ADD entries of a tagfile
        #[arg(long)]
        tagfile: Option<PathBuf>,

        /// Include OPT entries from the tagfile
        #[arg(long, requires = "tagfile")]
        optional: bool,

        /// Install even if already installed
        #[arg(long)]
        reinstall: bool,
    },

    /// Remove installed packages
    Remove {
        /// Package names or globs
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Search package names and descriptions
    Search {
        /// Case-insensitive search terms
        #[arg(required = true)]
        terms: Vec<String>,
    },

    /// Find the packages owning a file
    #[command(visible_alias = "whatprovides")]
    Provides {
        /// Paths or globs; relative queries match anywhere
        #[arg(required = true)]
        files: Vec<String>,
    },

    /// Show package details
    Info(ListArgs),

    /// List packages
    List(ListArgs),

    /// List configured repositories
    Repolist {
        /// Only enabled repositories (default)
        #[arg(long, conflicts_with_all = ["disabled", "all"])]
        enabled: bool,

        /// Only disabled repositories
        #[arg(long, conflicts_with = "all")]
        disabled: bool,

        /// Enabled and disabled repositories
        #[arg(long)]
        all: bool,
    },

    /// Remove cached files
    Clean {
        /// What to remove
        #[arg(value_enum, default_value_t = CleanTarget::All)]
        target: CleanTarget,
    },
}

/// Filters shared by `info` and `list`
#[derive(Args, Debug, Clone)]
pub struct ListArgs {
    /// Only installed packages
    #[arg(long, conflicts_with = "available")]
    pub installed: bool,

    /// Only packages available from repositories
    #[arg(long)]
    pub available: bool,

    /// Installed packages no repository provides
    #[arg(long, conflicts_with_all = ["available", "upgrades"])]
    pub extras: bool,

    /// Installed packages with an upgrade available
    #[arg(long)]
    pub upgrades: bool,

    /// Write the matching names to a tagfile
    #[arg(long)]
    pub save: Option<PathBuf>,

    /// Action recorded for each name in the saved tagfile
    #[arg(long, default_value = "ADD", requires = "save")]
    pub action: TagAction,

    /// Package names or globs (default: all)
    pub names: Vec<String>,
}

impl ListArgs {
    fn find_options(&self) -> FindOptions {
        FindOptions {
            installed: !self.available || self.extras,
            available: !self.installed || self.extras || self.upgrades,
            only_upgrades: self.upgrades,
            only_extras: self.extras,
        }
    }

    fn globs(&self) -> Vec<String> {
        if self.names.is_empty() {
            vec!["*".to_string()]
        } else {
            self.names.clone()
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanTarget {
    All,
    Metadata,
    Packages,
}

impl Commands {
    /// Whether the command changes the system or its caches
    fn mutates(&self) -> bool {
        matches!(
            self,
            Commands::Sync { .. } | Commands::Install { .. } | Commands::Remove { .. } | Commands::Clean { .. }
        )
    }
}

/// Everything a command needs: configuration, repositories, the installed
/// database and the collaborators a transaction runs with
pub struct Session {
    pub config: Config,
    pub options: GlobalOptions,
    pub overrides: Overrides,
    pub repos: RepositorySet,
    pub installed: InstalledDb,
    pub excludes: Vec<String>,
    pub search_fields: SearchFields,
    pub reporter: ConsoleReporter,
    installer: Pkgtools,
    hooks: HookRunner,
}

impl Session {
    pub fn open(config: Config, options: &GlobalOptions) -> Result<Self> {
        let overrides = options.overrides();
        let descriptors = config.repository_descriptors(&overrides)?;
        let downloader = Arc::new(HttpDownloader::new()?);
        let repos = RepositorySet::from_descriptors(
            descriptors,
            &config.paths.cache_dir,
            &config.paths.gpg_keys,
            downloader,
        )?;

        let installed = InstalledDb::open(&config.paths.package_db).with_context(|| {
            format!("Failed to read package database {}", config.paths.package_db.display())
        })?;
        let excludes = config.exclude_patterns(&overrides)?;
        let search_fields = SearchFields::new(&config.settings.search_fields)?;

        let delay = Duration::from_millis(config.settings.dry_run_delay_ms);
        let installer = Pkgtools::new(
            &config.commands,
            CommandRunner::new()
                .dry_run(options.dry_run, delay)
                .log_output(config.settings.log_installer),
        );
        let hooks = HookRunner::new(
            &config.paths.scripts,
            CommandRunner::new()
                .dry_run(options.dry_run, delay)
                .log_output(config.settings.log_scripts),
        );

        debug!(
            "{} enabled and {} disabled repositories, {} installed packages",
            repos.enabled().len(),
            repos.disabled().len(),
            installed.len()
        );

        Ok(Self {
            reporter: ConsoleReporter::new(options.quiet),
            config,
            options: options.clone(),
            overrides,
            repos,
            installed,
            excludes,
            search_fields,
            installer,
            hooks,
        })
    }

    /// Sync every enabled repository, reporting the ones that failed
    pub fn load_repositories(&mut self) {
        let report = self.repos.sync_all();
        for (id, message) in &report.failed {
            self.reporter
                .error(&format!("Failed to load repository {}: {}", id.bold(), message));
        }
    }

    pub fn resolver(&self) -> Result<Resolver<'_>> {
        Ok(Resolver::new(
            &self.installed,
            self.repos.enabled(),
            self.overrides.include.as_slice(),
            self.excludes.as_slice(),
        )?)
    }

    /// Run one transaction with the system lock and hook scripts
    pub fn run_transaction(&self, operation: Operation, pairs: Vec<PackagePair>) -> Result<TransactionReport> {
        let lock = TransactionLock::new(&self.config.paths.lock_file);
        let report = Transaction::new(operation, lock, &self.installer, &self.reporter)
            .with_hooks(self.hooks.clone())
            .execute(pairs)?;

        for (name, status) in &report.failed {
            self.reporter
                .error(&format!("Operation error when processing {} (status {})", name, status));
        }
        Ok(report)
    }
}

/// Execute a CLI command, returning the process exit status
pub fn execute(command: Commands, config: Config, options: &GlobalOptions) -> Result<i32> {
    colored::control::set_override(config.settings.use_color);

    if command.mutates() && !is_root() {
        eprintln!("{} this command must be run as root", "error:".red().bold());
        return Ok(EXIT_NOT_ROOT);
    }

    let mut session = Session::open(config, options)?;

    match command {
        Commands::Clean { target } => clean::run(&session, target),
        Commands::Repolist { disabled, all, .. } => repolist::run(&session, disabled, all),
        command => {
            session.load_repositories();
            match command {
                Commands::Sync { names } => update::upgrade(&session, &names),
                Commands::CheckUpdate => update::check(&session),
                Commands::Install {
                    names,
                    tagfile,
                    optional,
                    reinstall,
                } => install::run(&session, &names, tagfile.as_deref(), optional, reinstall),
                Commands::Remove { names } => remove::run(&session, &names),
                Commands::Search { terms } => search::search(&session, &terms),
                Commands::Provides { files } => search::provides(&session, &files),
                Commands::Info(args) => info::run(&session, &args),
                Commands::List(args) => list::run(&session, &args),
                Commands::Clean { .. } | Commands::Repolist { .. } => Ok(0),
            }
        }
    }
}

/// Format bytes as human-readable size
fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// One line per pair: name, installed and available versions
fn pair_line(pair: &PackagePair) -> String {
    let installed = pair
        .installed
        .as_ref()
        .map(|p| p.full_version())
        .unwrap_or_else(|| "-".to_string());

    let available = match &pair.available {
        Some(p) if pair.has_upgrade() => format!("{} ({})", p.full_version().green(), p.repo),
        Some(p) => format!("{} ({})", p.full_version(), p.repo),
        None => "-".to_string(),
    };

    format!("{} {:<24} {}", format!("{:<30}", pair.name).bold(), installed, available)
}
