//! Install, upgrade and remove transactions
//!
//! A transaction takes the system lock, fetches every archive it needs,
//! hands each package to the installer, then runs the hook scripts. A
//! package whose installer fails is reported and skipped over; nothing that
//! was already applied is undone.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::{Result, TidepkgError};
use crate::hooks::HookRunner;
use crate::installer::Installer;
use crate::lock::TransactionLock;
use crate::output::{is_muted, Event, Reporter, SignalGuard};
use crate::package::{Package, PackagePair};

/// Packages applied before everything else, in this order, so the tools
/// running the rest of the transaction are never half upgraded
pub const FOUNDATIONAL: [&str; 5] = ["aaa_glibc-solibs", "tar", "xz", "findutils", "pkgtools"];

/// What a transaction does to its packages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Install,
    Upgrade,
    Remove,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Install => "install",
            Operation::Upgrade => "upgrade",
            Operation::Remove => "remove",
        };
        f.write_str(name)
    }
}

/// Move foundational packages to the front in their fixed order, keeping
/// the relative order of everything else
pub fn prioritize<T>(items: Vec<T>, name_of: impl Fn(&T) -> &str) -> Vec<T> {
    let mut rest: Vec<Option<T>> = items.into_iter().map(Some).collect();
    let mut ordered = Vec::with_capacity(rest.len());

    for name in FOUNDATIONAL {
        for slot in rest.iter_mut() {
            if slot.as_ref().is_some_and(|item| name_of(item) == name) {
                ordered.extend(slot.take());
            }
        }
    }

    ordered.extend(rest.into_iter().flatten());
    ordered
}

/// Outcome of a transaction that got as far as taking the lock
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionReport {
    /// Worst installer exit status, 0 when every package succeeded
    pub status: i32,
    /// Packages the installer accepted, in execution order
    pub completed: Vec<String>,
    /// Packages the installer rejected, with their exit status
    pub failed: Vec<(String, i32)>,
    /// Worst hook script exit status
    pub hook_status: i32,
    /// `.new` configuration files left by installed packages
    pub new_config_files: Vec<PathBuf>,
}

impl TransactionReport {
    pub fn success(&self) -> bool {
        self.exit_code() == 0
    }

    /// Status for the whole invocation
    pub fn exit_code(&self) -> i32 {
        self.status.max(self.hook_status)
    }
}

/// A batch of packages to install, upgrade or remove
pub struct Transaction<'a> {
    operation: Operation,
    lock: TransactionLock,
    installer: &'a dyn Installer,
    reporter: &'a dyn Reporter,
    hooks: Option<HookRunner>,
    root: PathBuf,
}

impl<'a> Transaction<'a> {
    pub fn new(
        operation: Operation,
        lock: TransactionLock,
        installer: &'a dyn Installer,
        reporter: &'a dyn Reporter,
    ) -> Self {
        Self {
            operation,
            lock,
            installer,
            reporter,
            hooks: None,
            root: PathBuf::from("/"),
        }
    }

    /// Run hook scripts after the packages are processed
    pub fn with_hooks(mut self, hooks: HookRunner) -> Self {
        self.hooks = Some(hooks);
        self
    }

    /// Filesystem root that package file lists refer to
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// Run the transaction.
    ///
    /// Lock contention and archive resolution failures are returned as
    /// errors before anything is changed. Installer and hook failures are
    /// recorded in the report instead.
    pub fn execute(mut self, pairs: Vec<PackagePair>) -> Result<TransactionReport> {
        self.lock.acquire()?;
        let signals = SignalGuard::install();

        let outcome = self.run(pairs);

        let released = self.lock.release();
        drop(signals);

        let mut report = outcome?;
        if let Err(e) = released {
            error!("Failed to release transaction lock: {}", e);
            report.status = report.status.max(1);
        }

        if report.success() {
            info!("Transaction completed successfully");
        } else {
            error!("Transaction failed with status {}", report.exit_code());
        }
        Ok(report)
    }

    fn run(&self, pairs: Vec<PackagePair>) -> Result<TransactionReport> {
        let queue = match self.operation {
            Operation::Remove => pairs,
            Operation::Install | Operation::Upgrade => {
                prioritize(pairs, |pair: &PackagePair| pair.name.as_str())
            }
        };

        let archives = self.resolve(&queue)?;
        let mut report = TransactionReport::default();

        for (pair, archive) in queue.iter().zip(&archives) {
            info!("{}: {}", self.operation, pair.name);
            self.emit(Event::Executing {
                operation: self.operation,
                name: pair.name.clone(),
            });

            let status = match (self.operation, archive) {
                (Operation::Install, Some(path)) => self.installer.install(path, self.reporter),
                (Operation::Upgrade, Some(path)) => self.installer.upgrade(path, self.reporter),
                _ => self.installer.remove(&pair.name, self.reporter),
            };

            self.emit(Event::PackageDone {
                name: pair.name.clone(),
                status,
            });

            if status == 0 {
                report.completed.push(pair.name.clone());
            } else {
                let failure = TidepkgError::InstallerExitNonZero {
                    package: pair.name.clone(),
                    code: status,
                };
                warn!("{}", failure);
                report.failed.push((pair.name.clone(), status));
                report.status = report.status.max(status);
            }
        }

        let affected: Vec<&Package> = queue.iter().filter_map(|pair| self.side(pair)).collect();
        if let Some(hooks) = &self.hooks {
            report.hook_status = match hooks.run(self.operation, &affected, self.reporter) {
                Ok(status) => status,
                Err(e) => {
                    error!("Hook scripts could not run: {}", e);
                    1
                }
            };
            if report.hook_status != 0 {
                let failure = TidepkgError::ScriptFailure {
                    script: hooks_label(hooks),
                    code: report.hook_status,
                };
                error!("{}", failure);
            }
        }

        if self.operation != Operation::Remove && !self.installer.is_dry_run() {
            report.new_config_files = self.new_config_files(&queue, &report.completed);
            for path in &report.new_config_files {
                self.emit(Event::NewConfigFile { path: path.clone() });
            }
        }

        Ok(report)
    }

    /// Fetch every archive up front; one failure aborts the whole batch
    fn resolve(&self, queue: &[PackagePair]) -> Result<Vec<Option<PathBuf>>> {
        if self.operation == Operation::Remove {
            return Ok(vec![None; queue.len()]);
        }

        let mut archives = Vec::with_capacity(queue.len());
        let mut failures = Vec::new();
        for pair in queue {
            self.emit(Event::Resolving {
                name: pair.name.clone(),
            });

            let resolved = match &pair.source {
                Some(handle) => handle.resolve(),
                None => Err(TidepkgError::ResolutionFailure(format!(
                    "{} has no archive source",
                    pair.name
                ))),
            };

            match resolved {
                Ok(path) => archives.push(Some(path)),
                Err(e) => {
                    error!("Cannot {} {}: {}", self.operation, pair.name, e);
                    failures.push(pair.name.clone());
                }
            }
        }

        if !failures.is_empty() {
            return Err(TidepkgError::ResolutionFailure(format!(
                "could not obtain {}",
                failures.join(", ")
            )));
        }
        Ok(archives)
    }

    /// The package a hook should see: installed side for removal
    fn side<'p>(&self, pair: &'p PackagePair) -> Option<&'p Package> {
        match self.operation {
            Operation::Remove => pair.installed.as_ref(),
            Operation::Install | Operation::Upgrade => pair.available.as_ref(),
        }
    }

    fn new_config_files(&self, queue: &[PackagePair], completed: &[String]) -> Vec<PathBuf> {
        queue
            .iter()
            .filter(|pair| completed.contains(&pair.name))
            .filter_map(|pair| pair.available.as_ref())
            .flat_map(|package| package.files.iter())
            .filter(|file| file.ends_with(".new"))
            .map(|file| self.root.join(file.trim_start_matches('/')))
            .filter(|path| path.exists())
            .collect()
    }

    fn emit(&self, event: Event) {
        if !is_muted() {
            self.reporter.report(&event);
        }
    }
}

fn hooks_label(hooks: &HookRunner) -> String {
    hooks
        .find_scripts()
        .map(|scripts| {
            scripts
                .iter()
                .filter_map(|p| p.file_name())
                .map(|n| n.to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join(", ")
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::Downloader;
    use crate::fetch::{FileHandle, FileRequest, FileResolver};
    use crate::output::NullReporter;
    use std::cell::RefCell;
    use std::fs;
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::tempdir;

    /// Records every call, failing the names it was told to fail
    #[derive(Default)]
    struct MockInstaller {
        calls: RefCell<Vec<String>>,
        failing: Vec<String>,
    }

    impl MockInstaller {
        fn record(&self, call: String, name: &str) -> i32 {
            self.calls.borrow_mut().push(call);
            if self.failing.iter().any(|f| f == name) {
                1
            } else {
                0
            }
        }
    }

    impl Installer for MockInstaller {
        fn install(&self, archive: &Path, _reporter: &dyn Reporter) -> i32 {
            let name = archive.file_name().unwrap().to_string_lossy().into_owned();
            self.record(format!("install {}", name), &name)
        }

        fn upgrade(&self, archive: &Path, _reporter: &dyn Reporter) -> i32 {
            let name = archive.file_name().unwrap().to_string_lossy().into_owned();
            self.record(format!("upgrade {}", name), &name)
        }

        fn remove(&self, name: &str, _reporter: &dyn Reporter) -> i32 {
            self.record(format!("remove {}", name), name)
        }
    }

    struct NoNetwork;

    impl Downloader for NoNetwork {
        fn download(&self, url: &str, _dest: &Path) -> Result<()> {
            Err(TidepkgError::Download(url.to_string()))
        }
    }

    /// A pair whose archive lives in a local mirror, named after the package
    fn local_pair(mirror: &Path, cache: &Path, name: &str) -> PackagePair {
        fs::write(mirror.join(name), "archive").unwrap();
        let request = FileRequest::new(&[mirror.to_string_lossy().into_owned()], name, cache);
        let resolver = FileResolver::new(Arc::new(NoNetwork), None);

        let mut pair = PackagePair::new(name);
        pair.available = Some(Package::new(name, "1.0", "x86_64", "1"));
        pair.source = Some(FileHandle::new(request, resolver));
        pair
    }

    fn lock_in(dir: &Path) -> TransactionLock {
        TransactionLock::new(dir.join("lock")).with_proc_root(dir.join("proc"))
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_prioritize_moves_foundational_packages_first() {
        let queue = names(&["zlib", "pkgtools", "findutils"]);
        let ordered = prioritize(queue, |s: &String| s.as_str());
        assert_eq!(ordered, names(&["findutils", "pkgtools", "zlib"]));
    }

    #[test]
    fn test_prioritize_keeps_remaining_order() {
        let queue = names(&["zlib", "bash", "xz", "aaa_glibc-solibs", "curl"]);
        let ordered = prioritize(queue, |s: &String| s.as_str());
        assert_eq!(
            ordered,
            names(&["aaa_glibc-solibs", "xz", "zlib", "bash", "curl"])
        );
    }

    #[test]
    fn test_operation_display() {
        assert_eq!(Operation::Install.to_string(), "install");
        assert_eq!(Operation::Remove.to_string(), "remove");
    }

    #[test]
    fn test_install_runs_in_priority_order() {
        let dir = tempdir().unwrap();
        let mirror = dir.path().join("mirror");
        fs::create_dir(&mirror).unwrap();

        let pairs = vec![
            local_pair(&mirror, dir.path(), "zlib"),
            local_pair(&mirror, dir.path(), "pkgtools"),
            local_pair(&mirror, dir.path(), "findutils"),
        ];
        let installer = MockInstaller::default();

        let report = Transaction::new(Operation::Upgrade, lock_in(dir.path()), &installer, &NullReporter)
            .execute(pairs)
            .unwrap();

        assert!(report.success());
        assert_eq!(
            *installer.calls.borrow(),
            names(&["upgrade findutils", "upgrade pkgtools", "upgrade zlib"])
        );
        assert_eq!(report.completed, names(&["findutils", "pkgtools", "zlib"]));
        assert!(!dir.path().join("lock").exists());
    }

    #[test]
    fn test_unresolvable_archive_aborts_before_changes() {
        let dir = tempdir().unwrap();
        let mirror = dir.path().join("mirror");
        fs::create_dir(&mirror).unwrap();

        let good = local_pair(&mirror, dir.path(), "bash");
        let mut missing = local_pair(&mirror, dir.path(), "curl");
        fs::remove_file(mirror.join("curl")).unwrap();
        missing.available = Some(Package::new("curl", "8.0", "x86_64", "1"));

        let installer = MockInstaller::default();
        let err = Transaction::new(Operation::Install, lock_in(dir.path()), &installer, &NullReporter)
            .execute(vec![good, missing])
            .unwrap_err();

        assert!(matches!(err, TidepkgError::ResolutionFailure(_)));
        assert!(installer.calls.borrow().is_empty());
        assert!(!dir.path().join("lock").exists());
    }

    #[test]
    fn test_failed_package_does_not_stop_the_rest() {
        let dir = tempdir().unwrap();
        let mut bash = PackagePair::new("bash");
        bash.installed = Some(Package::new("bash", "5.2", "x86_64", "1"));
        let mut curl = PackagePair::new("curl");
        curl.installed = Some(Package::new("curl", "8.0", "x86_64", "1"));

        let installer = MockInstaller {
            failing: names(&["bash"]),
            ..Default::default()
        };
        let report = Transaction::new(Operation::Remove, lock_in(dir.path()), &installer, &NullReporter)
            .execute(vec![bash, curl])
            .unwrap();

        assert_eq!(report.status, 1);
        assert_eq!(report.failed, vec![("bash".to_string(), 1)]);
        assert_eq!(report.completed, names(&["curl"]));
        assert_eq!(installer.calls.borrow().len(), 2);
    }

    #[test]
    fn test_contended_lock_is_fatal() {
        let dir = tempdir().unwrap();
        let proc_dir = dir.path().join("proc/4242");
        fs::create_dir_all(&proc_dir).unwrap();
        fs::write(proc_dir.join("comm"), "tidepkg\n").unwrap();
        fs::write(dir.path().join("lock"), "4242\n").unwrap();

        let installer = MockInstaller::default();
        let err = Transaction::new(Operation::Remove, lock_in(dir.path()), &installer, &NullReporter)
            .execute(vec![PackagePair::new("bash")])
            .unwrap_err();

        assert!(matches!(err, TidepkgError::LockContention(4242)));
        assert!(installer.calls.borrow().is_empty());
    }

    #[test]
    fn test_new_config_files_are_reported() {
        let dir = tempdir().unwrap();
        let mirror = dir.path().join("mirror");
        let root = dir.path().join("root");
        fs::create_dir(&mirror).unwrap();
        fs::create_dir_all(root.join("etc")).unwrap();
        fs::write(root.join("etc/sshd_config.new"), "").unwrap();

        let mut pair = local_pair(&mirror, dir.path(), "openssh");
        if let Some(package) = pair.available.as_mut() {
            package.files = names(&["/etc/sshd_config.new", "/etc/absent.new", "/usr/bin/ssh"]);
        }

        let installer = MockInstaller::default();
        let report = Transaction::new(Operation::Install, lock_in(dir.path()), &installer, &NullReporter)
            .with_root(&root)
            .execute(vec![pair])
            .unwrap();

        assert_eq!(report.new_config_files, vec![root.join("etc/sshd_config.new")]);
    }
}
