//! Post-transaction hook scripts
//!
//! Every executable in the scripts directory runs once per transaction as
//! `<script> <operation> <packages-file>`, where the packages file lists
//! `name version arch build` for each affected package.

use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, error};

use crate::error::Result;
use crate::installer::{CommandRunner, SPAWN_FAILURE};
use crate::output::{is_muted, Event, Reporter};
use crate::package::Package;
use crate::transaction::Operation;

/// Discovers and runs hook scripts
#[derive(Debug, Clone)]
pub struct HookRunner {
    dir: PathBuf,
    runner: CommandRunner,
}

impl HookRunner {
    pub fn new(dir: impl Into<PathBuf>, runner: CommandRunner) -> Self {
        Self {
            dir: dir.into(),
            runner,
        }
    }

    /// Executable regular files in the scripts directory, sorted by name.
    ///
    /// Entries resolving to the same real file are only listed once.
    pub fn find_scripts(&self) -> Result<Vec<PathBuf>> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut entries = fs::read_dir(&self.dir)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<std::io::Result<Vec<_>>>()?;
        entries.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

        // The lowest-named entry for each real file wins
        let mut seen = HashSet::new();
        let mut scripts = Vec::new();
        for path in entries {
            let Ok(resolved) = fs::canonicalize(&path) else {
                continue;
            };
            if !seen.insert(resolved.clone()) {
                continue;
            }
            if resolved.is_file() && is_executable(&resolved) {
                scripts.push(path);
            }
        }

        Ok(scripts)
    }

    /// Run every script for one batch, returning the worst exit status
    pub fn run(
        &self,
        operation: Operation,
        packages: &[&Package],
        reporter: &dyn Reporter,
    ) -> Result<i32> {
        let scripts = self.find_scripts()?;
        if scripts.is_empty() {
            debug!("No hook scripts in {}", self.dir.display());
            return Ok(0);
        }

        let workdir = tempfile::tempdir()?;
        let list = workdir.path().join("packages");
        write_package_list(&list, packages)?;

        let mut status = 0;
        for script in scripts {
            let name = script
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if !is_muted() {
                reporter.report(&Event::HookStarted {
                    script: name.clone(),
                });
            }

            let args = vec![
                script.to_string_lossy().into_owned(),
                operation.to_string(),
                list.to_string_lossy().into_owned(),
            ];
            let code = self.runner.run(&args, reporter).unwrap_or_else(|e| {
                error!("Failed to run hook {}: {}", name, e);
                SPAWN_FAILURE
            });

            if !is_muted() {
                reporter.report(&Event::HookDone {
                    script: name,
                    status: code,
                });
            }
            status = status.max(code);
        }

        Ok(status)
    }
}

fn write_package_list(path: &Path, packages: &[&Package]) -> Result<()> {
    let mut sorted = packages.to_vec();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));

    let mut file = fs::File::create(path)?;
    for package in sorted {
        writeln!(
            file,
            "{} {} {} {}",
            package.name, package.version, package.arch, package.build
        )?;
    }
    Ok(())
}

/// Whether the calling process may execute `path`, judged from its mode
/// bits as owner, group member, or other
#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    let Ok(meta) = fs::metadata(path) else {
        return false;
    };
    let mode = meta.mode();

    // SAFETY: getuid has no preconditions and cannot fail
    let uid = unsafe { libc::getuid() };
    if meta.uid() == uid {
        return mode & 0o100 != 0;
    }
    if in_group(meta.gid()) {
        return mode & 0o010 != 0;
    }
    mode & 0o001 != 0
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Whether the calling process belongs to `gid`, as its primary or a
/// supplementary group
#[cfg(unix)]
fn in_group(gid: libc::gid_t) -> bool {
    // SAFETY: getgid has no preconditions and cannot fail
    if unsafe { libc::getgid() } == gid {
        return true;
    }
    supplementary_groups().contains(&gid)
}

#[cfg(unix)]
fn supplementary_groups() -> Vec<libc::gid_t> {
    // SAFETY: a zero-sized query only returns the count
    let count = unsafe { libc::getgroups(0, std::ptr::null_mut()) };
    if count <= 0 {
        return Vec::new();
    }

    let mut groups = vec![0 as libc::gid_t; count as usize];
    // SAFETY: `groups` holds exactly `count` entries
    let filled = unsafe { libc::getgroups(count, groups.as_mut_ptr()) };
    groups.truncate(filled.max(0) as usize);
    groups
}
