//! System-wide transaction lock
//!
//! A pid file guards every mutating operation. The recorded pid is checked
//! against `/proc` so that a lock left behind by a crashed run, or whose pid
//! has since been reused by an unrelated program, is reclaimed instead of
//! blocking forever.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{Result, TidepkgError};

/// Process name recorded in `/proc/<pid>/comm` for this program
pub const PROGRAM_NAME: &str = "tidepkg";

/// Exclusive lock held for the duration of a transaction
///
/// Released on drop if still held.
#[derive(Debug)]
pub struct TransactionLock {
    path: PathBuf,
    proc_root: PathBuf,
    program: String,
    held: bool,
}

impl TransactionLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            proc_root: PathBuf::from("/proc"),
            program: PROGRAM_NAME.to_string(),
            held: false,
        }
    }

    /// Inspect processes under a different root (tests)
    pub fn with_proc_root(mut self, proc_root: impl Into<PathBuf>) -> Self {
        self.proc_root = proc_root.into();
        self
    }

    /// Treat processes whose name contains `program` as contenders
    pub fn with_program(mut self, program: &str) -> Self {
        self.program = program.to_string();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_held(&self) -> bool {
        self.held
    }

    /// Pid recorded in the lock file, if any
    pub fn holder_pid(&self) -> Option<u32> {
        fs::read_to_string(&self.path).ok()?.trim().parse().ok()
    }

    /// Check whether the lock could be taken by this process.
    ///
    /// Stale lock files are removed as a side effect.
    pub fn check(&self) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }

        let own = std::process::id();
        match self.holder_pid() {
            Some(pid) if pid == own => return Ok(()),
            Some(pid) if self.is_contender(pid) => {
                return Err(TidepkgError::LockContention(pid));
            }
            Some(pid) => {
                warn!("Removing stale lock {} (pid {})", self.path.display(), pid);
            }
            None => {
                warn!("Removing unreadable lock {}", self.path.display());
            }
        }

        remove_if_exists(&self.path)?;
        Ok(())
    }

    /// Take the lock, writing our pid to the lock file
    pub fn acquire(&mut self) -> Result<()> {
        self.check()?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, format!("{}\n", std::process::id()))?;

        // another process may have raced us between check and write
        self.check()?;
        self.held = true;
        debug!("Acquired lock {}", self.path.display());
        Ok(())
    }

    /// Give the lock up after confirming we still own it
    pub fn release(&mut self) -> Result<()> {
        if !self.held {
            return Ok(());
        }
        self.held = false;

        if !self.path.exists() {
            return Ok(());
        }

        match self.holder_pid() {
            Some(pid) if pid == std::process::id() => {
                remove_if_exists(&self.path)?;
                debug!("Released lock {}", self.path.display());
                Ok(())
            }
            Some(pid) => Err(TidepkgError::LockRelease(format!(
                "{} is now held by pid {}",
                self.path.display(),
                pid
            ))),
            None => Err(TidepkgError::LockRelease(format!(
                "{} has unreadable contents",
                self.path.display()
            ))),
        }
    }

    /// A live process of this program family
    fn is_contender(&self, pid: u32) -> bool {
        let proc_dir = self.proc_root.join(pid.to_string());
        if !proc_dir.exists() {
            return false;
        }

        match fs::read_to_string(proc_dir.join("comm")) {
            Ok(comm) => comm.contains(&self.program),
            // alive but unreadable: assume the worst
            Err(_) => true,
        }
    }
}

impl Drop for TransactionLock {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("Failed to release lock: {}", e);
        }
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}
