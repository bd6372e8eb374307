//! Status reporting
//!
//! The core never prints. It emits [`Event`]s to an injected [`Reporter`]
//! and leaves rendering to the caller.
//!
//! While a transaction holds the lock, hang-up and interrupt signals only
//! set a process-wide mute flag ([`is_muted`]) so that losing the terminal
//! cannot abort an installer half way. Every output path checks the flag
//! before writing.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::transaction::Operation;

static MUTED: AtomicBool = AtomicBool::new(false);

/// True once output should be discarded
pub fn is_muted() -> bool {
    MUTED.load(Ordering::SeqCst)
}

/// Discard (or restore) output
pub fn set_muted(muted: bool) {
    MUTED.store(muted, Ordering::SeqCst);
}

/// Something the core wants the user to know about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Fetching a package archive before the transaction starts
    Resolving { name: String },
    /// Running the installer on one package
    Executing { operation: Operation, name: String },
    /// The installer finished with this exit status
    PackageDone { name: String, status: i32 },
    /// A command that would have run, in dry-run mode
    DryRun { command: String },
    /// One line of subprocess output
    Output { line: String },
    /// A hook script is starting
    HookStarted { script: String },
    /// A hook script finished with this exit status
    HookDone { script: String, status: i32 },
    /// A `.new` configuration file needs attention
    NewConfigFile { path: PathBuf },
}

/// Receives events from the core
pub trait Reporter {
    fn report(&self, event: &Event);
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn report(&self, _event: &Event) {}
}

#[cfg(unix)]
extern "C" fn mute_handler(_signal: libc::c_int) {
    MUTED.store(true, Ordering::SeqCst);
}

/// Routes SIGHUP and SIGINT to the mute flag until dropped, then restores
/// the previous handlers
pub struct SignalGuard {
    #[cfg(unix)]
    previous: Vec<(libc::c_int, libc::sighandler_t)>,
}

impl SignalGuard {
    pub fn install() -> Self {
        #[cfg(unix)]
        {
            let handler = mute_handler as extern "C" fn(libc::c_int) as libc::sighandler_t;
            let previous = [libc::SIGHUP, libc::SIGINT]
                .into_iter()
                // SAFETY: the handler only performs an atomic store
                .map(|signal| (signal, unsafe { libc::signal(signal, handler) }))
                .collect();
            Self { previous }
        }

        #[cfg(not(unix))]
        {
            Self {}
        }
    }
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        #[cfg(unix)]
        for (signal, handler) in self.previous.drain(..) {
            if handler != libc::SIG_ERR {
                // SAFETY: restores a disposition previously returned by signal()
                unsafe {
                    libc::signal(signal, handler);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_reporter_accepts_events() {
        NullReporter.report(&Event::Output {
            line: "ignored".to_string(),
        });
    }
}
