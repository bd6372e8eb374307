//! Terminal rendering of core events

use std::io::{self, Write};

use colored::Colorize;

use crate::output::{is_muted, Event, Reporter};
use crate::transaction::Operation;

/// Prints events to the terminal in color.
///
/// Write errors are ignored: a vanished terminal must not abort the work
/// that produced the output.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleReporter {
    quiet: bool,
}

impl ConsoleReporter {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet
    }

    /// Normal output, suppressed by `--quiet`
    pub fn line(&self, text: &str) {
        if !self.quiet && !is_muted() {
            let _ = writeln!(io::stdout(), "{}", text);
        }
    }

    /// Error output, always shown unless muted
    pub fn error(&self, text: &str) {
        if !is_muted() {
            let _ = writeln!(io::stderr(), "{} {}", "error:".red().bold(), text);
        }
    }

    pub fn warning(&self, text: &str) {
        if !is_muted() {
            let _ = writeln!(io::stderr(), "{} {}", "warning:".yellow().bold(), text);
        }
    }
}

impl Reporter for ConsoleReporter {
    fn report(&self, event: &Event) {
        match event {
            Event::Resolving { name } => {
                self.line(&format!("{} {}", "Obtaining".cyan(), name));
            }
            Event::Executing { operation, name } => {
                let action = match operation {
                    Operation::Install => "Installing",
                    Operation::Upgrade => "Upgrading",
                    Operation::Remove => "Removing",
                };
                self.line("");
                self.line(&format!("{} {}...", action.cyan().bold(), name.bold()));
            }
            Event::PackageDone { name, status } => {
                if *status != 0 {
                    self.error(&format!("{} exited with status {}", name, status));
                }
            }
            Event::DryRun { command } => {
                self.line(&format!("{} {}", "DRY RUN:".yellow(), command));
            }
            Event::Output { line } => self.line(line),
            Event::HookStarted { script } => {
                self.line(&format!("{} {}...", "Running script".cyan(), script.bold()));
            }
            Event::HookDone { script, status } => {
                if *status != 0 {
                    self.error(&format!("script {} exited with status {}", script, status));
                }
            }
            Event::NewConfigFile { path } => {
                self.line(&format!("{} {}", "NEW:".yellow().bold(), path.display()));
            }
        }
    }
}
