//! External installer invocation
//!
//! Archives are unpacked by the pkgtools programs, run as subprocesses.
//! [`CommandRunner`] is shared with the hook scripts: it detaches the child
//! into its own session, captures its combined output in a temporary file
//! and forwards that output line by line while polling for exit.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use tempfile::NamedTempFile;
use tracing::{error, info};

use crate::config::CommandsConfig;
use crate::error::{Result, TidepkgError};
use crate::output::{is_muted, Event, Reporter};

/// How often a running child is polled
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Exit status reported when the program could not be started
pub const SPAWN_FAILURE: i32 = 127;

/// Runs external programs, or pretends to in dry-run mode
#[derive(Debug, Clone)]
pub struct CommandRunner {
    dry_run: bool,
    dry_run_delay: Duration,
    log_output: bool,
}

impl CommandRunner {
    pub fn new() -> Self {
        Self {
            dry_run: false,
            dry_run_delay: Duration::from_secs(1),
            log_output: false,
        }
    }

    /// Replace every invocation with a logged no-op taking `delay`
    pub fn dry_run(mut self, enabled: bool, delay: Duration) -> Self {
        self.dry_run = enabled;
        self.dry_run_delay = delay;
        self
    }

    /// Copy child output into the log
    pub fn log_output(mut self, enabled: bool) -> Self {
        self.log_output = enabled;
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Run `args` to completion and return its exit status
    pub fn run(&self, args: &[String], reporter: &dyn Reporter) -> Result<i32> {
        let Some((program, rest)) = args.split_first() else {
            return Err(TidepkgError::Config("empty command line".to_string()));
        };
        let command_line = args.join(" ");

        if self.dry_run {
            info!("DRY RUN: {}", command_line);
            if !is_muted() {
                reporter.report(&Event::DryRun {
                    command: command_line,
                });
            }
            thread::sleep(self.dry_run_delay);
            return Ok(0);
        }

        let capture = NamedTempFile::new()?;
        let stdout = capture.reopen()?;
        let stderr = stdout.try_clone()?;
        let mut reader = BufReader::new(File::open(capture.path())?);

        let mut command = Command::new(program);
        command
            .args(rest)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));
        detach_session(&mut command);

        if self.log_output {
            info!("Executed: {}", command_line);
        }

        let mut child = command.spawn()?;
        let mut partial = Vec::new();
        let status = loop {
            let finished = child.try_wait()?;
            self.forward(&mut reader, &mut partial, reporter)?;
            match finished {
                Some(status) => break status,
                None => thread::sleep(POLL_INTERVAL),
            }
        };

        if !partial.is_empty() {
            self.emit(&String::from_utf8_lossy(&partial), reporter);
        }

        let code = exit_code(status);
        if code != 0 {
            error!("Process returned error code: {}", code);
        }
        Ok(code)
    }

    /// Emit every complete line written since the last poll
    fn forward(
        &self,
        reader: &mut BufReader<File>,
        partial: &mut Vec<u8>,
        reporter: &dyn Reporter,
    ) -> Result<()> {
        loop {
            if reader.read_until(b'\n', partial)? == 0 || partial.last() != Some(&b'\n') {
                return Ok(());
            }
            partial.pop();
            self.emit(&String::from_utf8_lossy(partial), reporter);
            partial.clear();
        }
    }

    fn emit(&self, line: &str, reporter: &dyn Reporter) {
        if self.log_output {
            info!("{}", line);
        }
        if !is_muted() {
            reporter.report(&Event::Output {
                line: line.to_string(),
            });
        }
    }
}

impl Default for CommandRunner {
    fn default() -> Self {
        Self::new()
    }
}

/// Start the child in a new session so a terminal hang-up never reaches it
#[cfg(unix)]
fn detach_session(command: &mut Command) {
    use std::os::unix::process::CommandExt;

    // SAFETY: setsid is async-signal-safe and touches no parent state
    unsafe {
        command.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

#[cfg(not(unix))]
fn detach_session(_command: &mut Command) {}

fn exit_code(status: ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    status.code().unwrap_or(1)
}

/// Something that applies package archives to the system
pub trait Installer {
    fn install(&self, archive: &Path, reporter: &dyn Reporter) -> i32;
    fn upgrade(&self, archive: &Path, reporter: &dyn Reporter) -> i32;
    fn remove(&self, name: &str, reporter: &dyn Reporter) -> i32;

    /// Whether invocations are only simulated
    fn is_dry_run(&self) -> bool {
        false
    }
}

/// Installer backed by `upgradepkg` / `removepkg`
#[derive(Debug, Clone)]
pub struct Pkgtools {
    install: Vec<String>,
    upgrade: Vec<String>,
    remove: Vec<String>,
    runner: CommandRunner,
}

impl Pkgtools {
    pub fn new(commands: &CommandsConfig, runner: CommandRunner) -> Self {
        Self {
            install: split_command(&commands.install),
            upgrade: split_command(&commands.upgrade),
            remove: split_command(&commands.remove),
            runner,
        }
    }

    fn run(&self, base: &[String], target: &str, reporter: &dyn Reporter) -> i32 {
        let mut args = base.to_vec();
        args.push(target.to_string());

        self.runner.run(&args, reporter).unwrap_or_else(|e| {
            error!("Failed to run {}: {}", args.join(" "), e);
            SPAWN_FAILURE
        })
    }
}

impl Installer for Pkgtools {
    fn install(&self, archive: &Path, reporter: &dyn Reporter) -> i32 {
        self.run(&self.install, &archive.to_string_lossy(), reporter)
    }

    fn upgrade(&self, archive: &Path, reporter: &dyn Reporter) -> i32 {
        self.run(&self.upgrade, &archive.to_string_lossy(), reporter)
    }

    fn remove(&self, name: &str, reporter: &dyn Reporter) -> i32 {
        self.run(&self.remove, name, reporter)
    }

    fn is_dry_run(&self) -> bool {
        self.runner.is_dry_run()
    }
}

fn split_command(command: &str) -> Vec<String> {
    command.split_whitespace().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Default)]
    struct Collect(RefCell<Vec<Event>>);

    impl Reporter for Collect {
        fn report(&self, event: &Event) {
            self.0.borrow_mut().push(event.clone());
        }
    }

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_dry_run_reports_command() {
        let runner = CommandRunner::new().dry_run(true, Duration::ZERO);
        let reporter = Collect::default();

        let status = runner.run(&argv(&["/sbin/removepkg", "bash"]), &reporter).unwrap();

        assert_eq!(status, 0);
        assert_eq!(
            reporter.0.borrow().as_slice(),
            &[Event::DryRun {
                command: "/sbin/removepkg bash".to_string()
            }]
        );
    }

    #[test]
    fn test_empty_command_is_rejected() {
        let runner = CommandRunner::new();
        assert!(runner.run(&[], &Collect::default()).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_output_is_forwarded_and_status_returned() {
        let runner = CommandRunner::new();
        let reporter = Collect::default();

        let status = runner
            .run(&argv(&["/bin/sh", "-c", "echo one; echo two >&2; exit 3"]), &reporter)
            .unwrap();

        assert_eq!(status, 3);
        let lines: Vec<String> = reporter
            .0
            .borrow()
            .iter()
            .filter_map(|e| match e {
                Event::Output { line } => Some(line.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(lines, vec!["one", "two"]);
    }

    #[test]
    fn test_missing_program_maps_to_spawn_failure() {
        let commands = CommandsConfig {
            install: "/nonexistent/installpkg".to_string(),
            upgrade: "/nonexistent/upgradepkg".to_string(),
            remove: "/nonexistent/removepkg".to_string(),
        };
        let tools = Pkgtools::new(&commands, CommandRunner::new());

        assert_eq!(tools.remove("bash", &Collect::default()), SPAWN_FAILURE);
    }

    #[test]
    fn test_pkgtools_appends_target() {
        let tools = Pkgtools::new(&CommandsConfig::default(), CommandRunner::new());
        assert_eq!(
            tools.install,
            vec!["/sbin/upgradepkg", "--install-new", "--reinstall"]
        );
        assert!(!tools.is_dry_run());
    }
}
