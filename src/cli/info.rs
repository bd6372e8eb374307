//! Info command implementation

use anyhow::Result;
use colored::Colorize;

use super::{format_bytes, ListArgs, Session};
use crate::package::Package;

pub fn run(session: &Session, args: &ListArgs) -> Result<i32> {
    let found = session
        .resolver()?
        .find_package(&args.globs(), args.find_options())?;

    if found.is_empty() {
        session.reporter.line("No matching packages.");
        return Ok(1);
    }

    for pair in found.values() {
        if let Some(package) = &pair.installed {
            show(session, package, "installed");
        }
        if let Some(package) = &pair.available {
            let label = if pair.has_upgrade() {
                format!("available from {} (upgrade)", package.repo)
            } else {
                format!("available from {}", package.repo)
            };
            show(session, package, &label);
        }
    }

    Ok(0)
}

fn show(session: &Session, package: &Package, label: &str) {
    let reporter = &session.reporter;
    reporter.line(&format!("{}: {} ({})", "Package".bold(), package.name.cyan(), label));
    reporter.line(&format!("  {}: {}", "Version".bold(), package.version));
    reporter.line(&format!("  {}: {}", "Arch".bold(), package.arch));
    reporter.line(&format!("  {}: {}", "Build".bold(), package.build));
    if let Some(group) = &package.group {
        reporter.line(&format!("  {}: {}", "Group".bold(), group));
    }
    if package.compressed_size > 0 || package.uncompressed_size > 0 {
        reporter.line(&format!(
            "  {}: {} ({} installed)",
            "Size".bold(),
            format_bytes(package.compressed_size),
            format_bytes(package.uncompressed_size)
        ));
    }
    if !package.summary.is_empty() {
        reporter.line(&format!("  {}: {}", "Summary".bold(), package.summary));
    }
    for line in &package.description {
        reporter.line(&format!("    {}", line));
    }
    reporter.line("");
}
