//! Install command implementation

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;

use super::{pair_line, Session};
use crate::package::PackagePair;
use crate::parsers::tagfile::parse_tagfile;
use crate::resolver::FindOptions;
use crate::transaction::Operation;

pub fn run(
    session: &Session,
    names: &[String],
    tagfile: Option<&Path>,
    optional: bool,
    reinstall: bool,
) -> Result<i32> {
    let mut requested = names.to_vec();
    if let Some(path) = tagfile {
        let tagged = parse_tagfile(path, optional)
            .with_context(|| format!("Failed to read tagfile {}", path.display()))?;
        requested.extend(tagged);
    }

    if requested.is_empty() {
        session.reporter.error("no packages requested");
        return Ok(1);
    }

    let found = session
        .resolver()?
        .find_package(&requested, FindOptions::default())?;

    let mut status = 0;
    let mut selected: Vec<PackagePair> = Vec::new();
    for pair in found.into_values() {
        match select(&pair, reinstall) {
            Ok(()) => selected.push(pair),
            Err(reason) => {
                session.reporter.warning(&format!("{}: {}", pair.name, reason));
                if pair.available.is_none() {
                    status = 1;
                }
            }
        }
    }

    if selected.is_empty() {
        session.reporter.line("Nothing to install.");
        return Ok(status);
    }

    session.reporter.line(&format!("{}", "Packages to install:".bold()));
    for pair in &selected {
        session.reporter.line(&format!("  {}", pair_line(pair)));
    }

    let report = session.run_transaction(Operation::Install, selected)?;
    Ok(report.exit_code().max(status))
}

/// Decide whether a pair is installed, with the reason when it is not
fn select(pair: &PackagePair, reinstall: bool) -> std::result::Result<(), &'static str> {
    if pair.available.is_none() {
        return Err("not available from any enabled repository");
    }
    match &pair.installed {
        None => Ok(()),
        Some(_) if !reinstall => Err("already installed"),
        Some(_) if pair.has_upgrade() => Err("an upgrade is available; upgrade it instead"),
        Some(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::Package;

    fn pair(installed: Option<&str>, available: Option<&str>) -> PackagePair {
        let mut pair = PackagePair::new("bash");
        pair.installed = installed.map(|v| Package::new("bash", v, "x86_64", "1"));
        pair.available = available.map(|v| Package::new("bash", v, "x86_64", "1"));
        pair
    }

    #[test]
    fn test_new_package_is_selected() {
        assert!(select(&pair(None, Some("5.2")), false).is_ok());
    }

    #[test]
    fn test_installed_package_needs_reinstall() {
        assert!(select(&pair(Some("5.2"), Some("5.2")), false).is_err());
        assert!(select(&pair(Some("5.2"), Some("5.2")), true).is_ok());
    }

    #[test]
    fn test_reinstall_refused_when_upgrade_exists() {
        assert!(select(&pair(Some("5.1"), Some("5.2")), true).is_err());
    }

    #[test]
    fn test_unavailable_package_is_skipped() {
        assert!(select(&pair(Some("5.2"), None), true).is_err());
    }
}
