//! Upgrade and check-update commands

use anyhow::Result;
use colored::Colorize;

use super::{pair_line, Session};
use crate::package::PackagePair;
use crate::resolver::FindOptions;
use crate::transaction::Operation;

/// Upgrade every installed package with a newer build available, or only
/// the named ones
pub fn upgrade(session: &Session, names: &[String]) -> Result<i32> {
    let pairs = upgrades(session, names)?;
    if pairs.is_empty() {
        session.reporter.line("No upgrades available.");
        return Ok(0);
    }

    session.reporter.line(&format!("{}", "Packages to upgrade:".bold()));
    for pair in &pairs {
        session.reporter.line(&format!("  {}", pair_line(pair)));
    }

    let report = session.run_transaction(Operation::Upgrade, pairs)?;
    Ok(report.exit_code())
}

/// List the available upgrades without applying them
pub fn check(session: &Session) -> Result<i32> {
    let pairs = upgrades(session, &[])?;
    if pairs.is_empty() {
        session.reporter.line("No upgrades available.");
        return Ok(0);
    }

    for pair in &pairs {
        session.reporter.line(&pair_line(pair));
    }
    session
        .reporter
        .line(&format!("{} upgrade(s) available", pairs.len().to_string().green()));
    Ok(0)
}

fn upgrades(session: &Session, names: &[String]) -> Result<Vec<PackagePair>> {
    let resolver = session.resolver()?;
    let found = if names.is_empty() {
        resolver.find_all_upgrades()?
    } else {
        resolver.find_package(
            names,
            FindOptions {
                only_upgrades: true,
                ..FindOptions::default()
            },
        )?
    };
    Ok(found.into_values().collect())
}
