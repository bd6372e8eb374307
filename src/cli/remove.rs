//! Remove command implementation

use anyhow::Result;
use colored::Colorize;

use super::{pair_line, Session};
use crate::package::PackagePair;
use crate::resolver::FindOptions;
use crate::transaction::Operation;

pub fn run(session: &Session, names: &[String]) -> Result<i32> {
    let options = FindOptions {
        installed: true,
        available: false,
        ..FindOptions::default()
    };
    let pairs: Vec<PackagePair> = session
        .resolver()?
        .find_package(names, options)?
        .into_values()
        .filter(|pair| pair.installed.is_some())
        .collect();

    if pairs.is_empty() {
        session.reporter.error("no matching packages are installed");
        return Ok(1);
    }

    session.reporter.line(&format!("{}", "Packages to remove:".bold()));
    for pair in &pairs {
        session.reporter.line(&format!("  {}", pair_line(pair)));
    }

    let report = session.run_transaction(Operation::Remove, pairs)?;
    Ok(report.exit_code())
}
