//! List command implementation

use anyhow::{Context, Result};
use colored::Colorize;

use super::{pair_line, ListArgs, Session};
use crate::parsers::tagfile::write_tagfile;

pub fn run(session: &Session, args: &ListArgs) -> Result<i32> {
    let found = session
        .resolver()?
        .find_package(&args.globs(), args.find_options())?;

    if found.is_empty() {
        session.reporter.line("No matching packages.");
        return Ok(1);
    }

    session.reporter.line(&format!(
        "{} {:<24} {}",
        format!("{:<30}", "Package").bold(),
        "Installed".bold(),
        "Available".bold()
    ));
    for pair in found.values() {
        session.reporter.line(&pair_line(pair));
    }

    if let Some(path) = &args.save {
        let names: Vec<&String> = found.keys().collect();
        write_tagfile(path, &names, args.action)
            .with_context(|| format!("Failed to write tagfile {}", path.display()))?;
        session.reporter.line(&format!(
            "Saved {} package(s) to {}",
            names.len(),
            path.display()
        ));
    }

    Ok(0)
}
