//! Clean command implementation

use anyhow::{Context, Result};
use colored::Colorize;

use super::{CleanTarget, Session};

pub fn run(session: &Session, target: CleanTarget) -> Result<i32> {
    let metadata = matches!(target, CleanTarget::All | CleanTarget::Metadata);
    let packages = matches!(target, CleanTarget::All | CleanTarget::Packages);

    if metadata {
        session.reporter.line(&format!("{}", "Cleaning cached metadata...".cyan()));
    }
    if packages {
        session.reporter.line(&format!("{}", "Cleaning cached packages...".cyan()));
    }

    session
        .repos
        .clean(metadata, packages)
        .context("Failed to clean repository caches")?;

    session.reporter.line(&format!(
        "  {} Cleaned {}",
        "✓".green(),
        session.config.paths.cache_dir.display()
    ));
    Ok(0)
}
