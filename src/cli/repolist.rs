//! Repolist command implementation

use anyhow::Result;
use colored::Colorize;

use super::Session;
use crate::repository::Repository;

pub fn run(session: &Session, disabled: bool, all: bool) -> Result<i32> {
    let repos: Vec<&Repository> = if all {
        session.repos.enabled().iter().chain(session.repos.disabled()).collect()
    } else if disabled {
        session.repos.disabled().iter().collect()
    } else {
        session.repos.enabled().iter().collect()
    };

    if repos.is_empty() {
        session.reporter.line(&format!("  {}", "No repositories configured.".yellow()));
        session.reporter.line("");
        session
            .reporter
            .line(&format!("{}", "To add a repository, edit /etc/tidepkg/tidepkg.conf:".dimmed()));
        session.reporter.line("");
        session.reporter.line("  [[repositories]]");
        session.reporter.line("  id = \"slackware64\"");
        session.reporter.line("  baseurl = \"https://mirrors.slackware.com/slackware/slackware64-15.0\"");
        session.reporter.line("  enabled = true");
        return Ok(0);
    }

    session.reporter.line(&format!(
        "{} {} {}  {}",
        format!("{:<20}", "Id").bold(),
        format!("{:<9}", "Status").bold(),
        format!("{:>8}", "Priority").bold(),
        "Name".bold()
    ));
    for repo in repos {
        let status = if repo.enabled() {
            format!("{:<9}", "enabled").green()
        } else {
            format!("{:<9}", "disabled").dimmed()
        };
        session.reporter.line(&format!(
            "{:<20} {} {:>8}  {}",
            repo.id(),
            status,
            repo.priority(),
            repo.name()
        ));
    }

    Ok(0)
}
