//! Search and provides commands

use std::collections::BTreeMap;

use anyhow::Result;
use colored::Colorize;

use super::Session;
use crate::package::PackagePair;
use crate::resolver::FindOptions;

/// Case-insensitive search over the configured search fields
pub fn search(session: &Session, terms: &[String]) -> Result<i32> {
    let found = session
        .resolver()?
        .search_package(terms, &session.search_fields, FindOptions::default())?;

    if found.is_empty() {
        session.reporter.line("No packages found.");
        return Ok(1);
    }

    print_matches(session, &found);
    Ok(0)
}

/// Packages owning files that match each query
pub fn provides(session: &Session, files: &[String]) -> Result<i32> {
    let resolver = session.resolver()?;
    let mut status = 0;

    for query in files {
        let found = resolver.search_file(query, FindOptions::default())?;
        if found.is_empty() {
            session.reporter.line(&format!("No package provides {}", query.bold()));
            status = 1;
            continue;
        }

        session.reporter.line(&format!("{} {}", "Provides".cyan(), query.bold()));
        print_matches(session, &found);
    }

    Ok(status)
}

fn print_matches(session: &Session, found: &BTreeMap<String, PackagePair>) {
    for pair in found.values() {
        let (package, marker) = match (&pair.installed, &pair.available) {
            (Some(installed), _) => (installed, "[installed]".green().to_string()),
            (None, Some(available)) => (available, format!("[{}]", available.repo)),
            (None, None) => continue,
        };

        session.reporter.line(&format!(
            "{} {} {}",
            package.full_name().bold(),
            marker,
            package.summary
        ));
    }
}
