//! `PACKAGES.TXT` parser
//!
//! The package list is a sequence of blank-line separated records:
//!
//! ```text
//! PACKAGES.TXT;  Mon Jun 14 20:16:47 UTC 2021
//!
//! PACKAGE NAME:  a2ps-4.14-x86_64-7.txz
//! PACKAGE LOCATION:  ./slackware64/ap
//! PACKAGE SIZE (compressed):  3260 K
//! PACKAGE SIZE (uncompressed):  10000 K
//! PACKAGE DESCRIPTION:
//! a2ps: a2ps (Any to PostScript filter)
//! a2ps:
//! a2ps: a2ps formats files for printing on a PostScript printer.
//! ```

use std::collections::BTreeMap;

use chrono::{NaiveDateTime, TimeZone, Utc};
use tracing::{debug, warn};

use super::parse_size;
use crate::error::{Result, TidepkgError};
use crate::package::{Package, PackageId};

const HEADER_PREFIX: &str = "PACKAGES.TXT;";
const NAME_PREFIX: &str = "PACKAGE NAME:";
const LOCATION_PREFIX: &str = "PACKAGE LOCATION:";
const CSIZE_PREFIX: &str = "PACKAGE SIZE (compressed):";
const USIZE_PREFIX: &str = "PACKAGE SIZE (uncompressed):";

/// A parsed package list
#[derive(Debug, Clone, Default)]
pub struct PackageList {
    /// Generation timestamp embedded in the header (Unix seconds)
    pub timestamp: i64,
    /// Packages keyed by name
    pub packages: BTreeMap<String, Package>,
}

/// Options controlling how package locations are interpreted
#[derive(Debug, Clone, Default)]
pub struct PackageListOptions<'a> {
    /// Repository id recorded on each package
    pub repo: &'a str,
    /// Record the directory holding each package as its group
    pub extract_groups: bool,
    /// Number of leading location components to drop
    pub strip_path: usize,
}

/// Parse a package list. Invalid UTF-8 is replaced rather than rejected.
pub fn parse_packages(data: &[u8], options: &PackageListOptions<'_>) -> Result<PackageList> {
    let text = String::from_utf8_lossy(data);
    let mut timestamp = None;
    let mut packages = BTreeMap::new();

    // Current record: its package plus the archive filename
    let mut current: Option<(Package, String)> = None;

    for line in text.lines() {
        if let Some(rest) = line.strip_prefix(HEADER_PREFIX) {
            timestamp = Some(parse_header_time(rest)?);
        } else if let Some(rest) = line.strip_prefix(NAME_PREFIX) {
            if let Some((package, _)) = current.take() {
                packages.insert(package.name.clone(), package);
            }

            let filename = rest.trim().to_string();
            match PackageId::from_filename(&filename) {
                Some(id) => {
                    let mut package = Package::from_id(&id);
                    package.repo = options.repo.to_string();
                    current = Some((package, filename));
                }
                None => warn!("Skipping unparseable package name: {}", filename),
            }
        } else if line.trim_end_matches('\r').is_empty() {
            if let Some((package, _)) = current.take() {
                packages.insert(package.name.clone(), package);
            }
        } else if let Some((package, filename)) = current.as_mut() {
            if let Some(rest) = line.strip_prefix(LOCATION_PREFIX) {
                let relpath = relative_location(rest.trim(), filename, options.strip_path);
                if options.extract_groups {
                    package.group = group_of(&relpath);
                }
                package.relpath = Some(relpath);
            } else if let Some(rest) = line.strip_prefix(CSIZE_PREFIX) {
                package.compressed_size = parse_size(rest);
            } else if let Some(rest) = line.strip_prefix(USIZE_PREFIX) {
                package.uncompressed_size = parse_size(rest);
            } else if let Some(rest) = description_text(line, &package.name) {
                if package.description.is_empty() {
                    package.summary = summary_of(line);
                }
                package.description.push(rest.trim().to_string());
            }
        }
    }

    if let Some((package, _)) = current.take() {
        packages.insert(package.name.clone(), package);
    }

    let timestamp = timestamp
        .ok_or_else(|| TidepkgError::Parse("package list has no generation timestamp".to_string()))?;

    debug!("Parsed {} packages (timestamp {})", packages.len(), timestamp);
    Ok(PackageList { timestamp, packages })
}

/// Parse the header date, e.g. `Mon Jun 14 20:16:47 UTC 2021`, as UTC
fn parse_header_time(text: &str) -> Result<i64> {
    let mut fields: Vec<&str> = text.split_whitespace().collect();
    // Drop the zone name; the header is always written in UTC
    if fields.len() == 6 {
        fields.remove(4);
    }
    let joined = fields.join(" ");

    let naive = NaiveDateTime::parse_from_str(&joined, "%a %b %d %H:%M:%S %Y")
        .map_err(|e| TidepkgError::Parse(format!("invalid package list timestamp '{}': {}", text.trim(), e)))?;

    Ok(Utc.from_utc_datetime(&naive).timestamp())
}

/// Build the mirror-relative archive path from a `PACKAGE LOCATION` value
fn relative_location(location: &str, filename: &str, strip_path: usize) -> String {
    let mut parts: Vec<&str> = location
        .split('/')
        .filter(|p| !p.is_empty() && *p != ".")
        .skip(strip_path)
        .collect();
    parts.push(filename);
    parts.join("/")
}

/// The directory directly holding the archive, if there is one
fn group_of(relpath: &str) -> Option<String> {
    let mut parts = relpath.rsplit('/');
    parts.next();
    parts.next().map(str::to_string)
}

fn description_text<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    line.strip_prefix(name)?.strip_prefix(": ")
}

/// Text between the first `(` and the last `)` of a description line
fn summary_of(line: &str) -> String {
    line.split_once('(')
        .map(|(_, after)| after.rsplit_once(')').map(|(inner, _)| inner).unwrap_or(""))
        .unwrap_or("")
        .trim()
        .to_string()
}
