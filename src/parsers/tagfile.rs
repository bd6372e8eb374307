//! Tagfiles: batch install lists of `name: ACTION` lines

use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use chrono::Utc;

use crate::error::{Result, TidepkgError};

/// Per-package tagfile action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagAction {
    /// Always install
    Add,
    /// Install when optional packages are requested
    Opt,
    /// Skip
    Skp,
}

impl fmt::Display for TagAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagAction::Add => write!(f, "ADD"),
            TagAction::Opt => write!(f, "OPT"),
            TagAction::Skp => write!(f, "SKP"),
        }
    }
}

impl FromStr for TagAction {
    type Err = TidepkgError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ADD" => Ok(TagAction::Add),
            "OPT" => Ok(TagAction::Opt),
            "SKP" => Ok(TagAction::Skp),
            other => Err(TidepkgError::Parse(format!("unknown tagfile action: {}", other))),
        }
    }
}

/// Names selected by tagfile text: `ADD` entries, plus `OPT` when `optional`
pub fn parse_tagfile_str(text: &str, optional: bool) -> Vec<String> {
    text.lines()
        .filter_map(|line| {
            let content = line.split('#').next().unwrap_or("").trim();
            let (name, action) = content.split_once(':')?;
            if action.contains(':') {
                return None;
            }
            match action.parse::<TagAction>().ok()? {
                TagAction::Add => Some(name.trim().to_string()),
                TagAction::Opt if optional => Some(name.trim().to_string()),
                _ => None,
            }
        })
        .filter(|name| !name.is_empty())
        .collect()
}

/// Read the names selected by a tagfile
pub fn parse_tagfile(path: &Path, optional: bool) -> Result<Vec<String>> {
    let text = fs::read_to_string(path)?;
    Ok(parse_tagfile_str(&text, optional))
}

/// Write a tagfile assigning `action` to every name
pub fn write_tagfile<S: AsRef<str>>(path: &Path, names: &[S], action: TagAction) -> Result<()> {
    let mut out = format!(
        "# Tagfile generated {}\n",
        Utc::now().format("%a %b %d %H:%M:%S UTC %Y")
    );
    for name in names {
        out.push_str(&format!("{}: {}\n", name.as_ref(), action));
    }
    fs::write(path, out)?;
    Ok(())
}
