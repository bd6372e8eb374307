//! Repository metadata parsers
//!
//! Pure functions turning the text formats published by a Slackware-style
//! repository into structured records:
//! - `PACKAGES.TXT` package lists
//! - `MANIFEST.bz2` file manifests
//! - `CHECKSUMS.md5` checksum indexes
//! - tagfiles used to drive batch installs

pub mod checksums;
pub mod manifest;
pub mod packages;
pub mod tagfile;

/// Parse a unit-suffixed size string (e.g. `125.2 K`) into bytes.
///
/// Leading digits and at most one decimal point are accumulated; the first
/// non-space, non-digit character after that selects the unit (`k`, `m`, `g`
/// or `t`, powers of 1024). A value without a unit is taken as bytes.
pub fn parse_size(text: &str) -> u64 {
    let mut number = String::new();
    let mut seen_point = false;
    let mut unit = None;

    for c in text.chars() {
        if c.is_ascii_digit() {
            number.push(c);
        } else if c == '.' && !seen_point {
            seen_point = true;
            number.push(c);
        } else if !c.is_whitespace() {
            unit = Some(c.to_ascii_lowercase());
            break;
        }
    }

    let value: f64 = number.parse().unwrap_or(0.0);
    let multiplier = match unit {
        Some('k') => 1u64 << 10,
        Some('m') => 1 << 20,
        Some('g') => 1 << 30,
        Some('t') => 1 << 40,
        _ => 1,
    };

    (value * multiplier as f64) as u64
}
