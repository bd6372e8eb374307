//! Package resolution
//!
//! Pairs the installed inventory with what the enabled repositories offer.
//! Repositories are consulted in priority order and the first one to list
//! a name masks it in every later repository.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use glob::Pattern;
use tracing::debug;

use crate::database::InstalledDb;
use crate::error::{Result, TidepkgError};
use crate::package::{Package, PackagePair};
use crate::repository::Repository;

/// Which sides of a pair to look up, and how to filter the result
#[derive(Debug, Clone, Copy)]
pub struct FindOptions {
    /// Match installed packages
    pub installed: bool,
    /// Match repository packages
    pub available: bool,
    /// Keep only pairs with an upgrade
    pub only_upgrades: bool,
    /// Keep only installed packages no repository offers
    pub only_extras: bool,
}

impl Default for FindOptions {
    fn default() -> Self {
        Self {
            installed: true,
            available: true,
            only_upgrades: false,
            only_extras: false,
        }
    }
}

type FieldAccessor = fn(&Package) -> String;

fn field_name(p: &Package) -> String {
    p.name.clone()
}

fn field_version(p: &Package) -> String {
    p.version.clone()
}

fn field_arch(p: &Package) -> String {
    p.arch.clone()
}

fn field_build(p: &Package) -> String {
    p.build.clone()
}

fn field_summary(p: &Package) -> String {
    p.summary.clone()
}

fn field_description(p: &Package) -> String {
    p.description.join("\n")
}

fn field_group(p: &Package) -> String {
    p.group.clone().unwrap_or_default()
}

fn field_repo(p: &Package) -> String {
    p.repo.clone()
}

const ACCESSORS: &[(&str, FieldAccessor)] = &[
    ("name", field_name),
    ("version", field_version),
    ("arch", field_arch),
    ("build", field_build),
    ("summary", field_summary),
    ("description", field_description),
    ("group", field_group),
    ("repo", field_repo),
];

/// The package fields matched by a text search
#[derive(Clone)]
pub struct SearchFields {
    fields: Vec<(&'static str, FieldAccessor)>,
}

impl fmt::Debug for SearchFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.fields.iter().map(|(name, _)| name)).finish()
    }
}

impl SearchFields {
    /// Select fields by name; unknown names are a configuration error
    pub fn new<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        let fields = names
            .iter()
            .map(|name| {
                let name = name.as_ref();
                ACCESSORS
                    .iter()
                    .find(|(field, _)| *field == name)
                    .copied()
                    .ok_or_else(|| {
                        TidepkgError::Config(format!(
                            "unknown search field '{}' (expected one of: {})",
                            name,
                            Self::known().join(", ")
                        ))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { fields })
    }

    /// Every searchable field name
    pub fn known() -> Vec<&'static str> {
        ACCESSORS.iter().map(|(name, _)| *name).collect()
    }

    /// True if any selected field contains `query` (lowercased)
    fn matches(&self, package: &Package, query: &str) -> bool {
        self.fields
            .iter()
            .any(|(_, accessor)| accessor(package).to_lowercase().contains(query))
    }
}

impl Default for SearchFields {
    fn default() -> Self {
        Self {
            fields: vec![("name", field_name), ("summary", field_summary)],
        }
    }
}

/// Resolves names, globs and files into package pairs
pub struct Resolver<'a> {
    installed: &'a InstalledDb,
    repos: &'a [Repository],
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
}

impl<'a> Resolver<'a> {
    /// `repos` must already be in priority order
    pub fn new<S: AsRef<str>>(
        installed: &'a InstalledDb,
        repos: &'a [Repository],
        include: &[S],
        exclude: &[S],
    ) -> Result<Self> {
        Ok(Self {
            installed,
            repos,
            include: compile_all(include)?,
            exclude: compile_all(exclude)?,
        })
    }

    /// Exclude-then-include: an excluded name is still included when an
    /// include pattern also matches it
    pub fn is_included(&self, name: &str) -> bool {
        if !self.exclude.iter().any(|p| p.matches(name)) {
            return true;
        }
        self.include.iter().any(|p| p.matches(name))
    }

    /// Pair every installed and available package matching any glob
    pub fn find_package<S: AsRef<str>>(
        &self,
        globs: &[S],
        options: FindOptions,
    ) -> Result<BTreeMap<String, PackagePair>> {
        let mut found: BTreeMap<String, PackagePair> = BTreeMap::new();

        for glob in globs {
            let glob = glob.as_ref();

            if options.installed {
                let pattern = compile(glob)?;
                for package in self.installed.list_packages().filter(|p| pattern.matches(&p.name)) {
                    let mut pair = PackagePair::new(&package.name);
                    pair.installed = Some(package.clone());
                    found.insert(package.name.clone(), pair);
                }
            }

            if options.available {
                let mut masked: BTreeSet<String> = BTreeSet::new();

                for repo in self.repos {
                    for (name, found_match) in repo.find_package(glob)? {
                        if masked.contains(&name) {
                            continue;
                        }
                        masked.insert(name.clone());

                        if !self.is_included(&name) {
                            debug!("Excluded: {}", name);
                            continue;
                        }

                        if found.contains_key(&name) {
                            // Available after all, so not an extra
                            if options.only_extras {
                                found.remove(&name);
                            } else if let Some(pair) = found.get_mut(&name) {
                                pair.available = Some(found_match.package);
                                pair.source = Some(found_match.handle);
                            }
                        } else if !(options.only_extras || options.only_upgrades) {
                            let mut pair = PackagePair::new(&name);
                            pair.available = Some(found_match.package);
                            pair.source = Some(found_match.handle);
                            found.insert(name, pair);
                        }
                    }
                }
            }
        }

        if options.only_upgrades {
            found.retain(|_, pair| pair.has_upgrade());
        }

        Ok(found)
    }

    /// Every installed package with an upgrade available
    pub fn find_all_upgrades(&self) -> Result<BTreeMap<String, PackagePair>> {
        let names = escaped(self.installed.list_packages().map(|p| p.name.as_str()));
        self.find_package(
            &names,
            FindOptions {
                only_upgrades: true,
                ..FindOptions::default()
            },
        )
    }

    /// Packages with a search field containing any query (case-insensitive)
    pub fn search_package<S: AsRef<str>>(
        &self,
        queries: &[S],
        fields: &SearchFields,
        options: FindOptions,
    ) -> Result<BTreeMap<String, PackagePair>> {
        let mut names: BTreeSet<&str> = BTreeSet::new();

        for query in queries {
            let query = query.as_ref().to_lowercase();

            if options.installed {
                names.extend(
                    self.installed
                        .list_packages()
                        .filter(|p| fields.matches(p, &query))
                        .map(|p| p.name.as_str()),
                );
            }

            if options.available {
                for repo in self.repos {
                    names.extend(
                        repo.packages()
                            .values()
                            .filter(|p| fields.matches(p, &query))
                            .map(|p| p.name.as_str()),
                    );
                }
            }
        }

        if names.is_empty() {
            return Ok(BTreeMap::new());
        }
        self.find_package(&escaped(names.into_iter()), options)
    }

    /// Packages owning a file matching `query`.
    ///
    /// A query not starting with `/` or `*` matches anywhere in the path.
    pub fn search_file(&self, query: &str, options: FindOptions) -> Result<BTreeMap<String, PackagePair>> {
        if query.is_empty() {
            return Ok(BTreeMap::new());
        }

        let query = if query.starts_with('/') || query.starts_with('*') {
            query.to_string()
        } else {
            format!("*{}", query)
        };
        let pattern = compile(&query)?;

        let mut names: BTreeSet<String> = BTreeSet::new();
        if options.installed {
            for (path, owners) in self.installed.owners() {
                if pattern.matches(path) {
                    names.extend(owners.iter().cloned());
                }
            }
        }
        if options.available {
            for repo in self.repos {
                names.extend(repo.find_file(&query)?);
            }
        }

        if names.is_empty() {
            return Ok(BTreeMap::new());
        }
        self.find_package(&escaped(names.iter().map(String::as_str)), options)
    }
}

fn compile(pattern: &str) -> Result<Pattern> {
    Pattern::new(pattern).map_err(|e| TidepkgError::Parse(format!("invalid pattern '{}': {}", pattern, e)))
}

fn compile_all<S: AsRef<str>>(patterns: &[S]) -> Result<Vec<Pattern>> {
    patterns.iter().map(|p| compile(p.as_ref())).collect()
}

/// Exact names as globs
fn escaped<'n>(names: impl Iterator<Item = &'n str>) -> Vec<String> {
    names.map(Pattern::escape).collect()
}
