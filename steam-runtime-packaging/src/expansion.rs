// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Metapackage dependency expansion.

A runtime's contents are declared by *metapackages*: packages with no files
whose dependencies list what the runtime should contain. Expansion turns a
set of seed metapackages into the set of binary packages to install for each
architecture, in three passes over a working set:

1. **Seed expansion.** Each seed and its direct dependencies join the working
   set, except dependencies in `ignore_metapackage_dependencies`.
2. **Transitive acceptance.** Dependencies of working set members that are in
   `accept_transitive_dependencies` join the working set.
3. **Transitive verification.** Every dependency of every working set member
   must be in the working set or in one of the ignore sets. Development
   packages (`-dev`, `-dbg`, `-multidev`) are exempt.

Lookups always use the newest available version of a name. Problems are
collected rather than raised so a single run reports all of them; the caller
decides whether they are fatal via [ExpansionResult::check()].
*/

use {
    crate::{
        binary_package::BinaryIndex,
        error::{Result, RuntimeError},
        policy::PackagePolicy,
    },
    log::{debug, error, warn},
    std::{
        collections::{BTreeMap, BTreeSet},
        fmt::{Display, Formatter},
    },
};

/// Name suffixes of packages only needed for development.
const DEVELOPMENT_SUFFIXES: &[&str] = &["-dev", "-dbg", "-multidev"];

/// Whether a package name denotes a development or debug package.
pub fn is_development_package(name: &str) -> bool {
    DEVELOPMENT_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

/// A problem found while expanding metapackages.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum ExpansionError {
    /// A seed metapackage is not in the index.
    MissingMetapackage { arch: String, metapackage: String },

    /// A dependency is neither part of the runtime nor covered by policy.
    UnresolvedDependency {
        arch: String,
        package: String,
        dependency: String,
    },
}

impl Display for ExpansionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingMetapackage { arch, metapackage } => {
                write!(f, "metapackage {} not found for {}", metapackage, arch)
            }
            Self::UnresolvedDependency {
                arch,
                package,
                dependency,
            } => write!(
                f,
                "{}:{} depends on {} which is not in the runtime",
                package, arch, dependency
            ),
        }
    }
}

/// Outcome of metapackage expansion.
#[derive(Clone, Debug, Default)]
pub struct ExpansionResult {
    /// Source packages of everything selected, across architectures.
    pub sources: BTreeSet<String>,

    /// Binary package names selected per architecture.
    pub binaries: BTreeMap<String, BTreeSet<String>>,

    /// Problems, in the order found.
    pub errors: Vec<ExpansionError>,
}

impl ExpansionResult {
    /// Whether expansion found no problems.
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }

    /// Binary package names selected for an architecture.
    pub fn binaries_for(&self, arch: &str) -> impl Iterator<Item = &str> {
        self.binaries
            .get(arch)
            .into_iter()
            .flat_map(|names| names.iter().map(|s| s.as_str()))
    }

    /// Report problems and decide whether they are fatal.
    ///
    /// Every problem is logged. In strict mode an incomplete expansion is an
    /// error, otherwise problems are only warnings.
    pub fn check(&self, strict: bool) -> Result<()> {
        if self.is_complete() {
            return Ok(());
        }

        for e in &self.errors {
            if strict {
                error!("{}", e);
            } else {
                warn!("{}", e);
            }
        }

        if strict {
            Err(RuntimeError::IncompleteExpansion(self.errors.len()))
        } else {
            Ok(())
        }
    }
}

/// Expands seed metapackages against a [BinaryIndex] under a [PackagePolicy].
pub struct MetapackageExpander<'a> {
    index: &'a BinaryIndex,
    policy: &'a PackagePolicy,
}

impl<'a> MetapackageExpander<'a> {
    pub fn new(index: &'a BinaryIndex, policy: &'a PackagePolicy) -> Self {
        Self { index, policy }
    }

    /// Expand the seeds for every architecture in the index.
    pub fn expand(&self, seeds: &[String]) -> ExpansionResult {
        let mut result = ExpansionResult::default();

        for arch in self.index.architectures() {
            let mut working = BTreeSet::new();

            self.expand_seeds(arch, seeds, &mut working, &mut result);
            self.accept_transitive(arch, &mut working);
            self.verify_transitive(arch, &working, &mut result);

            result.binaries.insert(arch.to_string(), working);
        }

        result
    }

    fn expand_seeds(
        &self,
        arch: &str,
        seeds: &[String],
        working: &mut BTreeSet<String>,
        result: &mut ExpansionResult,
    ) {
        for seed in seeds {
            let package = match self.index.newest(arch, seed) {
                Some(package) => package,
                None => {
                    result.errors.push(ExpansionError::MissingMetapackage {
                        arch: arch.to_string(),
                        metapackage: seed.clone(),
                    });
                    continue;
                }
            };

            result.sources.insert(package.source().to_string());
            working.insert(seed.clone());

            for dep in package.dependencies() {
                if self.policy.is_ignored_metapackage_dependency(dep) {
                    debug!("{}: ignoring {} dependency {}", arch, seed, dep);
                } else {
                    working.insert(dep.clone());
                }
            }
        }
    }

    fn accept_transitive(&self, arch: &str, working: &mut BTreeSet<String>) {
        let snapshot = working.iter().cloned().collect::<Vec<_>>();

        for name in snapshot {
            if let Some(package) = self.index.newest(arch, &name) {
                for dep in package.dependencies() {
                    if self.policy.is_accepted_transitive_dependency(dep) && working.insert(dep.clone())
                    {
                        debug!("{}: accepting {} as dependency of {}", arch, dep, name);
                    }
                }
            }
        }
    }

    fn verify_transitive(&self, arch: &str, working: &BTreeSet<String>, result: &mut ExpansionResult) {
        for name in working {
            let package = match self.index.newest(arch, name) {
                Some(package) => package,
                None => {
                    debug!("{}: {} is not in the index", arch, name);
                    continue;
                }
            };

            result.sources.insert(package.source().to_string());

            if is_development_package(name) {
                continue;
            }

            for dep in package.dependencies() {
                if !working.contains(dep) && !self.policy.is_ignored(dep) {
                    result.errors.push(ExpansionError::UnresolvedDependency {
                        arch: arch.to_string(),
                        package: name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }
    }
}
