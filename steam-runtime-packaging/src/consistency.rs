// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Manually curated package lists and their drift from metapackage expansion.

A package list has one line per source package: the source name followed by
the names of its binary packages, separated by whitespace. Lines starting
with `#` are comments and lines with fewer than two words are ignored.

```text
# source   binaries...
libfoo     libfoo2 libfoo-dev
zlib       zlib1g
```
*/

use {
    crate::{error::Result, expansion::ExpansionResult, policy::PackagePolicy},
    log::{info, warn},
    std::{
        collections::BTreeSet,
        fmt::{Display, Formatter},
        path::Path,
    },
};

/// Source and binary package names from one or more package lists.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PackageList {
    pub sources: BTreeSet<String>,
    pub binaries: BTreeSet<String>,
}

impl PackageList {
    /// Parse the content of a package list.
    pub fn parse(s: &str) -> Self {
        let mut res = Self::default();
        res.add_lines(s);
        res
    }

    fn add_lines(&mut self, s: &str) {
        for line in s.lines().filter(|line| !line.starts_with('#')) {
            let mut words = line.split_whitespace();

            if let (Some(source), Some(first)) = (words.next(), words.next()) {
                self.sources.insert(source.to_string());
                self.binaries.insert(first.to_string());
                self.binaries.extend(words.map(|w| w.to_string()));
            }
        }
    }

    /// Parse and union several package list files.
    pub fn from_paths<P: AsRef<Path>>(paths: impl IntoIterator<Item = P>) -> Result<Self> {
        let mut res = Self::default();

        for path in paths {
            res.add_lines(&std::fs::read_to_string(path.as_ref())?);
        }

        Ok(res)
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty() && self.binaries.is_empty()
    }
}

#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum Severity {
    Info,
    Warning,
}

/// What a [Finding] is about.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum FindingKind {
    /// A binary package is selected by expansion but not listed.
    ExpansionOnly { arch: String, package: String },
    /// A listed binary package is not reachable from the metapackages.
    ListOnly { arch: String, package: String },
    /// A source package is implied by expansion but not listed.
    SourceExpansionOnly(String),
    /// A listed source package is not implied by expansion.
    SourceListOnly(String),
}

/// A single difference between expansion and the package list.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub struct Finding {
    pub severity: Severity,
    pub kind: FindingKind,
}

impl Display for Finding {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            FindingKind::ExpansionOnly { arch, package } => write!(
                f,
                "Installing {}:{} only because of metapackage expansion",
                package, arch
            ),
            FindingKind::ListOnly { arch, package } => write!(
                f,
                "{}:{} is listed in package list but not reachable from metapackages",
                package, arch
            ),
            FindingKind::SourceExpansionOnly(source) => write!(
                f,
                "Source package {} is implied by metapackage expansion but not listed",
                source
            ),
            FindingKind::SourceListOnly(source) => write!(
                f,
                "Source package {} is listed but not implied by metapackage expansion",
                source
            ),
        }
    }
}

/// All differences found by [check_consistency()].
#[derive(Clone, Debug, Default)]
pub struct ConsistencyReport {
    pub findings: Vec<Finding>,
}

impl ConsistencyReport {
    pub fn warnings(&self) -> impl Iterator<Item = &Finding> {
        self.findings
            .iter()
            .filter(|f| f.severity == Severity::Warning)
    }

    /// Emit every finding to the log at its severity.
    pub fn log(&self) {
        for finding in &self.findings {
            match finding.severity {
                Severity::Info => info!("{}", finding),
                Severity::Warning => warn!("{}", finding),
            }
        }
    }
}

/// Compare metapackage expansion against a manually maintained package list.
///
/// Binary packages that only expansion selects are warnings unless policy
/// ignores them or they are seeds. Everything else is informational.
pub fn check_consistency(
    expansion: &ExpansionResult,
    list: &PackageList,
    seeds: &[String],
    policy: &PackagePolicy,
) -> ConsistencyReport {
    let mut findings = vec![];

    for (arch, selected) in &expansion.binaries {
        for package in selected.difference(&list.binaries) {
            let severity = if policy.is_ignored(package) || seeds.contains(package) {
                Severity::Info
            } else {
                Severity::Warning
            };

            findings.push(Finding {
                severity,
                kind: FindingKind::ExpansionOnly {
                    arch: arch.clone(),
                    package: package.clone(),
                },
            });
        }

        for package in list.binaries.difference(selected) {
            findings.push(Finding {
                severity: Severity::Info,
                kind: FindingKind::ListOnly {
                    arch: arch.clone(),
                    package: package.clone(),
                },
            });
        }
    }

    for source in expansion.sources.difference(&list.sources) {
        findings.push(Finding {
            severity: Severity::Info,
            kind: FindingKind::SourceExpansionOnly(source.clone()),
        });
    }

    for source in list.sources.difference(&expansion.sources) {
        findings.push(Finding {
            severity: Severity::Info,
            kind: FindingKind::SourceListOnly(source.clone()),
        });
    }

    ConsistencyReport { findings }
}

#[cfg(test)]
mod tests {
    use {super::*, indoc::indoc};

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parse_list() {
        let list = PackageList::parse(indoc! {"
            # Source binaries...
            libfoo libfoo2 libfoo-dev
            zlib\tzlib1g

            lonely
            #commented libnope
        "});

        assert_eq!(list.sources, set(&["libfoo", "zlib"]));
        assert_eq!(list.binaries, set(&["libfoo-dev", "libfoo2", "zlib1g"]));
    }

    #[test]
    fn union_of_files() -> Result<()> {
        let td = tempfile::tempdir()?;
        let a = td.path().join("a.txt");
        let b = td.path().join("b.txt");
        std::fs::write(&a, "libfoo libfoo2\n")?;
        std::fs::write(&b, "libfoo libfoo-dev\nzlib zlib1g\n")?;

        let list = PackageList::from_paths([&a, &b])?;
        assert_eq!(list.sources, set(&["libfoo", "zlib"]));
        assert_eq!(list.binaries, set(&["libfoo-dev", "libfoo2", "zlib1g"]));

        assert!(PackageList::from_paths([td.path().join("missing.txt")]).is_err());

        Ok(())
    }

    #[test]
    fn findings() {
        let mut expansion = ExpansionResult::default();
        expansion.binaries.insert(
            "amd64".to_string(),
            set(&["libfoo2", "libsurprise1", "multiarch-support", "steamrt-libs"]),
        );
        expansion.sources = set(&["libfoo", "steamrt"]);

        let list = PackageList::parse("libfoo libfoo2\nzlib zlib1g\n");

        let policy = PackagePolicy {
            ignore_transitive_dependencies: set(&["multiarch-support"]),
            ..Default::default()
        };

        let report = check_consistency(&expansion, &list, &["steamrt-libs".to_string()], &policy);

        assert_eq!(
            report.warnings().map(|f| f.kind.clone()).collect::<Vec<_>>(),
            vec![FindingKind::ExpansionOnly {
                arch: "amd64".to_string(),
                package: "libsurprise1".to_string()
            }]
        );

        let infos = report
            .findings
            .iter()
            .filter(|f| f.severity == Severity::Info)
            .map(|f| f.to_string())
            .collect::<Vec<_>>();
        assert_eq!(
            infos,
            vec![
                "Installing multiarch-support:amd64 only because of metapackage expansion",
                "Installing steamrt-libs:amd64 only because of metapackage expansion",
                "zlib1g:amd64 is listed in package list but not reachable from metapackages",
                "Source package steamrt is implied by metapackage expansion but not listed",
                "Source package zlib is listed but not implied by metapackage expansion",
            ]
        );
    }
}
