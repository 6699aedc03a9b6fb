// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Package selection policy.

Three curated name sets steer metapackage expansion:

`ignore_metapackage_dependencies`
   Dependencies of a metapackage that are not installed: packages provided
   by the host system, virtual packages and known experiments.

`accept_transitive_dependencies`
   Packages that no metapackage lists directly but which are legitimately
   required through other packages, such as compiler runtime base packages.

`ignore_transitive_dependencies`
   Dependencies that may go unsatisfied in the runtime because they are only
   needed by packaging machinery or are assumed to come from the host.

These lists need maintenance as the package set evolves. A YAML document
with the same keys can replace the embedded defaults.
*/

use {
    crate::error::Result,
    serde::{Deserialize, Serialize},
    std::{collections::BTreeSet, path::Path},
};

const DEFAULT_POLICY_YAML: &str = include_str!("default-policy.yaml");

/// The package name sets consulted during metapackage expansion.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PackagePolicy {
    pub ignore_metapackage_dependencies: BTreeSet<String>,
    pub accept_transitive_dependencies: BTreeSet<String>,
    pub ignore_transitive_dependencies: BTreeSet<String>,
}

impl PackagePolicy {
    /// The policy shipped with this crate.
    pub fn embedded() -> Result<Self> {
        Self::from_yaml_str(DEFAULT_POLICY_YAML)
    }

    /// Parse a policy from a YAML document. Absent keys are empty sets.
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(s)?)
    }

    /// Parse a policy from a YAML file.
    pub fn from_yaml_path(path: impl AsRef<Path>) -> Result<Self> {
        let f = std::fs::File::open(path.as_ref())?;

        Ok(serde_yaml::from_reader(f)?)
    }

    pub fn is_ignored_metapackage_dependency(&self, name: &str) -> bool {
        self.ignore_metapackage_dependencies.contains(name)
    }

    pub fn is_accepted_transitive_dependency(&self, name: &str) -> bool {
        self.accept_transitive_dependencies.contains(name)
    }

    pub fn is_ignored_transitive_dependency(&self, name: &str) -> bool {
        self.ignore_transitive_dependencies.contains(name)
    }

    /// Whether a name is in either ignore set.
    pub fn is_ignored(&self, name: &str) -> bool {
        self.is_ignored_metapackage_dependency(name) || self.is_ignored_transitive_dependency(name)
    }
}

#[cfg(test)]
mod tests {
    use {super::*, indoc::indoc};

    #[test]
    fn embedded_policy_parses() -> Result<()> {
        let policy = PackagePolicy::embedded()?;

        assert!(policy.is_ignored_metapackage_dependency("libgl1-mesa-glx"));
        assert!(policy.is_accepted_transitive_dependency("gcc-4.6-base"));
        assert!(policy.is_ignored_transitive_dependency("multiarch-support"));
        assert!(!policy.is_ignored("libfoo2"));

        Ok(())
    }

    #[test]
    fn partial_document() -> Result<()> {
        let policy = PackagePolicy::from_yaml_str(indoc! {"
            ignore_metapackage_dependencies:
              - libc6
        "})?;

        assert!(policy.is_ignored("libc6"));
        assert!(policy.accept_transitive_dependencies.is_empty());
        assert!(policy.ignore_transitive_dependencies.is_empty());

        Ok(())
    }

    #[test]
    fn unknown_key_rejected() {
        assert!(PackagePolicy::from_yaml_str("ignore_everything: [libc6]\n").is_err());
    }

    #[test]
    fn from_file() -> Result<()> {
        let td = tempfile::tempdir()?;
        let path = td.path().join("policy.yaml");
        std::fs::write(&path, "accept_transitive_dependencies: [libgcc1]\n")?;

        let policy = PackagePolicy::from_yaml_path(&path)?;
        assert!(policy.is_accepted_transitive_dependency("libgcc1"));
        assert!(!policy.is_ignored("libgcc1"));

        Ok(())
    }
}
