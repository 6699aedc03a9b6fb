// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Binary package records from `Packages` indices. */

use {
    crate::{
        control::Stanza,
        dependency::dependency_names,
        error::{Result, RuntimeError},
        package_version::PackageVersion,
        repository::AptSource,
    },
    std::{
        collections::{BTreeMap, BTreeSet},
        fmt::{Display, Formatter},
        sync::Arc,
    },
};

const KIND: &str = "Packages";

/// Fields whose relations must be present in a runtime for a package to work.
const DEPENDENCY_FIELDS: &[&str] = &["Pre-Depends", "Depends"];

/// A binary package as advertised by a `Packages` index.
///
/// The original stanza is retained so manifests can reproduce it verbatim.
/// Everything else downstream should use the typed accessors.
#[derive(Clone, Debug)]
pub struct BinaryPackage {
    name: String,
    architecture: String,
    version: PackageVersion,
    source: String,
    source_version: String,
    dependencies: BTreeSet<String>,
    filename: String,
    apt_source: Arc<AptSource>,
    stanza: Stanza,
}

impl BinaryPackage {
    /// Build a record from a `Packages` stanza fetched from `apt_source`.
    pub fn from_stanza(stanza: Stanza, apt_source: Arc<AptSource>) -> Result<Self> {
        let name = stanza.required_field_str(KIND, "Package")?.to_string();
        let architecture = stanza.required_field_str(KIND, "Architecture")?.to_string();
        let version_str = stanza.required_field_str(KIND, "Version")?;
        let version = PackageVersion::parse(version_str)?;
        let filename = stanza.required_field_str(KIND, "Filename")?.to_string();

        let (source, source_version) = match stanza.field_str("Source") {
            Some(value) => parse_source_field(value, version_str),
            None => (name.clone(), version_str.to_string()),
        };

        let dependencies = DEPENDENCY_FIELDS
            .iter()
            .filter_map(|field| stanza.field_str(field))
            .flat_map(dependency_names)
            .collect();

        Ok(Self {
            name,
            architecture,
            version,
            source,
            source_version,
            dependencies,
            filename,
            apt_source,
            stanza,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn architecture(&self) -> &str {
        &self.architecture
    }

    pub fn version(&self) -> &PackageVersion {
        &self.version
    }

    /// The version string exactly as it appears in the index.
    pub fn version_str(&self) -> &str {
        self.stanza.field_str("Version").unwrap_or_default()
    }

    /// Name of the source package this binary was built from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Version of the source package this binary was built from.
    pub fn source_version(&self) -> &str {
        &self.source_version
    }

    /// Flattened names from `Pre-Depends` and `Depends`.
    pub fn dependencies(&self) -> &BTreeSet<String> {
        &self.dependencies
    }

    /// Path of the `.deb` relative to the repository root.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Final path component of [Self::filename()].
    pub fn deb_basename(&self) -> &str {
        self.filename
            .rsplit_once('/')
            .map(|(_, base)| base)
            .unwrap_or(&self.filename)
    }

    pub fn apt_source(&self) -> &AptSource {
        &self.apt_source
    }

    /// The `Size` field.
    pub fn size(&self) -> Option<Result<u64>> {
        self.stanza.field_u64("Size")
    }

    /// The `Installed-Size` field as its raw string.
    pub fn installed_size(&self) -> Option<&str> {
        self.stanza.field_str("Installed-Size")
    }

    /// The `Source` field as its raw string.
    pub fn source_field(&self) -> Option<&str> {
        self.stanza.field_str("Source")
    }

    /// The `MD5sum` field.
    pub fn md5(&self) -> Option<&str> {
        self.stanza.field_str("MD5sum")
    }

    /// The `SHA256` field.
    pub fn sha256(&self) -> Option<&str> {
        self.stanza.field_str("SHA256")
    }

    /// Parse `Built-Using` into `(source, version)` pairs.
    ///
    /// Every relation must be of the form `name (= version)`.
    pub fn built_using(&self) -> Result<Vec<(String, String)>> {
        let value = match self.stanza.field_str("Built-Using") {
            Some(value) if !value.trim().is_empty() => value,
            _ => return Ok(vec![]),
        };

        value
            .split(',')
            .map(|relation| {
                let compact = relation.split_whitespace().collect::<String>();
                let malformed =
                    || RuntimeError::BuiltUsingMalformed(self.name.clone(), relation.to_string());

                let (source, version) = compact.split_once("(=").ok_or_else(malformed)?;
                let version = version.strip_suffix(')').ok_or_else(malformed)?;

                Ok((source.to_string(), version.to_string()))
            })
            .collect()
    }

    /// The original index stanza.
    pub fn stanza(&self) -> &Stanza {
        &self.stanza
    }
}

impl Display for BinaryPackage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}_{}", self.name, self.version, self.architecture)
    }
}

/// Split a `Source` field of the form `name` or `name (version)`.
fn parse_source_field(value: &str, binary_version: &str) -> (String, String) {
    match value.split_once(" (") {
        Some((name, version)) => (
            name.trim().to_string(),
            version.trim_end_matches(')').trim().to_string(),
        ),
        None => (value.trim().to_string(), binary_version.to_string()),
    }
}

/// All known binary packages for a set of architectures.
///
/// Every version of a name is retained; lookups that need a single record
/// select the maximum by Debian version ordering.
#[derive(Clone, Debug, Default)]
pub struct BinaryIndex {
    by_arch: BTreeMap<String, BTreeMap<String, Vec<BinaryPackage>>>,
}

impl BinaryIndex {
    /// Ensure an architecture is present even when no packages are added for it.
    pub fn add_architecture(&mut self, arch: &str) {
        self.by_arch.entry(arch.to_string()).or_default();
    }

    /// Record a package under the given architecture.
    ///
    /// The architecture is the index the package was listed in, which differs
    /// from the package's own field for `Architecture: all` packages.
    pub fn insert(&mut self, arch: &str, package: BinaryPackage) {
        self.by_arch
            .entry(arch.to_string())
            .or_default()
            .entry(package.name().to_string())
            .or_default()
            .push(package);
    }

    /// Architectures known to this index.
    pub fn architectures(&self) -> impl Iterator<Item = &str> {
        self.by_arch.keys().map(|k| k.as_str())
    }

    /// All versions of a package for an architecture.
    pub fn candidates(&self, arch: &str, name: &str) -> &[BinaryPackage] {
        self.by_arch
            .get(arch)
            .and_then(|packages| packages.get(name))
            .map(|v| v.as_slice())
            .unwrap_or_default()
    }

    /// The newest version of a package for an architecture.
    pub fn newest(&self, arch: &str, name: &str) -> Option<&BinaryPackage> {
        self.candidates(arch, name).iter().max_by(|a, b| a.version().cmp(b.version()))
    }

    /// Iterate over `(name, candidates)` for an architecture, sorted by name.
    pub fn iter_arch(&self, arch: &str) -> impl Iterator<Item = (&str, &[BinaryPackage])> {
        self.by_arch
            .get(arch)
            .into_iter()
            .flat_map(|packages| packages.iter().map(|(k, v)| (k.as_str(), v.as_slice())))
    }

    /// Whether the index has no packages at all.
    pub fn is_empty(&self) -> bool {
        self.by_arch.values().all(|packages| packages.is_empty())
    }
}
