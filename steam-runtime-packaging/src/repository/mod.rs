// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! APT repository access.

An [AptSource] is one line of a `sources.list`: a kind (`deb` or `deb-src`),
a repository URL, a suite and a list of components. Index files live at
well-known paths beneath the URL:

* `dists/SUITE/Release`
* `dists/SUITE/COMPONENT/binary-ARCH/Packages.gz`
* `dists/SUITE/COMPONENT/debug/binary-ARCH/Packages.gz` (detached debug symbols)
* `dists/SUITE/COMPONENT/source/Sources.gz`

A *flat* repository (suite ending in `/`, no components) instead keeps
`Release`, `Packages.gz` and `Sources.gz` directly under `URL/SUITE`.

[RepositorySet] binds every configured source to a [DataResolver] and turns
their indices into a [BinaryIndex] and a list of [SourcePackage].
*/

use {
    crate::{
        binary_package::{BinaryIndex, BinaryPackage},
        control::{Stanza, StanzaAsyncReader},
        error::{Result, RuntimeError},
        io::DataResolver,
        source_package::SourcePackage,
    },
    chrono::{DateTime, Utc},
    log::{debug, info, warn},
    serde::Serialize,
    std::{
        collections::BTreeMap,
        fmt::{Display, Formatter},
        path::Path,
        sync::Arc,
    },
    url::Url,
};

pub mod filesystem;
#[cfg(feature = "http")]
pub mod http;
pub mod release;

use {filesystem::FilesystemRepositoryReader, release::ReleaseFile};

/// Whether a source provides binary or source packages.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum AptSourceKind {
    /// `deb`
    Binary,
    /// `deb-src`
    Source,
}

impl AptSourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Binary => "deb",
            Self::Source => "deb-src",
        }
    }
}

impl Display for AptSourceKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single APT source, as found on a `sources.list` line.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct AptSource {
    kind: AptSourceKind,
    url: String,
    suite: String,
    components: Vec<String>,
    trusted: bool,
}

impl AptSource {
    pub fn new(
        kind: AptSourceKind,
        url: impl ToString,
        suite: impl ToString,
        components: Vec<String>,
        trusted: bool,
    ) -> Self {
        Self {
            kind,
            url: url.to_string(),
            suite: suite.to_string(),
            components,
            trusted,
        }
    }

    /// Parse a line of the form `KIND [trusted=yes] URL SUITE COMPONENT...`.
    ///
    /// `KIND` is `deb`, `deb-src` or `both`. The latter produces a binary and a
    /// source entry for the same repository.
    pub fn parse_line(line: &str) -> Result<Vec<Self>> {
        let invalid = |reason| RuntimeError::AptSourceInvalid(line.to_string(), reason);

        let mut tokens = line.split_whitespace().collect::<Vec<_>>();

        if tokens.len() < 4 {
            return Err(invalid(
                "must be in the form 'deb URL SUITE COMPONENT [COMPONENT...]'",
            ));
        }

        let kinds = match tokens[0] {
            "deb" => vec![AptSourceKind::Binary],
            "deb-src" => vec![AptSourceKind::Source],
            "both" => vec![AptSourceKind::Binary, AptSourceKind::Source],
            _ => return Err(invalid("must start with 'deb', 'deb-src' or 'both'")),
        };

        let trusted = if tokens[1] == "[trusted=yes]" {
            tokens.remove(1);
            true
        } else if tokens[1].starts_with('[') {
            return Err(invalid("[opt=value] syntax is only supported for [trusted=yes]"));
        } else {
            false
        };

        if tokens.len() < 3 {
            return Err(invalid("URL and suite are required"));
        }

        let components = tokens[3..].iter().map(|s| s.to_string()).collect::<Vec<_>>();

        Ok(kinds
            .into_iter()
            .map(|kind| Self::new(kind, tokens[1], tokens[2], components.clone(), trusted))
            .collect())
    }

    pub fn kind(&self) -> AptSourceKind {
        self.kind
    }

    /// Repository base URL, as written in the source line.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Full location of a path under the repository URL.
    pub fn location(&self, path: &str) -> String {
        format!("{}/{}", self.url.trim_end_matches('/'), path)
    }

    pub fn suite(&self) -> &str {
        &self.suite
    }

    pub fn components(&self) -> &[String] {
        &self.components
    }

    pub fn trusted(&self) -> bool {
        self.trusted
    }

    /// Whether indices live directly under the suite directory.
    pub fn is_flat(&self) -> bool {
        self.suite.ends_with('/') || self.components.is_empty()
    }

    /// Directory containing `Release`, relative to the URL, with a trailing slash
    /// unless empty.
    fn distribution_dir(&self) -> String {
        if self.is_flat() {
            match self.suite.trim_matches('/') {
                "" | "." => "".to_string(),
                suite => format!("{}/", suite),
            }
        } else {
            format!("dists/{}/", self.suite)
        }
    }

    /// Path of the `Release` file relative to the URL.
    pub fn release_path(&self) -> String {
        format!("{}Release", self.distribution_dir())
    }

    /// Paths of the `Packages.gz` indices for an architecture.
    ///
    /// Empty for `deb-src` sources. Flat repositories carry no detached debug
    /// symbol indices.
    pub fn packages_paths(&self, arch: &str, dbgsym: bool) -> Vec<String> {
        if self.kind != AptSourceKind::Binary {
            return vec![];
        }

        if self.is_flat() {
            return if dbgsym {
                vec![]
            } else {
                vec![format!("{}Packages.gz", self.distribution_dir())]
            };
        }

        let debug = if dbgsym { "debug/" } else { "" };

        self.components
            .iter()
            .map(|component| {
                format!(
                    "{}{}/{}binary-{}/Packages.gz",
                    self.distribution_dir(),
                    component,
                    debug,
                    arch
                )
            })
            .collect()
    }

    /// Paths of the `Sources.gz` indices. Empty for `deb` sources.
    pub fn sources_paths(&self) -> Vec<String> {
        if self.kind != AptSourceKind::Source {
            return vec![];
        }

        if self.is_flat() {
            return vec![format!("{}Sources.gz", self.distribution_dir())];
        }

        self.components
            .iter()
            .map(|component| format!("{}{}/source/Sources.gz", self.distribution_dir(), component))
            .collect()
    }
}

impl Display for AptSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind)?;
        if self.trusted {
            f.write_str(" [trusted=yes]")?;
        }
        write!(f, " {} {}", self.url, self.suite)?;
        for component in &self.components {
            write!(f, " {}", component)?;
        }

        Ok(())
    }
}

#[cfg(feature = "http")]
fn http_resolver(url: Url) -> Result<Box<dyn DataResolver>> {
    Ok(Box::new(http::HttpRepositoryClient::new(url)?))
}

#[cfg(not(feature = "http"))]
fn http_resolver(url: Url) -> Result<Box<dyn DataResolver>> {
    Err(RuntimeError::RepositoryUnsupportedUrl(url.to_string()))
}

/// Obtain a [DataResolver] for a repository URL.
///
/// `http://` and `https://` URLs are fetched over the network. `file://` URLs
/// and anything that does not parse as a URL are treated as local directories.
pub fn resolver_for_url(url: &str) -> Result<Box<dyn DataResolver>> {
    match Url::parse(url) {
        Ok(parsed) => match parsed.scheme() {
            "http" | "https" => http_resolver(parsed),
            "file" => Ok(Box::new(FilesystemRepositoryReader::from_url(&parsed)?)),
            _ => Err(RuntimeError::RepositoryUnsupportedUrl(url.to_string())),
        },
        Err(_) => Ok(Box::new(FilesystemRepositoryReader::new(url))),
    }
}

/// A set of [AptSource], each bound to a [DataResolver].
pub struct RepositorySet {
    sources: Vec<Arc<AptSource>>,
    resolvers: BTreeMap<String, Box<dyn DataResolver>>,
}

impl RepositorySet {
    /// Construct an instance, resolving a transport for every distinct URL.
    pub fn new(sources: impl IntoIterator<Item = AptSource>) -> Result<Self> {
        let sources = sources.into_iter().map(Arc::new).collect::<Vec<_>>();

        let mut resolvers = BTreeMap::new();
        for source in &sources {
            if !resolvers.contains_key(source.url()) {
                resolvers.insert(source.url().to_string(), resolver_for_url(source.url())?);
            }
        }

        Ok(Self { sources, resolvers })
    }

    fn resolver(&self, source: &AptSource) -> Result<&dyn DataResolver> {
        self.resolvers
            .get(source.url())
            .map(|r| r.as_ref())
            .ok_or_else(|| RuntimeError::RepositoryUnsupportedUrl(source.url().to_string()))
    }

    async fn fetch_stanzas(&self, source: &AptSource, path: &str) -> Result<Vec<Stanza>> {
        let reader = self.resolver(source)?.get_path_decoded(path).await?;

        StanzaAsyncReader::new(reader).read_all().await
    }

    /// Fetch and parse the `Release` file of a source.
    pub async fn fetch_release(&self, source: &AptSource) -> Result<ReleaseFile> {
        let path = source.release_path();
        info!("Downloading {}", source.location(&path));

        let stanza = self
            .fetch_stanzas(source, &path)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                RuntimeError::StanzaParse(format!("{} is empty", source.location(&path)))
            })?;

        Ok(ReleaseFile::from_stanza(stanza))
    }

    /// The `Date` of every source's `Release` file, in configuration order.
    pub async fn fetch_release_timestamps(&self) -> Result<Vec<(Arc<AptSource>, DateTime<Utc>)>> {
        let mut res = vec![];

        for source in &self.sources {
            let release = self.fetch_release(source).await?;
            let date = release.date().ok_or_else(|| {
                RuntimeError::ReleaseMissingDate(source.location(&source.release_path()))
            })??;
            debug!("{} is as of {}", source, date);

            res.push((source.clone(), date));
        }

        Ok(res)
    }

    /// Fetch the binary package indices for the given architectures.
    ///
    /// With `dbgsym`, the detached debug symbol indices are fetched instead. A
    /// missing ordinary index is an error; a missing debug symbol index is
    /// logged and skipped.
    pub async fn fetch_binary_index(
        &self,
        architectures: &[String],
        dbgsym: bool,
    ) -> Result<BinaryIndex> {
        let description = if dbgsym { "debug symbols" } else { "binaries" };
        let mut index = BinaryIndex::default();

        for arch in architectures {
            index.add_architecture(arch);

            for source in &self.sources {
                for path in source.packages_paths(arch, dbgsym) {
                    info!("Downloading {} {} from {}", arch, description, source.location(&path));

                    let stanzas = match self.fetch_stanzas(source, &path).await {
                        Ok(stanzas) => stanzas,
                        Err(e) if dbgsym => {
                            warn!("unable to fetch {}: {}", source.location(&path), e);
                            continue;
                        }
                        Err(e) => return Err(e),
                    };

                    for stanza in stanzas {
                        index.insert(arch, BinaryPackage::from_stanza(stanza, source.clone())?);
                    }
                }
            }
        }

        Ok(index)
    }

    /// Fetch every source package advertised by the `deb-src` sources.
    ///
    /// Duplicates across sources are all retained.
    pub async fn fetch_source_packages(&self) -> Result<Vec<SourcePackage>> {
        let mut res = vec![];

        for source in &self.sources {
            for path in source.sources_paths() {
                info!("Downloading sources from {}", source.location(&path));

                for stanza in self.fetch_stanzas(source, &path).await? {
                    res.push(SourcePackage::from_stanza(stanza, source.clone())?);
                }
            }
        }

        Ok(res)
    }

    /// Download a path relative to a source's URL unless `dest` already has content.
    ///
    /// Returns whether anything was fetched.
    pub async fn download(&self, source: &AptSource, path: &str, dest: &Path) -> Result<bool> {
        self.resolver(source)?.download_to_path(path, dest).await
    }
}
