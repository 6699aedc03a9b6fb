// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Downloading and unpacking packages into a runtime tree.

Downloads go to a cache directory that survives between runs. A cached file
that is non-empty is trusted and not fetched again; strict mode additionally
verifies its content against the index.

Each installed `.deb` leaves two files in `ARCH/installed/`: the output of
`dpkg-deb -c` named after the package file, and a `md5sum` style checksum
line in the same name with `.md5` appended.
*/

use {
    crate::{
        binary_package::{BinaryIndex, BinaryPackage},
        consistency::PackageList,
        error::{Result, RuntimeError},
        expansion::{is_development_package, ExpansionResult},
        io::{check_path_traversal, md5_file_hex, ContentDigest},
        manifest::Manifest,
        repository::RepositorySet,
        source_package::SourcePackage,
        tools::{dpkg_deb_contents, dpkg_deb_extract},
    },
    log::{debug, error, info, warn},
    std::{
        collections::{BTreeMap, BTreeSet},
        path::{Path, PathBuf},
    },
};

const DBGSYM_SUFFIX: &str = "-dbgsym";

/// Compute the binary packages to install for each architecture.
///
/// This is the union of metapackage expansion and the package list. Unless
/// building a debug runtime, development packages are dropped.
pub fn install_set(
    expansion: &ExpansionResult,
    list: &PackageList,
    architectures: &[String],
    debug: bool,
) -> BTreeMap<String, BTreeSet<String>> {
    architectures
        .iter()
        .map(|arch| {
            let names = expansion
                .binaries_for(arch)
                .chain(list.binaries.iter().map(|s| s.as_str()))
                .filter(|name| debug || !is_development_package(name))
                .map(|name| name.to_string())
                .collect();

            (arch.clone(), names)
        })
        .collect()
}

/// Source packages to include: those implied by expansion plus the listed ones.
pub fn wanted_sources(expansion: &ExpansionResult, list: &PackageList) -> BTreeSet<String> {
    expansion.sources.union(&list.sources).cloned().collect()
}

/// Copy a file by hard linking it, falling back to copying.
pub fn hard_link_or_copy(src: &Path, dest: &Path) -> Result<()> {
    if std::fs::symlink_metadata(dest).is_ok() {
        std::fs::remove_file(dest)?;
    }

    if std::fs::hard_link(src, dest).is_err() {
        std::fs::copy(src, dest)?;
    }

    Ok(())
}

/// Record the listing and checksum of a `.deb` and unpack it into `dest_dir`.
pub fn install_deb(deb: &Path, dest_dir: &Path) -> Result<()> {
    let basename = deb
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .ok_or_else(|| RuntimeError::Other(format!("{} has no file name", deb.display())))?;
    let stem = basename.strip_suffix(".deb").unwrap_or(&basename);
    check_path_traversal(stem)?;

    let installed_dir = dest_dir.join("installed");
    std::fs::create_dir_all(&installed_dir)?;

    std::fs::write(installed_dir.join(stem), dpkg_deb_contents(deb)?)?;
    std::fs::write(
        installed_dir.join(format!("{}.md5", stem)),
        format!("{}  {}\n", md5_file_hex(deb)?, basename),
    )?;

    dpkg_deb_extract(deb, dest_dir)
}

/// Whether a downloaded package matches the digest its index advertises.
///
/// SHA-256 is preferred. Packages without digests are accepted.
fn verify_package(package: &BinaryPackage, path: &Path) -> Result<bool> {
    let expected = if let Some(sha256) = package.sha256() {
        ContentDigest::sha256_hex(sha256)?
    } else if let Some(md5) = package.md5() {
        ContentDigest::md5_hex(md5)?
    } else {
        return Ok(true);
    };

    expected.matches_file(path)
}

/// Installs packages from a [RepositorySet] into a runtime tree.
pub struct Installer<'a> {
    repositories: &'a RepositorySet,
    cache_dir: PathBuf,
    output_dir: PathBuf,
    strict: bool,
    debug: bool,
}

impl<'a> Installer<'a> {
    /// Construct an instance.
    ///
    /// `debug` selects the cache directory for debug runtime packages, which
    /// come from a different component than release ones.
    pub fn new(
        repositories: &'a RepositorySet,
        cache_dir: impl AsRef<Path>,
        output_dir: impl AsRef<Path>,
        strict: bool,
        debug: bool,
    ) -> Self {
        Self {
            repositories,
            cache_dir: cache_dir.as_ref().to_path_buf(),
            output_dir: output_dir.as_ref().to_path_buf(),
            strict,
            debug,
        }
    }

    /// Download a package into a cache directory.
    ///
    /// Returns the local path and whether anything was fetched.
    async fn fetch_package(&self, package: &BinaryPackage, cache_dir: &Path) -> Result<(PathBuf, bool)> {
        check_path_traversal(package.filename())?;
        let dest = cache_dir.join(package.deb_basename());

        let fetched = self
            .repositories
            .download(package.apt_source(), package.filename(), &dest)
            .await?;
        if !fetched {
            debug!("Skipping download of existing deb: {}", dest.display());
        }

        Ok((dest, fetched))
    }

    /// Download and unpack the newest version of each wanted package.
    ///
    /// Installed packages are recorded in `manifest`. Names missing from the
    /// index are logged; in strict mode they are an error once every
    /// architecture has been processed.
    pub async fn install_binaries(
        &self,
        index: &BinaryIndex,
        wanted: &BTreeMap<String, BTreeSet<String>>,
        manifest: &mut Manifest,
    ) -> Result<()> {
        let mut skipped = 0;
        let mut missing = vec![];
        let mut mismatched = vec![];

        for (arch, names) in wanted {
            let cache_dir = self
                .cache_dir
                .join(if self.debug { "debug" } else { "binary" })
                .join(arch);
            std::fs::create_dir_all(&cache_dir)?;

            for name in names {
                let package = match index.newest(arch, name) {
                    Some(package) => package,
                    None => {
                        error!("Package {} not found in Packages files for {}", name, arch);
                        missing.push(format!("{}:{}", name, arch));
                        continue;
                    }
                };

                debug!("Installing {} for {}", package, arch);
                let (deb, fetched) = self.fetch_package(package, &cache_dir).await?;
                if !fetched {
                    skipped += 1;
                }

                if self.strict && !verify_package(package, &deb)? {
                    error!("{} has unexpected content", deb.display());
                    mismatched.push(deb.display().to_string());
                    continue;
                }

                install_deb(&deb, &self.output_dir.join(arch))?;
                manifest.insert(arch, package.clone());
            }
        }

        if skipped > 0 {
            info!(
                "Skipped downloading {} file(s) that were already present.",
                skipped
            );
        }

        if !mismatched.is_empty() {
            return Err(RuntimeError::DigestMismatch(mismatched));
        }

        if self.strict && !missing.is_empty() {
            return Err(RuntimeError::MissingPackages(missing));
        }

        Ok(())
    }

    /// Install detached debug symbols for every installed package that has them.
    ///
    /// A `NAME-dbgsym` package is only installed for an architecture where
    /// `NAME` is installed, and only at exactly the same version.
    pub async fn install_symbols(&self, dbgsym_index: &BinaryIndex, manifest: &mut Manifest) -> Result<()> {
        let mut skipped = 0;

        for arch in dbgsym_index.architectures() {
            let cache_dir = self.cache_dir.join("symbols").join(arch);
            std::fs::create_dir_all(&cache_dir)?;

            for (name, candidates) in dbgsym_index.iter_arch(arch) {
                let parent = match name.strip_suffix(DBGSYM_SUFFIX) {
                    Some(parent_name) => match manifest.get(parent_name, arch) {
                        Some(parent) => parent.clone(),
                        None => continue,
                    },
                    None => continue,
                };

                let dbgsym = match candidates.iter().find(|c| c.version() == parent.version()) {
                    Some(dbgsym) => dbgsym,
                    None => {
                        let mut tried = candidates.iter().map(|c| c.version_str()).collect::<Vec<_>>();
                        tried.sort_unstable();
                        warn!(
                            "Debug symbol package {} not found at version {} (available: {})",
                            name,
                            parent.version_str(),
                            tried.join(", ")
                        );
                        continue;
                    }
                };

                debug!("Installing symbols {} for {}", dbgsym, arch);
                let (deb, fetched) = self.fetch_package(dbgsym, &cache_dir).await?;
                if !fetched {
                    skipped += 1;
                }
                install_deb(&deb, &self.output_dir.join(arch))?;
                manifest.insert(arch, dbgsym.clone());
            }
        }

        if skipped > 0 {
            info!(
                "Skipped downloading {} symbol deb(s) that were already present.",
                skipped
            );
        }

        Ok(())
    }

    /// Download the wanted source packages and link them into `source/`.
    ///
    /// A source present in several repositories is included from all of them.
    /// Returns the included packages. In strict mode, files whose MD5 differs
    /// from the index are an error reported after all sources are processed.
    pub async fn install_sources(
        &self,
        sources: &[SourcePackage],
        wanted: &BTreeSet<String>,
    ) -> Result<Vec<SourcePackage>> {
        let mut skipped = 0;
        let mut mismatched = vec![];
        let mut included = vec![];

        let dest_dir = self.output_dir.join("source");
        std::fs::create_dir_all(&dest_dir)?;

        for sp in sources.iter().filter(|sp| wanted.contains(sp.name())) {
            debug!("Downloading source {} {}", sp.name(), sp.version());

            let cache_dir = self.cache_dir.join("source").join(sp.name());
            std::fs::create_dir_all(&cache_dir)?;

            for file in sp.files() {
                check_path_traversal(&file.name)?;
                let path = cache_dir.join(&file.name);

                if !self
                    .repositories
                    .download(
                        sp.apt_source(),
                        &format!("{}/{}", sp.directory(), file.name),
                        &path,
                    )
                    .await?
                {
                    debug!("Skipping download of existing source file: {}", path.display());
                    skipped += 1;
                }
            }

            for file in sp.files() {
                let path = cache_dir.join(&file.name);

                if self.strict && md5_file_hex(&path)? != file.md5 {
                    error!("{} has unexpected content", file.name);
                    mismatched.push(file.name.clone());
                }

                hard_link_or_copy(&path, &dest_dir.join(&file.name))?;
            }

            included.push(sp.clone());
        }

        if skipped > 0 {
            info!(
                "Skipped downloading {} source file(s) that were already present.",
                skipped
            );
        }

        if !mismatched.is_empty() {
            return Err(RuntimeError::DigestMismatch(mismatched));
        }

        Ok(included)
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::repository::{
            tests::{fixture_repository, write_gz},
            AptSource, AptSourceKind,
        },
        indoc::indoc,
    };

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn install_set_union_and_development_filter() {
        let mut expansion = ExpansionResult::default();
        expansion
            .binaries
            .insert("amd64".to_string(), set(&["libfoo2", "libfoo-dev"]));
        expansion.sources = set(&["libfoo"]);

        let list = PackageList::parse("zlib zlib1g zlib1g-dbg\nlibfoo libfoo2\n");
        let arches = vec!["amd64".to_string(), "i386".to_string()];

        let release = install_set(&expansion, &list, &arches, false);
        assert_eq!(release["amd64"], set(&["libfoo2", "zlib1g"]));
        assert_eq!(release["i386"], set(&["libfoo2", "zlib1g"]));

        let debug = install_set(&expansion, &list, &arches, true);
        assert_eq!(
            debug["amd64"],
            set(&["libfoo-dev", "libfoo2", "zlib1g", "zlib1g-dbg"])
        );

        assert_eq!(wanted_sources(&expansion, &list), set(&["libfoo", "zlib"]));
    }

    #[test]
    fn link_or_copy_replaces() -> Result<()> {
        let td = tempfile::tempdir()?;
        let src = td.path().join("src");
        let dest = td.path().join("dest");
        std::fs::write(&src, b"new")?;
        std::fs::write(&dest, b"old")?;

        hard_link_or_copy(&src, &dest)?;
        assert_eq!(std::fs::read(&dest)?, b"new");

        Ok(())
    }

    /// A repository whose source file content is known.
    fn source_repository(root: &Path, md5: &str) -> Result<RepositorySet> {
        fixture_repository(root)?;
        std::fs::create_dir_all(root.join("pool/main/libf/libfoo"))?;
        std::fs::write(root.join("pool/main/libf/libfoo/libfoo_1.0-2.dsc"), b"hello\n")?;
        write_gz(
            &root.join("dists/scout/main/source/Sources.gz"),
            &format!(
                indoc! {"
                    Package: libfoo
                    Version: 1.0-2
                    Directory: pool/main/libf/libfoo
                    Files:
                     {} 6 libfoo_1.0-2.dsc

                    Package: unwanted
                    Version: 1
                    Directory: pool/main/u/unwanted
                    Files:
                     0123456789abcdef0123456789abcdef 6 unwanted_1.dsc
                "},
                md5
            ),
        )?;

        RepositorySet::new(vec![AptSource::new(
            AptSourceKind::Source,
            root.display().to_string(),
            "scout",
            vec!["main".to_string()],
            false,
        )])
    }

    #[tokio::test]
    async fn sources_are_linked_and_idempotent() -> Result<()> {
        let td = tempfile::tempdir()?;
        let repos = source_repository(&td.path().join("repo"), "b1946ac92492d2347c6235b4d2611184")?;
        let sources = repos.fetch_source_packages().await?;
        assert_eq!(sources.len(), 2);

        let cache = td.path().join("cache");
        let output = td.path().join("output");
        let installer = Installer::new(&repos, &cache, &output, true, false);

        let included = installer.install_sources(&sources, &set(&["libfoo"])).await?;
        assert_eq!(included.len(), 1);

        let cached = cache.join("source/libfoo/libfoo_1.0-2.dsc");
        assert_eq!(std::fs::read(output.join("source/libfoo_1.0-2.dsc"))?, b"hello\n");
        assert!(!output.join("source/unwanted_1.dsc").exists());

        // A second run must not fetch again.
        let mtime = std::fs::metadata(&cached)?.modified()?;
        std::fs::remove_file(td.path().join("repo/pool/main/libf/libfoo/libfoo_1.0-2.dsc"))?;
        installer.install_sources(&sources, &set(&["libfoo"])).await?;
        assert_eq!(std::fs::metadata(&cached)?.modified()?, mtime);
        assert_eq!(std::fs::read(&cached)?, b"hello\n");

        Ok(())
    }

    #[tokio::test]
    async fn strict_source_digest_mismatch() -> Result<()> {
        let td = tempfile::tempdir()?;
        let repos = source_repository(&td.path().join("repo"), "00000000000000000000000000000000")?;
        let sources = repos.fetch_source_packages().await?;

        let cache = td.path().join("cache");
        let output = td.path().join("output");

        let lenient = Installer::new(&repos, &cache, &output, false, false);
        assert_eq!(lenient.install_sources(&sources, &set(&["libfoo"])).await?.len(), 1);

        let strict = Installer::new(&repos, &cache, &output, true, false);
        assert!(matches!(
            strict.install_sources(&sources, &set(&["libfoo"])).await,
            Err(RuntimeError::DigestMismatch(files)) if files == vec!["libfoo_1.0-2.dsc".to_string()]
        ));

        Ok(())
    }

    #[tokio::test]
    async fn missing_binaries() -> Result<()> {
        let td = tempfile::tempdir()?;
        let root = td.path().join("repo");
        fixture_repository(&root)?;

        let repos = RepositorySet::new(vec![AptSource::new(
            AptSourceKind::Binary,
            root.display().to_string(),
            "scout",
            vec!["main".to_string()],
            false,
        )])?;
        let index = repos.fetch_binary_index(&["amd64".to_string()], false).await?;

        let mut wanted = BTreeMap::new();
        wanted.insert("amd64".to_string(), set(&["libmissing1"]));

        let mut manifest = Manifest::default();
        let lenient = Installer::new(&repos, td.path().join("cache"), td.path().join("out"), false, false);
        lenient.install_binaries(&index, &wanted, &mut manifest).await?;
        assert!(manifest.is_empty());

        let strict = Installer::new(&repos, td.path().join("cache"), td.path().join("out"), true, false);
        assert!(matches!(
            strict.install_binaries(&index, &wanted, &mut manifest).await,
            Err(RuntimeError::MissingPackages(missing)) if missing == vec!["libmissing1:amd64".to_string()]
        ));

        Ok(())
    }

    const HELLO_MD5: &str = "b1946ac92492d2347c6235b4d2611184";
    const HELLO_SHA256: &str = "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03";
    const ZERO_SHA256: &str = "0000000000000000000000000000000000000000000000000000000000000000";

    fn package_with_digests(md5: Option<&str>, sha256: Option<&str>) -> BinaryPackage {
        let mut stanza = crate::control::Stanza::default();
        stanza.set_field_from_string("Package", "libfoo2");
        stanza.set_field_from_string("Architecture", "amd64");
        stanza.set_field_from_string("Version", "1.0-2");
        stanza.set_field_from_string("Filename", "pool/main/libf/libfoo/libfoo2_1.0-2_amd64.deb");
        if let Some(md5) = md5 {
            stanza.set_field_from_string("MD5sum", md5);
        }
        if let Some(sha256) = sha256 {
            stanza.set_field_from_string("SHA256", sha256);
        }

        BinaryPackage::from_stanza(stanza, crate::binary_package::tests::test_source()).unwrap()
    }

    #[test]
    fn package_digests() -> Result<()> {
        let td = tempfile::tempdir()?;
        let deb = td.path().join("libfoo2_1.0-2_amd64.deb");
        std::fs::write(&deb, b"hello\n")?;

        assert!(verify_package(&package_with_digests(None, None), &deb)?);
        assert!(verify_package(&package_with_digests(Some(HELLO_MD5), None), &deb)?);
        assert!(!verify_package(
            &package_with_digests(Some("00000000000000000000000000000000"), None),
            &deb
        )?);

        // SHA-256 wins over MD5 in both directions.
        assert!(!verify_package(&package_with_digests(Some(HELLO_MD5), Some(ZERO_SHA256)), &deb)?);
        assert!(verify_package(
            &package_with_digests(Some("00000000000000000000000000000000"), Some(HELLO_SHA256)),
            &deb
        )?);

        Ok(())
    }

    #[tokio::test]
    async fn strict_binary_digest_mismatch() -> Result<()> {
        let td = tempfile::tempdir()?;
        let root = td.path().join("repo");
        fixture_repository(&root)?;

        let pool_deb = root.join("pool/main/libf/libfoo/libfoo2_1.0-2_amd64.deb");
        std::fs::create_dir_all(root.join("pool/main/libf/libfoo"))?;
        std::fs::write(&pool_deb, b"hello\n")?;
        write_gz(
            &root.join("dists/scout/main/binary-amd64/Packages.gz"),
            &format!(
                indoc! {"
                    Package: libfoo2
                    Source: libfoo
                    Version: 1.0-2
                    Architecture: amd64
                    Filename: pool/main/libf/libfoo/libfoo2_1.0-2_amd64.deb
                    Size: 6
                    MD5sum: {}
                    SHA256: {}
                "},
                HELLO_MD5, ZERO_SHA256
            ),
        )?;

        let repos = RepositorySet::new(vec![AptSource::new(
            AptSourceKind::Binary,
            root.display().to_string(),
            "scout",
            vec!["main".to_string()],
            false,
        )])?;
        let index = repos.fetch_binary_index(&["amd64".to_string()], false).await?;

        let mut wanted = BTreeMap::new();
        wanted.insert("amd64".to_string(), set(&["libfoo2"]));

        let cache = td.path().join("cache");
        let cached = cache.join("binary/amd64/libfoo2_1.0-2_amd64.deb");
        let strict = Installer::new(&repos, &cache, td.path().join("out"), true, false);

        let mut manifest = Manifest::default();
        let expect_mismatch = |res: Result<()>| match res {
            Err(RuntimeError::DigestMismatch(files)) => {
                assert_eq!(files, vec![cached.display().to_string()]);
            }
            other => panic!("unexpected result: {:?}", other),
        };

        expect_mismatch(strict.install_binaries(&index, &wanted, &mut manifest).await);
        assert!(manifest.is_empty());
        assert_eq!(std::fs::read(&cached)?, b"hello\n");
        assert!(!td.path().join("out/amd64/installed").exists());

        // A second run reuses the cached file.
        let mtime = std::fs::metadata(&cached)?.modified()?;
        std::fs::remove_file(&pool_deb)?;
        expect_mismatch(strict.install_binaries(&index, &wanted, &mut manifest).await);
        assert_eq!(std::fs::metadata(&cached)?.modified()?, mtime);

        Ok(())
    }

    #[tokio::test]
    async fn symbols_require_matching_parent() -> Result<()> {
        let td = tempfile::tempdir()?;
        let root = td.path().join("repo");
        fixture_repository(&root)?;

        let repos = RepositorySet::new(vec![AptSource::new(
            AptSourceKind::Binary,
            root.display().to_string(),
            "scout",
            vec!["main".to_string()],
            false,
        )])?;

        let mut dbgsym_index = BinaryIndex::default();
        dbgsym_index.insert(
            "amd64",
            crate::binary_package::tests::package("libfoo2-dbgsym", "1.0-1", ""),
        );
        dbgsym_index.insert(
            "amd64",
            crate::binary_package::tests::package("libbar1-dbgsym", "1.0-1", ""),
        );

        let mut manifest = Manifest::default();
        manifest.insert(
            "amd64",
            crate::binary_package::tests::package("libfoo2", "1.0-2", ""),
        );

        let installer = Installer::new(&repos, td.path().join("cache"), td.path().join("out"), false, false);
        installer.install_symbols(&dbgsym_index, &mut manifest).await?;

        // Version mismatch for libfoo2 and no parent for libbar1: nothing installed.
        assert_eq!(manifest.len(), 1);
        assert!(manifest.get("libfoo2-dbgsym", "amd64").is_none());

        Ok(())
    }
}
