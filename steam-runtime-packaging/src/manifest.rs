// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Records of what went into a runtime.

Written at the root of the runtime:

* `manifest.deb822.gz`: the full index stanza of every installed package.
* `manifest.txt`: one tab separated row per installed package.
* `built-using.txt`: sources embedded into installed binaries, from `Built-Using`.

With sources, `source/` additionally receives `sources.txt` and
`sources.deb822.gz`.

Compressed manifests use a zero gzip timestamp so that identical inputs give
identical bytes.
*/

use {
    crate::{
        binary_package::BinaryPackage, control::Stanza, error::Result,
        source_package::SourcePackage,
    },
    flate2::{Compression, GzBuilder},
    std::{
        collections::{BTreeMap, BTreeSet},
        io::Write,
        path::Path,
    },
};

pub const MANIFEST_DEB822_GZ: &str = "manifest.deb822.gz";
pub const MANIFEST_TXT: &str = "manifest.txt";
pub const BUILT_USING_TXT: &str = "built-using.txt";
pub const SOURCES_TXT: &str = "sources.txt";
pub const SOURCES_DEB822_GZ: &str = "sources.deb822.gz";

/// Installed binary packages, keyed by `(name, architecture)`.
///
/// The architecture is the one the package was installed for, which is not
/// necessarily its `Architecture` field.
#[derive(Clone, Debug, Default)]
pub struct Manifest {
    entries: BTreeMap<(String, String), BinaryPackage>,
}

impl Manifest {
    pub fn insert(&mut self, arch: &str, package: BinaryPackage) {
        self.entries
            .insert((package.name().to_string(), arch.to_string()), package);
    }

    pub fn get(&self, name: &str, arch: &str) -> Option<&BinaryPackage> {
        self.entries.get(&(name.to_string(), arch.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over `((name, arch), package)` sorted by name then architecture.
    pub fn iter(&self) -> impl Iterator<Item = (&(String, String), &BinaryPackage)> {
        self.entries.iter()
    }

    /// Write every manifest file into `dir`.
    pub fn write_all(&self, dir: &Path) -> Result<()> {
        write_stanzas_gz(
            &dir.join(MANIFEST_DEB822_GZ),
            self.entries.values().map(|p| p.stanza()),
        )?;
        std::fs::write(dir.join(MANIFEST_TXT), self.summary_table())?;
        std::fs::write(dir.join(BUILT_USING_TXT), self.built_using_table()?)?;

        Ok(())
    }

    /// Content of `manifest.txt`.
    pub fn summary_table(&self) -> String {
        let rows = self
            .entries
            .values()
            .map(|p| {
                format!(
                    "{}:{}\t{}\t{}\t{}\n",
                    p.name(),
                    p.architecture(),
                    p.version_str(),
                    p.source_field().unwrap_or_else(|| p.name()),
                    p.installed_size().unwrap_or_default()
                )
            })
            .collect::<BTreeSet<_>>();

        table("#Package[:Architecture]\t#Version\t#Source\t#Installed-Size\n", rows)
    }

    /// Content of `built-using.txt`.
    ///
    /// Errors if any `Built-Using` relation is not of the form `name (= version)`.
    pub fn built_using_table(&self) -> Result<String> {
        let mut rows = BTreeSet::new();

        for p in self.entries.values() {
            for (source, version) in p.built_using()? {
                rows.insert(format!("{}\t{}\t{}\n", p.name(), source, version));
            }
        }

        Ok(table(
            "#Built-Binary\t#Built-Using-Source\t#Built-Using-Version\n",
            rows,
        ))
    }
}

fn table(header: &str, rows: BTreeSet<String>) -> String {
    std::iter::once(header.to_string()).chain(rows).collect()
}

/// Write stanzas separated by blank lines into a reproducible gzip file.
pub fn write_stanzas_gz<'a>(path: &Path, stanzas: impl Iterator<Item = &'a Stanza>) -> Result<()> {
    let fh = std::fs::File::create(path)?;
    let mut writer = GzBuilder::new().mtime(0).write(fh, Compression::default());

    for (i, stanza) in stanzas.enumerate() {
        if i > 0 {
            writer.write_all(b"\n")?;
        }
        stanza.write(&mut writer)?;
    }

    writer.finish()?;

    Ok(())
}

/// Write `sources.txt` and `sources.deb822.gz` for the included source packages.
///
/// Stanzas are ordered by name then version; duplicates of the same name and
/// version are written once.
pub fn write_source_manifests(dir: &Path, sources: &[SourcePackage]) -> Result<()> {
    let included = sources
        .iter()
        .map(|sp| ((sp.name(), sp.version()), sp))
        .collect::<BTreeMap<_, _>>();

    let rows = included
        .values()
        .map(|sp| {
            format!(
                "{}\t{}\t{}\n",
                sp.name(),
                sp.version(),
                sp.files().first().map(|f| f.name.as_str()).unwrap_or_default()
            )
        })
        .collect::<BTreeSet<_>>();

    std::fs::create_dir_all(dir)?;
    std::fs::write(dir.join(SOURCES_TXT), table("#Source\t#Version\t#dsc\n", rows))?;
    write_stanzas_gz(
        &dir.join(SOURCES_DEB822_GZ),
        included.values().map(|sp| sp.stanza()),
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            binary_package::tests::{package, test_source},
            control::parse_stanzas,
        },
        flate2::read::GzDecoder,
        indoc::indoc,
        std::io::Read,
    };

    fn gunzip(path: &Path) -> Result<String> {
        let mut s = String::new();
        GzDecoder::new(std::fs::File::open(path)?).read_to_string(&mut s)?;
        Ok(s)
    }

    fn sample() -> Manifest {
        let mut manifest = Manifest::default();

        let mut stanza = package("libfoo2", "1.0-2", "libc6").stanza().clone();
        stanza.set_field_from_string("Source", "libfoo (1.0-1)");
        stanza.set_field_from_string("Installed-Size", "120");
        stanza.set_field_from_string("Built-Using", "gcc-4.6 (= 4.6.3-1), zlib (= 1:1.2.3)");
        let libfoo = BinaryPackage::from_stanza(stanza, test_source()).unwrap();

        manifest.insert("amd64", libfoo.clone());
        manifest.insert("i386", libfoo);
        manifest.insert("amd64", package("zlib1g", "1:1.2.3-1", ""));

        manifest
    }

    #[test]
    fn tables() -> Result<()> {
        let manifest = sample();
        assert_eq!(manifest.len(), 3);
        assert!(manifest.get("libfoo2", "i386").is_some());

        // Both entries report the package's own Architecture field, so they collapse.
        assert_eq!(
            manifest.summary_table(),
            indoc! {"
                #Package[:Architecture]\t#Version\t#Source\t#Installed-Size
                libfoo2:amd64\t1.0-2\tlibfoo (1.0-1)\t120
                zlib1g:amd64\t1:1.2.3-1\tzlib1g\t
            "}
        );

        assert_eq!(
            manifest.built_using_table()?,
            indoc! {"
                #Built-Binary\t#Built-Using-Source\t#Built-Using-Version
                libfoo2\tgcc-4.6\t4.6.3-1
                libfoo2\tzlib\t1:1.2.3
            "}
        );

        Ok(())
    }

    #[test]
    fn write_files_reproducibly() -> Result<()> {
        let td = tempfile::tempdir()?;
        let a = td.path().join("a");
        let b = td.path().join("b");
        std::fs::create_dir_all(&a)?;
        std::fs::create_dir_all(&b)?;

        sample().write_all(&a)?;
        sample().write_all(&b)?;

        assert_eq!(
            std::fs::read(a.join(MANIFEST_DEB822_GZ))?,
            std::fs::read(b.join(MANIFEST_DEB822_GZ))?
        );

        let deb822 = gunzip(&a.join(MANIFEST_DEB822_GZ))?;
        let stanzas = parse_stanzas(&deb822)?;
        assert_eq!(stanzas.len(), 3);
        assert_eq!(stanzas[0].field_str("Package"), Some("libfoo2"));
        assert_eq!(stanzas[2].field_str("Package"), Some("zlib1g"));

        assert!(std::fs::read_to_string(a.join(MANIFEST_TXT))?.starts_with("#Package"));
        assert!(std::fs::read_to_string(a.join(BUILT_USING_TXT))?.contains("libfoo2\tzlib\t"));

        Ok(())
    }

    #[test]
    fn malformed_built_using_fails() -> Result<()> {
        let mut manifest = Manifest::default();
        let mut stanza = package("libfoo2", "1", "").stanza().clone();
        stanza.set_field_from_string("Built-Using", "gcc-4.6");
        manifest.insert("amd64", BinaryPackage::from_stanza(stanza, test_source())?);

        let td = tempfile::tempdir()?;
        assert!(manifest.write_all(td.path()).is_err());

        Ok(())
    }

    #[test]
    fn source_manifests() -> Result<()> {
        let stanzas = parse_stanzas(indoc! {"
            Package: zlib
            Version: 1:1.2.3-1
            Directory: pool/main/z/zlib
            Files:
             0123456789abcdef0123456789abcdef 100 zlib_1.2.3-1.dsc

            Package: libfoo
            Version: 1.0-2
            Directory: pool/main/libf/libfoo
            Files:
             0123456789abcdef0123456789abcdef 100 libfoo_1.0-2.dsc
             fedcba9876543210fedcba9876543210 200 libfoo_1.0.orig.tar.gz
        "})?;

        let mut sources = stanzas
            .into_iter()
            .map(|s| SourcePackage::from_stanza(s, test_source()))
            .collect::<Result<Vec<_>>>()?;
        // The same source from a second repository.
        sources.push(sources[1].clone());

        let td = tempfile::tempdir()?;
        let dir = td.path().join("source");
        write_source_manifests(&dir, &sources)?;

        assert_eq!(
            std::fs::read_to_string(dir.join(SOURCES_TXT))?,
            indoc! {"
                #Source\t#Version\t#dsc
                libfoo\t1.0-2\tlibfoo_1.0-2.dsc
                zlib\t1:1.2.3-1\tzlib_1.2.3-1.dsc
            "}
        );

        let deb822 = gunzip(&dir.join(SOURCES_DEB822_GZ))?;
        let written = parse_stanzas(&deb822)?;
        assert_eq!(
            written
                .iter()
                .map(|s| s.field_str("Package").unwrap())
                .collect::<Vec<_>>(),
            vec!["libfoo", "zlib"]
        );

        Ok(())
    }
}
