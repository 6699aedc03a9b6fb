// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Source package records from `Sources` indices. */

use {
    crate::{
        control::Stanza,
        error::{Result, RuntimeError},
        repository::AptSource,
    },
    std::sync::Arc,
};

const KIND: &str = "Sources";

/// A file belonging to a source package, from the `Files` field.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SourcePackageFile {
    pub name: String,
    pub md5: String,
    pub size: u64,
}

/// A source package as advertised by a `Sources` index.
#[derive(Clone, Debug)]
pub struct SourcePackage {
    name: String,
    version: String,
    directory: String,
    files: Vec<SourcePackageFile>,
    apt_source: Arc<AptSource>,
    stanza: Stanza,
}

impl SourcePackage {
    /// Build a record from a `Sources` stanza fetched from `apt_source`.
    pub fn from_stanza(stanza: Stanza, apt_source: Arc<AptSource>) -> Result<Self> {
        let name = stanza.required_field_str(KIND, "Package")?.to_string();
        let version = stanza.required_field_str(KIND, "Version")?.to_string();
        let directory = stanza.required_field_str(KIND, "Directory")?.to_string();

        let files = stanza
            .field_iter_lines("Files")
            .ok_or(RuntimeError::StanzaRequiredFieldMissing(KIND, "Files"))?
            .map(|line| -> Result<SourcePackageFile> {
                let mut words = line.split_ascii_whitespace();

                match (words.next(), words.next(), words.next(), words.next()) {
                    (Some(md5), Some(size), Some(name), None) => Ok(SourcePackageFile {
                        name: name.to_string(),
                        md5: md5.to_string(),
                        size: size.parse::<u64>()?,
                    }),
                    _ => Err(RuntimeError::StanzaParse(format!(
                        "malformed Files entry in source package {}: {:?}",
                        name, line
                    ))),
                }
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            name,
            version,
            directory,
            files,
            apt_source,
            stanza,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Directory holding the files, relative to the repository root.
    pub fn directory(&self) -> &str {
        &self.directory
    }

    pub fn files(&self) -> &[SourcePackageFile] {
        &self.files
    }

    /// The `.dsc` file, which is conventionally listed first.
    pub fn dsc_filename(&self) -> Option<&str> {
        self.files
            .iter()
            .find(|f| f.name.ends_with(".dsc"))
            .or_else(|| self.files.first())
            .map(|f| f.name.as_str())
    }

    pub fn apt_source(&self) -> &AptSource {
        &self.apt_source
    }

    /// The original index stanza.
    pub fn stanza(&self) -> &Stanza {
        &self.stanza
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*, crate::binary_package::tests::test_source, crate::control::parse_stanzas,
        indoc::indoc,
    };

    #[test]
    fn record_from_stanza() -> Result<()> {
        let stanzas = parse_stanzas(indoc! {"
            Package: libfoo
            Binary: libfoo2, libfoo-dev
            Version: 1.2-3
            Directory: pool/main/libf/libfoo
            Files:
             0123456789abcdef0123456789abcdef 1234 libfoo_1.2-3.dsc
             fedcba9876543210fedcba9876543210 98765 libfoo_1.2.orig.tar.gz
        "})?;

        let p = SourcePackage::from_stanza(stanzas[0].clone(), test_source())?;
        assert_eq!(p.name(), "libfoo");
        assert_eq!(p.version(), "1.2-3");
        assert_eq!(p.directory(), "pool/main/libf/libfoo");
        assert_eq!(p.files().len(), 2);
        assert_eq!(p.files()[1].size, 98765);
        assert_eq!(p.dsc_filename(), Some("libfoo_1.2-3.dsc"));

        Ok(())
    }

    #[test]
    fn malformed_files_entry() -> Result<()> {
        let stanzas = parse_stanzas(indoc! {"
            Package: libfoo
            Version: 1.2-3
            Directory: pool/main/libf/libfoo
            Files:
             0123456789abcdef0123456789abcdef libfoo_1.2-3.dsc
        "})?;

        assert!(SourcePackage::from_stanza(stanzas[0].clone(), test_source()).is_err());

        Ok(())
    }
}
