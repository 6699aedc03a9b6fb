// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Debian package version strings.

The format is `[epoch:]upstream_version[-debian_revision]`, ordered as
described at <https://www.debian.org/doc/debian-policy/ch-controlfields.html#version>.
*/

use {
    std::{
        cmp::Ordering,
        fmt::{Display, Formatter},
        num::ParseIntError,
        str::FromStr,
    },
    thiserror::Error,
};

#[derive(Clone, Debug, Error)]
pub enum VersionError {
    #[error("error parsing string to integer: {0}")]
    ParseInt(#[from] ParseIntError),

    #[error("version string is empty")]
    Empty,

    #[error("the epoch component has non-digit characters: {0}")]
    EpochNonNumeric(String),

    #[error("upstream_version component has illegal character: {0}")]
    UpstreamVersionIllegalChar(String),

    #[error("debian_revision component has illegal character: {0}")]
    DebianRevisionIllegalChar(String),
}

pub type Result<T> = std::result::Result<T, VersionError>;

/// A parsed Debian package version.
///
/// Equality and ordering follow dpkg: `1.0` and `0:1.0-0` compare equal even
/// though they format differently.
#[derive(Clone, Debug)]
pub struct PackageVersion {
    epoch: Option<u32>,
    upstream_version: String,
    debian_revision: Option<String>,
}

impl PackageVersion {
    /// Parse a version string.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(VersionError::Empty);
        }

        let (epoch, remainder) = match s.split_once(':') {
            Some((epoch, remainder)) => {
                if epoch.is_empty() || !epoch.chars().all(|c| c.is_ascii_digit()) {
                    return Err(VersionError::EpochNonNumeric(s.to_string()));
                }
                (Some(u32::from_str(epoch)?), remainder)
            }
            None => (None, s),
        };

        let (upstream, revision) = match remainder.rsplit_once('-') {
            Some((upstream, revision)) => (upstream, Some(revision)),
            None => (remainder, None),
        };

        let upstream_ok = !upstream.is_empty()
            && upstream.chars().all(|c| {
                c.is_ascii_alphanumeric()
                    || matches!(c, '.' | '+' | '~')
                    || (c == '-' && revision.is_some())
                    || c == ':'
            });
        if !upstream_ok {
            return Err(VersionError::UpstreamVersionIllegalChar(s.to_string()));
        }

        if let Some(revision) = revision {
            if revision.is_empty()
                || !revision
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '.' | '~'))
            {
                return Err(VersionError::DebianRevisionIllegalChar(s.to_string()));
            }
        }

        Ok(Self {
            epoch,
            upstream_version: upstream.to_string(),
            debian_revision: revision.map(|r| r.to_string()),
        })
    }

    /// The explicit epoch, if any.
    pub fn epoch(&self) -> Option<u32> {
        self.epoch
    }

    /// The epoch, defaulting to `0`.
    pub fn epoch_assumed(&self) -> u32 {
        self.epoch.unwrap_or(0)
    }

    pub fn upstream_version(&self) -> &str {
        &self.upstream_version
    }

    pub fn debian_revision(&self) -> Option<&str> {
        self.debian_revision.as_deref()
    }
}

impl FromStr for PackageVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Display for PackageVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if let Some(epoch) = self.epoch {
            write!(f, "{}:", epoch)?;
        }
        f.write_str(&self.upstream_version)?;
        if let Some(revision) = &self.debian_revision {
            write!(f, "-{}", revision)?;
        }

        Ok(())
    }
}

/// Sort weight of a character in the non-digit part of a component.
///
/// `~` sorts before everything including the end of the string, letters sort
/// before all other characters.
fn char_weight(c: Option<u8>) -> i32 {
    match c {
        None => 0,
        Some(b'~') => -1,
        Some(c) if c.is_ascii_digit() => 0,
        Some(c) if c.is_ascii_alphabetic() => c as i32,
        Some(c) => c as i32 + 256,
    }
}

/// Compare one version component the way dpkg's `verrevcmp` does.
fn compare_component(a: &str, b: &str) -> Ordering {
    let a = a.as_bytes();
    let b = b.as_bytes();
    let (mut i, mut j) = (0, 0);

    while i < a.len() || j < b.len() {
        // Non-digit prefix, compared character by character.
        while (i < a.len() && !a[i].is_ascii_digit()) || (j < b.len() && !b[j].is_ascii_digit()) {
            let wa = char_weight(a.get(i).copied().filter(|c| !c.is_ascii_digit()));
            let wb = char_weight(b.get(j).copied().filter(|c| !c.is_ascii_digit()));

            match wa.cmp(&wb) {
                Ordering::Equal => {}
                res => return res,
            }

            if i < a.len() && !a[i].is_ascii_digit() {
                i += 1;
            }
            if j < b.len() && !b[j].is_ascii_digit() {
                j += 1;
            }
        }

        // Digit run, compared numerically without overflow.
        while i < a.len() && a[i] == b'0' {
            i += 1;
        }
        while j < b.len() && b[j] == b'0' {
            j += 1;
        }

        let da_start = i;
        while i < a.len() && a[i].is_ascii_digit() {
            i += 1;
        }
        let db_start = j;
        while j < b.len() && b[j].is_ascii_digit() {
            j += 1;
        }

        let da = &a[da_start..i];
        let db = &b[db_start..j];

        match da.len().cmp(&db.len()).then_with(|| da.cmp(db)) {
            Ordering::Equal => {}
            res => return res,
        }
    }

    Ordering::Equal
}

impl Ord for PackageVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.epoch_assumed()
            .cmp(&other.epoch_assumed())
            .then_with(|| compare_component(&self.upstream_version, &other.upstream_version))
            .then_with(|| {
                compare_component(
                    self.debian_revision.as_deref().unwrap_or("0"),
                    other.debian_revision.as_deref().unwrap_or("0"),
                )
            })
    }
}

impl PartialOrd for PackageVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for PackageVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PackageVersion {}

#[cfg(test)]
mod test {
    use super::*;

    fn v(s: &str) -> PackageVersion {
        PackageVersion::parse(s).unwrap()
    }

    #[test]
    fn parse() -> Result<()> {
        let version = PackageVersion::parse("1:4.7.0+dfsg1-2")?;
        assert_eq!(version.epoch(), Some(1));
        assert_eq!(version.upstream_version(), "4.7.0+dfsg1");
        assert_eq!(version.debian_revision(), Some("2"));

        let version = PackageVersion::parse("3.3.2.final~github")?;
        assert_eq!(version.epoch(), None);
        assert_eq!(version.upstream_version(), "3.3.2.final~github");
        assert_eq!(version.debian_revision(), None);

        let version = PackageVersion::parse("1.2-3-4+srt1")?;
        assert_eq!(version.upstream_version(), "1.2-3");
        assert_eq!(version.debian_revision(), Some("4+srt1"));

        Ok(())
    }

    #[test]
    fn parse_errors() {
        assert!(PackageVersion::parse("").is_err());
        assert!(PackageVersion::parse("a1:1.0").is_err());
        assert!(PackageVersion::parse("1.0_beta").is_err());
        assert!(PackageVersion::parse("1.0-").is_err());
    }

    #[test]
    fn format() -> Result<()> {
        for s in ["1:4.7.0+dfsg1-2", "3.3.2.final~github", "0.18.0+dfsg-2+b1"] {
            assert_eq!(PackageVersion::parse(s)?.to_string(), s);
        }

        Ok(())
    }

    #[test]
    fn ordering() {
        assert!(v("1.0-2") > v("1.0-1"));
        assert!(v("1.0-1") > v("0.9-5"));
        assert!(v("1:0.1") > v("2.0"));
        assert!(v("1.0~beta1~svn1245") < v("1.0~beta1"));
        assert!(v("1.0~beta1") < v("1.0"));
        assert!(v("1.0") < v("1.0a"));
        assert!(v("1.0a") < v("1.0+"));
        assert!(v("1.10") > v("1.9"));
        assert!(v("2.24-0+steamrt1.1") < v("2.24-0+steamrt1.2+srt1"));
        assert_eq!(v("1.0"), v("0:1.0-0"));
        assert_eq!(v("1.001"), v("1.1"));
    }

    #[test]
    fn max_selects_newest() {
        let versions = ["1.0-1", "1.0-2", "0.9-5"].map(v);

        assert_eq!(versions.iter().max().unwrap().to_string(), "1.0-2");
    }
}
