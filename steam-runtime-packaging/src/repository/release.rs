// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! `Release` files.

A `Release` file is a single stanza describing a distribution. Runtime
assembly only cares about its `Date`, which timestamps the repository
snapshot and becomes the default reference time of a build.
*/

use {
    crate::{
        control::{Stanza, StanzaReader},
        error::{Result, RuntimeError},
    },
    chrono::{DateTime, TimeZone, Utc},
    std::{io::BufRead, ops::Deref},
};

/// A parsed `Release` file.
#[derive(Clone, Debug)]
pub struct ReleaseFile {
    stanza: Stanza,
}

impl Deref for ReleaseFile {
    type Target = Stanza;

    fn deref(&self) -> &Self::Target {
        &self.stanza
    }
}

impl ReleaseFile {
    /// Parse the first stanza of a reader as a `Release` file.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let stanza = StanzaReader::new(reader)
            .next()
            .transpose()?
            .ok_or_else(|| RuntimeError::StanzaParse("Release file is empty".to_string()))?;

        Ok(Self { stanza })
    }

    pub fn from_stanza(stanza: Stanza) -> Self {
        Self { stanza }
    }

    /// The `Suite` field.
    pub fn suite(&self) -> Option<&str> {
        self.field_str("Suite")
    }

    /// The `Codename` field.
    pub fn codename(&self) -> Option<&str> {
        self.field_str("Codename")
    }

    /// The `Date` field as its raw string.
    pub fn date_str(&self) -> Option<&str> {
        self.field_str("Date")
    }

    /// The `Date` field parsed as an RFC 5322 date.
    pub fn date(&self) -> Option<Result<DateTime<Utc>>> {
        self.date_str().map(parse_rfc5322)
    }
}

/// Parse an RFC 5322 date such as `Sat, 09 Oct 2021 09:34:56 UTC`.
pub fn parse_rfc5322(value: &str) -> Result<DateTime<Utc>> {
    let seconds = mailparse::dateparse(value)?;

    Utc.timestamp_opt(seconds, 0)
        .single()
        .ok_or_else(|| RuntimeError::Other(format!("date out of range: {}", value)))
}
