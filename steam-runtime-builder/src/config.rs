// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Resolved configuration of a runtime build. */

use {
    crate::cli::{CliError, Result},
    chrono::{DateTime, TimeZone, Utc},
    clap::ArgMatches,
    serde::{Serialize, Serializer},
    std::{path::PathBuf, str::FromStr},
    steam_runtime_packaging::{
        archive::ArchiveCompression,
        policy::PackagePolicy,
        repository::{AptSource, AptSourceKind},
    },
};

pub const DEFAULT_REPO: &str = "http://repo.steampowered.com/steamrt";
pub const DEFAULT_SUITE: &str = "scout";
pub const BETA_SUITE: &str = "scout_beta";
pub const DEFAULT_TEMPLATES: &str = "templates";
pub const DEFAULT_CACHE_DIR: &str = "newpkg";
pub const DEFAULT_ARCHITECTURES: &[&str] = &["amd64", "i386"];
pub const DEFAULT_METAPACKAGES: &[&str] = &["steamrt-libs", "steamrt-legacy"];

fn serialize_display<S: Serializer, T: ToString>(
    values: &[T],
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_seq(values.iter().map(|v| v.to_string()))
}

/// Everything a build needs to know, resolved from the command line and
/// environment.
#[derive(Clone, Debug, Serialize)]
pub struct BuildConfig {
    pub name: String,
    pub version: String,
    pub name_version: String,
    pub suite: String,
    pub repo: String,
    pub debug: bool,
    pub source: bool,
    pub symbols: bool,
    pub strict: bool,
    pub official: bool,
    pub verbose: u64,
    pub templates: PathBuf,
    pub output: Option<PathBuf>,
    pub archive: Option<String>,
    pub compression: ArchiveCompression,
    pub split: Option<PathBuf>,
    pub architectures: Vec<String>,
    pub packages_from: Vec<PathBuf>,
    pub metapackages: Vec<String>,
    pub policy: Option<PathBuf>,
    pub cache_dir: PathBuf,
    pub debug_url: Option<String>,
    pub extra_apt_sources: Vec<String>,
    #[serde(serialize_with = "serialize_display")]
    pub apt_sources: Vec<AptSource>,
    /// From `SOURCE_DATE_EPOCH`. Otherwise derived from `Release` files.
    pub reference_timestamp: Option<i64>,
}

/// Compute the default runtime name.
pub fn runtime_name(official: bool, suite: &str, symbols: bool, source: bool, debug: bool) -> String {
    let mut name = if official {
        "steam-runtime".to_string()
    } else {
        "unofficial-steam-runtime".to_string()
    };

    if suite == BETA_SUITE {
        name.push_str("-beta");
    } else if suite != DEFAULT_SUITE {
        name.push('-');
        name.push_str(suite);
    }

    if symbols {
        name.push_str("-sym");
    }
    if source {
        name.push_str("-src");
    }
    name.push_str(if debug { "-debug" } else { "-release" });

    name
}

/// The default version of a runtime built at `now`.
pub fn snapshot_version(now: DateTime<Utc>) -> String {
    now.format("snapshot-%Y%m%d-%H%M%SZ").to_string()
}

/// The main repository as a binary and a source entry.
pub fn main_apt_sources(repo: &str, suite: &str, debug: bool) -> Vec<AptSource> {
    let component = if debug { "debug" } else { "main" };

    [AptSourceKind::Binary, AptSourceKind::Source]
        .into_iter()
        .map(|kind| AptSource::new(kind, repo, suite, vec![component.to_string()], false))
        .collect()
}

fn strings(matches: &ArgMatches, name: &str) -> Vec<String> {
    matches
        .values_of(name)
        .map(|values| values.map(|s| s.to_string()).collect())
        .unwrap_or_default()
}

fn or_defaults(values: Vec<String>, defaults: &[&str]) -> Vec<String> {
    if values.is_empty() {
        defaults.iter().map(|s| s.to_string()).collect()
    } else {
        values
    }
}

impl BuildConfig {
    /// Resolve a configuration from parsed arguments.
    ///
    /// `now` names snapshot versions and `source_date_epoch` is the value of
    /// `SOURCE_DATE_EPOCH`, if set.
    pub fn from_matches(
        matches: &ArgMatches,
        now: DateTime<Utc>,
        source_date_epoch: Option<&str>,
    ) -> Result<Self> {
        let suite = if matches.is_present("beta") {
            BETA_SUITE.to_string()
        } else {
            matches.value_of("suite").unwrap_or(DEFAULT_SUITE).to_string()
        };
        let repo = matches.value_of("repo").unwrap_or(DEFAULT_REPO).to_string();

        let debug = matches.is_present("debug");
        let source = matches.is_present("source");
        let symbols = matches.is_present("symbols");
        let official = matches.is_present("official");

        let name = match matches.value_of("set-name") {
            Some(name) => name.to_string(),
            None => runtime_name(official, &suite, symbols, source, debug),
        };
        let version = match matches.value_of("set-version") {
            Some(version) => version.to_string(),
            None => snapshot_version(now),
        };
        let name_version = format!("{}_{}", name, version);

        let compression = ArchiveCompression::from_str(matches.value_of("compression").unwrap_or("xz"))?;

        let extra_apt_sources = strings(matches, "extra-apt-source");
        let mut apt_sources = main_apt_sources(&repo, &suite, debug);
        for line in &extra_apt_sources {
            apt_sources.extend(AptSource::parse_line(line)?);
        }

        let reference_timestamp = source_date_epoch
            .map(|s| {
                s.trim().parse::<i64>().map_err(|_| {
                    CliError::InvalidArgument(format!("SOURCE_DATE_EPOCH is not an integer: {:?}", s))
                })
            })
            .transpose()?;

        Ok(Self {
            name,
            version,
            name_version,
            suite,
            repo,
            debug,
            source,
            symbols,
            strict: matches.is_present("strict"),
            official,
            verbose: matches.occurrences_of("verbose"),
            templates: PathBuf::from(matches.value_of("templates").unwrap_or(DEFAULT_TEMPLATES)),
            output: matches.value_of("output").map(PathBuf::from),
            archive: matches.value_of("archive").map(|s| s.to_string()),
            compression,
            split: matches.value_of("split").map(PathBuf::from),
            architectures: or_defaults(strings(matches, "architecture"), DEFAULT_ARCHITECTURES),
            packages_from: strings(matches, "packages-from")
                .into_iter()
                .map(PathBuf::from)
                .collect(),
            metapackages: or_defaults(strings(matches, "metapackage"), DEFAULT_METAPACKAGES),
            policy: matches.value_of("policy").map(PathBuf::from),
            cache_dir: PathBuf::from(matches.value_of("cache-dir").unwrap_or(DEFAULT_CACHE_DIR)),
            debug_url: matches.value_of("debug-url").map(|s| s.to_string()),
            extra_apt_sources,
            apt_sources,
            reference_timestamp,
        })
    }

    /// Load the package policy, falling back to the built-in one.
    pub fn load_policy(&self) -> Result<PackagePolicy> {
        Ok(match &self.policy {
            Some(path) => PackagePolicy::from_yaml_path(path)?,
            None => PackagePolicy::embedded()?,
        })
    }

    /// The time that archive members are clamped to.
    ///
    /// `SOURCE_DATE_EPOCH` wins over the newest `Release` date.
    pub fn reference_time(&self, release_dates: &[DateTime<Utc>]) -> Result<DateTime<Utc>> {
        if let Some(epoch) = self.reference_timestamp {
            return Utc.timestamp_opt(epoch, 0).single().ok_or_else(|| {
                CliError::InvalidArgument(format!("SOURCE_DATE_EPOCH out of range: {}", epoch))
            });
        }

        release_dates
            .iter()
            .max()
            .copied()
            .ok_or_else(|| CliError::InvalidArgument("no apt sources to date the runtime".to_string()))
    }

    /// Render as the JSON printed by `--dump-options`.
    ///
    /// Keys are sorted and indented by four spaces.
    pub fn to_json(&self) -> Result<String> {
        let value = serde_json::to_value(self)?;

        let mut buf = vec![];
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        value.serialize(&mut ser)?;

        String::from_utf8(buf).map_err(|e| CliError::InvalidArgument(format!("{}", e)))
    }
}
