// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Error handling. */

use {crate::package_version::VersionError, thiserror::Error};

/// Primary crate error type.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("URL error: {0:?}")]
    Url(#[from] url::ParseError),

    #[error("hex parsing error: {0:?}")]
    Hex(#[from] hex::FromHexError),

    #[error("date parsing error: {0:?}")]
    DateParse(#[from] mailparse::MailParseError),

    #[cfg(feature = "http")]
    #[error("HTTP error: {0:?}")]
    Reqwest(#[from] reqwest::Error),

    #[error("I/O error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error("integer parsing error: {0:?}")]
    ParseInt(#[from] std::num::ParseIntError),

    #[error("version error: {0}")]
    Version(#[from] VersionError),

    #[error("YAML error: {0:?}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("directory walk error: {0:?}")]
    WalkDir(#[from] walkdir::Error),

    #[error("stanza parse error: {0}")]
    StanzaParse(String),

    #[error("required field missing from {0} stanza: {1}")]
    StanzaRequiredFieldMissing(&'static str, &'static str),

    #[error("malformed Built-Using relation in {0}: {1}")]
    BuiltUsingMalformed(String, String),

    #[error("invalid apt source line {0:?}: {1}")]
    AptSourceInvalid(String, &'static str),

    #[error("path traversal detected in {0:?}")]
    PathTraversal(String),

    #[error("repository I/O error on path {0}: {1:?}")]
    RepositoryIoPath(String, std::io::Error),

    #[error("unsupported repository URL: {0}")]
    RepositoryUnsupportedUrl(String),

    #[error("Release file at {0} lacks a Date field")]
    ReleaseMissingDate(String),

    #[error("metapackage expansion is incomplete ({0} problems)")]
    IncompleteExpansion(usize),

    #[error("not all binary packages were found: {}", .0.join(", "))]
    MissingPackages(Vec<String>),

    #[error("content digest mismatch for {}", .0.join(", "))]
    DigestMismatch(Vec<String>),

    #[error("command {0} failed: {1}")]
    CommandFailed(String, String),

    #[error("{0}")]
    Other(String),
}

/// Result wrapper for this crate.
pub type Result<T> = std::result::Result<T, RuntimeError>;
