// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Assembling a Steam Runtime from APT repositories.

A Steam Runtime is a relocatable filesystem tree of Debian packages, one
directory per architecture, shipped as a tar archive alongside manifests
describing exactly which packages went into it. This crate implements the
pieces needed to build one.

# Determinism and Reproducibility

Given the same repository contents and reference timestamp, the produced
manifests and archives should be byte-for-byte identical. Iteration is done
over sorted collections everywhere, gzip headers carry no timestamp, and tar
members have fixed ownership and clamped modification times.

# A Tour of Functionality

Repository metadata is made of *stanzas*: paragraphs of `Key: value`
fields. [control::Stanza] models one and [control::StanzaReader] and
[control::StanzaAsyncReader] parse them from streams.

[package_version::PackageVersion] parses Debian version strings and orders
them like `dpkg --compare-versions`. [dependency::dependency_names()]
reduces a `Depends` field to plain package names.

Typed records are built from stanzas: [binary_package::BinaryPackage] for
`Packages` entries and [source_package::SourcePackage] for `Sources`
entries. [binary_package::BinaryIndex] keeps every version of every package
per architecture.

The [repository] module describes APT sources
([repository::AptSource]), their URL layout and their `Release` files.
Transport is abstracted by [io::DataResolver], with HTTP and filesystem
implementations. [repository::RepositorySet] fetches indices from a set of
sources.

What goes into a runtime is decided by expanding *metapackages*.
[expansion::MetapackageExpander] walks their dependencies under the rules of
a [policy::PackagePolicy]. [consistency::check_consistency()] compares the
outcome with a hand maintained [consistency::PackageList].

[install::Installer] downloads and unpacks the selected packages,
[manifest::Manifest] records them, [fixup] makes the tree relocatable and
[archive] packs it up.

# Crate Features

The optional and enabled-by-default `http` feature enables fetching from
repositories over HTTP.
*/

#[cfg(unix)]
pub mod archive;
pub mod binary_package;
pub mod consistency;
pub mod control;
pub mod dependency;
pub mod error;
pub mod expansion;
#[cfg(unix)]
pub mod fixup;
pub mod install;
pub mod io;
pub mod manifest;
pub mod package_version;
pub mod policy;
pub mod repository;
pub mod source_package;
pub mod tools;
