// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    crate::{build::build_runtime, config::BuildConfig},
    chrono::Utc,
    clap::{Arg, ArgMatches, Command},
    log::LevelFilter,
    std::path::Path,
    steam_runtime_packaging::error::RuntimeError,
    thiserror::Error,
};

const ABOUT: &str = "\
Build a Steam Runtime from APT repositories.

Binary packages are selected by expanding metapackages (steamrt-libs and
steamrt-legacy by default) and by package list files given with
--packages-from. Each line of a package list names a source package followed
by its binary packages; lines starting with # are comments.

Selected packages are downloaded into a cache directory, unpacked into one
directory per architecture and described by manifest files. The result is
optionally packed into a reproducible tar archive.

Setting SOURCE_DATE_EPOCH overrides the reference timestamp that archive
members are clamped to. By default it is the newest Date of the Release files
of all apt sources.
";

const EXTRA_APT_SOURCE_HELP: &str = "\
Additional apt source in the form 'deb http://URL SUITE COMPONENT [COMPONENT...]'. \
The first word may also be 'deb-src' or 'both'. May be repeated.";

#[derive(Debug, Error)]
pub enum CliError {
    #[error("argument parsing error: {0:?}")]
    Clap(#[from] clap::Error),

    #[error("{0}")]
    Runtime(#[from] RuntimeError),

    #[error("I/O error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0:?}")]
    SerdeYaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0:?}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("directory walk error: {0:?}")]
    WalkDir(#[from] walkdir::Error),

    #[error("{0}")]
    InvalidArgument(String),
}

pub type Result<T> = std::result::Result<T, CliError>;

/// The `build-runtime` command line.
pub fn command() -> Command<'static> {
    Command::new("build-runtime")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Build a Steam Runtime")
        .long_about(ABOUT)
        .arg(
            Arg::new("templates")
                .long("templates")
                .takes_value(true)
                .default_value("templates")
                .help("Template files to include in the runtime"),
        )
        .arg(
            Arg::new("output")
                .long("output")
                .short('o')
                .takes_value(true)
                .help("Output directory [default: delete after archiving]"),
        )
        .arg(
            Arg::new("suite")
                .long("suite")
                .takes_value(true)
                .default_value("scout")
                .help("apt suite"),
        )
        .arg(
            Arg::new("beta")
                .long("beta")
                .short('b')
                .help("Build a beta runtime from the scout_beta suite"),
        )
        .arg(
            Arg::new("debug")
                .long("debug")
                .short('d')
                .help("Build a debug runtime"),
        )
        .arg(Arg::new("source").long("source").help("Include sources"))
        .arg(
            Arg::new("symbols")
                .long("symbols")
                .help("Include detached debugging symbols"),
        )
        .arg(
            Arg::new("strict")
                .long("strict")
                .help("Exit unsuccessfully when something seems wrong"),
        )
        .arg(
            Arg::new("official")
                .long("official")
                .help("Mark this as an official runtime"),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .multiple_occurrences(true)
                .help("Increase logging verbosity. Can be specified multiple times"),
        )
        .arg(
            Arg::new("repo")
                .long("repo")
                .takes_value(true)
                .default_value(crate::config::DEFAULT_REPO)
                .help("Main apt repository URL"),
        )
        .arg(
            Arg::new("extra-apt-source")
                .long("extra-apt-source")
                .takes_value(true)
                .multiple_occurrences(true)
                .help(EXTRA_APT_SOURCE_HELP),
        )
        .arg(
            Arg::new("set-name")
                .long("set-name")
                .takes_value(true)
                .help("Name of this runtime"),
        )
        .arg(
            Arg::new("set-version")
                .long("set-version")
                .takes_value(true)
                .help("Version of this runtime"),
        )
        .arg(
            Arg::new("debug-url")
                .long("debug-url")
                .takes_value(true)
                .help("URL of the debug and source version, written into README.txt"),
        )
        .arg(
            Arg::new("archive")
                .long("archive")
                .takes_value(true)
                .help("Pack the runtime into a tarball, or into a directory if ending in /"),
        )
        .arg(
            Arg::new("compression")
                .long("compression")
                .takes_value(true)
                .possible_values(["xz", "gz", "bz2", "none"])
                .default_value("xz")
                .help("Archive compression"),
        )
        .arg(
            Arg::new("split")
                .long("split")
                .takes_value(true)
                .help("Also write the archive split into 50M parts with this prefix"),
        )
        .arg(
            Arg::new("architecture")
                .long("architecture")
                .alias("arch")
                .takes_value(true)
                .multiple_occurrences(true)
                .help("Architecture to include [default: amd64 and i386]"),
        )
        .arg(
            Arg::new("packages-from")
                .long("packages-from")
                .takes_value(true)
                .multiple_occurrences(true)
                .help("Include packages listed in the given file"),
        )
        .arg(
            Arg::new("metapackage")
                .long("metapackage")
                .takes_value(true)
                .multiple_occurrences(true)
                .help("Metapackage to expand [default: steamrt-libs and steamrt-legacy]"),
        )
        .arg(
            Arg::new("policy")
                .long("policy")
                .takes_value(true)
                .help("YAML file defining which dependencies to ignore or accept"),
        )
        .arg(
            Arg::new("cache-dir")
                .long("cache-dir")
                .takes_value(true)
                .default_value(crate::config::DEFAULT_CACHE_DIR)
                .help("Directory caching downloaded packages between runs"),
        )
        .arg(Arg::new("dump-options").long("dump-options").hide(true))
}

/// Reject argument combinations that cannot produce a runtime.
pub fn validate(matches: &ArgMatches) -> Result<()> {
    if !matches.is_present("output") && !matches.is_present("archive") {
        return Err(CliError::InvalidArgument(
            "at least one of --output and --archive is required".to_string(),
        ));
    }

    if matches.is_present("split") && !matches.is_present("archive") {
        return Err(CliError::InvalidArgument(
            "--split requires --archive".to_string(),
        ));
    }

    if let Some(templates) = matches.value_of("templates") {
        if !Path::new(templates).is_dir() {
            return Err(CliError::InvalidArgument(format!(
                "argument to --templates, {:?}, must be a directory",
                templates
            )));
        }
    }

    // symlink_metadata() also sees dangling symlinks.
    if let Some(output) = matches.value_of("output") {
        if std::fs::symlink_metadata(output).is_ok() {
            return Err(CliError::InvalidArgument(format!(
                "argument to --output, {:?}, must not already exist",
                output
            )));
        }
    }

    Ok(())
}

fn init_logging(matches: &ArgMatches) {
    let log_level = match matches.occurrences_of("verbose") {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(log_level.as_str()),
    );

    // Disable log context except at higher log levels.
    if log_level <= LevelFilter::Info {
        builder
            .format_timestamp(None)
            .format_level(false)
            .format_target(false);
    }

    // rustls logs at info on every connection.
    if log_level == LevelFilter::Info {
        builder.filter_module("rustls", LevelFilter::Error);
    }

    builder.init();
}

pub async fn run_cli() -> Result<()> {
    let matches = command().try_get_matches()?;

    init_logging(&matches);
    validate(&matches)?;

    let source_date_epoch = std::env::var("SOURCE_DATE_EPOCH").ok();
    let config = BuildConfig::from_matches(&matches, Utc::now(), source_date_epoch.as_deref())?;

    if matches.is_present("dump-options") {
        println!("{}", config.to_json()?);
        return Ok(());
    }

    build_runtime(&config).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validated(args: &[&str]) -> Result<()> {
        let matches = command().try_get_matches_from(
            std::iter::once("build-runtime").chain(args.iter().copied()),
        )?;

        validate(&matches)
    }

    #[test]
    fn command_is_well_formed() {
        command().debug_assert();
    }

    #[test]
    fn validation() -> Result<()> {
        let td = tempfile::tempdir()?;
        let templates = td.path().join("templates");
        std::fs::create_dir(&templates)?;
        let templates = templates.to_string_lossy().to_string();
        let output = td.path().join("output").to_string_lossy().to_string();

        validated(&["--templates", &templates, "--output", &output])?;
        validated(&["--templates", &templates, "--archive", "out/", "--split", "rt"])?;

        let err = |args: &[&str]| match validated(args) {
            Err(CliError::InvalidArgument(msg)) => msg,
            other => panic!("unexpected result: {:?}", other),
        };

        assert!(err(&["--templates", &templates]).contains("--output and --archive"));
        assert!(err(&["--templates", &templates, "--output", &output, "--split", "rt"])
            .contains("--split requires --archive"));
        assert!(err(&["--templates", &output, "--archive", "x"]).contains("must be a directory"));

        std::os::unix::fs::symlink(td.path().join("missing"), &output)?;
        assert!(err(&["--templates", &templates, "--output", &output]).contains("must not already exist"));

        Ok(())
    }

    #[test]
    fn dump_options_is_hidden() -> Result<()> {
        let mut buf = vec![];
        command().write_long_help(&mut buf)?;
        let help = String::from_utf8_lossy(&buf);

        assert!(!help.contains("dump-options"));
        assert!(help.contains("--extra-apt-source"));

        Ok(())
    }

    #[test]
    fn unknown_compression_rejected() {
        assert!(matches!(
            validated(&["--archive", "x", "--compression", "zstd"]),
            Err(CliError::Clap(_))
        ));
    }
}
