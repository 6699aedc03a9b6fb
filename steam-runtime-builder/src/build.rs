// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! The runtime build pipeline. */

use {
    crate::{
        cli::{CliError, Result},
        config::BuildConfig,
    },
    chrono::{DateTime, Utc},
    log::info,
    once_cell::sync::Lazy,
    regex::Regex,
    std::path::{Path, PathBuf},
    steam_runtime_packaging::{
        archive::{
            copy_manifests, link_latest, split_archive, write_archive, write_checksum,
            write_sources_list, ArchiveLayout,
        },
        consistency::{check_consistency, PackageList},
        expansion::MetapackageExpander,
        fixup::{fix_debug_links, fix_symlinks, normalize_permissions},
        install::{install_set, wanted_sources, Installer},
        manifest::{write_source_manifests, Manifest},
        repository::{AptSource, RepositorySet},
    },
    walkdir::WalkDir,
};

static RE_DEBUG_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"https?://media\.steampowered\.com/client/runtime/.*$")
        .expect("debug URL regex should compile")
});

/// Copy the templates directory to `dest`, preserving symlinks.
pub fn populate_from_templates(templates: &Path, dest: &Path) -> Result<()> {
    for entry in WalkDir::new(templates).follow_links(false) {
        let entry = entry?;
        let rel = entry
            .path()
            .strip_prefix(templates)
            .map_err(|e| CliError::InvalidArgument(format!("{}", e)))?;
        let target = dest.join(rel);

        let file_type = entry.file_type();
        if file_type.is_symlink() {
            std::os::unix::fs::symlink(std::fs::read_link(entry.path())?, &target)?;
        } else if file_type.is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }

    Ok(())
}

/// Point the runtime's `README.txt` at the debug and source version.
pub fn rewrite_debug_url(template_readme: &Path, dest_readme: &Path, url: &str) -> Result<()> {
    let content = std::fs::read_to_string(template_readme)?;

    let rewritten = content
        .split_inclusive('\n')
        .map(|line| {
            let (body, newline) = match line.strip_suffix('\n') {
                Some(body) => (body, "\n"),
                None => (line, ""),
            };

            format!("{}{}", RE_DEBUG_URL.replace(body, regex::NoExpand(url)), newline)
        })
        .collect::<String>();

    let mut temp = dest_readme.as_os_str().to_os_string();
    temp.push(".new");
    std::fs::write(&temp, rewritten)?;
    std::fs::rename(&temp, dest_readme)?;

    Ok(())
}

/// Pack the runtime at `output` and write the files that accompany the archive.
pub fn write_archives(
    config: &BuildConfig,
    output: &Path,
    dest: &str,
    timestamps: &[(&AptSource, DateTime<Utc>)],
    reference_time: DateTime<Utc>,
) -> Result<PathBuf> {
    let extension = config.compression.extension();
    let layout = ArchiveLayout::resolve(dest, &config.name_version, config.compression)?;

    write_archive(output, &layout.archive, config.compression, reference_time)?;
    let md5 = write_checksum(&layout.archive)?;

    if let Some(dir) = &layout.directory {
        write_sources_list(dir, &config.name_version, timestamps)?;
        copy_manifests(output, dir, &config.name_version, config.source)?;

        if config.version != "latest" {
            link_latest(dir, &config.name, &layout.archive, extension)?;
        }
    }

    if let Some(prefix) = &config.split {
        split_archive(&layout.archive, prefix, extension, &md5)?;
    }

    Ok(layout.archive)
}

/// Build the runtime described by `config`.
pub async fn build_runtime(config: &BuildConfig) -> Result<()> {
    let repositories = RepositorySet::new(config.apt_sources.iter().cloned())?;

    let timestamps = repositories.fetch_release_timestamps().await?;
    let reference_time = config.reference_time(
        &timestamps.iter().map(|(_, date)| *date).collect::<Vec<_>>(),
    )?;
    info!("Reference timestamp is {}", reference_time.format("%Y-%m-%d %H:%M:%S"));

    let tmpdir = tempfile::Builder::new().prefix("build-runtime-").tempdir()?;
    let output = config
        .output
        .clone()
        .unwrap_or_else(|| tmpdir.path().join("root"));

    populate_from_templates(&config.templates, &output)?;
    std::fs::write(output.join("version.txt"), format!("{}\n", config.name_version))?;

    if let Some(url) = &config.debug_url {
        rewrite_debug_url(
            &config.templates.join("README.txt"),
            &output.join("README.txt"),
            url,
        )?;
    }

    info!("Creating Steam Runtime in {}", output.display());

    let policy = config.load_policy()?;
    let list = PackageList::from_paths(&config.packages_from)?;

    let index = repositories
        .fetch_binary_index(&config.architectures, false)
        .await?;

    let expansion = MetapackageExpander::new(&index, &policy).expand(&config.metapackages);
    expansion.check(config.strict)?;
    check_consistency(&expansion, &list, &config.metapackages, &policy).log();

    let installer = Installer::new(
        &repositories,
        &config.cache_dir,
        &output,
        config.strict,
        config.debug,
    );

    if config.source {
        let sources = repositories.fetch_source_packages().await?;
        let included = installer
            .install_sources(&sources, &wanted_sources(&expansion, &list))
            .await?;
        write_source_manifests(&output.join("source"), &included)?;
    }

    let mut manifest = Manifest::default();
    let wanted = install_set(&expansion, &list, &config.architectures, config.debug);
    installer
        .install_binaries(&index, &wanted, &mut manifest)
        .await?;

    if config.symbols {
        let dbgsym_index = repositories
            .fetch_binary_index(&config.architectures, true)
            .await?;
        installer.install_symbols(&dbgsym_index, &mut manifest).await?;

        for arch in &config.architectures {
            let count = fix_debug_links(&output.join(arch))?;
            info!("Created {} build ID links for {}", count, arch);
        }
    }

    for arch in &config.architectures {
        let root = output.join(arch);
        if root.is_dir() {
            fix_symlinks(&root)?;
        }
    }

    manifest.write_all(&output)?;

    info!("Normalizing permissions...");
    normalize_permissions(&output)?;

    if let Some(dest) = &config.archive {
        let timestamps = timestamps
            .iter()
            .map(|(source, date)| (source.as_ref(), *date))
            .collect::<Vec<_>>();

        write_archives(config, &output, dest, &timestamps, reference_time)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::cli::command,
        chrono::TimeZone,
        steam_runtime_packaging::manifest::{BUILT_USING_TXT, MANIFEST_DEB822_GZ, MANIFEST_TXT},
    };

    fn config(args: &[&str]) -> Result<BuildConfig> {
        let matches = command().try_get_matches_from(
            std::iter::once("build-runtime").chain(args.iter().copied()),
        )?;

        BuildConfig::from_matches(&matches, Utc::now(), None)
    }

    #[test]
    fn templates_are_copied() -> Result<()> {
        let td = tempfile::tempdir()?;
        let templates = td.path().join("templates");
        std::fs::create_dir_all(templates.join("amd64/etc"))?;
        std::fs::write(templates.join("run.sh"), b"#!/bin/sh\n")?;
        std::fs::write(templates.join("amd64/etc/ld.so.conf"), b"")?;
        std::os::unix::fs::symlink("amd64", templates.join("x86_64"))?;

        let dest = td.path().join("root");
        populate_from_templates(&templates, &dest)?;

        assert_eq!(std::fs::read(dest.join("run.sh"))?, b"#!/bin/sh\n");
        assert!(dest.join("amd64/etc/ld.so.conf").is_file());
        assert_eq!(std::fs::read_link(dest.join("x86_64"))?, PathBuf::from("amd64"));

        Ok(())
    }

    #[test]
    fn readme_debug_url() -> Result<()> {
        let td = tempfile::tempdir()?;
        let template = td.path().join("README.template");
        let dest = td.path().join("README.txt");
        std::fs::write(
            &template,
            "Debug version:\n  https://media.steampowered.com/client/runtime/steam-runtime-dbg.tar.xz\nEnd",
        )?;

        rewrite_debug_url(&template, &dest, "https://example.com/rt-$1.tar.xz")?;

        assert_eq!(
            std::fs::read_to_string(&dest)?,
            "Debug version:\n  https://example.com/rt-$1.tar.xz\nEnd"
        );
        assert!(!td.path().join("README.txt.new").exists());

        Ok(())
    }

    #[test]
    fn archive_directory_outputs() -> Result<()> {
        let td = tempfile::tempdir()?;
        let output = td.path().join("root");
        std::fs::create_dir_all(output.join("amd64"))?;
        for f in [MANIFEST_TXT, BUILT_USING_TXT, MANIFEST_DEB822_GZ] {
            std::fs::write(output.join(f), f)?;
        }

        let archive_dir = format!("{}/", td.path().join("archives").display());
        let split = td.path().join("split/rt").display().to_string();
        std::fs::create_dir_all(td.path().join("split"))?;

        let c = config(&[
            "--archive",
            &archive_dir,
            "--split",
            &split,
            "--set-name",
            "rt",
            "--set-version",
            "1",
            "--compression",
            "gz",
        ])?;

        let source = c.apt_sources[0].clone();
        let date = Utc.with_ymd_and_hms(2022, 1, 6, 17, 12, 5).unwrap();

        let archive = write_archives(&c, &output, &archive_dir, &[(&source, date)], date)?;
        let dir = td.path().join("archives");

        assert_eq!(archive, dir.join("rt_1.tar.gz"));
        assert!(dir.join("rt_1.tar.gz.checksum").is_file());
        assert!(dir.join("rt_1.manifest.txt").is_file());
        assert!(dir.join("rt_1.built-using.txt").is_file());
        assert!(dir.join("rt_1.manifest.deb822.gz").is_file());
        assert_eq!(
            std::fs::read_to_string(dir.join("rt_1.sources.list"))?,
            "# as of 2022-01-06 17:12:05\ndeb http://repo.steampowered.com/steamrt scout main\n"
        );
        assert_eq!(std::fs::read_link(dir.join("rt_latest.tar.gz"))?, PathBuf::from("rt_1.tar.gz"));

        assert!(td.path().join("split/rt.tar.gz.part0").is_file());
        assert!(td.path().join("split/rt.tar.gz.part2").is_file());
        assert!(std::fs::read_to_string(td.path().join("split/rt.checksum"))?.ends_with("  rt.tar.gz\n"));

        Ok(())
    }

    #[test]
    fn latest_version_is_not_linked() -> Result<()> {
        let td = tempfile::tempdir()?;
        let output = td.path().join("root");
        std::fs::create_dir_all(&output)?;
        for f in [MANIFEST_TXT, BUILT_USING_TXT, MANIFEST_DEB822_GZ] {
            std::fs::write(output.join(f), f)?;
        }

        let archive_dir = format!("{}/", td.path().join("archives").display());
        let c = config(&["--archive", &archive_dir, "--set-name", "rt", "--set-version", "latest"])?;
        let date = Utc.with_ymd_and_hms(2022, 1, 6, 17, 12, 5).unwrap();

        write_archives(&c, &output, &archive_dir, &[], date)?;

        assert!(td.path().join("archives/rt_latest.tar.xz").is_file());
        assert!(std::fs::symlink_metadata(td.path().join("archives/rt_latest.tar.xz.checksum"))?
            .file_type()
            .is_file());

        Ok(())
    }
}
