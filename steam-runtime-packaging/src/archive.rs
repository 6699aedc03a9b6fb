// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Reproducible runtime archives.

A runtime tree is packed into a GNU tar whose members are all under
`steam-runtime/`, sorted by path, owned by `nobody:nogroup` and with
modification times no later than a reference timestamp. Identical trees and
timestamps produce identical archives.

Next to the archive a `.checksum` file carries its MD5 in `md5sum` format.
Archives may also be split into fixed size parts for hosting services with
upload limits.
*/

use {
    crate::{
        error::{Result, RuntimeError},
        io::md5_file_hex,
        manifest::{
            BUILT_USING_TXT, MANIFEST_DEB822_GZ, MANIFEST_TXT, SOURCES_DEB822_GZ, SOURCES_TXT,
        },
        repository::AptSource,
    },
    chrono::{DateTime, Utc},
    log::{debug, info},
    serde::Serialize,
    std::{
        collections::HashMap,
        io::{BufRead, BufReader, Read, Write},
        os::unix::fs::{symlink, MetadataExt},
        path::{Path, PathBuf},
        str::FromStr,
    },
    walkdir::WalkDir,
};

/// Top-level directory of every archive member.
pub const ARCHIVE_PREFIX: &str = "steam-runtime";

/// Size of each part of a split archive.
pub const SPLIT_PART_SIZE: u64 = 50 * 1024 * 1024;

/// Split archives always have at least this many parts.
pub const SPLIT_MIN_PARTS: usize = 3;

const ARCHIVE_UID: u64 = 65534;
const ARCHIVE_USER: &str = "nobody";
const ARCHIVE_GROUP: &str = "nogroup";

/// Compression applied to the tar stream.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum ArchiveCompression {
    #[serde(rename = "xz")]
    Xz,
    #[serde(rename = "gz")]
    Gzip,
    #[serde(rename = "bz2")]
    Bzip2,
    #[serde(rename = "none")]
    None,
}

impl Default for ArchiveCompression {
    fn default() -> Self {
        Self::Xz
    }
}

impl ArchiveCompression {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Xz => "xz",
            Self::Gzip => "gz",
            Self::Bzip2 => "bz2",
            Self::None => "none",
        }
    }

    /// Filename extension of archives using this compression.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Xz => ".tar.xz",
            Self::Gzip => ".tar.gz",
            Self::Bzip2 => ".tar.bz2",
            Self::None => ".tar",
        }
    }

    /// Wrap a writer so that bytes written are compressed.
    fn encoder(&self, writer: std::fs::File) -> Box<dyn FinishWrite> {
        match self {
            Self::Xz => Box::new(xz2::write::XzEncoder::new(writer, 6)),
            Self::Gzip => Box::new(
                flate2::GzBuilder::new()
                    .mtime(0)
                    .write(writer, flate2::Compression::default()),
            ),
            Self::Bzip2 => Box::new(bzip2::write::BzEncoder::new(
                writer,
                bzip2::Compression::best(),
            )),
            Self::None => Box::new(writer),
        }
    }
}

impl FromStr for ArchiveCompression {
    type Err = RuntimeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "xz" => Ok(Self::Xz),
            "gz" => Ok(Self::Gzip),
            "bz2" => Ok(Self::Bzip2),
            "none" => Ok(Self::None),
            _ => Err(RuntimeError::Other(format!("unknown compression: {}", s))),
        }
    }
}

/// A writer whose trailing bytes are only flushed by an explicit finish.
trait FinishWrite: Write {
    fn finish_write(self: Box<Self>) -> std::io::Result<()>;
}

impl<W: Write> FinishWrite for xz2::write::XzEncoder<W> {
    fn finish_write(self: Box<Self>) -> std::io::Result<()> {
        self.finish()?.flush()
    }
}

impl<W: Write> FinishWrite for flate2::write::GzEncoder<W> {
    fn finish_write(self: Box<Self>) -> std::io::Result<()> {
        self.finish()?.flush()
    }
}

impl<W: Write> FinishWrite for bzip2::write::BzEncoder<W> {
    fn finish_write(self: Box<Self>) -> std::io::Result<()> {
        self.finish()?.flush()
    }
}

impl FinishWrite for std::fs::File {
    fn finish_write(mut self: Box<Self>) -> std::io::Result<()> {
        self.flush()
    }
}

/// Paths under `root`, relative to it, sorted bytewise.
///
/// `root` itself is not included and symlinks are not followed.
pub fn archive_members(root: &Path) -> Result<Vec<PathBuf>> {
    let mut members = vec![];

    for entry in WalkDir::new(root).min_depth(1).follow_links(false) {
        let entry = entry?;
        let rel = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| RuntimeError::Other(format!("{}", e)))?;
        members.push(rel.to_path_buf());
    }

    members.sort_by(|a, b| a.as_os_str().cmp(b.as_os_str()));

    Ok(members)
}

fn new_tar_header(metadata: &std::fs::Metadata, reference_time: i64) -> Result<tar::Header> {
    let mut header = tar::Header::new_gnu();
    header.set_mode(metadata.mode() & 0o7777);
    header.set_uid(ARCHIVE_UID);
    header.set_gid(ARCHIVE_UID);
    header.set_username(ARCHIVE_USER)?;
    header.set_groupname(ARCHIVE_GROUP)?;
    header.set_mtime(metadata.mtime().min(reference_time).max(0) as u64);

    Ok(header)
}

/// Write the tree under `root` into a compressed tar at `dest`.
pub fn write_archive(
    root: &Path,
    dest: &Path,
    compression: ArchiveCompression,
    reference_time: DateTime<Utc>,
) -> Result<()> {
    info!("Creating archive {}...", dest.display());

    let fh = std::fs::File::create(dest)?;
    let mut builder = tar::Builder::new(compression.encoder(fh));
    let reference_time = reference_time.timestamp();

    // (device, inode) of multiply linked files to their first member name.
    let mut hard_links: HashMap<(u64, u64), PathBuf> = HashMap::new();

    for rel in archive_members(root)? {
        let path = root.join(&rel);
        let name = Path::new(ARCHIVE_PREFIX).join(&rel);
        let metadata = std::fs::symlink_metadata(&path)?;
        let mut header = new_tar_header(&metadata, reference_time)?;
        let file_type = metadata.file_type();

        debug!("archiving {}", name.display());

        if file_type.is_symlink() {
            let target = std::fs::read_link(&path)?;
            header.set_entry_type(tar::EntryType::Symlink);
            header.set_size(0);
            builder.append_link(&mut header, &name, &target)?;
        } else if file_type.is_dir() {
            header.set_entry_type(tar::EntryType::Directory);
            header.set_size(0);
            builder.append_data(&mut header, &name, std::io::empty())?;
        } else if file_type.is_file() && metadata.nlink() > 1 {
            let key = (metadata.dev(), metadata.ino());

            if let Some(first) = hard_links.get(&key) {
                header.set_entry_type(tar::EntryType::Link);
                header.set_size(0);
                builder.append_link(&mut header, &name, first)?;
            } else {
                header.set_entry_type(tar::EntryType::Regular);
                header.set_size(metadata.len());
                builder.append_data(&mut header, &name, std::fs::File::open(&path)?)?;
                hard_links.insert(key, name);
            }
        } else if file_type.is_file() {
            header.set_entry_type(tar::EntryType::Regular);
            header.set_size(metadata.len());
            builder.append_data(&mut header, &name, std::fs::File::open(&path)?)?;
        } else {
            return Err(RuntimeError::Other(format!(
                "cannot archive special file {}",
                path.display()
            )));
        }
    }

    builder.into_inner()?.finish_write()?;

    Ok(())
}

fn file_name_str(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Write `ARCHIVE.checksum` next to an archive and return the archive's MD5.
pub fn write_checksum(archive: &Path) -> Result<String> {
    let md5 = md5_file_hex(archive)?;
    let mut checksum = archive.as_os_str().to_os_string();
    checksum.push(".checksum");

    info!("Creating archive checksum {}...", Path::new(&checksum).display());
    std::fs::write(&checksum, format!("{}  {}\n", md5, file_name_str(archive)))?;

    Ok(md5)
}

fn suffixed(prefix: &Path, suffix: &str) -> PathBuf {
    let mut s = prefix.as_os_str().to_os_string();
    s.push(suffix);
    PathBuf::from(s)
}

/// Split an archive into `PREFIX.EXT.partN` files of [SPLIT_PART_SIZE].
///
/// `PREFIX.checksum` receives `md5` under the name `basename(PREFIX).EXT`.
/// Returns the paths of the parts.
pub fn split_archive(archive: &Path, prefix: &Path, extension: &str, md5: &str) -> Result<Vec<PathBuf>> {
    split_archive_with_size(archive, prefix, extension, md5, SPLIT_PART_SIZE)
}

pub fn split_archive_with_size(
    archive: &Path,
    prefix: &Path,
    extension: &str,
    md5: &str,
    part_size: u64,
) -> Result<Vec<PathBuf>> {
    let mut reader = BufReader::new(std::fs::File::open(archive)?);
    let mut parts = vec![];

    loop {
        let part = suffixed(prefix, &format!("{}.part{}", extension, parts.len()));
        let mut writer = std::fs::File::create(&part)?;
        std::io::copy(&mut (&mut reader).take(part_size), &mut writer)?;
        parts.push(part);

        if reader.fill_buf()?.is_empty() {
            break;
        }
    }

    while parts.len() < SPLIT_MIN_PARTS {
        let part = suffixed(prefix, &format!("{}.part{}", extension, parts.len()));
        std::fs::File::create(&part)?;
        parts.push(part);
    }

    info!("Split {} into {} parts", archive.display(), parts.len());

    std::fs::write(
        suffixed(prefix, ".checksum"),
        format!("{}  {}{}\n", md5, file_name_str(prefix), extension),
    )?;

    Ok(parts)
}

/// Where an archive and its companion files go.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ArchiveLayout {
    /// The archive file itself.
    pub archive: PathBuf,
    /// Directory receiving manifests and `_latest` links, if any.
    pub directory: Option<PathBuf>,
}

impl ArchiveLayout {
    /// Resolve the `--archive` destination.
    ///
    /// An existing directory or a path ending in `/` is a directory, created
    /// if needed, that receives `NAME_VERSION.EXT`. Anything else is the
    /// archive filename.
    pub fn resolve(dest: &str, name_version: &str, compression: ArchiveCompression) -> Result<Self> {
        let path = PathBuf::from(dest);

        if path.is_dir() || dest.ends_with('/') {
            std::fs::create_dir_all(&path)?;

            Ok(Self {
                archive: path.join(format!("{}{}", name_version, compression.extension())),
                directory: Some(path),
            })
        } else {
            Ok(Self {
                archive: path,
                directory: None,
            })
        }
    }
}

/// Write `NAME_VERSION.sources.list`, dating each source line.
pub fn write_sources_list(
    dir: &Path,
    name_version: &str,
    sources: &[(&AptSource, DateTime<Utc>)],
) -> Result<PathBuf> {
    let path = dir.join(format!("{}.sources.list", name_version));

    let content = sources
        .iter()
        .map(|(source, date)| format!("{}\n{}\n", date.format("# as of %Y-%m-%d %H:%M:%S"), source))
        .collect::<String>();
    std::fs::write(&path, content)?;

    Ok(path)
}

/// Copy the manifests at the root of a runtime tree next to its archive.
///
/// Each copy is named `NAME_VERSION.FILE`.
pub fn copy_manifests(output: &Path, dir: &Path, name_version: &str, with_sources: bool) -> Result<()> {
    info!("Copying manifest files to {}...", dir.display());

    let mut files = vec![
        output.join(MANIFEST_TXT),
        output.join(BUILT_USING_TXT),
        output.join(MANIFEST_DEB822_GZ),
    ];
    if with_sources {
        files.push(output.join("source").join(SOURCES_TXT));
        files.push(output.join("source").join(SOURCES_DEB822_GZ));
    }

    for file in files {
        let dest = dir.join(format!("{}.{}", name_version, file_name_str(&file)));
        std::fs::copy(&file, &dest).map_err(|e| RuntimeError::RepositoryIoPath(file.display().to_string(), e))?;
    }

    Ok(())
}

fn replace_symlink(target: &str, link: &Path) -> Result<()> {
    if std::fs::symlink_metadata(link).is_ok() {
        std::fs::remove_file(link)?;
    }
    symlink(target, link)?;

    Ok(())
}

/// Point `NAME_latest.EXT` and its `.checksum` at an archive in the same directory.
pub fn link_latest(dir: &Path, name: &str, archive: &Path, extension: &str) -> Result<PathBuf> {
    let link = dir.join(format!("{}_latest{}", name, extension));
    info!("Creating symlink {}...", link.display());

    let target = file_name_str(archive);
    replace_symlink(&target, &link)?;
    replace_symlink(&format!("{}.checksum", target), &suffixed(&link, ".checksum"))?;

    Ok(link)
}
