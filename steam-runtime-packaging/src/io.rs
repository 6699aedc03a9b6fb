// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! I/O helpers. */

use {
    crate::error::{Result, RuntimeError},
    async_compression::futures::bufread::GzipDecoder,
    async_trait::async_trait,
    digest::DynDigest,
    futures::{io::AllowStdIo, AsyncBufRead},
    std::{
        fmt::Formatter,
        io::Read,
        path::{Path, PathBuf},
        pin::Pin,
    },
};

/// A content digest advertised by an index.
#[derive(Clone, Eq, PartialEq)]
pub enum ContentDigest {
    Md5(Vec<u8>),
    Sha256(Vec<u8>),
}

impl std::fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Md5(data) => write!(f, "Md5({})", hex::encode(data)),
            Self::Sha256(data) => write!(f, "Sha256({})", hex::encode(data)),
        }
    }
}

impl ContentDigest {
    /// Create an MD5 instance from a hex digest.
    pub fn md5_hex(digest: &str) -> Result<Self> {
        Ok(Self::Md5(hex::decode(digest.trim())?))
    }

    /// Create a SHA-256 instance from a hex digest.
    pub fn sha256_hex(digest: &str) -> Result<Self> {
        Ok(Self::Sha256(hex::decode(digest.trim())?))
    }

    /// Create a new hasher of the same flavor as this digest.
    pub fn new_hasher(&self) -> Box<dyn DynDigest + Send> {
        match self {
            Self::Md5(_) => Box::new(md5::Md5::default()),
            Self::Sha256(_) => Box::new(sha2::Sha256::default()),
        }
    }

    /// Compute the digest of a file, using the same flavor as this digest.
    pub fn compute_file(&self, path: &Path) -> Result<Self> {
        let digest = hash_file(path, self.new_hasher())?;

        Ok(match self {
            Self::Md5(_) => Self::Md5(digest),
            Self::Sha256(_) => Self::Sha256(digest),
        })
    }

    /// Whether the file at `path` has this digest.
    pub fn matches_file(&self, path: &Path) -> Result<bool> {
        Ok(&self.compute_file(path)? == self)
    }
}

fn hash_file(path: &Path, mut hasher: Box<dyn DynDigest + Send>) -> Result<Vec<u8>> {
    let mut fh = std::fs::File::open(path)?;
    let mut buf = vec![0u8; 1024 * 1024];

    loop {
        let count = fh.read(&mut buf)?;
        if count == 0 {
            break;
        }
        hasher.update(&buf[0..count]);
    }

    Ok(hasher.finalize().to_vec())
}

/// Hex MD5 digest of a file.
pub fn md5_file_hex(path: &Path) -> Result<String> {
    Ok(hex::encode(hash_file(path, Box::new(md5::Md5::default()))?))
}

/// Reject relative paths that could escape the directory they are joined to.
pub fn check_path_traversal(s: &str) -> Result<()> {
    if s.contains("..") || s.starts_with('/') {
        Err(RuntimeError::PathTraversal(s.to_string()))
    } else {
        Ok(())
    }
}

/// Resolves paths relative to some base (a repository root) to readable content.
#[async_trait]
pub trait DataResolver: Sync + Send {
    /// Get the raw content of a relative path.
    async fn get_path(&self, path: &str) -> Result<Pin<Box<dyn AsyncBufRead + Send>>>;

    /// Get the content of a relative path, gunzipping it if the path ends in `.gz`.
    async fn get_path_decoded(&self, path: &str) -> Result<Pin<Box<dyn AsyncBufRead + Send>>> {
        let reader = self.get_path(path).await?;

        Ok(if path.ends_with(".gz") {
            Box::pin(futures::io::BufReader::new(GzipDecoder::new(reader)))
        } else {
            reader
        })
    }

    /// Copy a relative path to a local file.
    ///
    /// Nothing is fetched if `dest` already exists and is non-empty; `Ok(false)`
    /// is returned in that case. Content is written to a sibling `.partial`
    /// file first so an interrupted transfer is never mistaken for a
    /// complete one.
    async fn download_to_path(&self, path: &str, dest: &Path) -> Result<bool> {
        if let Ok(metadata) = std::fs::metadata(dest) {
            if metadata.len() > 0 {
                return Ok(false);
            }
        }

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut partial = PathBuf::from(dest);
        partial.as_mut_os_string().push(".partial");

        let reader = self.get_path(path).await?;
        let mut writer = AllowStdIo::new(std::fs::File::create(&partial)?);
        futures::io::copy(reader, &mut writer)
            .await
            .map_err(|e| RuntimeError::RepositoryIoPath(path.to_string(), e))?;
        drop(writer);

        std::fs::rename(&partial, dest)?;

        Ok(true)
    }
}
