// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! APT repositories on a local filesystem. */

use {
    crate::{
        error::{Result, RuntimeError},
        io::DataResolver,
    },
    async_trait::async_trait,
    futures::{io::BufReader, AsyncBufRead},
    std::{
        path::{Path, PathBuf},
        pin::Pin,
    },
    url::Url,
};

/// A readable interface to an APT repository rooted at a local directory.
#[derive(Clone, Debug)]
pub struct FilesystemRepositoryReader {
    root_dir: PathBuf,
}

impl FilesystemRepositoryReader {
    /// Construct a new instance, bound to the root directory specified.
    ///
    /// No validation of the passed path is performed.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            root_dir: path.as_ref().to_path_buf(),
        }
    }

    /// Construct an instance from a `file://` URL.
    pub fn from_url(url: &Url) -> Result<Self> {
        let path = url
            .to_file_path()
            .map_err(|_| RuntimeError::RepositoryUnsupportedUrl(url.to_string()))?;

        Ok(Self::new(path))
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }
}

#[async_trait]
impl DataResolver for FilesystemRepositoryReader {
    async fn get_path(&self, path: &str) -> Result<Pin<Box<dyn AsyncBufRead + Send>>> {
        let path = self.root_dir.join(path);

        let f = std::fs::File::open(&path)
            .map_err(|e| RuntimeError::RepositoryIoPath(format!("{}", path.display()), e))?;

        Ok(Box::pin(BufReader::new(futures::io::AllowStdIo::new(f))))
    }
}

#[cfg(test)]
mod tests {
    use {super::*, futures::AsyncReadExt};

    #[tokio::test]
    async fn read_and_download() -> Result<()> {
        let td = tempfile::tempdir()?;
        let root = td.path().join("repo");
        std::fs::create_dir_all(root.join("pool"))?;
        std::fs::write(root.join("pool/foo.deb"), b"not really a deb")?;

        let reader = FilesystemRepositoryReader::from_url(&Url::from_directory_path(&root).unwrap())?;
        assert_eq!(reader.root_dir(), root.as_path());

        let mut content = String::new();
        reader
            .get_path("pool/foo.deb")
            .await?
            .read_to_string(&mut content)
            .await?;
        assert_eq!(content, "not really a deb");

        assert!(matches!(
            reader.get_path("pool/missing.deb").await,
            Err(RuntimeError::RepositoryIoPath(_, _))
        ));

        let dest = td.path().join("cache/foo.deb");
        assert!(reader.download_to_path("pool/foo.deb", &dest).await?);
        assert_eq!(std::fs::read(&dest)?, b"not really a deb");

        // A non-empty existing file is never fetched again.
        std::fs::write(&dest, b"cached")?;
        assert!(!reader.download_to_path("pool/foo.deb", &dest).await?);
        assert_eq!(std::fs::read(&dest)?, b"cached");

        // An empty file is treated as an interrupted download.
        std::fs::write(&dest, b"")?;
        assert!(reader.download_to_path("pool/foo.deb", &dest).await?);
        assert_eq!(std::fs::read(&dest)?, b"not really a deb");

        Ok(())
    }
}
