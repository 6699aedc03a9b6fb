// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! APT repositories served over HTTP. */

use {
    crate::{
        error::{Result, RuntimeError},
        io::DataResolver,
    },
    async_trait::async_trait,
    futures::{stream::TryStreamExt, AsyncBufRead},
    reqwest::{Client, IntoUrl, Url},
    std::pin::Pin,
};

fn io_error(path: &str, message: String) -> RuntimeError {
    RuntimeError::RepositoryIoPath(
        path.to_string(),
        std::io::Error::new(std::io::ErrorKind::Other, message),
    )
}

async fn fetch_url(
    client: &Client,
    root_url: &Url,
    path: &str,
) -> Result<Pin<Box<dyn AsyncBufRead + Send>>> {
    let url = root_url.join(path)?;

    let res = client
        .get(url.clone())
        .send()
        .await
        .map_err(|e| io_error(url.as_str(), format!("error sending HTTP request: {:?}", e)))?;
    let res = res
        .error_for_status()
        .map_err(|e| io_error(url.as_str(), format!("bad HTTP status code: {:?}", e)))?;

    Ok(Box::pin(
        res.bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, format!("{:?}", e)))
            .into_async_read(),
    ))
}

/// Client for an APT repository served via HTTP.
///
/// Instances are bound to the URL that follows `deb` in a sources.list line,
/// e.g. `http://repo.steampowered.com/steamrt`.
#[derive(Debug)]
pub struct HttpRepositoryClient {
    client: Client,
    root_url: Url,
}

impl HttpRepositoryClient {
    /// Construct an instance bound to the specified URL.
    pub fn new(url: impl IntoUrl) -> Result<Self> {
        Self::new_client(Client::default(), url)
    }

    /// Construct an instance using the given [Client] and URL.
    pub fn new_client(client: Client, url: impl IntoUrl) -> Result<Self> {
        let mut root_url = url.into_url()?;

        // Url::join() replaces the final path segment unless it ends in a slash.
        if !root_url.path().ends_with('/') {
            root_url.set_path(&format!("{}/", root_url.path()));
        }

        Ok(Self { client, root_url })
    }

    pub fn root_url(&self) -> &Url {
        &self.root_url
    }
}

#[async_trait]
impl DataResolver for HttpRepositoryClient {
    async fn get_path(&self, path: &str) -> Result<Pin<Box<dyn AsyncBufRead + Send>>> {
        fetch_url(&self.client, &self.root_url, path).await
    }
}
