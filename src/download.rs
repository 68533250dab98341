//! HTTP reads from the source site and staging of PDFs on local disk.
//!
//! A staged PDF lives in a [`tempfile::NamedTempFile`] owned by [`FetchedPdf`]; dropping the
//! value removes the file, whatever happened to the upload.

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tracing::{debug, error, info};
use url::Url;

use crate::contract::{PageFetcher, PdfReference};
use crate::error::FetchError;

/// [`PageFetcher`] over a shared `reqwest` client.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("pdf-mirror/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    async fn get(&self, url: &Url) -> Result<reqwest::Response, FetchError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| FetchError::Transport {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn get_text(&self, url: &Url) -> Result<String, FetchError> {
        self.get(url)
            .await?
            .text()
            .await
            .map_err(|e| FetchError::Transport {
                url: url.to_string(),
                message: e.to_string(),
            })
    }

    async fn get_bytes(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
        let bytes = self
            .get(url)
            .await?
            .bytes()
            .await
            .map_err(|e| FetchError::Transport {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        Ok(bytes.to_vec())
    }
}

/// A downloaded PDF staged on disk until it has been uploaded.
#[derive(Debug)]
pub struct FetchedPdf {
    pub reference: PdfReference,
    pub size: usize,
    file: NamedTempFile,
}

impl FetchedPdf {
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

/// Download `reference` into a temp file inside `dir`.
///
/// An empty body is an error: uploading it would replace a good remote copy with nothing.
pub async fn fetch_pdf<F>(
    fetcher: &F,
    reference: &PdfReference,
    dir: &Path,
) -> Result<FetchedPdf, FetchError>
where
    F: PageFetcher + ?Sized,
{
    debug!(url = %reference.url, "Downloading PDF");
    let bytes = fetcher.get_bytes(&reference.url).await?;
    if bytes.is_empty() {
        error!(url = %reference.url, "PDF body was empty");
        return Err(FetchError::EmptyBody {
            url: reference.url.to_string(),
        });
    }

    let io_err = |source| FetchError::Io {
        url: reference.url.to_string(),
        source,
    };
    let mut file = tempfile::Builder::new()
        .prefix("pdf-")
        .suffix(".pdf")
        .tempfile_in(dir)
        .map_err(io_err)?;
    file.write_all(&bytes).map_err(io_err)?;
    file.flush().map_err(io_err)?;

    info!(
        url = %reference.url,
        file = %reference.file_name,
        size = bytes.len(),
        "Downloaded PDF"
    );
    Ok(FetchedPdf {
        reference: reference.clone(),
        size: bytes.len(),
        file,
    })
}
