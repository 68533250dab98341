//! # contract: data model and the seams between pipeline stages
//!
//! The run driver talks to the outside world through three traits:
//! - [`PageFetcher`]: HTTP reads from the source site (sitemap, pages, PDFs)
//! - [`RemoteStore`]: the destination folder (find/create, list, upload, delete)
//! - [`TokenStore`]: persistence of the OAuth credential between runs
//!
//! All three are annotated for `mockall`, so tests can drive the pipeline without a
//! network. Mocks are exported behind the default `test-export-mocks` feature.

use std::path::Path;

use async_trait::async_trait;
use mockall::automock;
use url::Url;

use crate::auth::StoredToken;
use crate::error::{FetchError, RemoteServiceError};

/// A PDF discovered on the source site.
///
/// Ordered by URL first, so sets of references iterate deterministically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PdfReference {
    pub url: Url,
    /// Last path segment of `url`, percent-decoded. Sole comparison key against the remote.
    pub file_name: String,
}

impl PdfReference {
    /// Derives the file name from the last non-empty path segment.
    /// Returns `None` for URLs without one (e.g. `https://host/`).
    pub fn from_url(url: Url) -> Option<Self> {
        let segment = url
            .path_segments()?
            .filter(|s| !s.is_empty())
            .last()?
            .to_string();
        let file_name = urlencoding::decode(&segment)
            .map(|s| s.into_owned())
            .unwrap_or(segment);
        Some(PdfReference { url, file_name })
    }
}

/// An item currently stored in the destination folder.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Deserialize)]
pub struct RemoteItem {
    pub name: String,
    pub id: String,
}

/// Read access to the source site.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch a document as text (sitemap XML, HTML pages).
    async fn get_text(&self, url: &Url) -> Result<String, FetchError>;

    /// Fetch a document as raw bytes (PDF bodies).
    async fn get_bytes(&self, url: &Url) -> Result<Vec<u8>, FetchError>;
}

/// The destination folder service.
///
/// Implemented by [`crate::drive::DriveClient`] and by mocks in tests.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Look up a folder by name, returning its id if one exists.
    async fn find_folder(&self, name: &str) -> Result<Option<String>, RemoteServiceError>;

    /// Create a folder and return its id.
    async fn create_folder(&self, name: &str) -> Result<String, RemoteServiceError>;

    /// List the direct children of a folder.
    async fn list_children(&self, folder_id: &str) -> Result<Vec<RemoteItem>, RemoteServiceError>;

    /// Upload a local file into the folder as a new item named `name`.
    ///
    /// Does not look for an existing item with the same name.
    async fn upload_file(
        &self,
        folder_id: &str,
        name: &str,
        path: &Path,
    ) -> Result<RemoteItem, RemoteServiceError>;

    /// Delete an item. Deleting an item that no longer exists succeeds.
    async fn delete_item(&self, item_id: &str) -> Result<(), RemoteServiceError>;
}

/// Opaque credential cache. The pipeline never looks inside the stored token.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait TokenStore: Send + Sync {
    fn load(&self) -> Result<Option<StoredToken>, RemoteServiceError>;
    fn save(&self, token: &StoredToken) -> Result<(), RemoteServiceError>;
    fn clear(&self) -> Result<(), RemoteServiceError>;
}

/// Find the folder named `name`, creating it when absent.
pub async fn find_or_create_folder<S>(store: &S, name: &str) -> Result<String, RemoteServiceError>
where
    S: RemoteStore + ?Sized,
{
    if let Some(id) = store.find_folder(name).await? {
        tracing::debug!(folder = name, folder_id = %id, "Found existing destination folder");
        return Ok(id);
    }
    let id = store.create_folder(name).await?;
    tracing::info!(folder = name, folder_id = %id, "Created destination folder");
    Ok(id)
}
