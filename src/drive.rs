#![doc = "Google Drive v3 implementation of the RemoteStore contract."]
//
//! # Drive client
//!
//! Wraps the handful of Drive REST calls the mirror needs: folder lookup and creation,
//! paginated child listing, multipart upload and delete. Every request carries a bearer
//! token obtained from [`Authenticator`], which handles refresh and consent.
//!
//! Construct with [`DriveClient::authorized`]; no network traffic happens until the first
//! call.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::auth::{Authenticator, ClientSecret, FileTokenStore};
use crate::contract::{RemoteItem, RemoteStore};
use crate::error::{ConfigError, RemoteServiceError};

const FOLDER_MIME: &str = "application/vnd.google-apps.folder";
const FILES_URL: &str = "https://www.googleapis.com/drive/v3/files";
const UPLOAD_URL: &str = "https://www.googleapis.com/upload/drive/v3/files";
const PAGE_SIZE: u32 = 1000;

pub struct DriveClient {
    http: reqwest::Client,
    auth: Authenticator,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<RemoteItem>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreatedFile {
    id: String,
}

impl DriveClient {
    pub fn new(http: reqwest::Client, auth: Authenticator) -> Self {
        Self { http, auth }
    }

    /// Build a client from a client-secret file and a token cache path.
    pub fn authorized(
        client_secret_path: &Path,
        token_cache_path: &Path,
        interactive: bool,
        timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let secret = ClientSecret::from_file(client_secret_path)?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::Invalid {
                field: "request_timeout_secs",
                message: e.to_string(),
            })?;
        let store = FileTokenStore::new(token_cache_path);
        let auth = Authenticator::new(secret, Box::new(store), http.clone(), interactive);
        Ok(Self::new(http, auth))
    }

    pub fn authenticator(&self) -> &Authenticator {
        &self.auth
    }

    async fn search(&self, query: &str, page_token: Option<&str>) -> Result<FileList, RemoteServiceError> {
        let token = self.auth.access_token().await?;
        let page_size = PAGE_SIZE.to_string();
        let mut params = vec![
            ("q", query),
            ("spaces", "drive"),
            ("fields", "nextPageToken, files(id, name)"),
            ("orderBy", "createdTime"),
            ("pageSize", page_size.as_str()),
        ];
        if let Some(page_token) = page_token {
            params.push(("pageToken", page_token));
        }
        let response = self
            .http
            .get(FILES_URL)
            .bearer_auth(token)
            .query(&params)
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }
}

/// Map non-success statuses to [`RemoteServiceError::Api`] with the response body.
async fn check(response: reqwest::Response) -> Result<reqwest::Response, RemoteServiceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(RemoteServiceError::Api {
        status: status.as_u16(),
        message,
    })
}

/// Quote a value for a Drive search query.
pub fn escape_query_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Body for a `multipart/related` upload: JSON metadata part followed by the file bytes.
pub fn multipart_related_body(boundary: &str, metadata: &serde_json::Value, content: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(content.len() + 512);
    body.extend_from_slice(
        format!("--{boundary}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata}\r\n")
            .as_bytes(),
    );
    body.extend_from_slice(format!("--{boundary}\r\nContent-Type: application/pdf\r\n\r\n").as_bytes());
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

#[async_trait]
impl RemoteStore for DriveClient {
    async fn find_folder(&self, name: &str) -> Result<Option<String>, RemoteServiceError> {
        let query = format!(
            "mimeType='{FOLDER_MIME}' and name='{}' and trashed=false",
            escape_query_value(name)
        );
        let list = self.search(&query, None).await?;
        Ok(list.files.into_iter().next().map(|f| f.id))
    }

    async fn create_folder(&self, name: &str) -> Result<String, RemoteServiceError> {
        let token = self.auth.access_token().await?;
        let response = self
            .http
            .post(FILES_URL)
            .bearer_auth(token)
            .query(&[("fields", "id")])
            .json(&json!({ "name": name, "mimeType": FOLDER_MIME }))
            .send()
            .await?;
        let created: CreatedFile = check(response).await?.json().await?;
        Ok(created.id)
    }

    async fn list_children(&self, folder_id: &str) -> Result<Vec<RemoteItem>, RemoteServiceError> {
        let query = format!("'{}' in parents and trashed=false", escape_query_value(folder_id));
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let page = self.search(&query, page_token.as_deref()).await?;
            items.extend(page.files);
            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }
        debug!(folder_id, items = items.len(), "Listed folder children");
        Ok(items)
    }

    async fn upload_file(
        &self,
        folder_id: &str,
        name: &str,
        path: &Path,
    ) -> Result<RemoteItem, RemoteServiceError> {
        let content = tokio::fs::read(path).await?;
        let metadata = json!({ "name": name, "parents": [folder_id] });
        let boundary = format!("pdf-mirror-{}", uuid::Uuid::new_v4().simple());
        let body = multipart_related_body(&boundary, &metadata, &content);

        let token = self.auth.access_token().await?;
        let response = self
            .http
            .post(UPLOAD_URL)
            .bearer_auth(token)
            .query(&[("uploadType", "multipart"), ("fields", "id, name")])
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={boundary}"),
            )
            .body(body)
            .send()
            .await?;
        let item: RemoteItem = check(response).await?.json().await?;
        info!(file = %item.name, id = %item.id, size = content.len(), "Uploaded to Drive");
        Ok(item)
    }

    async fn delete_item(&self, item_id: &str) -> Result<(), RemoteServiceError> {
        let token = self.auth.access_token().await?;
        let response = self
            .http
            .delete(format!("{FILES_URL}/{}", urlencoding::encode(item_id)))
            .bearer_auth(token)
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            debug!(id = item_id, "Item already gone");
            return Ok(());
        }
        check(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_quotes_in_queries() {
        assert_eq!(escape_query_value("Bob's PDFs"), "Bob\\'s PDFs");
        assert_eq!(escape_query_value(r"a\b"), r"a\\b");
    }

    #[test]
    fn multipart_body_layout() {
        let metadata = json!({ "name": "x.pdf" });
        let body = multipart_related_body("B", &metadata, b"%PDF");
        let text = String::from_utf8(body).unwrap();
        assert_eq!(
            text,
            "--B\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{\"name\":\"x.pdf\"}\r\n\
             --B\r\nContent-Type: application/pdf\r\n\r\n%PDF\r\n--B--\r\n"
        );
    }

    #[test]
    fn file_list_decodes_without_token() {
        let list: FileList =
            serde_json::from_str(r#"{"files":[{"id":"1","name":"a.pdf"}]}"#).unwrap();
        assert_eq!(list.files, vec![RemoteItem { name: "a.pdf".into(), id: "1".into() }]);
        assert!(list.next_page_token.is_none());
    }
}
