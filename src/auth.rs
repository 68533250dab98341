//! Google OAuth2 for the Drive API.
//!
//! Access tokens are cached through a [`TokenStore`]. When the cached token has expired it
//! is refreshed; when there is no usable refresh token the installed-app consent flow runs
//! (browser + loopback listener), unless the authenticator was built non-interactive, in
//! which case the call fails so unattended runs never hang waiting for a browser.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::contract::TokenStore;
use crate::error::{ConfigError, RemoteServiceError};

const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";
const DEFAULT_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Tokens this close to expiry are treated as expired.
const EXPIRY_MARGIN_SECS: i64 = 300;

/// How long the consent flow waits for the browser redirect.
const CONSENT_TIMEOUT: Duration = Duration::from_secs(300);

/// OAuth client credentials as downloaded from the Google Cloud console.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecret {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_auth_uri() -> String {
    DEFAULT_AUTH_URI.to_string()
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// The console wraps the credentials in an `installed` or `web` object.
#[derive(Deserialize)]
struct ClientSecretFile {
    installed: Option<ClientSecret>,
    web: Option<ClientSecret>,
}

impl ClientSecret {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(json: &str) -> Result<Self, ConfigError> {
        let file: ClientSecretFile =
            serde_json::from_str(json).map_err(|e| ConfigError::Invalid {
                field: "client_secret_path",
                message: format!("not a client secret file: {e}"),
            })?;
        file.installed.or(file.web).ok_or(ConfigError::Invalid {
            field: "client_secret_path",
            message: "expected an `installed` or `web` client".to_string(),
        })
    }
}

/// Cached credential. Stored as JSON by [`FileTokenStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Unix timestamp (seconds).
    pub expires_at: Option<i64>,
}

impl StoredToken {
    pub fn is_fresh(&self, now: i64) -> bool {
        self.expires_at
            .map(|expires_at| expires_at > now + EXPIRY_MARGIN_SECS)
            .unwrap_or(false)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

impl TokenResponse {
    fn into_stored(self, previous_refresh: Option<String>) -> StoredToken {
        StoredToken {
            access_token: self.access_token,
            // Google omits the refresh token on refresh responses.
            refresh_token: self.refresh_token.or(previous_refresh),
            expires_at: self
                .expires_in
                .map(|secs| chrono::Utc::now().timestamp() + secs),
        }
    }
}

/// Token cache in a JSON file.
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Result<Option<StoredToken>, RemoteServiceError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str(&content) {
            Ok(token) => Ok(Some(token)),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Ignoring unreadable token cache");
                Ok(None)
            }
        }
    }

    fn save(&self, token: &StoredToken) -> Result<(), RemoteServiceError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(token)
            .map_err(|e| RemoteServiceError::Decode(e.to_string()))?;
        fs::write(&self.path, content)?;
        debug!(path = %self.path.display(), "Saved token cache");
        Ok(())
    }

    fn clear(&self) -> Result<(), RemoteServiceError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Supplies valid access tokens, refreshing or re-consenting as required.
pub struct Authenticator {
    secret: ClientSecret,
    store: Box<dyn TokenStore>,
    http: reqwest::Client,
    interactive: bool,
    current: Mutex<Option<StoredToken>>,
}

impl Authenticator {
    pub fn new(
        secret: ClientSecret,
        store: Box<dyn TokenStore>,
        http: reqwest::Client,
        interactive: bool,
    ) -> Self {
        Self {
            secret,
            store,
            http,
            interactive,
            current: Mutex::new(None),
        }
    }

    /// A valid access token for the Drive scope.
    pub async fn access_token(&self) -> Result<String, RemoteServiceError> {
        let mut current = self.current.lock().await;
        let now = chrono::Utc::now().timestamp();

        if current.is_none() {
            *current = self.store.load()?;
        }
        if let Some(token) = current.as_ref().filter(|t| t.is_fresh(now)) {
            return Ok(token.access_token.clone());
        }

        if let Some(refresh_token) = current.as_ref().and_then(|t| t.refresh_token.clone()) {
            match self.refresh(&refresh_token).await {
                Ok(token) => {
                    self.store.save(&token)?;
                    let access = token.access_token.clone();
                    *current = Some(token);
                    return Ok(access);
                }
                Err(e) => warn!(error = %e, "Token refresh failed"),
            }
        }

        if !self.interactive {
            return Err(RemoteServiceError::Auth(
                "no valid cached token; run `pdf-mirror login` to authorize".to_string(),
            ));
        }
        let token = self.consent().await?;
        self.store.save(&token)?;
        let access = token.access_token.clone();
        *current = Some(token);
        Ok(access)
    }

    /// Run the consent flow unconditionally and cache the result.
    pub async fn login(&self) -> Result<(), RemoteServiceError> {
        let token = self.consent().await?;
        self.store.save(&token)?;
        *self.current.lock().await = Some(token);
        Ok(())
    }

    pub async fn logout(&self) -> Result<(), RemoteServiceError> {
        self.store.clear()?;
        *self.current.lock().await = None;
        Ok(())
    }

    async fn refresh(&self, refresh_token: &str) -> Result<StoredToken, RemoteServiceError> {
        debug!("Refreshing access token");
        let response = self
            .http
            .post(&self.secret.token_uri)
            .form(&[
                ("client_id", self.secret.client_id.as_str()),
                ("client_secret", self.secret.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?;
        let token = read_token_response(response).await?;
        info!("Access token refreshed");
        Ok(token.into_stored(Some(refresh_token.to_string())))
    }

    async fn consent(&self) -> Result<StoredToken, RemoteServiceError> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let redirect_uri = format!("http://localhost:{port}");
        let auth_url = self.consent_url(&redirect_uri)?;

        println!("\n=== Google Drive authorization required ===");
        println!("If the browser doesn't open, visit: {auth_url}");
        if let Err(e) = open::that(auth_url.as_str()) {
            warn!(error = %e, "Failed to open browser");
        }

        let code = wait_for_code(listener, CONSENT_TIMEOUT).await?;
        let response = self
            .http
            .post(&self.secret.token_uri)
            .form(&[
                ("client_id", self.secret.client_id.as_str()),
                ("client_secret", self.secret.client_secret.as_str()),
                ("code", code.as_str()),
                ("grant_type", "authorization_code"),
                ("redirect_uri", redirect_uri.as_str()),
            ])
            .send()
            .await?;
        let token = read_token_response(response).await?;
        info!("Authorization granted");
        Ok(token.into_stored(None))
    }

    fn consent_url(&self, redirect_uri: &str) -> Result<Url, RemoteServiceError> {
        Url::parse_with_params(
            &self.secret.auth_uri,
            &[
                ("client_id", self.secret.client_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("response_type", "code"),
                ("scope", DRIVE_SCOPE),
                ("access_type", "offline"),
                ("prompt", "consent"),
            ],
        )
        .map_err(|e| RemoteServiceError::Auth(format!("invalid auth_uri: {e}")))
    }
}

async fn read_token_response(
    response: reqwest::Response,
) -> Result<TokenResponse, RemoteServiceError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(RemoteServiceError::Auth(format!(
            "token endpoint returned HTTP {}: {body}",
            status.as_u16()
        )));
    }
    Ok(response.json().await?)
}

/// Accept the loopback redirect and pull the authorization code out of it.
/// Gives up after `timeout` so an unattended run cannot hang on a browser nobody sees.
async fn wait_for_code(
    listener: TcpListener,
    timeout: Duration,
) -> Result<String, RemoteServiceError> {
    let (mut stream, _) = tokio::time::timeout(timeout, listener.accept())
        .await
        .map_err(|_| {
            RemoteServiceError::Auth(format!(
                "no authorization callback within {}s; run `pdf-mirror login` to authorize",
                timeout.as_secs()
            ))
        })??;
    let mut request_line = String::new();
    BufReader::new(&mut stream)
        .read_line(&mut request_line)
        .await?;

    let result = parse_callback(&request_line);
    let (status, body) = match &result {
        Ok(_) => ("200 OK", "Authorization complete. You can close this window."),
        Err(_) => ("400 Bad Request", "Authorization failed. Please try again."),
    };
    let reply = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/html\r\nConnection: close\r\n\r\n<html><body><h1>{body}</h1></body></html>"
    );
    stream.write_all(reply.as_bytes()).await.ok();
    result
}

/// Extract `code` from a request line like `GET /?code=...&scope=... HTTP/1.1`.
fn parse_callback(request_line: &str) -> Result<String, RemoteServiceError> {
    let target = request_line
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| RemoteServiceError::Auth("malformed callback request".to_string()))?;
    let url = Url::parse(&format!("http://localhost{target}"))
        .map_err(|e| RemoteServiceError::Auth(format!("malformed callback: {e}")))?;

    let mut code = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "error" => return Err(RemoteServiceError::Auth(format!("consent denied: {value}"))),
            _ => {}
        }
    }
    code.ok_or_else(|| RemoteServiceError::Auth("no authorization code received".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::MockTokenStore;

    fn secret() -> ClientSecret {
        ClientSecret::parse(
            r#"{"installed":{"client_id":"id","client_secret":"s","redirect_uris":["http://localhost"]}}"#,
        )
        .unwrap()
    }

    #[test]
    fn parses_installed_client_secret() {
        let secret = secret();
        assert_eq!(secret.client_id, "id");
        assert_eq!(secret.token_uri, DEFAULT_TOKEN_URI);
    }

    #[test]
    fn rejects_secret_without_client() {
        assert!(ClientSecret::parse(r#"{"other":{}}"#).is_err());
    }

    #[test]
    fn freshness_honours_margin() {
        let token = StoredToken {
            access_token: "a".into(),
            refresh_token: None,
            expires_at: Some(1_000),
        };
        assert!(token.is_fresh(1_000 - EXPIRY_MARGIN_SECS - 1));
        assert!(!token.is_fresh(1_000 - EXPIRY_MARGIN_SECS));
    }

    #[test]
    fn callback_code_extracted() {
        let code = parse_callback("GET /?code=4%2F0Ab&scope=drive HTTP/1.1\r\n").unwrap();
        assert_eq!(code, "4/0Ab");
        assert!(parse_callback("GET /?error=access_denied HTTP/1.1").is_err());
        assert!(parse_callback("GET /favicon.ico HTTP/1.1").is_err());
    }

    #[test]
    fn file_store_round_trip_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("nested/token.json"));
        assert_eq!(store.load().unwrap(), None);

        let token = StoredToken {
            access_token: "abc".into(),
            refresh_token: Some("r".into()),
            expires_at: Some(42),
        };
        store.save(&token).unwrap();
        assert_eq!(store.load().unwrap(), Some(token));

        store.clear().unwrap();
        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
    }

    #[tokio::test]
    async fn fresh_cached_token_used_without_network() {
        let mut store = MockTokenStore::new();
        store.expect_load().times(1).returning(|| {
            Ok(Some(StoredToken {
                access_token: "cached".into(),
                refresh_token: None,
                expires_at: Some(chrono::Utc::now().timestamp() + 3_600),
            }))
        });
        store.expect_save().never();

        let auth = Authenticator::new(secret(), Box::new(store), reqwest::Client::new(), false);
        assert_eq!(auth.access_token().await.unwrap(), "cached");
        // Second call is served from memory.
        assert_eq!(auth.access_token().await.unwrap(), "cached");
    }

    #[tokio::test]
    async fn consent_wait_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let err = wait_for_code(listener, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteServiceError::Auth(_)));
    }

    #[tokio::test]
    async fn consent_callback_yields_code() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let browser = tokio::spawn(async move {
            let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
            stream
                .write_all(b"GET /?code=abc&scope=drive HTTP/1.1\r\nHost: localhost\r\n\r\n")
                .await
                .unwrap();
            let mut reply = String::new();
            tokio::io::AsyncReadExt::read_to_string(&mut stream, &mut reply)
                .await
                .unwrap();
            reply
        });

        let code = wait_for_code(listener, Duration::from_secs(5)).await.unwrap();
        assert_eq!(code, "abc");
        assert!(browser.await.unwrap().starts_with("HTTP/1.1 200 OK"));
    }

    #[tokio::test]
    async fn non_interactive_without_token_fails() {
        let mut store = MockTokenStore::new();
        store.expect_load().returning(|| Ok(None));

        let auth = Authenticator::new(secret(), Box::new(store), reqwest::Client::new(), false);
        let err = auth.access_token().await.unwrap_err();
        assert!(matches!(err, RemoteServiceError::Auth(_)));
    }
}
