//! Error taxonomy for a mirror run.
//!
//! - [`FetchError`]: anything that goes wrong reading from the source site. Fatal at
//!   sitemap level, skipped and counted at page or PDF level.
//! - [`RemoteServiceError`]: auth or API failures talking to the destination. Fatal while
//!   establishing the baseline listing, retried and then skipped per item.
//! - [`ConfigError`]: missing or invalid configuration, raised before any network call.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("{url} returned an empty body")]
    EmptyBody { url: String },

    #[error("sitemap at {url} is not well-formed XML: {message}")]
    MalformedSitemap { url: String, message: String },

    #[error("failed to stage {url} on disk: {source}")]
    Io {
        url: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum RemoteServiceError {
    #[error("authorization failed: {0}")]
    Auth(String),

    #[error("API returned HTTP {status}: {message}")]
    Api { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected response: {0}")]
    Decode(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RemoteServiceError {
    /// Whether repeating the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            RemoteServiceError::Transport(_) => true,
            RemoteServiceError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for RemoteServiceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            RemoteServiceError::Decode(e.to_string())
        } else {
            RemoteServiceError::Transport(e.to_string())
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config YAML: {0}")]
    Parse(String),

    #[error("missing required setting `{0}`")]
    Missing(&'static str),

    #[error("invalid setting `{field}`: {message}")]
    Invalid { field: &'static str, message: String },
}
