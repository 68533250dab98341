use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use crate::retry::RetryPolicy;

/// Validated configuration for a mirror run. Built by [`crate::load_config::load_config`].
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    pub source: SourceConfig,
    pub download: DownloadConfig,
    pub destination: DestinationConfig,
    pub sync: SyncSettings,
}

/// Where the PDFs are discovered.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub sitemap_url: Url,
    /// Locale path segment pages must carry, e.g. `en-US`. `None` keeps every page.
    pub locale: Option<String>,
}

/// Local staging of downloaded PDFs.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub dir: PathBuf,
    pub request_timeout: Duration,
}

/// The Drive folder and the credentials used to reach it.
#[derive(Debug, Clone)]
pub struct DestinationConfig {
    pub folder_name: String,
    pub client_secret_path: PathBuf,
    pub token_cache_path: PathBuf,
    /// Allow the browser consent flow when no usable token is cached.
    pub interactive_consent: bool,
}

#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Upper bound on concurrent page fetches, downloads, uploads and deletes.
    pub concurrency: usize,
    pub retry: RetryPolicy,
    pub full_wipe: FullWipePolicy,
    /// Stop issuing network operations once this much time has passed.
    pub deadline: Option<Duration>,
    /// Report the plan without downloading or mutating the folder.
    pub dry_run: bool,
}

/// What to do when discovery found nothing but the folder still has items.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FullWipePolicy {
    /// Log a warning and delete everything.
    #[default]
    Warn,
    /// Abort the run without touching the folder.
    Refuse,
}

impl MirrorConfig {
    pub fn trace_loaded(&self) {
        info!(
            sitemap_url = %self.source.sitemap_url,
            locale = self.source.locale.as_deref().unwrap_or("*"),
            download_dir = %self.download.dir.display(),
            folder = %self.destination.folder_name,
            concurrency = self.sync.concurrency,
            dry_run = self.sync.dry_run,
            "Loaded MirrorConfig"
        );
        debug!(?self, "Config loaded (full debug)");
    }
}
