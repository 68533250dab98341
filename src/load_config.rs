/// `load_config` module: reads the optional YAML config file, overlays environment
/// variables, applies defaults and validates the result into a [`MirrorConfig`].
///
/// This is the only place where untrusted configuration is parsed. Every failure is a
/// [`ConfigError`] raised before any network call is made.
///
/// # Environment overrides
/// | variable                    | setting                          |
/// |-----------------------------|----------------------------------|
/// | `PDF_MIRROR_SITEMAP_URL`    | `source.sitemap_url`             |
/// | `PDF_MIRROR_LOCALE`         | `source.locale`                  |
/// | `PDF_MIRROR_DOWNLOAD_DIR`   | `download.dir`                   |
/// | `PDF_MIRROR_FOLDER_NAME`    | `destination.folder_name`        |
/// | `PDF_MIRROR_CLIENT_SECRET`  | `destination.client_secret_path` |
/// | `PDF_MIRROR_TOKEN_CACHE`    | `destination.token_cache_path`   |
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::{error, info};
use url::Url;

use crate::config::{
    DestinationConfig, DownloadConfig, FullWipePolicy, MirrorConfig, SourceConfig, SyncSettings,
};
use crate::error::ConfigError;
use crate::retry::RetryPolicy;

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawConfig {
    source: RawSource,
    download: RawDownload,
    destination: RawDestination,
    sync: RawSync,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawSource {
    sitemap_url: Option<String>,
    locale: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawDownload {
    dir: Option<PathBuf>,
    request_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawDestination {
    folder_name: Option<String>,
    client_secret_path: Option<PathBuf>,
    token_cache_path: Option<PathBuf>,
    interactive_consent: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawSync {
    concurrency: Option<usize>,
    max_attempts: Option<u32>,
    initial_backoff_ms: Option<u64>,
    full_wipe: Option<FullWipePolicy>,
    deadline_secs: Option<u64>,
    dry_run: Option<bool>,
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Load configuration from `path` (when given) and the environment.
pub fn load_config(path: Option<&Path>) -> Result<MirrorConfig, ConfigError> {
    let mut raw = match path {
        Some(path) => read_file(path)?,
        None => {
            info!("No config file given, using environment only");
            RawConfig::default()
        }
    };

    if let Some(v) = env_var("PDF_MIRROR_SITEMAP_URL") {
        raw.source.sitemap_url = Some(v);
    }
    if let Some(v) = env_var("PDF_MIRROR_LOCALE") {
        raw.source.locale = Some(v);
    }
    if let Some(v) = env_var("PDF_MIRROR_DOWNLOAD_DIR") {
        raw.download.dir = Some(v.into());
    }
    if let Some(v) = env_var("PDF_MIRROR_FOLDER_NAME") {
        raw.destination.folder_name = Some(v);
    }
    if let Some(v) = env_var("PDF_MIRROR_CLIENT_SECRET") {
        raw.destination.client_secret_path = Some(v.into());
    }
    if let Some(v) = env_var("PDF_MIRROR_TOKEN_CACHE") {
        raw.destination.token_cache_path = Some(v.into());
    }

    let config = validate(raw).inspect_err(|e| error!(error = %e, "Invalid configuration"))?;
    config.trace_loaded();
    Ok(config)
}

fn read_file(path: &Path) -> Result<RawConfig, ConfigError> {
    info!(config_path = ?path, "Loading configuration from file");
    let content = fs::read_to_string(path).map_err(|source| {
        error!(error = ?source, config_path = ?path, "Failed to read config file");
        ConfigError::Read {
            path: path.to_path_buf(),
            source,
        }
    })?;
    if content.trim().is_empty() {
        return Ok(RawConfig::default());
    }
    serde_yaml::from_str(&content).map_err(|e| {
        error!(error = ?e, config_path = ?path, "Failed to parse config YAML");
        ConfigError::Parse(e.to_string())
    })
}

fn validate(raw: RawConfig) -> Result<MirrorConfig, ConfigError> {
    let sitemap = raw
        .source
        .sitemap_url
        .ok_or(ConfigError::Missing("source.sitemap_url"))?;
    let sitemap_url = Url::parse(&sitemap).map_err(|e| ConfigError::Invalid {
        field: "source.sitemap_url",
        message: e.to_string(),
    })?;
    if !matches!(sitemap_url.scheme(), "http" | "https") {
        return Err(ConfigError::Invalid {
            field: "source.sitemap_url",
            message: format!("unsupported scheme `{}`", sitemap_url.scheme()),
        });
    }
    let locale = raw
        .source
        .locale
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty() && l != "*");

    let folder_name = raw
        .destination
        .folder_name
        .map(|f| f.trim().to_string())
        .filter(|f| !f.is_empty())
        .ok_or(ConfigError::Missing("destination.folder_name"))?;

    let client_secret_path = raw
        .destination
        .client_secret_path
        .unwrap_or_else(|| PathBuf::from("credentials.json"));
    if !client_secret_path.is_file() {
        return Err(ConfigError::Invalid {
            field: "destination.client_secret_path",
            message: format!("{} does not exist", client_secret_path.display()),
        });
    }

    let concurrency = raw.sync.concurrency.unwrap_or(4);
    if concurrency == 0 {
        return Err(ConfigError::Invalid {
            field: "sync.concurrency",
            message: "must be at least 1".to_string(),
        });
    }
    let request_timeout_secs = raw.download.request_timeout_secs.unwrap_or(60);
    if request_timeout_secs == 0 {
        return Err(ConfigError::Invalid {
            field: "download.request_timeout_secs",
            message: "must be at least 1".to_string(),
        });
    }
    let max_attempts = raw.sync.max_attempts.unwrap_or(3);
    if max_attempts == 0 {
        return Err(ConfigError::Invalid {
            field: "sync.max_attempts",
            message: "must be at least 1".to_string(),
        });
    }

    Ok(MirrorConfig {
        source: SourceConfig {
            sitemap_url,
            locale,
        },
        download: DownloadConfig {
            dir: raw.download.dir.unwrap_or_else(|| PathBuf::from("./downloads")),
            request_timeout: Duration::from_secs(request_timeout_secs),
        },
        destination: DestinationConfig {
            folder_name,
            client_secret_path,
            token_cache_path: raw
                .destination
                .token_cache_path
                .unwrap_or_else(|| PathBuf::from("token.json")),
            interactive_consent: raw.destination.interactive_consent.unwrap_or(true),
        },
        sync: SyncSettings {
            concurrency,
            retry: RetryPolicy {
                max_attempts,
                initial_backoff: Duration::from_millis(raw.sync.initial_backoff_ms.unwrap_or(500)),
                ..RetryPolicy::default()
            },
            full_wipe: raw.sync.full_wipe.unwrap_or_default(),
            deadline: raw.sync.deadline_secs.map(Duration::from_secs),
            dry_run: raw.sync.dry_run.unwrap_or(false),
        },
    })
}
