#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pdf_mirror::config::{
    DestinationConfig, DownloadConfig, FullWipePolicy, MirrorConfig, SourceConfig, SyncSettings,
};
use pdf_mirror::contract::{MockPageFetcher, MockRemoteStore, RemoteItem};
use pdf_mirror::error::{FetchError, RemoteServiceError};
use pdf_mirror::retry::RetryPolicy;
use url::Url;

pub const SITEMAP: &str = "https://example.com/sitemap.xml";

pub fn config(download_dir: PathBuf) -> MirrorConfig {
    MirrorConfig {
        source: SourceConfig {
            sitemap_url: Url::parse(SITEMAP).unwrap(),
            locale: Some("en-US".to_string()),
        },
        download: DownloadConfig {
            dir: download_dir,
            request_timeout: Duration::from_secs(5),
        },
        destination: DestinationConfig {
            folder_name: "Mirror".to_string(),
            client_secret_path: PathBuf::from("credentials.json"),
            token_cache_path: PathBuf::from("token.json"),
            interactive_consent: false,
        },
        sync: SyncSettings {
            concurrency: 2,
            retry: RetryPolicy {
                max_attempts: 3,
                initial_backoff: Duration::ZERO,
                max_backoff: Duration::ZERO,
            },
            full_wipe: FullWipePolicy::Warn,
            deadline: None,
            dry_run: false,
        },
    }
}

pub fn urlset(locs: &[&str]) -> String {
    let entries: String = locs
        .iter()
        .map(|loc| format!("<url><loc>{loc}</loc></url>"))
        .collect();
    format!(r#"<?xml version="1.0" encoding="UTF-8"?><urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">{entries}</urlset>"#)
}

/// A fake site: text documents by URL, PDF bodies by URL. Anything else is a 404.
pub fn site(texts: &[(&str, String)], pdfs: &[(&str, &[u8])]) -> MockPageFetcher {
    let texts: HashMap<String, String> = texts
        .iter()
        .map(|(url, body)| (url.to_string(), body.clone()))
        .collect();
    let pdfs: HashMap<String, Vec<u8>> = pdfs
        .iter()
        .map(|(url, body)| (url.to_string(), body.to_vec()))
        .collect();

    let mut fetcher = MockPageFetcher::new();
    fetcher.expect_get_text().returning(move |url: &Url| {
        texts.get(url.as_str()).cloned().ok_or_else(|| FetchError::Status {
            url: url.to_string(),
            status: 404,
        })
    });
    fetcher.expect_get_bytes().returning(move |url: &Url| {
        pdfs.get(url.as_str()).cloned().ok_or_else(|| FetchError::Status {
            url: url.to_string(),
            status: 404,
        })
    });
    fetcher
}

pub fn item(name: &str, id: &str) -> RemoteItem {
    RemoteItem {
        name: name.to_string(),
        id: id.to_string(),
    }
}

/// Calls recorded by [`folder`].
#[derive(Default)]
pub struct Recorded {
    pub uploads: Vec<String>,
    pub deletes: Vec<String>,
}

/// A store whose folder "folder-1" already exists and holds `existing`.
/// Uploads named in `failing_uploads` always fail with a permanent error.
pub fn folder(
    existing: Vec<RemoteItem>,
    failing_uploads: &[&str],
) -> (MockRemoteStore, Arc<Mutex<Recorded>>) {
    let recorded = Arc::new(Mutex::new(Recorded::default()));
    let failing: Vec<String> = failing_uploads.iter().map(|s| s.to_string()).collect();

    let mut store = MockRemoteStore::new();
    store
        .expect_find_folder()
        .returning(|_| Ok(Some("folder-1".to_string())));
    store.expect_create_folder().never();
    store
        .expect_list_children()
        .returning(move |_| Ok(existing.clone()));

    let uploads = recorded.clone();
    store
        .expect_upload_file()
        .returning(move |folder_id: &str, name: &str, path: &std::path::Path| {
            assert_eq!(folder_id, "folder-1");
            assert!(path.exists(), "staged file must exist during upload");
            if failing.iter().any(|f| f == name) {
                return Err(RemoteServiceError::Api {
                    status: 400,
                    message: "rejected".to_string(),
                });
            }
            uploads.lock().unwrap().uploads.push(name.to_string());
            Ok(item(name, &format!("new-{name}")))
        });

    let deletes = recorded.clone();
    store.expect_delete_item().returning(move |id: &str| {
        deletes.lock().unwrap().deletes.push(id.to_string());
        Ok(())
    });

    (store, recorded)
}

/// Collects the debug rendering of every emitted tracing event.
pub struct EventCollector {
    pub events: Arc<Mutex<Vec<String>>>,
}

impl<S> tracing_subscriber::Layer<S> for EventCollector
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        self.events.lock().unwrap().push(format!("{event:?}"));
    }
}

/// Install an [`EventCollector`] for the current thread.
pub fn collect_events() -> (Arc<Mutex<Vec<String>>>, tracing::subscriber::DefaultGuard) {
    use tracing_subscriber::prelude::*;
    let events = Arc::new(Mutex::new(Vec::new()));
    let subscriber = tracing_subscriber::Registry::default().with(EventCollector {
        events: events.clone(),
    });
    let guard = tracing::subscriber::set_default(subscriber);
    (events, guard)
}
