//! Link discovery: sitemap → locale-filtered pages → PDF links.
//!
//! The sitemap is the baseline for the whole run, so any failure to fetch or parse it
//! (including a child sitemap of a sitemap index) is returned as an error. Individual
//! pages that fail are logged and reported in [`Discovery::failed_pages`].

use std::collections::BTreeSet;
use std::sync::LazyLock;

use futures::stream::{self, StreamExt};
use regex::Regex;
use tracing::{debug, info, warn};
use url::Url;

use crate::contract::{PageFetcher, PdfReference};
use crate::error::FetchError;

/// Result of a discovery pass.
#[derive(Debug, Default)]
pub struct Discovery {
    /// Page URLs that passed the locale filter.
    pub pages: Vec<Url>,
    /// Pages that could not be fetched, with the error rendered for the report.
    pub failed_pages: Vec<(Url, String)>,
    pub pdfs: BTreeSet<PdfReference>,
}

/// Parsed sitemap document.
#[derive(Debug, PartialEq, Eq)]
pub enum Sitemap {
    /// `<urlset>`: page locations.
    Pages(Vec<String>),
    /// `<sitemapindex>`: locations of further sitemaps.
    Index(Vec<String>),
}

/// Parse sitemap XML. Element names are matched without regard to namespace.
pub fn parse_sitemap(xml: &str) -> Result<Sitemap, roxmltree::Error> {
    let doc = roxmltree::Document::parse(xml)?;
    let root = doc.root_element();
    let entry_tag = match root.tag_name().name() {
        "sitemapindex" => "sitemap",
        _ => "url",
    };
    let locs = root
        .children()
        .filter(|n| n.is_element() && n.tag_name().name() == entry_tag)
        .filter_map(|entry| {
            entry
                .children()
                .find(|n| n.is_element() && n.tag_name().name() == "loc")
                .and_then(|loc| loc.text())
                .map(|text| text.trim().to_string())
        })
        .filter(|loc| !loc.is_empty())
        .collect();

    Ok(if entry_tag == "sitemap" {
        Sitemap::Index(locs)
    } else {
        Sitemap::Pages(locs)
    })
}

/// True when one of the URL's path segments equals `locale` (ASCII case-insensitive).
/// No filter keeps every page.
pub fn matches_locale(url: &Url, locale: Option<&str>) -> bool {
    let Some(locale) = locale else {
        return true;
    };
    url.path_segments()
        .map(|mut segments| segments.any(|s| s.eq_ignore_ascii_case(locale)))
        .unwrap_or(false)
}

static ANCHOR_HREF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<a\b[^>]*?\shref\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#)
        .expect("anchor pattern is valid")
});

static EMBED_SRC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<(?:iframe|embed)\b[^>]*?\ssrc\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#)
        .expect("embed pattern is valid")
});

/// Every PDF referenced by `<a href>`, `<iframe src>` or `<embed src>` in `html`,
/// resolved against `base`. Fragments are stripped so `x.pdf#page=2` and `x.pdf` agree.
pub fn extract_pdf_links(html: &str, base: &Url) -> BTreeSet<PdfReference> {
    ANCHOR_HREF
        .captures_iter(html)
        .chain(EMBED_SRC.captures_iter(html))
        .filter_map(|caps| {
            caps.get(1)
                .or_else(|| caps.get(2))
                .or_else(|| caps.get(3))
                .map(|m| m.as_str().trim().replace("&amp;", "&"))
        })
        .filter_map(|target| base.join(&target).ok())
        .filter(|url| matches!(url.scheme(), "http" | "https"))
        .filter(|url| url.path().to_ascii_lowercase().ends_with(".pdf"))
        .filter_map(|mut url| {
            url.set_fragment(None);
            PdfReference::from_url(url)
        })
        .collect()
}

async fn fetch_sitemap<F>(fetcher: &F, url: &Url) -> Result<Sitemap, FetchError>
where
    F: PageFetcher + ?Sized,
{
    let xml = fetcher.get_text(url).await?;
    parse_sitemap(&xml).map_err(|e| FetchError::MalformedSitemap {
        url: url.to_string(),
        message: e.to_string(),
    })
}

/// Collect page URLs from the sitemap, following a sitemap index one level down.
pub async fn sitemap_pages<F>(fetcher: &F, sitemap_url: &Url) -> Result<Vec<Url>, FetchError>
where
    F: PageFetcher + ?Sized,
{
    let locs = match fetch_sitemap(fetcher, sitemap_url).await? {
        Sitemap::Pages(locs) => locs,
        Sitemap::Index(children) => {
            info!(sitemap = %sitemap_url, children = children.len(), "Following sitemap index");
            let mut locs = Vec::new();
            for child in children {
                let child_url = match Url::parse(&child) {
                    Ok(u) => u,
                    Err(e) => {
                        warn!(loc = %child, error = %e, "Skipping unparseable child sitemap location");
                        continue;
                    }
                };
                match fetch_sitemap(fetcher, &child_url).await? {
                    Sitemap::Pages(pages) => locs.extend(pages),
                    Sitemap::Index(_) => {
                        warn!(sitemap = %child_url, "Nested sitemap index ignored");
                    }
                }
            }
            locs
        }
    };

    Ok(locs
        .into_iter()
        .filter_map(|loc| match Url::parse(&loc) {
            Ok(u) => Some(u),
            Err(e) => {
                warn!(loc = %loc, error = %e, "Skipping unparseable sitemap location");
                None
            }
        })
        .collect())
}

/// Discover all PDFs linked from locale-matching sitemap pages.
///
/// Pages are fetched with at most `concurrency` requests in flight.
pub async fn discover<F>(
    fetcher: &F,
    sitemap_url: &Url,
    locale: Option<&str>,
    concurrency: usize,
) -> Result<Discovery, FetchError>
where
    F: PageFetcher + ?Sized,
{
    info!(sitemap = %sitemap_url, locale = ?locale, "Fetching sitemap");
    let all_pages = sitemap_pages(fetcher, sitemap_url).await?;
    let total = all_pages.len();
    let pages: Vec<Url> = all_pages
        .into_iter()
        .filter(|u| matches_locale(u, locale))
        .collect();
    info!(total, matched = pages.len(), "Filtered sitemap pages by locale");

    let results: Vec<(Url, Result<BTreeSet<PdfReference>, FetchError>)> =
        stream::iter(pages.iter().cloned())
            .map(|page| async move {
                let links = fetcher
                    .get_text(&page)
                    .await
                    .map(|html| extract_pdf_links(&html, &page));
                (page, links)
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;

    let mut discovery = Discovery {
        pages,
        ..Default::default()
    };
    for (page, result) in results {
        match result {
            Ok(links) => {
                debug!(page = %page, pdfs = links.len(), "Scanned page");
                discovery.pdfs.extend(links);
            }
            Err(e) => {
                warn!(page = %page, error = %e, "Failed to fetch page, skipping");
                discovery.failed_pages.push((page, e.to_string()));
            }
        }
    }
    discovery.failed_pages.sort();

    info!(
        pages = discovery.pages.len(),
        failed_pages = discovery.failed_pages.len(),
        pdfs = discovery.pdfs.len(),
        "Discovery complete"
    );
    Ok(discovery)
}
