mod common;

use common::{site, urlset, SITEMAP};
use pdf_mirror::discover::discover;
use pdf_mirror::error::FetchError;
use url::Url;

#[tokio::test]
async fn locale_filter_and_pdf_extension_match() {
    let fetcher = site(
        &[
            (
                SITEMAP,
                urlset(&["https://example.com/en-US/a", "https://example.com/de-DE/b"]),
            ),
            (
                "https://example.com/en-US/a",
                r#"<a href="x.pdf">x</a> <a href="/docs/y.PDF">y</a> <a href="z.txt">z</a>"#
                    .to_string(),
            ),
            (
                "https://example.com/de-DE/b",
                r#"<a href="b-only.pdf">b</a>"#.to_string(),
            ),
        ],
        &[],
    );

    let sitemap = Url::parse(SITEMAP).unwrap();
    let discovery = discover(&fetcher, &sitemap, Some("en-US"), 4).await.unwrap();

    let names: Vec<_> = discovery.pdfs.iter().map(|p| p.file_name.as_str()).collect();
    assert_eq!(names, vec!["y.PDF", "x.pdf"]);
    assert_eq!(discovery.pages.len(), 1);
    assert!(discovery.failed_pages.is_empty());
}

#[tokio::test]
async fn failing_page_is_skipped_not_fatal() {
    let fetcher = site(
        &[
            (
                SITEMAP,
                urlset(&["https://example.com/en-US/ok", "https://example.com/en-US/gone"]),
            ),
            (
                "https://example.com/en-US/ok",
                r#"<a href="ok.pdf">ok</a>"#.to_string(),
            ),
        ],
        &[],
    );

    let sitemap = Url::parse(SITEMAP).unwrap();
    let discovery = discover(&fetcher, &sitemap, Some("en-US"), 1).await.unwrap();

    assert_eq!(discovery.pdfs.len(), 1);
    assert_eq!(discovery.failed_pages.len(), 1);
    assert_eq!(discovery.failed_pages[0].0.as_str(), "https://example.com/en-US/gone");
}

#[tokio::test]
async fn same_pdf_linked_from_two_pages_is_deduplicated() {
    let fetcher = site(
        &[
            (
                SITEMAP,
                urlset(&["https://example.com/en-US/one", "https://example.com/en-US/two"]),
            ),
            (
                "https://example.com/en-US/one",
                r#"<a href="/files/shared.pdf">s</a>"#.to_string(),
            ),
            (
                "https://example.com/en-US/two",
                r#"<a href="https://example.com/files/shared.pdf#page=3">s</a>"#.to_string(),
            ),
        ],
        &[],
    );

    let sitemap = Url::parse(SITEMAP).unwrap();
    let discovery = discover(&fetcher, &sitemap, Some("en-US"), 2).await.unwrap();
    assert_eq!(discovery.pdfs.len(), 1);
}

#[tokio::test]
async fn sitemap_index_is_followed() {
    let index = r#"<sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
        <sitemap><loc>https://example.com/sitemap-pages.xml</loc></sitemap>
    </sitemapindex>"#;
    let fetcher = site(
        &[
            (SITEMAP, index.to_string()),
            (
                "https://example.com/sitemap-pages.xml",
                urlset(&["https://example.com/en-US/a"]),
            ),
            (
                "https://example.com/en-US/a",
                r#"<embed src="/brochure.pdf">"#.to_string(),
            ),
        ],
        &[],
    );

    let sitemap = Url::parse(SITEMAP).unwrap();
    let discovery = discover(&fetcher, &sitemap, Some("en-US"), 2).await.unwrap();
    let names: Vec<_> = discovery.pdfs.iter().map(|p| p.file_name.as_str()).collect();
    assert_eq!(names, vec!["brochure.pdf"]);
}

#[tokio::test]
async fn unreachable_sitemap_is_an_error() {
    let fetcher = site(&[], &[]);
    let sitemap = Url::parse(SITEMAP).unwrap();
    let err = discover(&fetcher, &sitemap, Some("en-US"), 2).await.unwrap_err();
    assert!(matches!(err, FetchError::Status { status: 404, .. }));
}

#[tokio::test]
async fn malformed_sitemap_is_an_error() {
    let fetcher = site(&[(SITEMAP, "<html><body>oops".to_string())], &[]);
    let sitemap = Url::parse(SITEMAP).unwrap();
    let err = discover(&fetcher, &sitemap, None, 2).await.unwrap_err();
    assert!(matches!(err, FetchError::MalformedSitemap { .. }));
}
