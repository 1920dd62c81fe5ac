//! Concurrent, depth-limited crawl engine used by the worker process.
//!
//! The crawler starts from a given URL, performs BFS traversal, respects
//! depth/concurrency/delay/item limits, runs each fetched page through the
//! first matching extractor, and hands every record to a [`RecordSink`].

use std::collections::HashSet;
use std::io::Write;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::Client;
use scraper::{Html, Selector};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

use grandguru_shared::{DataItem, GrandGuruError, Result};

use crate::extractors::{ExtractorRegistry, Page};

/// User-Agent string for crawl requests.
const USER_AGENT: &str = concat!("GrandGuruCrawler/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Parameters and results
// ---------------------------------------------------------------------------

/// Per-job crawl parameters, as passed on the worker command line.
#[derive(Debug, Clone)]
pub struct CrawlParams {
    pub start_url: Url,
    /// Maximum link depth from the start URL (0 = start page only).
    pub depth: u32,
    /// Maximum concurrent HTTP requests.
    pub concurrency: u32,
    /// Wait before each request.
    pub delay: Duration,
    /// Stop after emitting this many records.
    pub item_limit: Option<u64>,
}

/// Summary of a finished crawl.
#[derive(Debug, Clone, Default)]
pub struct CrawlSummary {
    pub pages_fetched: usize,
    pub pages_skipped: usize,
    pub records: u64,
    /// Errors encountered (URL, error message).
    pub errors: Vec<(String, String)>,
    pub duration: Duration,
    /// Whether the crawl ended because of a shutdown request.
    pub interrupted: bool,
}

/// Destination for extracted records.
pub trait RecordSink {
    fn emit(&mut self, item: &DataItem) -> Result<()>;
}

/// Writes one JSON object per line and flushes after each, so the reader
/// sees records as they are produced.
pub struct JsonLinesSink<W: Write> {
    out: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: Write> RecordSink for JsonLinesSink<W> {
    fn emit(&mut self, item: &DataItem) -> Result<()> {
        let line = serde_json::to_string(item)
            .map_err(|e| GrandGuruError::parse(format!("failed to encode record: {e}")))?;
        writeln!(self.out, "{line}")
            .and_then(|_| self.out.flush())
            .map_err(|e| GrandGuruError::io("<stdout>", e))
    }
}

impl RecordSink for Vec<DataItem> {
    fn emit(&mut self, item: &DataItem) -> Result<()> {
        self.push(item.clone());
        Ok(())
    }
}

/// Result of fetching and extracting one page.
struct FetchedPage {
    url: Url,
    depth: u32,
    items: Vec<DataItem>,
    links: Vec<String>,
}

// ---------------------------------------------------------------------------
// Crawler
// ---------------------------------------------------------------------------

/// Concurrent BFS crawler.
pub struct Crawler {
    params: CrawlParams,
    client: Client,
    registry: Arc<ExtractorRegistry>,
    /// Allow localhost/private IPs (for integration tests with mock servers).
    allow_localhost: bool,
}

impl Crawler {
    /// Create a new crawler. Proxy settings are read from `HTTP_PROXY` /
    /// `HTTPS_PROXY` / `NO_PROXY` by the HTTP client.
    pub fn new(params: CrawlParams) -> Result<Self> {
        if params.concurrency == 0 {
            return Err(GrandGuruError::validation("concurrency must be at least 1"));
        }

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| GrandGuruError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            params,
            client,
            registry: Arc::new(ExtractorRegistry::new()),
            allow_localhost: false,
        })
    }

    /// Allow crawling localhost/private IPs (for integration tests).
    #[cfg(test)]
    pub fn allow_localhost(mut self) -> Self {
        self.allow_localhost = true;
        self
    }

    /// Crawl from the start URL, emitting records into `sink` until the
    /// frontier is exhausted, the item limit is reached, or `stop` fires.
    #[instrument(skip_all, fields(start_url = %self.params.start_url))]
    pub async fn crawl<S: RecordSink>(
        &self,
        sink: &mut S,
        stop: &CancellationToken,
    ) -> Result<CrawlSummary> {
        let start_time = Instant::now();
        let start_host = self.params.start_url.host_str().unwrap_or("").to_string();
        let semaphore = Arc::new(Semaphore::new(self.params.concurrency as usize));

        let mut visited = HashSet::<String>::new();
        let mut queue: Vec<(Url, u32)> = vec![(self.params.start_url.clone(), 0)];
        let mut summary = CrawlSummary::default();

        info!(
            depth = self.params.depth,
            concurrency = self.params.concurrency,
            delay_ms = self.params.delay.as_millis() as u64,
            item_limit = ?self.params.item_limit,
            "starting crawl"
        );

        'frontier: while !queue.is_empty() && !stop.is_cancelled() {
            let drain_count = queue.len().min(self.params.concurrency as usize);
            let batch: Vec<(Url, u32)> = queue.drain(..drain_count).collect();

            let mut tasks = JoinSet::new();

            for (url, depth) in batch {
                if !visited.insert(normalize_url(&url)) {
                    summary.pages_skipped += 1;
                    continue;
                }

                if !self.allow_localhost && is_ssrf_target(&url) {
                    warn!(%url, "SSRF protection: blocked");
                    summary.pages_skipped += 1;
                    continue;
                }

                let client = self.client.clone();
                let sem = semaphore.clone();
                let registry = self.registry.clone();
                let delay = self.params.delay;

                tasks.spawn(async move {
                    let _permit = sem
                        .acquire_owned()
                        .await
                        .map_err(|e| (url.to_string(), GrandGuruError::Network(e.to_string())))?;

                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }

                    fetch_page(&client, &registry, url, depth).await
                });
            }

            loop {
                let joined = tokio::select! {
                    biased;
                    _ = stop.cancelled() => {
                        info!("shutdown requested, abandoning in-flight fetches");
                        break 'frontier;
                    }
                    joined = tasks.join_next() => joined,
                };
                let Some(joined) = joined else {
                    break;
                };

                match joined {
                    Ok(Ok(page)) => {
                        summary.pages_fetched += 1;

                        for item in &page.items {
                            if self.limit_reached(summary.records) {
                                break;
                            }
                            sink.emit(item)?;
                            summary.records += 1;
                        }
                        if self.limit_reached(summary.records) {
                            info!(records = summary.records, "item limit reached");
                            break 'frontier;
                        }

                        if page.depth < self.params.depth {
                            for link in &page.links {
                                let Ok(link_url) = Url::parse(link) else {
                                    continue;
                                };
                                if self.should_follow(&link_url, &start_host) {
                                    queue.push((link_url, page.depth + 1));
                                }
                            }
                        }
                        debug!(url = %page.url, records = page.items.len(), "page processed");
                    }
                    Ok(Err((url, e))) => {
                        warn!(%url, error = %e, "fetch failed");
                        summary.errors.push((url, e.to_string()));
                        summary.pages_skipped += 1;
                    }
                    Err(e) => {
                        summary.errors.push(("task".into(), e.to_string()));
                        summary.pages_skipped += 1;
                    }
                }
            }
        }

        summary.interrupted = stop.is_cancelled();
        summary.duration = start_time.elapsed();

        info!(
            pages_fetched = summary.pages_fetched,
            pages_skipped = summary.pages_skipped,
            records = summary.records,
            errors = summary.errors.len(),
            interrupted = summary.interrupted,
            duration_ms = summary.duration.as_millis() as u64,
            "crawl finished"
        );

        Ok(summary)
    }

    fn limit_reached(&self, records: u64) -> bool {
        self.params.item_limit.is_some_and(|limit| records >= limit)
    }

    /// Follow links on the start host or on any host a site extractor knows.
    /// PDFs are reported as manuals, never fetched as pages.
    fn should_follow(&self, url: &Url, start_host: &str) -> bool {
        if url.scheme() != "http" && url.scheme() != "https" {
            return false;
        }
        if url.path().to_ascii_lowercase().ends_with(".pdf") {
            return false;
        }
        url.host_str() == Some(start_host) || self.registry.is_known(url.as_str())
    }
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Check if a URL targets a potentially dangerous resource.
fn is_ssrf_target(url: &Url) -> bool {
    match url.scheme() {
        "http" | "https" => {}
        _ => return true,
    }

    if let Some(host) = url.host_str() {
        let bare = host.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = bare.parse::<IpAddr>() {
            return is_private_ip(&ip);
        }
        if host == "localhost" || host.ends_with(".local") || host.ends_with(".internal") {
            return true;
        }
    }

    false
}

/// Check if an IP is in a private/reserved range.
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 (Carrier-grade NAT)
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}

// ---------------------------------------------------------------------------
// Page fetching
// ---------------------------------------------------------------------------

/// Fetch a single page and run it through the extractor registry.
async fn fetch_page(
    client: &Client,
    registry: &ExtractorRegistry,
    url: Url,
    depth: u32,
) -> std::result::Result<FetchedPage, (String, GrandGuruError)> {
    debug!(%url, depth, "fetching page");

    let fail = |e: GrandGuruError| (url.to_string(), e);

    let response = client
        .get(url.as_str())
        .send()
        .await
        .map_err(|e| fail(GrandGuruError::Network(format!("{url}: {e}"))))?;

    let status = response.status();
    if !status.is_success() {
        return Err(fail(GrandGuruError::Network(format!("{url}: HTTP {status}"))));
    }

    let final_url = response.url().clone();
    let body = response
        .text()
        .await
        .map_err(|e| fail(GrandGuruError::Network(format!("{url}: body read failed: {e}"))))?;

    let (items, links) = extract_page(registry, &final_url, &body);

    Ok(FetchedPage {
        url: final_url,
        depth,
        items,
        links,
    })
}

/// Parse the body and extract records and outgoing links. Kept synchronous
/// because the parsed document is not `Send`.
fn extract_page(registry: &ExtractorRegistry, url: &Url, body: &str) -> (Vec<DataItem>, Vec<String>) {
    let doc = Html::parse_document(body);
    let page = Page { url, doc: &doc };
    let extractor = registry.select(url.as_str());
    debug!(%url, extractor = extractor.name(), "extracting");
    let items = extractor.extract(&page);
    let links = extract_links(&doc, url);
    (items, links)
}

/// Extract all links from a document, resolved against the base URL.
fn extract_links(doc: &Html, base_url: &Url) -> Vec<String> {
    let link_sel = Selector::parse("a[href]").unwrap();
    let mut links = Vec::new();

    for el in doc.select(&link_sel) {
        if let Some(href) = el.value().attr("href") {
            if href.starts_with('#')
                || href.starts_with("javascript:")
                || href.starts_with("mailto:")
                || href.starts_with("tel:")
            {
                continue;
            }

            if let Ok(mut resolved) = base_url.join(href) {
                resolved.set_fragment(None);
                links.push(resolved.to_string());
            }
        }
    }

    links
}

/// Normalize a URL for deduplication (strip fragment and trailing slash).
fn normalize_url(url: &Url) -> String {
    let mut normalized = url.clone();
    normalized.set_fragment(None);
    let mut s = normalized.to_string();
    // Keep the root path's slash.
    if s.ends_with('/') && s.matches('/').count() > 3 {
        s.pop();
    }
    s
}

#[cfg(test)]
mod crawler_tests {
    use super::*;
    use grandguru_shared::ItemType;

    fn params(start: &str, depth: u32) -> CrawlParams {
        CrawlParams {
            start_url: Url::parse(start).unwrap(),
            depth,
            concurrency: 2,
            delay: Duration::ZERO,
            item_limit: None,
        }
    }

    #[test]
    fn test_normalize_url() {
        let url = Url::parse("https://docs.example.com/guide/intro/#section-1").unwrap();
        let normalized = normalize_url(&url);
        assert_eq!(normalized, "https://docs.example.com/guide/intro");

        let root = Url::parse("https://docs.example.com/").unwrap();
        assert_eq!(normalize_url(&root), "https://docs.example.com/");
    }

    #[test]
    fn test_ssrf_protection() {
        assert!(is_ssrf_target(&Url::parse("file:///etc/passwd").unwrap()));
        assert!(is_ssrf_target(&Url::parse("http://192.168.1.1/admin").unwrap()));
        assert!(is_ssrf_target(&Url::parse("http://127.0.0.1:8080/").unwrap()));
        assert!(is_ssrf_target(&Url::parse("http://[::1]/").unwrap()));
        assert!(is_ssrf_target(&Url::parse("http://localhost:3000/api").unwrap()));
        assert!(!is_ssrf_target(&Url::parse("https://www.grandstream.com/").unwrap()));
    }

    #[test]
    fn test_extract_links() {
        let html = r##"<html><body><a href="/page2">Page 2</a><a href="https://external.com">External</a><a href="#section">Anchor</a><a href="tel:+1555">Call</a><a href="relative/path">Relative</a></body></html>"##;

        let doc = Html::parse_document(html);
        let base = Url::parse("https://docs.example.com/page1").unwrap();
        let links = extract_links(&doc, &base);

        assert_eq!(
            links,
            vec![
                "https://docs.example.com/page2".to_string(),
                "https://external.com/".to_string(),
                "https://docs.example.com/relative/path".to_string(),
            ]
        );
    }

    #[test]
    fn test_follow_rules() {
        let crawler = Crawler::new(params("https://shop.example.com/", 2)).unwrap();
        let host = "shop.example.com";
        let follow = |u: &str| crawler.should_follow(&Url::parse(u).unwrap(), host);

        assert!(follow("https://shop.example.com/phones"));
        assert!(follow("https://documentation.grandstream.com/x"));
        assert!(!follow("https://unrelated.example.org/"));
        assert!(!follow("https://shop.example.com/manual.PDF"));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let mut p = params("https://example.com/", 1);
        p.concurrency = 0;
        assert!(Crawler::new(p).is_err());
    }

    #[test]
    fn test_json_lines_sink() {
        let mut buf = Vec::new();
        {
            let mut sink = JsonLinesSink::new(&mut buf);
            sink.emit(&DataItem::new("https://a.test/", ItemType::Page).with("title", "A"))
                .unwrap();
            sink.emit(&DataItem::new("https://b.test/", ItemType::Video)).unwrap();
        }
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: DataItem = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.field("title"), Some("A"));
    }

    async fn mount(server: &wiremock::MockServer, path: &str, body: &str) {
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path(path))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string(body.to_string()))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_crawl_with_mock_server() {
        let server = wiremock::MockServer::start().await;

        mount(
            &server,
            "/",
            r#"<html><head><title>Home</title></head><body><main>
                <p>Welcome.</p><a href="/page2">Go to page 2</a>
                <a href="https://unrelated.example.org/">elsewhere</a>
            </main></body></html>"#,
        )
        .await;
        mount(
            &server,
            "/page2",
            r#"<html><head><title>Two</title></head><body><main>
                <p>Second.</p><a href="/page3">Go to page 3</a><a href="/">home</a>
            </main></body></html>"#,
        )
        .await;
        mount(
            &server,
            "/page3",
            "<html><head><title>Three</title></head><body><main><p>Leaf.</p></main></body></html>",
        )
        .await;

        let crawler = Crawler::new(params(&server.uri(), 3))
            .unwrap()
            .allow_localhost();
        let mut records: Vec<DataItem> = Vec::new();
        let summary = crawler
            .crawl(&mut records, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.pages_fetched, 3);
        assert!(summary.errors.is_empty());
        assert!(!summary.interrupted);
        assert_eq!(records.len(), 3);

        let mut titles: Vec<&str> = records.iter().filter_map(|r| r.field("title")).collect();
        titles.sort();
        assert_eq!(titles, vec!["Home", "Three", "Two"]);
    }

    #[tokio::test]
    async fn test_crawl_respects_depth() {
        let server = wiremock::MockServer::start().await;

        mount(&server, "/", r#"<html><body><main><h1>Root</h1><a href="/page2">2</a></main></body></html>"#).await;
        mount(&server, "/page2", r#"<html><body><main><h1>Two</h1><a href="/page3">3</a></main></body></html>"#).await;
        mount(&server, "/page3", "<html><body><main><h1>Three</h1></main></body></html>").await;

        let crawler = Crawler::new(params(&server.uri(), 1))
            .unwrap()
            .allow_localhost();
        let mut records: Vec<DataItem> = Vec::new();
        let summary = crawler
            .crawl(&mut records, &CancellationToken::new())
            .await
            .unwrap();

        // Root (depth 0) and page2 (depth 1), not page3.
        assert_eq!(summary.pages_fetched, 2);
    }

    #[tokio::test]
    async fn test_crawl_item_limit() {
        let server = wiremock::MockServer::start().await;

        mount(
            &server,
            "/",
            r#"<html><body><main><a href="/a">a</a><a href="/b">b</a><a href="/c">c</a></main></body></html>"#,
        )
        .await;
        for p in ["/a", "/b", "/c"] {
            mount(&server, p, "<html><body><main><p>leaf</p></main></body></html>").await;
        }

        let mut p = params(&server.uri(), 2);
        p.item_limit = Some(2);
        let crawler = Crawler::new(p).unwrap().allow_localhost();
        let mut records: Vec<DataItem> = Vec::new();
        let summary = crawler
            .crawl(&mut records, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(summary.records, 2);
    }

    #[tokio::test]
    async fn test_crawl_counts_http_errors() {
        let server = wiremock::MockServer::start().await;

        mount(&server, "/", r#"<html><body><main><a href="/missing">x</a></main></body></html>"#).await;
        wiremock::Mock::given(wiremock::matchers::path("/missing"))
            .respond_with(wiremock::ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let crawler = Crawler::new(params(&server.uri(), 1))
            .unwrap()
            .allow_localhost();
        let mut records: Vec<DataItem> = Vec::new();
        let summary = crawler
            .crawl(&mut records, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.pages_fetched, 1);
        assert_eq!(summary.errors.len(), 1);
        assert!(summary.errors[0].1.contains("404"));
    }

    #[tokio::test]
    async fn test_crawl_stops_when_cancelled() {
        let server = wiremock::MockServer::start().await;
        mount(&server, "/", "<html><body><main><p>never fetched</p></main></body></html>").await;

        let crawler = Crawler::new(params(&server.uri(), 1))
            .unwrap()
            .allow_localhost();
        let stop = CancellationToken::new();
        stop.cancel();

        let mut records: Vec<DataItem> = Vec::new();
        let summary = crawler.crawl(&mut records, &stop).await.unwrap();

        assert!(summary.interrupted);
        assert!(records.is_empty());
    }
}
