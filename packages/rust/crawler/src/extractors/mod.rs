//! URL-pattern extractors that turn fetched pages into [`DataItem`] records.
//!
//! Extractors are registered statically in [`ExtractorRegistry::new`] and tried
//! in order; the first one whose [`Extractor::matches`] returns `true` handles the
//! page. `GenericExtractor` is the always-last fallback.

mod generic;
mod grandstream;
mod guides;
mod smallbusiness;

use grandguru_shared::DataItem;
use scraper::{Html, Selector};
use url::Url;

pub use generic::GenericExtractor;
pub use grandstream::GrandstreamExtractor;
pub use guides::GuidesExtractor;
pub use smallbusiness::SmallBusinessExtractor;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// A fetched page handed to an extractor.
pub struct Page<'a> {
    /// Final URL after redirects.
    pub url: &'a Url,
    /// Parsed document.
    pub doc: &'a Html,
}

impl Page<'_> {
    /// Resolve `href` against the page URL, dropping any fragment.
    pub fn join(&self, href: &str) -> Option<Url> {
        let mut resolved = self.url.join(href).ok()?;
        resolved.set_fragment(None);
        Some(resolved)
    }

    /// Trimmed `<title>` text, empty if absent.
    pub fn title(&self) -> String {
        let sel = Selector::parse("title").unwrap();
        self.doc
            .select(&sel)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .unwrap_or_default()
    }
}

/// Trait for site-specific record extraction.
pub trait Extractor: Send + Sync {
    /// Whether this extractor knows how to parse pages at `url`.
    fn matches(&self, url: &str) -> bool;

    /// Records found on the page. Never empty for a matched page.
    fn extract(&self, page: &Page<'_>) -> Vec<DataItem>;

    /// Human-readable name for tracing.
    fn name(&self) -> &str;

    /// Fallback extractors match everything and do not widen the crawl.
    fn is_fallback(&self) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Holds registered extractors in priority order.
pub struct ExtractorRegistry {
    extractors: Vec<Box<dyn Extractor>>,
}

impl ExtractorRegistry {
    /// Create a registry with all built-in extractors (most specific host first,
    /// generic last).
    pub fn new() -> Self {
        Self {
            extractors: vec![
                Box::new(GuidesExtractor),
                Box::new(GrandstreamExtractor),
                Box::new(SmallBusinessExtractor),
                Box::new(GenericExtractor),
            ],
        }
    }

    /// First extractor matching `url`. Always returns one (GenericExtractor is
    /// the fallback).
    pub fn select(&self, url: &str) -> &dyn Extractor {
        for extractor in &self.extractors {
            if extractor.matches(url) {
                return extractor.as_ref();
            }
        }
        unreachable!("GenericExtractor must always match");
    }

    /// Whether a site-specific extractor claims `url`.
    pub fn is_known(&self, url: &str) -> bool {
        self.extractors
            .iter()
            .any(|e| !e.is_fallback() && e.matches(url))
    }
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grandguru_shared::ItemType;

    fn page_items(url: &str, html: &str) -> (String, Vec<DataItem>) {
        let registry = ExtractorRegistry::new();
        let url = Url::parse(url).unwrap();
        let doc = Html::parse_document(html);
        let page = Page {
            url: &url,
            doc: &doc,
        };
        let extractor = registry.select(url.as_str());
        (extractor.name().to_string(), extractor.extract(&page))
    }

    #[test]
    fn guides_take_priority_over_grandstream() {
        let registry = ExtractorRegistry::new();
        assert_eq!(
            registry
                .select("https://documentation.grandstream.com/knowledge-base/")
                .name(),
            "guides"
        );
        assert_eq!(
            registry.select("https://www.grandstream.com/products").name(),
            "grandstream"
        );
        assert_eq!(registry.select("https://example.org/").name(), "generic");
    }

    #[test]
    fn known_hosts_exclude_fallback() {
        let registry = ExtractorRegistry::new();
        assert!(registry.is_known("https://smallbusinessphones.ca/voip/"));
        assert!(!registry.is_known("https://example.org/"));
    }

    #[test]
    fn guides_extracts_toctree_links() {
        let html = r#"<html><head><title>Guides</title></head><body>
            <div class="toctree-wrapper">
              <a href="gxp2170.html"> GXP2170 User Guide </a>
              <a href="/ucm/admin.html">UCM Admin</a>
            </div></body></html>"#;
        let (name, items) = page_items("https://documentation.grandstream.com/guides/", html);
        assert_eq!(name, "guides");
        assert_eq!(items.len(), 2);
        assert_eq!(
            items[0].url,
            "https://documentation.grandstream.com/guides/gxp2170.html"
        );
        assert_eq!(items[0].field("title"), Some("GXP2170 User Guide"));
        assert_eq!(items[1].item_type, ItemType::Page);
    }

    #[test]
    fn guides_falls_back_to_title() {
        let html = "<html><head><title> Release Notes </title></head><body></body></html>";
        let (_, items) = page_items("https://documentation.grandstream.com/notes", html);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].field("title"), Some("Release Notes"));
        assert_eq!(items[0].url, "https://documentation.grandstream.com/notes");
    }

    #[test]
    fn guides_emit_manuals_for_pdf_links() {
        let html = r#"<html><head><title>GXP2170</title></head><body>
            <a href="/pdf/gxp2170_user_guide.pdf">User Guide</a>
            <a href="/other.html">Other</a></body></html>"#;
        let (_, items) = page_items("https://documentation.grandstream.com/gxp2170/", html);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].item_type, ItemType::Manual);
        assert_eq!(
            items[0].field("pdf_url"),
            Some("https://documentation.grandstream.com/pdf/gxp2170_user_guide.pdf")
        );
        assert_eq!(items[0].field("title"), Some("User Guide"));
    }

    #[test]
    fn grandstream_emits_embedded_videos() {
        let html = r#"<html><head><title>GRP2612</title></head><body><main>
            <p>Carrier-grade IP phone.</p>
            <iframe title="Unboxing" src="https://www.youtube.com/embed/dQw4w9WgXcQ?rel=0"></iframe>
            <iframe src="https://maps.example.com/embed"></iframe>
            </main></body></html>"#;
        let (name, items) = page_items("https://www.grandstream.com/products/grp2612", html);
        assert_eq!(name, "grandstream");
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].field("title"), Some("GRP2612"));
        assert_eq!(items[1].item_type, ItemType::Video);
        assert_eq!(items[1].field("youtube_id"), Some("dQw4w9WgXcQ"));
        assert_eq!(items[1].field("title"), Some("Unboxing"));
    }

    #[test]
    fn grandstream_untitled_page() {
        let (_, items) = page_items("https://www.grandstream.com/x", "<html><body></body></html>");
        assert_eq!(items[0].field("title"), Some("Untitled"));
    }

    #[test]
    fn smallbusiness_extracts_products() {
        let html = r#"<html><head><title>Routers</title></head><body>
            <a href="/routers/gwn7003.html">
              <img class="ty-pict lazyOwl cm-image" data-src="/img/gwn7003.jpg" src="/img/blank.gif" alt=" GWN7003 Router ">
            </a>
            <img class="ty-pict lazyOwl cm-image" src="/img/orphan.jpg" alt="No link">
            </body></html>"#;
        let (name, items) = page_items(
            "https://smallbusinessphones.ca/networking-solutions/routers.html",
            html,
        );
        assert_eq!(name, "smallbusiness");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].item_type, ItemType::Product);
        assert_eq!(items[0].url, "https://smallbusinessphones.ca/routers/gwn7003.html");
        assert_eq!(items[0].field("title"), Some("GWN7003 Router"));
        assert_eq!(
            items[0].field("image_url"),
            Some("https://smallbusinessphones.ca/img/gwn7003.jpg")
        );
    }

    #[test]
    fn smallbusiness_falls_back_to_title() {
        let html = "<html><head><title>About us</title></head><body><p>hi</p></body></html>";
        let (_, items) = page_items("https://smallbusinessphones.ca/about", html);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].item_type, ItemType::Page);
        assert_eq!(items[0].field("title"), Some("About us"));
    }

    #[test]
    fn generic_keeps_main_content() {
        let html = r#"<html><head><title>Docs</title></head><body>
            <nav>menu</nav><main><h1>Setup</h1><p>Plug it in.</p></main></body></html>"#;
        let (name, items) = page_items("https://example.org/setup", html);
        assert_eq!(name, "generic");
        assert_eq!(items[0].field("title"), Some("Docs"));
        let content = items[0].field("content").unwrap();
        assert!(content.contains("Plug it in."));
        assert!(!content.contains("menu"));
    }
}
