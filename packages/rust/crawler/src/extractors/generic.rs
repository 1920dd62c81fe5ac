//! Generic (fallback) extractor.
//!
//! Always matches. Emits one `page` record with the document title and the
//! main content area stripped of navigation chrome.

use grandguru_shared::{DataItem, ItemType};
use scraper::{Html, Selector};

use super::{Extractor, Page};

/// Fallback extractor for arbitrary HTML pages.
pub struct GenericExtractor;

impl Extractor for GenericExtractor {
    fn matches(&self, _url: &str) -> bool {
        true
    }

    fn extract(&self, page: &Page<'_>) -> Vec<DataItem> {
        let mut item = DataItem::new(page.url.as_str(), ItemType::Page).with("title", page.title());
        if let Some(content) = main_content(page.doc) {
            item = item.with("content", content);
        }
        vec![item]
    }

    fn name(&self) -> &str {
        "generic"
    }

    fn is_fallback(&self) -> bool {
        true
    }
}

/// Inner HTML of the main content area (`<main>`, `<article>`, …, then `<body>`),
/// with nav/header/footer/script/style/aside removed.
pub(crate) fn main_content(doc: &Html) -> Option<String> {
    let selectors = ["main", "article", r#"[role="main"]"#, ".content", "body"];

    for sel_str in selectors {
        let sel = Selector::parse(sel_str).unwrap();
        if let Some(el) = doc.select(&sel).next() {
            let html = strip_chrome(&el.inner_html());
            if html.trim().is_empty() {
                return None;
            }
            return Some(html);
        }
    }
    None
}

/// Remove chrome elements by re-parsing the fragment.
fn strip_chrome(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let chrome = Selector::parse("nav, header, footer, script, style, aside, noscript").unwrap();
    let mut out = fragment.root_element().inner_html();
    for el in fragment.select(&chrome) {
        out = out.replace(&el.html(), "");
    }
    out.trim().to_string()
}
