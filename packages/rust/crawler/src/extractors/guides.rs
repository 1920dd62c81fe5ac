//! Grandstream documentation portal (Sphinx toctrees).

use grandguru_shared::{DataItem, ItemType};
use scraper::Selector;

use super::{Extractor, Page};

/// Extractor for `documentation.grandstream.com` guide indexes and the PDF
/// manuals they link to.
pub struct GuidesExtractor;

impl Extractor for GuidesExtractor {
    fn matches(&self, url: &str) -> bool {
        url.contains("documentation.grandstream.com")
    }

    fn extract(&self, page: &Page<'_>) -> Vec<DataItem> {
        let link_sel = Selector::parse("div.toctree-wrapper a[href]").unwrap();
        let mut items = Vec::new();

        for el in page.doc.select(&link_sel) {
            let Some(full_url) = el.value().attr("href").and_then(|h| page.join(h)) else {
                continue;
            };
            let text = el.text().collect::<String>();
            let title = match text.trim() {
                "" => full_url.to_string(),
                t => t.to_string(),
            };
            items.push(
                DataItem::new(full_url.as_str(), ItemType::Page)
                    .with("title", title)
                    .with("url", full_url.as_str()),
            );
        }

        let pdf_sel = Selector::parse(r#"a[href$=".pdf"], a[href$=".PDF"]"#).unwrap();
        for el in page.doc.select(&pdf_sel) {
            let Some(pdf_url) = el.value().attr("href").and_then(|h| page.join(h)) else {
                continue;
            };
            let title = el.text().collect::<String>().trim().to_string();
            items.push(
                DataItem::new(pdf_url.as_str(), ItemType::Manual)
                    .with("title", title)
                    .with("pdf_url", pdf_url.as_str()),
            );
        }

        if items.is_empty() {
            items.push(DataItem::new(page.url.as_str(), ItemType::Page).with("title", page.title()));
        }
        items
    }

    fn name(&self) -> &str {
        "guides"
    }
}
