//! Small Business Phones catalogue pages.

use grandguru_shared::{DataItem, ItemType};
use scraper::{ElementRef, Selector};

use super::{Extractor, Page};

/// Product tiles on `smallbusinessphones.ca` category pages.
pub struct SmallBusinessExtractor;

impl Extractor for SmallBusinessExtractor {
    fn matches(&self, url: &str) -> bool {
        url.contains("smallbusinessphones.ca")
    }

    fn extract(&self, page: &Page<'_>) -> Vec<DataItem> {
        let img_sel =
            Selector::parse("img.ty-pict.lazyOwl.cm-image, #category_products_11 img").unwrap();
        let mut items = Vec::new();

        for img in page.doc.select(&img_sel) {
            let Some(link) = nearest_link(img) else {
                continue;
            };
            // Lazy-loaded tiles keep the real image in data-src.
            let src = img
                .value()
                .attr("data-src")
                .or_else(|| img.value().attr("src"));
            let (Some(full_link), Some(full_img)) = (page.join(link), src.and_then(|s| page.join(s)))
            else {
                continue;
            };

            let title = img
                .value()
                .attr("alt")
                .or_else(|| img.value().attr("title"))
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| full_link.to_string());

            items.push(
                DataItem::new(full_link.as_str(), ItemType::Product)
                    .with("title", title)
                    .with("image_url", full_img.as_str()),
            );
        }

        if items.is_empty() {
            items.push(DataItem::new(page.url.as_str(), ItemType::Page).with("title", page.title()));
        }
        items
    }

    fn name(&self) -> &str {
        "smallbusiness"
    }
}

/// `href` of the closest enclosing `<a>`.
fn nearest_link(el: ElementRef<'_>) -> Option<&str> {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .find(|a| a.value().name() == "a" && a.value().attr("href").is_some())
        .and_then(|a| a.value().attr("href"))
}
