//! Grandstream marketing site.

use std::sync::LazyLock;

use grandguru_shared::{DataItem, ItemType};
use regex::Regex;
use scraper::Selector;

use super::generic::main_content;
use super::{Extractor, Page};

/// Title extractor for `grandstream.com` pages, with the main content attached
/// for indexing and embedded YouTube videos as separate records.
pub struct GrandstreamExtractor;

impl Extractor for GrandstreamExtractor {
    fn matches(&self, url: &str) -> bool {
        url.contains("grandstream.com")
    }

    fn extract(&self, page: &Page<'_>) -> Vec<DataItem> {
        let title = match page.title() {
            t if t.is_empty() => "Untitled".to_string(),
            t => t,
        };
        let mut item = DataItem::new(page.url.as_str(), ItemType::Page).with("title", title);
        if let Some(content) = main_content(page.doc) {
            item = item.with("content", content);
        }
        let mut items = vec![item];

        let frame_sel = Selector::parse("iframe[src]").unwrap();
        for frame in page.doc.select(&frame_sel) {
            let Some(src) = frame.value().attr("src") else {
                continue;
            };
            let Some(youtube_id) = youtube_id(src) else {
                continue;
            };
            let title = frame.value().attr("title").unwrap_or_default().trim();
            items.push(
                DataItem::new(format!("https://www.youtube.com/watch?v={youtube_id}"), ItemType::Video)
                    .with("youtube_id", youtube_id)
                    .with("title", title)
                    .with("page_url", page.url.as_str()),
            );
        }
        items
    }

    fn name(&self) -> &str {
        "grandstream"
    }
}

static YOUTUBE_EMBED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"youtube(?:-nocookie)?\.com/embed/([A-Za-z0-9_-]{11})").unwrap()
});

/// Video id from a YouTube embed URL.
fn youtube_id(src: &str) -> Option<&str> {
    YOUTUBE_EMBED
        .captures(src)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}
