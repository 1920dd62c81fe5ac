//! Production [`Ingestor`]: writes crawled records into the content store.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use scraper::Html;
use sha2::{Digest, Sha256};
use tracing::debug;

use grandguru_shared::{DataItem, GrandGuruError, ItemType, Result};
use grandguru_storage::{NewDocument, NewProduct, Storage};

use crate::jobs::Ingestor;

/// Model numbers such as `GXP2170`, `HT-802` or `GRP2612W`.
static MODEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([A-Z]{2,5}-?\d{3,5}[A-Z0-9-]*)\b").unwrap());

/// Maps each record type onto content-store rows.
pub struct StorageIndexer {
    storage: Arc<Storage>,
}

impl StorageIndexer {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    async fn index_product(&self, item: &DataItem) -> Result<()> {
        let title = item.field("title").unwrap_or_default().trim();
        let model = model_number(title)
            .or_else(|| model_number(&item.url.to_uppercase()))
            .unwrap_or_else(|| {
                if title.is_empty() {
                    item.url.clone()
                } else {
                    title.to_string()
                }
            });

        let product_id = self
            .storage
            .upsert_product(&NewProduct {
                model,
                name: title.to_string(),
                category: item.field("category").map(str::to_string),
                brand: item.field("brand").map(str::to_string),
                price: item.payload.get("price").and_then(|v| v.as_f64()),
                source_url: Some(item.url.clone()),
            })
            .await?;

        if let Some(image) = item.field("image_url").filter(|u| !u.is_empty()) {
            self.storage.add_image(product_id, image).await?;
        }
        debug!(product_id, url = %item.url, "product indexed");
        Ok(())
    }

    async fn index_manual(&self, item: &DataItem) -> Result<()> {
        let pdf_url = item.field("pdf_url").unwrap_or(item.url.as_str());
        let title = item.field("title").map(str::to_string);
        self.storage
            .upsert_document(&NewDocument {
                url: pdf_url.to_string(),
                doc_type: "manual".into(),
                content_hash: Some(content_hash(&format!(
                    "{pdf_url}\n{}",
                    title.as_deref().unwrap_or_default()
                ))),
                title,
                ..Default::default()
            })
            .await?;
        Ok(())
    }

    async fn index_video(&self, item: &DataItem) -> Result<()> {
        let youtube_id = item
            .field("youtube_id")
            .filter(|id| !id.is_empty())
            .ok_or_else(|| GrandGuruError::parse(format!("video record without youtube_id: {}", item.url)))?;
        let url = item.field("page_url").unwrap_or(item.url.as_str());
        self.storage
            .upsert_video(None, youtube_id, item.field("title"), url)
            .await
    }

    async fn index_page(&self, item: &DataItem) -> Result<()> {
        let url = item.field("url").unwrap_or(item.url.as_str());
        let content = item.field("content").map(html_to_text).filter(|t| !t.is_empty());
        let title = item.field("title").map(str::to_string);
        let hash_input = format!(
            "{}\n{}",
            title.as_deref().unwrap_or_default(),
            content.as_deref().unwrap_or_default()
        );
        let changed = self
            .storage
            .upsert_document(&NewDocument {
                url: url.to_string(),
                doc_type: "page".into(),
                title,
                content_hash: Some(content_hash(&hash_input)),
                content,
                ..Default::default()
            })
            .await?;
        if !changed {
            debug!(%url, "page unchanged");
        }
        Ok(())
    }
}

#[async_trait]
impl Ingestor for StorageIndexer {
    async fn ingest(&self, item: &DataItem) -> Result<()> {
        match item.item_type {
            ItemType::Product => self.index_product(item).await,
            ItemType::Manual => self.index_manual(item).await,
            ItemType::Video => self.index_video(item).await,
            ItemType::Page => self.index_page(item).await,
        }
    }
}

fn model_number(text: &str) -> Option<String> {
    MODEL_RE.captures(text).map(|c| c[1].to_string())
}

/// Visible text of an HTML fragment, whitespace collapsed.
fn html_to_text(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let text: Vec<&str> = fragment
        .root_element()
        .text()
        .flat_map(str::split_whitespace)
        .collect();
    text.join(" ")
}

fn content_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    format!("{digest:x}")
}
