//! libSQL content store for crawled product knowledge.
//!
//! The [`Storage`] struct wraps a local libSQL database holding products,
//! documents (pages and manuals), product images, videos, and a full-text
//! index over documents.
//!
//! **Access rules:**
//! - Ingestion (server or `crawl` command): read-write via [`Storage::open`]
//! - Read-only consumers: [`Storage::open_readonly`]

mod migrations;

use std::path::Path;

use chrono::{DateTime, Utc};
use grandguru_shared::{GrandGuruError, Result};
use libsql::{Connection, Database, params};
use serde::Serialize;

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

/// Product fields written by ingestion.
#[derive(Debug, Clone, Default)]
pub struct NewProduct {
    /// Model number; the natural key.
    pub model: String,
    pub name: String,
    pub category: Option<String>,
    pub brand: Option<String>,
    pub price: Option<f64>,
    pub source_url: Option<String>,
}

/// A stored product, as returned to API clients.
#[derive(Debug, Clone, Serialize)]
pub struct ProductRecord {
    pub id: i64,
    pub model: String,
    pub name: Option<String>,
    pub category: Option<String>,
    pub price: Option<f64>,
    pub brand: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

/// Document fields written by ingestion.
#[derive(Debug, Clone, Default)]
pub struct NewDocument {
    pub product_id: Option<i64>,
    pub url: String,
    /// `page` or `manual`.
    pub doc_type: String,
    pub title: Option<String>,
    pub content: Option<String>,
    pub content_hash: Option<String>,
}

/// A search hit from FTS5.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub url: String,
    pub title: Option<String>,
    pub doc_type: String,
    /// FTS5 rank score (lower is better).
    pub score: f64,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| GrandGuruError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| GrandGuruError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| GrandGuruError::Storage(e.to_string()))?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open a database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| GrandGuruError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| GrandGuruError::Storage(e.to_string()))?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        GrandGuruError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(GrandGuruError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Products
    // -----------------------------------------------------------------------

    /// Insert or update a product by model number. Returns its id.
    ///
    /// Optional fields that are `None` keep their stored value.
    pub async fn upsert_product(&self, product: &NewProduct) -> Result<i64> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO products (model, name, category, brand, price, source_url, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
                 ON CONFLICT(model) DO UPDATE SET
                   name = excluded.name,
                   category = COALESCE(excluded.category, products.category),
                   brand = COALESCE(excluded.brand, products.brand),
                   price = COALESCE(excluded.price, products.price),
                   source_url = COALESCE(excluded.source_url, products.source_url),
                   updated_at = excluded.updated_at",
                params![
                    product.model.as_str(),
                    product.name.as_str(),
                    product.category.as_deref(),
                    product.brand.as_deref(),
                    product.price,
                    product.source_url.as_deref(),
                    now.as_str(),
                ],
            )
            .await
            .map_err(|e| GrandGuruError::Storage(e.to_string()))?;

        let mut rows = self
            .conn
            .query(
                "SELECT id FROM products WHERE model = ?1",
                params![product.model.as_str()],
            )
            .await
            .map_err(|e| GrandGuruError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => row
                .get::<i64>(0)
                .map_err(|e| GrandGuruError::Storage(e.to_string())),
            Ok(None) => Err(GrandGuruError::Storage(format!(
                "product {} vanished after upsert",
                product.model
            ))),
            Err(e) => Err(GrandGuruError::Storage(e.to_string())),
        }
    }

    /// Get a product by id, with its image URLs.
    pub async fn get_product(&self, id: i64) -> Result<Option<ProductRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, model, name, category, price, brand, created_at
                 FROM products WHERE id = ?1",
                params![id],
            )
            .await
            .map_err(|e| GrandGuruError::Storage(e.to_string()))?;

        let mut product = match rows.next().await {
            Ok(Some(row)) => row_to_product(&row)?,
            Ok(None) => return Ok(None),
            Err(e) => return Err(GrandGuruError::Storage(e.to_string())),
        };
        product.images = self.list_images(id).await?;
        Ok(Some(product))
    }

    /// A page of products ordered by model, plus the total count.
    pub async fn list_products(&self, limit: u32, offset: u32) -> Result<(Vec<ProductRecord>, u64)> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, model, name, category, price, brand, created_at
                 FROM products ORDER BY model LIMIT ?1 OFFSET ?2",
                params![limit, offset],
            )
            .await
            .map_err(|e| GrandGuruError::Storage(e.to_string()))?;

        let mut items = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            items.push(row_to_product(&row)?);
        }

        let total = self.count("SELECT COUNT(*) FROM products").await?;
        Ok((items, total))
    }

    // -----------------------------------------------------------------------
    // Images and videos
    // -----------------------------------------------------------------------

    /// Attach an image URL to a product. Duplicates are ignored.
    pub async fn add_image(&self, product_id: i64, url: &str) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT OR IGNORE INTO images (product_id, url, created_at) VALUES (?1, ?2, ?3)",
                params![product_id, url, now.as_str()],
            )
            .await
            .map_err(|e| GrandGuruError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Image URLs for a product, oldest first.
    pub async fn list_images(&self, product_id: i64) -> Result<Vec<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT url FROM images WHERE product_id = ?1 ORDER BY id",
                params![product_id],
            )
            .await
            .map_err(|e| GrandGuruError::Storage(e.to_string()))?;

        let mut urls = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            urls.push(
                row.get::<String>(0)
                    .map_err(|e| GrandGuruError::Storage(e.to_string()))?,
            );
        }
        Ok(urls)
    }

    /// Insert or update a video by YouTube id.
    pub async fn upsert_video(
        &self,
        product_id: Option<i64>,
        youtube_id: &str,
        title: Option<&str>,
        url: &str,
    ) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO videos (product_id, youtube_id, title, url, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(youtube_id) DO UPDATE SET
                   title = COALESCE(excluded.title, videos.title),
                   product_id = COALESCE(excluded.product_id, videos.product_id)",
                params![product_id, youtube_id, title, url, now.as_str()],
            )
            .await
            .map_err(|e| GrandGuruError::Storage(e.to_string()))?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Documents
    // -----------------------------------------------------------------------

    /// Insert or update a document by URL.
    ///
    /// Returns `false` without writing when the stored content hash matches.
    pub async fn upsert_document(&self, doc: &NewDocument) -> Result<bool> {
        self.check_writable()?;

        if let Some(hash) = &doc.content_hash {
            let mut rows = self
                .conn
                .query(
                    "SELECT content_hash FROM documents WHERE url = ?1",
                    params![doc.url.as_str()],
                )
                .await
                .map_err(|e| GrandGuruError::Storage(e.to_string()))?;
            if let Ok(Some(row)) = rows.next().await {
                if row.get::<String>(0).ok().as_deref() == Some(hash.as_str()) {
                    return Ok(false);
                }
            }
        }

        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO documents (product_id, url, doc_type, title, content, content_hash, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
                 ON CONFLICT(url) DO UPDATE SET
                   product_id = COALESCE(excluded.product_id, documents.product_id),
                   doc_type = excluded.doc_type,
                   title = excluded.title,
                   content = excluded.content,
                   content_hash = excluded.content_hash,
                   updated_at = excluded.updated_at",
                params![
                    doc.product_id,
                    doc.url.as_str(),
                    doc.doc_type.as_str(),
                    doc.title.as_deref(),
                    doc.content.as_deref(),
                    doc.content_hash.as_deref(),
                    now.as_str(),
                ],
            )
            .await
            .map_err(|e| GrandGuruError::Storage(e.to_string()))?;
        Ok(true)
    }

    /// Number of stored documents.
    pub async fn count_documents(&self) -> Result<u64> {
        self.count("SELECT COUNT(*) FROM documents").await
    }

    // -----------------------------------------------------------------------
    // FTS search
    // -----------------------------------------------------------------------

    /// Full-text search across document titles and content.
    pub async fn search_documents(&self, query: &str, limit: u32) -> Result<Vec<SearchResult>> {
        let mut rows = self
            .conn
            .query(
                "SELECT d.url, d.title, d.doc_type, rank
                 FROM documents_fts fts
                 JOIN documents d ON d.id = fts.rowid
                 WHERE documents_fts MATCH ?1
                 ORDER BY rank
                 LIMIT ?2",
                params![query, limit],
            )
            .await
            .map_err(|e| GrandGuruError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(SearchResult {
                url: row
                    .get::<String>(0)
                    .map_err(|e| GrandGuruError::Storage(e.to_string()))?,
                title: row.get::<String>(1).ok(),
                doc_type: row
                    .get::<String>(2)
                    .map_err(|e| GrandGuruError::Storage(e.to_string()))?,
                score: row.get::<f64>(3).unwrap_or(0.0),
            });
        }
        Ok(results)
    }

    async fn count(&self, sql: &str) -> Result<u64> {
        let mut rows = self
            .conn
            .query(sql, params![])
            .await
            .map_err(|e| GrandGuruError::Storage(e.to_string()))?;
        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<i64>(0).unwrap_or(0) as u64),
            Ok(None) => Ok(0),
            Err(e) => Err(GrandGuruError::Storage(e.to_string())),
        }
    }
}

/// Convert a database row to a [`ProductRecord`] (without images).
fn row_to_product(row: &libsql::Row) -> Result<ProductRecord> {
    Ok(ProductRecord {
        id: row
            .get::<i64>(0)
            .map_err(|e| GrandGuruError::Storage(e.to_string()))?,
        model: row
            .get::<String>(1)
            .map_err(|e| GrandGuruError::Storage(e.to_string()))?,
        name: row.get::<String>(2).ok(),
        category: row.get::<String>(3).ok(),
        price: row.get::<f64>(4).ok(),
        brand: row.get::<String>(5).ok(),
        created_at: {
            let s: String = row
                .get(6)
                .map_err(|e| GrandGuruError::Storage(e.to_string()))?;
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| GrandGuruError::Storage(format!("invalid date: {e}")))?
        },
        images: Vec::new(),
    })
}
