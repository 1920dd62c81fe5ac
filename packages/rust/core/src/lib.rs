//! Crawl job engine for GrandGuru.
//!
//! [`jobs`] runs crawl workers, streams their progress as log events, and
//! handles stop requests. [`indexer`] is the ingestion capability that stores
//! crawled records in the content store.

pub mod indexer;
pub mod jobs;

pub use indexer::StorageIndexer;
pub use jobs::{CrawlJob, Ingestor, JobService, NoopIngestor, StopOutcome, Subscription};
