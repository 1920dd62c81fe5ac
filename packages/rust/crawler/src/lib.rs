//! Crawl worker engine and site extractors.
//!
//! This crate provides:
//! - [`extractors`]: URL-pattern extractors producing [`DataItem`](grandguru_shared::DataItem) records
//! - [`ExtractorRegistry`]: static, first-match extractor list
//! - [`engine`]: concurrent, depth-limited BFS crawler
//! - [`worker`]: the stdout/stdin worker process protocol

pub mod engine;
pub mod extractors;
pub mod worker;

pub use engine::{CrawlParams, CrawlSummary, Crawler, JsonLinesSink, RecordSink};
pub use extractors::{
    Extractor, ExtractorRegistry, GenericExtractor, GrandstreamExtractor, GuidesExtractor, Page,
    SmallBusinessExtractor,
};
pub use worker::{run_worker, watch_control};
