//! Shared types, error model, and configuration for GrandGuru.
//!
//! This crate is the foundation depended on by all other GrandGuru crates.
//! It provides:
//! - [`GrandGuruError`]: the unified error type
//! - Domain types ([`JobId`], [`LogEvent`], [`DataItem`], [`JobState`])
//! - Configuration ([`AppConfig`], [`EngineSettings`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CrawlDefaults, EngineSettings, JobsConfig, ProxyConfig, ServerConfig,
    StorageConfig, WorkerConfig, config_dir, config_file_path, init_config, load_config,
    load_config_from, storage_path,
};
pub use error::{GrandGuruError, Result};
pub use types::{
    CrawlRequest, CrawlResponse, DataItem, ItemType, JobId, JobState, JobStatusResponse,
    LogEvent, LogStatus, ProgressSnapshot, StopResponse, WorkerControl,
};
