//! Application configuration for GrandGuru.
//!
//! User config lives at `~/.grandguru/grandguru.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GrandGuruError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "grandguru.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".grandguru";

// ---------------------------------------------------------------------------
// Config structs (matching grandguru.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Default crawl parameters for launch requests that omit them.
    #[serde(default)]
    pub crawl: CrawlDefaults,

    /// External crawl worker process.
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Proxy settings injected into the worker when a job asks for them.
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// Job engine tuning.
    #[serde(default)]
    pub jobs: JobsConfig,

    /// Content store.
    #[serde(default)]
    pub storage: StorageConfig,
}

/// `[server]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Socket address the API binds to.
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".into()
}

/// `[crawl]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlDefaults {
    /// Maximum link depth from the start URL.
    #[serde(default = "default_depth")]
    pub depth: u32,

    /// Concurrent requests inside the worker.
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,

    /// Seconds to wait before each request.
    #[serde(default = "default_delay")]
    pub delay_secs: f64,

    /// Stop after this many records. Absent means unlimited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_limit: Option<u64>,
}

impl Default for CrawlDefaults {
    fn default() -> Self {
        Self {
            depth: default_depth(),
            concurrency: default_concurrency(),
            delay_secs: default_delay(),
            item_limit: None,
        }
    }
}

fn default_depth() -> u32 {
    2
}
fn default_concurrency() -> u32 {
    8
}
fn default_delay() -> f64 {
    0.5
}

/// `[worker]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Worker executable. Empty means the running `grandguru` binary's
    /// `worker` subcommand.
    #[serde(default)]
    pub program: String,

    /// Arguments placed before the per-job flags.
    #[serde(default)]
    pub args: Vec<String>,

    /// Milliseconds a worker gets to exit after a shutdown request before
    /// it is killed.
    #[serde(default = "default_terminate_grace")]
    pub terminate_grace_ms: u64,
}

fn default_terminate_grace() -> u64 {
    3000
}

impl WorkerConfig {
    pub fn terminate_grace(&self) -> Duration {
        Duration::from_millis(self.terminate_grace_ms)
    }
}

/// `[proxy]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_proxy: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub https_proxy: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_proxy: Option<String>,
}

impl ProxyConfig {
    /// Environment variables to set on the worker process.
    pub fn env_vars(&self) -> Vec<(&'static str, String)> {
        let mut vars = Vec::new();
        if let Some(v) = &self.http_proxy {
            vars.push(("HTTP_PROXY", v.clone()));
        }
        if let Some(v) = &self.https_proxy {
            vars.push(("HTTPS_PROXY", v.clone()));
        }
        if let Some(v) = &self.no_proxy {
            vars.push(("NO_PROXY", v.clone()));
        }
        vars
    }
}

/// `[jobs]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// How long a stream subscriber waits for a job's queue to appear.
    #[serde(default = "default_subscribe_wait")]
    pub subscribe_wait_ms: u64,

    /// Poll interval while waiting for the queue.
    #[serde(default = "default_subscribe_poll")]
    pub subscribe_poll_ms: u64,

    /// Size of the shared ingestion pool.
    #[serde(default = "default_ingest_workers")]
    pub ingest_workers: usize,

    /// Events kept per job for late subscribers.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Live broadcast buffer per job.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Seconds a finished job stays queryable before eviction.
    #[serde(default = "default_idle_eviction")]
    pub idle_eviction_secs: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            subscribe_wait_ms: default_subscribe_wait(),
            subscribe_poll_ms: default_subscribe_poll(),
            ingest_workers: default_ingest_workers(),
            history_limit: default_history_limit(),
            channel_capacity: default_channel_capacity(),
            idle_eviction_secs: default_idle_eviction(),
        }
    }
}

fn default_subscribe_wait() -> u64 {
    10_000
}
fn default_subscribe_poll() -> u64 {
    100
}
fn default_ingest_workers() -> usize {
    4
}
fn default_history_limit() -> usize {
    1024
}
fn default_channel_capacity() -> usize {
    256
}
fn default_idle_eviction() -> u64 {
    600
}

/// `[storage]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Database file. Empty means `~/.grandguru/grandguru.db`.
    #[serde(default)]
    pub path: String,
}

// ---------------------------------------------------------------------------
// Job engine settings (runtime, derived from config)
// ---------------------------------------------------------------------------

/// Runtime settings for the job engine, with durations resolved.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Worker executable.
    pub program: PathBuf,
    /// Arguments placed before the per-job flags.
    pub base_args: Vec<String>,
    pub terminate_grace: Duration,
    pub subscribe_wait: Duration,
    pub subscribe_poll: Duration,
    pub ingest_workers: usize,
    pub history_limit: usize,
    pub channel_capacity: usize,
    pub idle_eviction: Duration,
    /// Proxy variables for jobs that set `use_proxies`.
    pub proxy_env: Vec<(&'static str, String)>,
}

impl EngineSettings {
    /// Build settings from config. `self_exe` is used when no worker program
    /// is configured, with `worker` prepended to the base args.
    pub fn from_config(config: &AppConfig, self_exe: &Path) -> Self {
        let (program, base_args) = if config.worker.program.is_empty() {
            let mut args = vec!["worker".to_string()];
            args.extend(config.worker.args.iter().cloned());
            (self_exe.to_path_buf(), args)
        } else {
            (
                PathBuf::from(&config.worker.program),
                config.worker.args.clone(),
            )
        };

        Self {
            program,
            base_args,
            terminate_grace: config.worker.terminate_grace(),
            subscribe_wait: Duration::from_millis(config.jobs.subscribe_wait_ms),
            subscribe_poll: Duration::from_millis(config.jobs.subscribe_poll_ms.max(1)),
            ingest_workers: config.jobs.ingest_workers.max(1),
            // Room for the terminal event and the end sentinel.
            history_limit: config.jobs.history_limit.max(2),
            channel_capacity: config.jobs.channel_capacity.max(2),
            idle_eviction: Duration::from_secs(config.jobs.idle_eviction_secs),
            proxy_env: config.proxy.env_vars(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.grandguru/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| GrandGuruError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.grandguru/grandguru.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Resolve the content store path, falling back to `~/.grandguru/grandguru.db`.
pub fn storage_path(config: &AppConfig) -> Result<PathBuf> {
    if config.storage.path.is_empty() {
        Ok(config_dir()?.join("grandguru.db"))
    } else {
        Ok(PathBuf::from(&config.storage.path))
    }
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| GrandGuruError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| GrandGuruError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| GrandGuruError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| GrandGuruError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| GrandGuruError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("bind"));
        assert!(toml_str.contains("terminate_grace_ms"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.crawl.depth, 2);
        assert_eq!(parsed.jobs.subscribe_wait_ms, 10_000);
        assert_eq!(parsed.server.bind, "127.0.0.1:8000");
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[worker]
program = "/usr/local/bin/crawl-worker"
args = ["--quiet"]

[proxy]
http_proxy = "http://proxy:3128"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.worker.program, "/usr/local/bin/crawl-worker");
        assert_eq!(config.worker.terminate_grace_ms, 3000);
        assert_eq!(config.jobs.ingest_workers, 4);
        assert_eq!(
            config.proxy.env_vars(),
            vec![("HTTP_PROXY", "http://proxy:3128".to_string())]
        );
    }

    #[test]
    fn engine_settings_default_to_self_worker() {
        let app = AppConfig::default();
        let settings = EngineSettings::from_config(&app, Path::new("/opt/grandguru"));
        assert_eq!(settings.program, PathBuf::from("/opt/grandguru"));
        assert_eq!(settings.base_args, vec!["worker".to_string()]);
        assert_eq!(settings.terminate_grace, Duration::from_millis(3000));
    }

    #[test]
    fn engine_settings_use_configured_program() {
        let mut app = AppConfig::default();
        app.worker.program = "python3".into();
        app.worker.args = vec!["crawl.py".into()];
        let settings = EngineSettings::from_config(&app, Path::new("/opt/grandguru"));
        assert_eq!(settings.program, PathBuf::from("python3"));
        assert_eq!(settings.base_args, vec!["crawl.py".to_string()]);
    }

    #[test]
    fn engine_settings_keep_room_for_terminal_frames() {
        let mut app = AppConfig::default();
        app.jobs.history_limit = 0;
        app.jobs.channel_capacity = 1;
        let settings = EngineSettings::from_config(&app, Path::new("/opt/grandguru"));
        assert_eq!(settings.history_limit, 2);
        assert_eq!(settings.channel_capacity, 2);
    }
}
