//! Core domain types for GrandGuru crawl jobs and their event streams.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// JobId
// ---------------------------------------------------------------------------

/// Opaque job identifier. Caller-supplied strings are accepted as-is; the
/// launch endpoint generates time-sortable UUID v7 values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Generate a new time-sortable job identifier.
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Log events
// ---------------------------------------------------------------------------

/// Status carried by a [`LogEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Started,
    Fetched,
    Ingested,
    Progress,
    Error,
    Stopped,
    Completed,
}

impl LogStatus {
    /// `completed` and `stopped` end a job's stream.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Stopped)
    }
}

impl std::fmt::Display for LogStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Started => "started",
            Self::Fetched => "fetched",
            Self::Ingested => "ingested",
            Self::Progress => "progress",
            Self::Error => "error",
            Self::Stopped => "stopped",
            Self::Completed => "completed",
        };
        f.write_str(s)
    }
}

/// One event on a job's stream, serialized as a single JSON frame to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    pub job_id: JobId,
    pub url: String,
    pub status: LogStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl LogEvent {
    pub fn new(job_id: &JobId, url: impl Into<String>, status: LogStatus) -> Self {
        Self {
            job_id: job_id.clone(),
            url: url.into(),
            status,
            detail: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Decode a `progress`/`completed` detail back into a snapshot.
    pub fn progress(&self) -> Option<ProgressSnapshot> {
        self.detail
            .as_deref()
            .and_then(|d| serde_json::from_str(d).ok())
    }
}

/// Counters reported in `progress` events and the `completed` detail.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub fetched: u64,
    pub ingested: u64,
    pub errors: u64,
    /// Seconds since the job's `started` event.
    pub elapsed: f64,
}

// ---------------------------------------------------------------------------
// Worker records
// ---------------------------------------------------------------------------

/// Category of a crawled record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    Product,
    Manual,
    Video,
    /// Generic fallback.
    Page,
}

/// One record emitted by the crawl worker, one JSON object per stdout line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataItem {
    pub url: String,
    pub item_type: ItemType,
    #[serde(default)]
    pub payload: BTreeMap<String, serde_json::Value>,
}

impl DataItem {
    pub fn new(url: impl Into<String>, item_type: ItemType) -> Self {
        Self {
            url: url.into(),
            item_type,
            payload: BTreeMap::new(),
        }
    }

    /// Builder-style payload insert.
    pub fn with(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.payload.insert(key.to_string(), value.into());
        self
    }

    /// String payload field, if present.
    pub fn field(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(|v| v.as_str())
    }
}

/// Control messages written to a worker's stdin, one JSON object per line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerControl {
    /// Finish early: stop fetching and exit once in-flight output is flushed.
    Shutdown,
}

// ---------------------------------------------------------------------------
// Job lifecycle
// ---------------------------------------------------------------------------

/// Lifecycle state of a crawl job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Stopping,
    Completed,
    Stopped,
    /// Cancelled before the worker was ever spawned.
    StoppedEarly,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Stopped | Self::StoppedEarly)
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, StoppedEarly)
                | (Running, Completed)
                | (Running, Stopping)
                | (Stopping, Stopped)
        )
    }
}

// ---------------------------------------------------------------------------
// API payloads
// ---------------------------------------------------------------------------

/// Body of a launch request. Missing numeric fields fall back to config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrawlRequest {
    /// Start URL or bare host.
    pub domain: String,
    #[serde(default)]
    pub depth: Option<u32>,
    #[serde(default)]
    pub concurrency: Option<u32>,
    /// Seconds between requests.
    #[serde(default)]
    pub delay: Option<f64>,
    #[serde(default)]
    pub use_proxies: bool,
    #[serde(default)]
    pub item_limit: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlResponse {
    pub job_id: JobId,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopResponse {
    pub job_id: JobId,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub job_id: JobId,
    pub state: JobState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_generate_unique() {
        let a = JobId::generate();
        let b = JobId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }

    #[test]
    fn log_event_serialization() {
        let job = JobId::from("job-1");
        let event = LogEvent::new(&job, "https://example.com", LogStatus::Fetched);
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["job_id"], "job-1");
        assert_eq!(json["status"], "fetched");
        assert!(json.get("detail").is_none());
        assert!(json["timestamp"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn progress_detail_roundtrip() {
        let job = JobId::from("job-1");
        let snap = ProgressSnapshot {
            fetched: 3,
            ingested: 2,
            errors: 1,
            elapsed: 1.5,
        };
        let event = LogEvent::new(&job, "", LogStatus::Progress)
            .with_detail(serde_json::to_string(&snap).unwrap());
        assert_eq!(event.progress(), Some(snap));
    }

    #[test]
    fn data_item_parses_worker_line() {
        let line = r#"{"url":"https://x.test/p","item_type":"product","payload":{"title":"GXP2170"}}"#;
        let item: DataItem = serde_json::from_str(line).expect("parse");
        assert_eq!(item.item_type, ItemType::Product);
        assert_eq!(item.field("title"), Some("GXP2170"));
    }

    #[test]
    fn data_item_rejects_unknown_type() {
        let line = r#"{"url":"https://x.test","item_type":"audio","payload":{}}"#;
        assert!(serde_json::from_str::<DataItem>(line).is_err());
    }

    #[test]
    fn worker_control_wire_format() {
        let json = serde_json::to_string(&WorkerControl::Shutdown).unwrap();
        assert_eq!(json, r#"{"type":"shutdown"}"#);
    }

    #[test]
    fn job_state_transitions() {
        assert!(JobState::Pending.can_transition_to(JobState::Running));
        assert!(JobState::Pending.can_transition_to(JobState::StoppedEarly));
        assert!(JobState::Running.can_transition_to(JobState::Stopping));
        assert!(JobState::Stopping.can_transition_to(JobState::Stopped));
        assert!(!JobState::Completed.can_transition_to(JobState::Stopped));
        assert!(!JobState::StoppedEarly.can_transition_to(JobState::Running));
        assert!(JobState::Stopped.is_terminal());
    }

    #[test]
    fn crawl_request_defaults() {
        let req: CrawlRequest = serde_json::from_str(r#"{"domain":"grandstream.com"}"#).unwrap();
        assert_eq!(req.domain, "grandstream.com");
        assert!(req.depth.is_none());
        assert!(!req.use_proxies);
    }
}
