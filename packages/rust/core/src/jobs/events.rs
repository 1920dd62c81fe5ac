//! Event translation and progress counters for one job run.

use std::time::Instant;

use grandguru_shared::{DataItem, JobId, LogEvent, LogStatus, ProgressSnapshot};

/// Longest slice of a malformed worker line quoted in an `error` event.
const MAX_QUOTED_LINE: usize = 200;

/// Builds a job's [`LogEvent`]s and keeps the fetched/ingested/error counters.
///
/// Counters only grow, and `ingested + errors == fetched` holds whenever every
/// fetched record has been reported as ingested or failed.
#[derive(Debug)]
pub struct ProgressTracker {
    job_id: JobId,
    fetched: u64,
    ingested: u64,
    errors: u64,
    started_at: Option<Instant>,
}

impl ProgressTracker {
    pub fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            fetched: 0,
            ingested: 0,
            errors: 0,
            started_at: None,
        }
    }

    /// First event of a run. Starts the elapsed clock.
    pub fn started(&mut self, url: &str) -> LogEvent {
        self.started_at = Some(Instant::now());
        LogEvent::new(&self.job_id, url, LogStatus::Started)
    }

    /// A worker record arrived.
    pub fn fetched(&mut self, item: &DataItem) -> LogEvent {
        self.fetched += 1;
        LogEvent::new(&self.job_id, &item.url, LogStatus::Fetched)
            .with_detail(item_type_name(item))
    }

    /// Ingestion of the record at `url` succeeded.
    pub fn ingested(&mut self, url: &str) -> LogEvent {
        self.ingested += 1;
        LogEvent::new(&self.job_id, url, LogStatus::Ingested)
    }

    /// Ingestion of a record failed. Counted, but no event of its own.
    pub fn ingest_failed(&mut self) {
        self.errors += 1;
    }

    pub fn progress(&self, url: &str) -> LogEvent {
        LogEvent::new(&self.job_id, url, LogStatus::Progress).with_detail(self.snapshot_json())
    }

    /// A worker line that is not a valid record. Does not touch the counters.
    pub fn malformed_line(&self, line: &str, reason: &str) -> LogEvent {
        let quoted: String = line.chars().take(MAX_QUOTED_LINE).collect();
        LogEvent::new(&self.job_id, "", LogStatus::Error)
            .with_detail(format!("invalid worker output ({reason}): {quoted}"))
    }

    pub fn error(&self, url: &str, detail: impl Into<String>) -> LogEvent {
        LogEvent::new(&self.job_id, url, LogStatus::Error).with_detail(detail)
    }

    /// Terminal event for a run that reached the end of worker output.
    pub fn completed(&self, url: &str) -> LogEvent {
        LogEvent::new(&self.job_id, url, LogStatus::Completed).with_detail(self.snapshot_json())
    }

    /// Terminal event for a cancelled run.
    pub fn stopped(&self, url: &str, reason: &str) -> LogEvent {
        LogEvent::new(&self.job_id, url, LogStatus::Stopped).with_detail(reason)
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let elapsed = self
            .started_at
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        ProgressSnapshot {
            fetched: self.fetched,
            ingested: self.ingested,
            errors: self.errors,
            elapsed: (elapsed * 1000.0).round() / 1000.0,
        }
    }

    fn snapshot_json(&self) -> String {
        let snap = self.snapshot();
        serde_json::to_string(&snap).unwrap_or_else(|_| {
            format!(
                r#"{{"fetched":{},"ingested":{},"errors":{},"elapsed":0}}"#,
                snap.fetched, snap.ingested, snap.errors
            )
        })
    }
}

fn item_type_name(item: &DataItem) -> String {
    serde_json::to_value(item.item_type)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use grandguru_shared::ItemType;

    #[test]
    fn counters_follow_outcomes() {
        let mut tracker = ProgressTracker::new(JobId::from("t"));
        let item = DataItem::new("https://a.test/1", ItemType::Product);

        let started = tracker.started("https://a.test");
        assert_eq!(started.status, LogStatus::Started);

        let fetched = tracker.fetched(&item);
        assert_eq!(fetched.detail.as_deref(), Some("product"));
        tracker.ingested(&item.url);
        tracker.fetched(&item);
        tracker.ingest_failed();

        let snap = tracker.progress(&item.url).progress().unwrap();
        assert_eq!(snap.fetched, 2);
        assert_eq!(snap.ingested, 1);
        assert_eq!(snap.errors, 1);
        assert!(snap.elapsed >= 0.0);
    }

    #[test]
    fn malformed_line_leaves_counters() {
        let tracker = ProgressTracker::new(JobId::from("t"));
        let long = "x".repeat(500);
        let event = tracker.malformed_line(&long, "expected value");
        assert_eq!(event.status, LogStatus::Error);
        assert!(event.detail.as_ref().unwrap().len() < 300);
        assert_eq!(tracker.snapshot().fetched, 0);
        assert_eq!(tracker.snapshot().errors, 0);
    }

    #[test]
    fn completed_carries_final_snapshot() {
        let mut tracker = ProgressTracker::new(JobId::from("t"));
        tracker.started("https://a.test");
        let item = DataItem::new("https://a.test/1", ItemType::Page);
        tracker.fetched(&item);
        tracker.ingested(&item.url);

        let done = tracker.completed("https://a.test");
        assert_eq!(done.status, LogStatus::Completed);
        let snap = done.progress().unwrap();
        assert_eq!((snap.fetched, snap.ingested, snap.errors), (1, 1, 0));
    }
}
