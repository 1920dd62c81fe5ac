//! Crawl process supervisor: runs one worker per job and turns its output
//! into events.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStderr, Command};
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use grandguru_shared::{
    CrawlDefaults, CrawlRequest, DataItem, EngineSettings, GrandGuruError, JobId, JobState,
    Result,
};

use super::events::ProgressTracker;
use super::ingest::IngestionBridge;
use super::process::WorkerProcess;
use super::publisher::QueuePublisher;
use super::registry::JobEntry;

/// Worker stderr lines kept for the exit diagnostic.
const STDERR_TAIL: usize = 20;

/// Parameters of one crawl run.
#[derive(Debug, Clone, PartialEq)]
pub struct CrawlJob {
    pub start_url: String,
    pub depth: u32,
    pub concurrency: u32,
    /// Seconds before each request.
    pub delay: f64,
    pub item_limit: Option<u64>,
    pub use_proxies: bool,
}

impl CrawlJob {
    /// Resolve a launch request against the configured defaults. A bare host
    /// gets `https://` prefixed.
    pub fn from_request(req: &CrawlRequest, defaults: &CrawlDefaults) -> Result<Self> {
        let domain = req.domain.trim();
        if domain.is_empty() {
            return Err(GrandGuruError::validation("domain must not be empty"));
        }
        let candidate = if domain.contains("://") {
            domain.to_string()
        } else {
            format!("https://{domain}")
        };
        let url = Url::parse(&candidate)
            .map_err(|e| GrandGuruError::validation(format!("invalid domain '{domain}': {e}")))?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(GrandGuruError::validation(format!(
                "invalid domain '{domain}': expected an http(s) URL"
            )));
        }

        let concurrency = req.concurrency.unwrap_or(defaults.concurrency);
        if concurrency == 0 {
            return Err(GrandGuruError::validation("concurrency must be at least 1"));
        }
        let delay = req.delay.unwrap_or(defaults.delay_secs);
        if !delay.is_finite() || delay < 0.0 {
            return Err(GrandGuruError::validation("delay must be a non-negative number"));
        }

        Ok(Self {
            start_url: url.to_string(),
            depth: req.depth.unwrap_or(defaults.depth),
            concurrency,
            delay,
            item_limit: req.item_limit.or(defaults.item_limit),
            use_proxies: req.use_proxies,
        })
    }

    /// The worker command line: program, base args, then per-job flags.
    pub fn build_command(&self, settings: &EngineSettings) -> Command {
        let mut cmd = Command::new(&settings.program);
        cmd.args(&settings.base_args)
            .arg("--start-url")
            .arg(&self.start_url)
            .arg("--depth")
            .arg(self.depth.to_string())
            .arg("--concurrency")
            .arg(self.concurrency.to_string())
            .arg("--delay")
            .arg(self.delay.to_string());
        if let Some(limit) = self.item_limit {
            cmd.arg("--item-limit").arg(limit.to_string());
        }
        if self.use_proxies {
            for (key, value) in &settings.proxy_env {
                cmd.env(key, value);
            }
        }
        cmd
    }
}

/// How a supervised run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Cancelled before the worker was spawned.
    NotStarted,
    /// Worker output reached EOF, or the worker never spawned.
    Completed,
    /// Cancelled while running.
    Stopped,
}

/// Spawns workers and drives their output through translation and ingestion.
#[derive(Clone)]
pub struct CrawlSupervisor {
    settings: Arc<EngineSettings>,
    bridge: IngestionBridge,
}

impl CrawlSupervisor {
    pub fn new(settings: Arc<EngineSettings>, bridge: IngestionBridge) -> Self {
        Self { settings, bridge }
    }

    /// Run `job` for `entry`. Publishes `started` and every intermediate
    /// event; the caller publishes the terminal event.
    #[instrument(skip_all, fields(job_id = %entry.job_id(), start_url = %job.start_url))]
    pub async fn run(
        &self,
        entry: &JobEntry,
        job: &CrawlJob,
        publisher: &QueuePublisher,
        tracker: &mut ProgressTracker,
    ) -> RunOutcome {
        if entry.is_cancelled() || !entry.advance(JobState::Running) {
            info!("job cancelled before start");
            return RunOutcome::NotStarted;
        }
        publisher.publish(tracker.started(&job.start_url));

        let (process, pipes) = match WorkerProcess::spawn(job.build_command(&self.settings)) {
            Ok(spawned) => spawned,
            Err(e) => {
                error!(error = %e, program = %self.settings.program.display(), "worker did not start");
                publisher.publish(tracker.error(&job.start_url, e.to_string()));
                return RunOutcome::Completed;
            }
        };
        if let Err(e) = entry.attach_process(process.clone()) {
            error!(error = %e, "could not attach worker");
            process.terminate(self.settings.terminate_grace).await;
            publisher.publish(tracker.error(&job.start_url, e.to_string()));
            return RunOutcome::Completed;
        }

        let mut stderr_task = tokio::spawn(drain_stderr(pipes.stderr, entry.job_id().clone()));
        let mut lines = BufReader::new(pipes.stdout).lines();

        // A read in progress is never interrupted: a stop terminates the
        // worker, which ends its output.
        loop {
            if entry.is_cancelled() {
                break;
            }
            match lines.next_line().await {
                Ok(Some(line)) => self.handle_line(&line, publisher, tracker).await,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "worker output unreadable");
                    publisher.publish(
                        tracker.error(&job.start_url, format!("worker output unreadable: {e}")),
                    );
                    break;
                }
            }
        }

        let stopped = entry.is_cancelled();
        let grace = self.settings.terminate_grace;
        let exit = if stopped {
            entry.advance(JobState::Stopping);
            let outcome = process.terminate(grace).await;
            info!(?outcome, "worker stopped");
            process.exit_info()
        } else {
            process.close_stdin().await;
            match process.wait_timeout(grace).await {
                Some(info) => Some(info),
                None => {
                    warn!("worker still running after end of output");
                    process.terminate(grace).await;
                    process.exit_info()
                }
            }
        };

        let stderr_tail = match tokio::time::timeout(grace, &mut stderr_task).await {
            Ok(Ok(tail)) => tail,
            _ => {
                stderr_task.abort();
                VecDeque::new()
            }
        };
        entry.detach_process();

        if stopped {
            return RunOutcome::Stopped;
        }

        match exit {
            Some(info) if info.success => {
                info!(%info, fetched = tracker.snapshot().fetched, "worker finished");
            }
            Some(info) => {
                warn!(%info, "worker failed");
                publisher.publish(tracker.error(
                    &job.start_url,
                    exit_detail(&format!("worker exited with {info}"), &stderr_tail),
                ));
            }
            None => {
                error!("worker could not be reaped");
                publisher.publish(tracker.error(
                    &job.start_url,
                    exit_detail("worker did not exit", &stderr_tail),
                ));
            }
        }
        RunOutcome::Completed
    }

    async fn handle_line(
        &self,
        line: &str,
        publisher: &QueuePublisher,
        tracker: &mut ProgressTracker,
    ) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        let item: DataItem = match serde_json::from_str(line) {
            Ok(item) => item,
            Err(e) => {
                debug!(error = %e, "malformed worker line");
                publisher.publish(tracker.malformed_line(line, &e.to_string()));
                return;
            }
        };

        publisher.publish(tracker.fetched(&item));
        let url = item.url.clone();
        match self.bridge.ingest(item).await {
            Ok(()) => {
                publisher.publish(tracker.ingested(&url));
            }
            Err(e) => {
                warn!(%url, error = %e, "ingestion failed");
                tracker.ingest_failed();
            }
        }
        publisher.publish(tracker.progress(&url));
    }
}

/// Log every stderr line at debug and return the last few.
async fn drain_stderr(stderr: ChildStderr, job_id: JobId) -> VecDeque<String> {
    let mut tail = VecDeque::with_capacity(STDERR_TAIL);
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                debug!(%job_id, line = %line, "worker stderr");
                if tail.len() == STDERR_TAIL {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            Ok(None) => break,
            Err(e) => {
                debug!(%job_id, error = %e, "worker stderr unreadable");
                break;
            }
        }
    }
    tail
}

fn exit_detail(summary: &str, tail: &VecDeque<String>) -> String {
    if tail.is_empty() {
        summary.to_string()
    } else {
        let joined: Vec<&str> = tail.iter().map(String::as_str).collect();
        format!("{summary}; stderr: {}", joined.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    fn settings() -> EngineSettings {
        EngineSettings {
            program: PathBuf::from("grandguru"),
            base_args: vec!["worker".into()],
            terminate_grace: Duration::from_millis(200),
            subscribe_wait: Duration::from_millis(100),
            subscribe_poll: Duration::from_millis(10),
            ingest_workers: 2,
            history_limit: 64,
            channel_capacity: 64,
            idle_eviction: Duration::from_secs(60),
            proxy_env: vec![("HTTP_PROXY", "http://proxy:3128".into())],
        }
    }

    fn request(domain: &str) -> CrawlRequest {
        CrawlRequest {
            domain: domain.into(),
            ..Default::default()
        }
    }

    #[test]
    fn bare_host_gets_https() {
        let job = CrawlJob::from_request(&request("www.grandstream.com"), &CrawlDefaults::default())
            .unwrap();
        assert_eq!(job.start_url, "https://www.grandstream.com/");
        assert_eq!(job.depth, 2);
        assert_eq!(job.concurrency, 8);
        assert_eq!(job.delay, 0.5);
        assert_eq!(job.item_limit, None);
    }

    #[test]
    fn request_overrides_defaults() {
        let req = CrawlRequest {
            domain: "http://example.com/start".into(),
            depth: Some(5),
            concurrency: Some(2),
            delay: Some(0.0),
            use_proxies: true,
            item_limit: Some(10),
        };
        let job = CrawlJob::from_request(&req, &CrawlDefaults::default()).unwrap();
        assert_eq!(job.start_url, "http://example.com/start");
        assert_eq!((job.depth, job.concurrency), (5, 2));
        assert_eq!(job.item_limit, Some(10));
        assert!(job.use_proxies);
    }

    #[test]
    fn invalid_requests_rejected() {
        let defaults = CrawlDefaults::default();
        for domain in ["", "   ", "ftp://example.com", "https://"] {
            assert!(
                CrawlJob::from_request(&request(domain), &defaults).is_err(),
                "{domain:?} should be rejected"
            );
        }
        let zero = CrawlRequest {
            concurrency: Some(0),
            ..request("example.com")
        };
        assert!(CrawlJob::from_request(&zero, &defaults).is_err());
        let negative = CrawlRequest {
            delay: Some(-1.0),
            ..request("example.com")
        };
        assert!(CrawlJob::from_request(&negative, &defaults).is_err());
    }

    #[test]
    fn command_carries_job_flags() {
        let job = CrawlJob {
            start_url: "https://example.com/".into(),
            depth: 3,
            concurrency: 4,
            delay: 0.25,
            item_limit: Some(7),
            use_proxies: true,
        };
        let cmd = job.build_command(&settings());
        let args: Vec<String> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec![
                "worker",
                "--start-url",
                "https://example.com/",
                "--depth",
                "3",
                "--concurrency",
                "4",
                "--delay",
                "0.25",
                "--item-limit",
                "7",
            ]
        );
        let envs: Vec<_> = cmd.as_std().get_envs().collect();
        assert_eq!(envs.len(), 1);
    }

    #[test]
    fn proxy_env_only_when_requested() {
        let job = CrawlJob {
            start_url: "https://example.com/".into(),
            depth: 1,
            concurrency: 1,
            delay: 0.0,
            item_limit: None,
            use_proxies: false,
        };
        let cmd = job.build_command(&settings());
        assert_eq!(cmd.as_std().get_envs().count(), 0);
        assert!(
            !cmd.as_std()
                .get_args()
                .any(|a| a.to_string_lossy() == "--item-limit")
        );
    }

    #[test]
    fn exit_detail_includes_stderr_tail() {
        let mut tail = VecDeque::new();
        assert_eq!(
            exit_detail("worker exited with exit code 2", &tail),
            "worker exited with exit code 2"
        );
        tail.push_back("boom".to_string());
        assert!(exit_detail("worker exited with exit code 2", &tail).ends_with("stderr: boom"));
    }
}
