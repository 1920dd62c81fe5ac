//! Job service: the entry point used by the server and the CLI.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use grandguru_shared::{EngineSettings, GrandGuruError, JobId, JobState, Result};

use super::cancel::{CancellationController, StopOutcome};
use super::events::ProgressTracker;
use super::ingest::{IngestionBridge, Ingestor};
use super::publisher::QueuePublisher;
use super::queue::Subscription;
use super::registry::{JobEntry, JobRegistry};
use super::subscriber::StreamSubscriber;
use super::supervisor::{CrawlJob, CrawlSupervisor, RunOutcome};

/// Launches, stops, and streams crawl jobs.
pub struct JobService {
    registry: Arc<JobRegistry>,
    settings: Arc<EngineSettings>,
    supervisor: CrawlSupervisor,
    controller: CancellationController,
    subscriber: StreamSubscriber,
}

impl JobService {
    pub fn new(settings: EngineSettings, ingestor: Arc<dyn Ingestor>) -> Self {
        let settings = Arc::new(settings);
        let registry = Arc::new(JobRegistry::new(
            settings.history_limit,
            settings.channel_capacity,
        ));
        let bridge = IngestionBridge::new(ingestor, settings.ingest_workers);
        Self {
            supervisor: CrawlSupervisor::new(settings.clone(), bridge),
            controller: CancellationController::new(registry.clone(), settings.terminate_grace),
            subscriber: StreamSubscriber::new(
                registry.clone(),
                settings.subscribe_wait,
                settings.subscribe_poll,
            ),
            registry,
            settings,
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Launch `job` under a fresh id.
    pub fn launch(&self, job: CrawlJob) -> Result<JobId> {
        let job_id = JobId::generate();
        self.launch_with_id(job_id.clone(), job)?;
        Ok(job_id)
    }

    /// Launch `job` under a caller-chosen id. The queue exists when this
    /// returns, so subscribers can attach immediately. An id can be launched
    /// once; a stop that arrived first makes the run end before spawning.
    pub fn launch_with_id(&self, job_id: JobId, job: CrawlJob) -> Result<JoinHandle<RunOutcome>> {
        let entry = self.registry.create(&job_id);
        if !entry.mark_launched() {
            return Err(GrandGuruError::validation(format!(
                "job {job_id} was already launched"
            )));
        }
        info!(%job_id, start_url = %job.start_url, depth = job.depth, "job accepted");
        Ok(tokio::spawn(run_job(entry, job, self.supervisor.clone())))
    }

    pub async fn stop(&self, job_id: &JobId) -> StopOutcome {
        self.controller.stop(job_id).await
    }

    pub async fn subscribe(&self, job_id: &JobId) -> Result<Subscription> {
        self.subscriber.subscribe(job_id).await
    }

    pub fn status(&self, job_id: &JobId) -> Option<JobState> {
        self.registry.state(job_id)
    }

    /// Periodically drop jobs that finished more than `idle_eviction` ago.
    pub fn spawn_eviction(&self) -> JoinHandle<()> {
        let registry = self.registry.clone();
        let grace = self.settings.idle_eviction;
        let period = (grace / 2).max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                registry.evict_idle(grace);
            }
        })
    }

    /// Stop every job that has not finished. Used on server shutdown.
    pub async fn shutdown(&self) {
        let active: Vec<JobId> = self
            .registry
            .job_ids()
            .into_iter()
            .filter(|id| self.status(id).is_some_and(|s| !s.is_terminal()))
            .collect();
        if !active.is_empty() {
            info!(jobs = active.len(), "stopping active jobs");
        }
        for job_id in active {
            self.stop(&job_id).await;
        }
    }
}

/// Producer task: supervise the run and publish its terminal event.
async fn run_job(entry: Arc<JobEntry>, job: CrawlJob, supervisor: CrawlSupervisor) -> RunOutcome {
    let publisher = QueuePublisher::new(entry.queue().clone(), job.start_url.as_str());
    let mut tracker = ProgressTracker::new(entry.job_id().clone());

    let outcome = supervisor.run(&entry, &job, &publisher, &mut tracker).await;
    match outcome {
        RunOutcome::NotStarted => {
            entry.advance(JobState::StoppedEarly);
            publisher.finish(tracker.stopped(&job.start_url, "cancelled before start"));
        }
        RunOutcome::Completed => {
            publisher.finish(tracker.completed(&job.start_url));
            // A stop that raced the end of output leaves the job in Stopping.
            if !entry.advance(JobState::Completed) {
                entry.advance(JobState::Stopped);
            }
        }
        RunOutcome::Stopped => {
            publisher.finish(tracker.stopped(&job.start_url, "stopped by request"));
            entry.advance(JobState::Stopped);
        }
    }
    debug!(job_id = %entry.job_id(), state = ?entry.state(), "producer finished");
    outcome
}
