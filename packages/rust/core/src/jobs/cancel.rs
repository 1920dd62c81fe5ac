//! Stop requests.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument};

use grandguru_shared::{JobId, JobState, LogEvent, LogStatus};

use super::process::TerminateOutcome;
use super::registry::JobRegistry;

/// What a stop request did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The job had not started; it never will.
    CancelledBeforeStart,
    /// A running worker was terminated.
    Terminated(TerminateOutcome),
    /// Cancellation was flagged while the job was between spawn and attach,
    /// or after the worker already exited.
    Flagged,
    /// The job had already finished.
    AlreadyFinished,
}

/// Stops jobs: terminates the worker if one runs, flags the job otherwise,
/// and closes its stream with a `stopped` event.
#[derive(Clone)]
pub struct CancellationController {
    registry: Arc<JobRegistry>,
    grace: Duration,
}

impl CancellationController {
    pub fn new(registry: Arc<JobRegistry>, grace: Duration) -> Self {
        Self { registry, grace }
    }

    /// Idempotent. Unknown jobs get an entry so a racing launch sees the
    /// cancel.
    #[instrument(skip_all, fields(job_id = %job_id))]
    pub async fn stop(&self, job_id: &JobId) -> StopOutcome {
        let entry = self.registry.create(job_id);
        let before = entry.state();
        entry.request_cancel();

        if before.is_terminal() {
            return StopOutcome::AlreadyFinished;
        }

        let outcome = if entry.advance(JobState::StoppedEarly) {
            StopOutcome::CancelledBeforeStart
        } else {
            entry.advance(JobState::Stopping);
            match entry.process() {
                Some(process) if process.is_running() => {
                    StopOutcome::Terminated(process.terminate(self.grace).await)
                }
                _ => StopOutcome::Flagged,
            }
        };

        if entry.queue().close(stopped_event(job_id)) {
            info!(?outcome, "job stopped");
        }
        outcome
    }
}

fn stopped_event(job_id: &JobId) -> LogEvent {
    LogEvent::new(job_id, "", LogStatus::Stopped).with_detail("stopped by request")
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    async fn statuses(registry: &JobRegistry, job: &JobId) -> Vec<LogStatus> {
        registry
            .get_queue(job)
            .unwrap()
            .subscribe()
            .into_stream()
            .map(|e| e.status)
            .collect()
            .await
    }

    #[tokio::test]
    async fn stop_unknown_job_creates_stopped_entry() {
        let registry = Arc::new(JobRegistry::new(16, 16));
        let controller = CancellationController::new(registry.clone(), Duration::from_millis(100));
        let job = JobId::from("c1");

        assert_eq!(controller.stop(&job).await, StopOutcome::CancelledBeforeStart);
        assert!(registry.is_cancelled(&job));
        assert_eq!(registry.state(&job), Some(JobState::StoppedEarly));
        assert_eq!(statuses(&registry, &job).await, vec![LogStatus::Stopped]);
    }

    #[tokio::test]
    async fn stop_twice_is_a_noop() {
        let registry = Arc::new(JobRegistry::new(16, 16));
        let controller = CancellationController::new(registry.clone(), Duration::from_millis(100));
        let job = JobId::from("c2");
        registry.create(&job);

        controller.stop(&job).await;
        assert_eq!(controller.stop(&job).await, StopOutcome::AlreadyFinished);
        assert_eq!(statuses(&registry, &job).await, vec![LogStatus::Stopped]);
    }

    #[tokio::test]
    async fn stop_running_job_without_process_flags_it() {
        let registry = Arc::new(JobRegistry::new(16, 16));
        let controller = CancellationController::new(registry.clone(), Duration::from_millis(100));
        let job = JobId::from("c3");
        registry.create(&job).advance(JobState::Running);

        assert_eq!(controller.stop(&job).await, StopOutcome::Flagged);
        assert_eq!(registry.state(&job), Some(JobState::Stopping));
        assert!(registry.is_cancelled(&job));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stop_terminates_running_worker() {
        use crate::jobs::process::WorkerProcess;

        let registry = Arc::new(JobRegistry::new(16, 16));
        let controller = CancellationController::new(registry.clone(), Duration::from_millis(200));
        let job = JobId::from("c4");
        registry.create(&job).advance(JobState::Running);

        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c").arg("exec sleep 30");
        let (process, _pipes) = WorkerProcess::spawn(cmd).unwrap();
        registry.attach_process(&job, process.clone()).unwrap();

        let outcome = controller.stop(&job).await;
        assert_eq!(outcome, StopOutcome::Terminated(TerminateOutcome::Killed));
        assert!(!process.is_running());
        assert_eq!(statuses(&registry, &job).await, vec![LogStatus::Stopped]);
    }
}
