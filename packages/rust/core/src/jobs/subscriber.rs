//! Client-side delivery: find a job's queue and drain it into a sink.

use std::sync::Arc;
use std::time::Duration;

use futures::{Sink, SinkExt};
use tokio::time::Instant;
use tracing::debug;

use grandguru_shared::{GrandGuruError, JobId, LogEvent, Result};

use super::queue::Subscription;
use super::registry::JobRegistry;

/// Attaches clients to job streams.
#[derive(Clone)]
pub struct StreamSubscriber {
    registry: Arc<JobRegistry>,
    wait: Duration,
    poll: Duration,
}

impl StreamSubscriber {
    pub fn new(registry: Arc<JobRegistry>, wait: Duration, poll: Duration) -> Self {
        Self {
            registry,
            wait,
            poll: poll.max(Duration::from_millis(1)),
        }
    }

    /// Wait up to the configured bound for `job_id`'s queue to exist, then
    /// subscribe to it (history first, then live events).
    pub async fn subscribe(&self, job_id: &JobId) -> Result<Subscription> {
        let deadline = Instant::now() + self.wait;
        loop {
            if let Some(queue) = self.registry.get_queue(job_id) {
                debug!(%job_id, "subscriber attached");
                return Ok(queue.subscribe());
            }
            let now = Instant::now();
            if now >= deadline {
                debug!(%job_id, "no queue appeared, rejecting subscriber");
                return Err(GrandGuruError::JobNotFound(job_id.to_string()));
            }
            tokio::time::sleep(self.poll.min(deadline - now)).await;
        }
    }
}

/// Forward events into `sink` until the stream ends. A failed send means
/// the client went away; the loop stops without touching the producer.
/// Returns the number of events delivered.
pub async fn drain<S>(mut sub: Subscription, sink: &mut S) -> usize
where
    S: Sink<LogEvent> + Unpin,
{
    let mut sent = 0;
    while let Some(event) = sub.next().await {
        if sink.send(event).await.is_err() {
            debug!("client disconnected");
            return sent;
        }
        sent += 1;
    }
    sent
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use futures::channel::mpsc;
    use grandguru_shared::LogStatus;

    fn subscriber(registry: Arc<JobRegistry>, wait_ms: u64) -> StreamSubscriber {
        StreamSubscriber::new(
            registry,
            Duration::from_millis(wait_ms),
            Duration::from_millis(10),
        )
    }

    #[tokio::test]
    async fn unknown_job_is_rejected_after_wait() {
        let registry = Arc::new(JobRegistry::new(16, 16));
        let started = Instant::now();
        let result = subscriber(registry, 50).subscribe(&JobId::from("nope")).await;
        assert!(matches!(result, Err(GrandGuruError::JobNotFound(_))));
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn waits_for_late_queue() {
        let registry = Arc::new(JobRegistry::new(16, 16));
        let job = JobId::from("late");

        let reg = registry.clone();
        let id = job.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(40)).await;
            let queue = reg.create_queue(&id);
            queue.publish(LogEvent::new(&id, "", LogStatus::Started));
            queue.close(LogEvent::new(&id, "", LogStatus::Completed));
        });

        let sub = subscriber(registry, 2000).subscribe(&job).await.unwrap();
        let (mut tx, rx) = mpsc::unbounded();
        assert_eq!(drain(sub, &mut tx).await, 2);
        drop(tx);
        let got: Vec<LogStatus> = rx.map(|e| e.status).collect().await;
        assert_eq!(got, vec![LogStatus::Started, LogStatus::Completed]);
    }

    #[tokio::test]
    async fn disconnected_client_stops_quietly() {
        let registry = Arc::new(JobRegistry::new(16, 16));
        let job = JobId::from("gone");
        let queue = registry.create_queue(&job);
        queue.publish(LogEvent::new(&job, "", LogStatus::Started));
        queue.publish(LogEvent::new(&job, "", LogStatus::Progress));

        let sub = subscriber(registry, 100).subscribe(&job).await.unwrap();
        let (mut tx, rx) = mpsc::unbounded::<LogEvent>();
        drop(rx);
        assert_eq!(drain(sub, &mut tx).await, 0);
        assert!(!queue.is_closed());
    }
}
