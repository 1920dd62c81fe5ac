//! Producer-side handle on a job's queue.

use std::sync::Arc;

use tracing::warn;

use grandguru_shared::{JobId, LogEvent, LogStatus};

use super::queue::EventQueue;

/// Appends a producer's events to its job queue and guarantees the queue is
/// closed exactly once, even if the producer returns early or panics.
pub struct QueuePublisher {
    queue: Arc<EventQueue>,
    job_id: JobId,
    url: String,
    finished: bool,
}

impl QueuePublisher {
    pub fn new(queue: Arc<EventQueue>, url: impl Into<String>) -> Self {
        Self {
            job_id: queue.job_id().clone(),
            queue,
            url: url.into(),
            finished: false,
        }
    }

    /// Enqueue a substantive event. Returns `false` once the queue is closed,
    /// for example by a concurrent stop.
    pub fn publish(&self, event: LogEvent) -> bool {
        self.queue.publish(event)
    }

    /// Enqueue the terminal event and the sentinel. Returns `false` if the
    /// queue had already been closed by someone else.
    pub fn finish(mut self, terminal: LogEvent) -> bool {
        self.finished = true;
        self.queue.close(terminal)
    }
}

impl Drop for QueuePublisher {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let terminal = LogEvent::new(&self.job_id, self.url.as_str(), LogStatus::Stopped)
            .with_detail("producer aborted");
        if self.queue.close(terminal) {
            warn!(job_id = %self.job_id, "producer ended without a terminal event");
        }
    }
}
