//! Per-job event queue with replay history and broadcast fan-out.
//!
//! Every event is appended to a bounded history and sent on a broadcast
//! channel under one lock, so a subscriber that snapshots the history and
//! subscribes under the same lock sees each event exactly once. The queue is
//! closed by a terminal event followed by [`StreamFrame::End`]; nothing is
//! accepted afterwards.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use futures::Stream;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use grandguru_shared::{JobId, LogEvent};

/// Smallest history or channel size: the terminal event plus the sentinel.
pub const MIN_FRAMES: usize = 2;

/// One item on a job's stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    Event(LogEvent),
    /// Sentinel: the stream is over.
    End,
}

struct QueueInner {
    history: VecDeque<StreamFrame>,
    closed_at: Option<Instant>,
}

/// FIFO of [`LogEvent`]s for one job, readable by any number of subscribers.
pub struct EventQueue {
    job_id: JobId,
    history_limit: usize,
    inner: Mutex<QueueInner>,
    tx: broadcast::Sender<StreamFrame>,
}

impl EventQueue {
    /// Both bounds are raised to [`MIN_FRAMES`] so a lagging or late reader
    /// always finds the terminal event and the sentinel.
    pub fn new(job_id: JobId, history_limit: usize, channel_capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(channel_capacity.max(MIN_FRAMES));
        Self {
            job_id,
            history_limit: history_limit.max(MIN_FRAMES),
            inner: Mutex::new(QueueInner {
                history: VecDeque::new(),
                closed_at: None,
            }),
            tx,
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        // A panic while holding the lock leaves the history consistent.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append an event. Returns `false` if the queue is already closed.
    pub fn publish(&self, event: LogEvent) -> bool {
        let mut inner = self.lock();
        if inner.closed_at.is_some() {
            debug!(job_id = %self.job_id, status = %event.status, "dropping event after close");
            return false;
        }
        self.push(&mut inner, StreamFrame::Event(event));
        true
    }

    /// Append `terminal` and the end sentinel, then refuse further events.
    /// Returns `false` (and appends nothing) if the queue was already closed.
    pub fn close(&self, terminal: LogEvent) -> bool {
        let mut inner = self.lock();
        if inner.closed_at.is_some() {
            debug!(job_id = %self.job_id, status = %terminal.status, "queue already closed");
            return false;
        }
        self.push(&mut inner, StreamFrame::Event(terminal));
        self.push(&mut inner, StreamFrame::End);
        inner.closed_at = Some(Instant::now());
        true
    }

    fn push(&self, inner: &mut QueueInner, frame: StreamFrame) {
        if inner.history.len() >= self.history_limit {
            inner.history.pop_front();
        }
        inner.history.push_back(frame.clone());
        // No receivers is fine: late subscribers replay the history.
        let _ = self.tx.send(frame);
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed_at.is_some()
    }

    /// When the sentinel was appended.
    pub fn closed_at(&self) -> Option<Instant> {
        self.lock().closed_at
    }

    /// Attach a new reader: buffered history first, then live events.
    pub fn subscribe(&self) -> Subscription {
        let inner = self.lock();
        let backlog = inner.history.clone();
        let rx = self.tx.subscribe();
        drop(inner);

        Subscription {
            job_id: self.job_id.clone(),
            backlog,
            rx,
            done: false,
        }
    }
}

/// A reader of one job's stream. Yields events until the sentinel.
pub struct Subscription {
    job_id: JobId,
    backlog: VecDeque<StreamFrame>,
    rx: broadcast::Receiver<StreamFrame>,
    done: bool,
}

impl Subscription {
    /// Next event, or `None` once the sentinel has been read.
    pub async fn next(&mut self) -> Option<LogEvent> {
        if self.done {
            return None;
        }

        if let Some(frame) = self.backlog.pop_front() {
            return self.accept(frame);
        }

        loop {
            match self.rx.recv().await {
                Ok(frame) => return self.accept(frame),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(job_id = %self.job_id, skipped, "subscriber lagged, events skipped");
                }
                Err(RecvError::Closed) => {
                    self.done = true;
                    return None;
                }
            }
        }
    }

    fn accept(&mut self, frame: StreamFrame) -> Option<LogEvent> {
        match frame {
            StreamFrame::Event(event) => Some(event),
            StreamFrame::End => {
                self.done = true;
                None
            }
        }
    }

    /// Adapt into a `Stream` that ends at the sentinel.
    pub fn into_stream(self) -> impl Stream<Item = LogEvent> + Send + 'static {
        futures::stream::unfold(self, |mut sub| async move {
            let event = sub.next().await?;
            Some((event, sub))
        })
    }
}
