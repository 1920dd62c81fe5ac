//! Process-wide table of crawl jobs.
//!
//! Maps a [`JobId`] to its event queue, optional worker process, cancellation
//! token, and lifecycle state. All locks here are synchronous and held only
//! for map or field access, never across an await point.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use grandguru_shared::{GrandGuruError, JobId, JobState, Result};

use super::process::WorkerProcess;
use super::queue::EventQueue;

/// Everything the engine tracks for one job.
pub struct JobEntry {
    job_id: JobId,
    queue: Arc<EventQueue>,
    process: Mutex<Option<Arc<WorkerProcess>>>,
    cancel: CancellationToken,
    state: Mutex<JobState>,
    launched: AtomicBool,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl JobEntry {
    fn new(job_id: JobId, history_limit: usize, channel_capacity: usize) -> Self {
        Self {
            queue: Arc::new(EventQueue::new(
                job_id.clone(),
                history_limit,
                channel_capacity,
            )),
            job_id,
            process: Mutex::new(None),
            cancel: CancellationToken::new(),
            state: Mutex::new(JobState::Pending),
            launched: AtomicBool::new(false),
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn request_cancel(&self) {
        self.cancel.cancel();
    }

    pub fn process(&self) -> Option<Arc<WorkerProcess>> {
        lock(&self.process).clone()
    }

    /// Attach a worker handle. Fails if a running one is already attached.
    pub fn attach_process(&self, process: Arc<WorkerProcess>) -> Result<()> {
        let mut slot = lock(&self.process);
        if slot.as_ref().is_some_and(|p| p.is_running()) {
            return Err(GrandGuruError::validation(format!(
                "job {} already has a running worker",
                self.job_id
            )));
        }
        *slot = Some(process);
        Ok(())
    }

    pub fn detach_process(&self) -> Option<Arc<WorkerProcess>> {
        lock(&self.process).take()
    }

    pub fn state(&self) -> JobState {
        *lock(&self.state)
    }

    /// Move to `next` if the transition is legal. Returns whether it happened.
    pub fn advance(&self, next: JobState) -> bool {
        let mut state = lock(&self.state);
        if state.can_transition_to(next) {
            debug!(job_id = %self.job_id, from = ?*state, to = ?next, "job state change");
            *state = next;
            true
        } else {
            debug!(job_id = %self.job_id, from = ?*state, to = ?next, "job state change rejected");
            false
        }
    }

    /// Mark the job as launched. Returns `false` if it already was.
    pub fn mark_launched(&self) -> bool {
        !self.launched.swap(true, Ordering::SeqCst)
    }
}

/// Registry of all known jobs.
pub struct JobRegistry {
    jobs: Mutex<HashMap<JobId, Arc<JobEntry>>>,
    history_limit: usize,
    channel_capacity: usize,
}

impl JobRegistry {
    pub fn new(history_limit: usize, channel_capacity: usize) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            history_limit,
            channel_capacity,
        }
    }

    /// Get or create the entry for `job_id`.
    pub fn create(&self, job_id: &JobId) -> Arc<JobEntry> {
        let mut jobs = lock(&self.jobs);
        jobs.entry(job_id.clone())
            .or_insert_with(|| {
                debug!(%job_id, "job registered");
                Arc::new(JobEntry::new(
                    job_id.clone(),
                    self.history_limit,
                    self.channel_capacity,
                ))
            })
            .clone()
    }

    /// Get or create the queue for `job_id`.
    pub fn create_queue(&self, job_id: &JobId) -> Arc<EventQueue> {
        self.create(job_id).queue().clone()
    }

    pub fn get(&self, job_id: &JobId) -> Option<Arc<JobEntry>> {
        lock(&self.jobs).get(job_id).cloned()
    }

    pub fn get_queue(&self, job_id: &JobId) -> Option<Arc<EventQueue>> {
        self.get(job_id).map(|e| e.queue().clone())
    }

    pub fn attach_process(&self, job_id: &JobId, process: Arc<WorkerProcess>) -> Result<()> {
        self.get(job_id)
            .ok_or_else(|| GrandGuruError::JobNotFound(job_id.to_string()))?
            .attach_process(process)
    }

    pub fn detach_process(&self, job_id: &JobId) -> Option<Arc<WorkerProcess>> {
        self.get(job_id).and_then(|e| e.detach_process())
    }

    /// Set the cancellation flag. Returns `false` for unknown jobs.
    pub fn request_cancel(&self, job_id: &JobId) -> bool {
        match self.get(job_id) {
            Some(entry) => {
                entry.request_cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_cancelled(&self, job_id: &JobId) -> bool {
        self.get(job_id).is_some_and(|e| e.is_cancelled())
    }

    pub fn state(&self, job_id: &JobId) -> Option<JobState> {
        self.get(job_id).map(|e| e.state())
    }

    pub fn cancellation(&self, job_id: &JobId) -> Option<CancellationToken> {
        self.get(job_id).map(|e| e.cancellation().clone())
    }

    pub fn remove(&self, job_id: &JobId) -> Option<Arc<JobEntry>> {
        lock(&self.jobs).remove(job_id)
    }

    /// Drop finished jobs whose stream closed more than `grace` ago.
    pub fn evict_idle(&self, grace: Duration) -> usize {
        let mut jobs = lock(&self.jobs);
        let before = jobs.len();
        jobs.retain(|_, entry| {
            let idle = entry
                .queue()
                .closed_at()
                .is_some_and(|at| at.elapsed() >= grace);
            !(idle && entry.state().is_terminal())
        });
        let evicted = before - jobs.len();
        if evicted > 0 {
            info!(evicted, remaining = jobs.len(), "evicted finished jobs");
        }
        evicted
    }

    pub fn job_ids(&self) -> Vec<JobId> {
        lock(&self.jobs).keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.jobs).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
