//! Crawl job orchestration and log streaming.
//!
//! A job runs as one producer task that supervises an external worker
//! process, translates its JSON-lines output into [`LogEvent`]s, ingests each
//! record, and publishes everything to the job's [`EventQueue`]. Clients
//! subscribe to the queue and receive the buffered history followed by live
//! events until the terminal `completed` or `stopped` event.
//!
//! [`LogEvent`]: grandguru_shared::LogEvent

pub mod cancel;
pub mod events;
pub mod ingest;
pub mod manager;
pub mod process;
pub mod publisher;
pub mod queue;
pub mod registry;
pub mod subscriber;
pub mod supervisor;

pub use cancel::{CancellationController, StopOutcome};
pub use events::ProgressTracker;
pub use ingest::{IngestionBridge, Ingestor, NoopIngestor};
pub use manager::JobService;
pub use process::{ExitInfo, TerminateOutcome, WorkerProcess};
pub use publisher::QueuePublisher;
pub use queue::{EventQueue, StreamFrame, Subscription};
pub use registry::{JobEntry, JobRegistry};
pub use subscriber::{StreamSubscriber, drain};
pub use supervisor::{CrawlJob, CrawlSupervisor, RunOutcome};
