//! Ingestion bridge: runs the content-ingestion capability off the producer
//! task on a bounded, process-wide pool.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::warn;

use grandguru_shared::{DataItem, GrandGuruError, Result};

/// Something that stores or indexes a crawled record.
#[async_trait]
pub trait Ingestor: Send + Sync + 'static {
    async fn ingest(&self, item: &DataItem) -> Result<()>;
}

/// Accepts every record and does nothing.
pub struct NoopIngestor;

#[async_trait]
impl Ingestor for NoopIngestor {
    async fn ingest(&self, _item: &DataItem) -> Result<()> {
        Ok(())
    }
}

/// Shared handle to the ingestion pool. Cheap to clone.
#[derive(Clone)]
pub struct IngestionBridge {
    ingestor: Arc<dyn Ingestor>,
    pool: Arc<Semaphore>,
}

impl IngestionBridge {
    /// `workers` bounds concurrent ingestion calls across all jobs.
    pub fn new(ingestor: Arc<dyn Ingestor>, workers: usize) -> Self {
        Self {
            ingestor,
            pool: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    /// Ingest one record on its own task. A panicking ingestor is reported
    /// as an error like any other failure.
    pub async fn ingest(&self, item: DataItem) -> Result<()> {
        let permit = self
            .pool
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| GrandGuruError::Worker(format!("ingestion pool closed: {e}")))?;

        let ingestor = self.ingestor.clone();
        let url = item.url.clone();
        let task = tokio::spawn(async move {
            let _permit = permit;
            ingestor.ingest(&item).await
        });

        match task.await {
            Ok(result) => result,
            Err(e) => {
                warn!(%url, error = %e, "ingestion task failed");
                Err(GrandGuruError::Worker(format!("ingestion task failed: {e}")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grandguru_shared::ItemType;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Flaky;

    #[async_trait]
    impl Ingestor for Flaky {
        async fn ingest(&self, item: &DataItem) -> Result<()> {
            if item.url.contains("panic") {
                panic!("ingestor blew up");
            }
            if item.url.contains("bad") {
                return Err(GrandGuruError::Storage("disk full".into()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn failures_are_returned_not_raised() {
        let bridge = IngestionBridge::new(Arc::new(Flaky), 2);
        assert!(bridge.ingest(DataItem::new("https://ok", ItemType::Page)).await.is_ok());
        assert!(bridge.ingest(DataItem::new("https://bad", ItemType::Page)).await.is_err());
        assert!(bridge.ingest(DataItem::new("https://panic", ItemType::Page)).await.is_err());
        // Pool still usable after a panic.
        assert!(bridge.ingest(DataItem::new("https://ok2", ItemType::Page)).await.is_ok());
    }

    struct Counting {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Ingestor for Counting {
        async fn ingest(&self, _item: &DataItem) -> Result<()> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn pool_bounds_concurrency() {
        let counting = Arc::new(Counting {
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let bridge = IngestionBridge::new(counting.clone(), 2);

        let mut handles = Vec::new();
        for i in 0..6 {
            let bridge = bridge.clone();
            handles.push(tokio::spawn(async move {
                bridge
                    .ingest(DataItem::new(format!("https://x/{i}"), ItemType::Page))
                    .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert!(counting.peak.load(Ordering::SeqCst) <= 2);
    }
}
