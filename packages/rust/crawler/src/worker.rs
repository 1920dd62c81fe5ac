//! Worker process entry point: crawl to stdout, stop on request from stdin.

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use grandguru_shared::{Result, WorkerControl};

use crate::engine::{CrawlParams, CrawlSummary, Crawler, JsonLinesSink};

/// Run a crawl, writing records as JSON lines to stdout.
///
/// A `{"type":"shutdown"}` line on stdin, or stdin closing, stops the crawl
/// after the records already written.
pub async fn run_worker(params: CrawlParams) -> Result<CrawlSummary> {
    let crawler = Crawler::new(params)?;
    let stop = CancellationToken::new();

    let watcher = tokio::spawn(watch_control(
        BufReader::new(tokio::io::stdin()),
        stop.clone(),
    ));

    let mut sink = JsonLinesSink::new(std::io::stdout());
    let result = crawler.crawl(&mut sink, &stop).await;

    watcher.abort();
    result
}

/// Cancel `stop` on a shutdown message or end of input.
pub async fn watch_control<R>(reader: R, stop: CancellationToken)
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<WorkerControl>(line) {
                    Ok(WorkerControl::Shutdown) => {
                        info!("shutdown requested");
                        break;
                    }
                    Err(e) => warn!(error = %e, "ignoring unrecognized control line"),
                }
            }
            Ok(None) => {
                debug!("control input closed");
                break;
            }
            Err(e) => {
                warn!(error = %e, "control input failed");
                break;
            }
        }
    }
    stop.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn shutdown_line_cancels() {
        let input: &[u8] = b"garbage\n\n{\"type\":\"shutdown\"}\nignored\n";
        let stop = CancellationToken::new();
        watch_control(BufReader::new(input), stop.clone()).await;
        assert!(stop.is_cancelled());
    }

    #[tokio::test]
    async fn end_of_input_cancels() {
        let (client, server) = tokio::io::duplex(64);
        let stop = CancellationToken::new();
        let handle = tokio::spawn(watch_control(BufReader::new(server), stop.clone()));

        tokio::task::yield_now().await;
        assert!(!stop.is_cancelled());

        drop(client);
        handle.await.unwrap();
        assert!(stop.is_cancelled());
    }
}
