//! Crawl job endpoints: launch, status, stop, and the WebSocket log stream.

use axum::Json;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use futures::{Sink, SinkExt};
use tracing::{debug, info, instrument};

use grandguru_core::jobs::drain;
use grandguru_core::{CrawlJob, Subscription};
use grandguru_shared::{
    CrawlRequest, CrawlResponse, JobId, JobStatusResponse, LogEvent, StopResponse,
};

use crate::AppState;
use crate::error::{AppError, ErrorBody};

/// `POST /crawl`
#[instrument(skip_all, fields(domain = %req.domain))]
pub(crate) async fn launch(
    State(state): State<AppState>,
    Json(req): Json<CrawlRequest>,
) -> Result<Json<CrawlResponse>, AppError> {
    let job = CrawlJob::from_request(&req, &state.config.crawl)?;
    let job_id = state.jobs.launch(job)?;
    info!(%job_id, "crawl job created");
    Ok(Json(CrawlResponse {
        job_id,
        status: "created".into(),
    }))
}

/// `GET /crawl/{job_id}`
pub(crate) async fn status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatusResponse>, AppError> {
    let job_id = JobId::from(job_id);
    let job_state = state
        .jobs
        .status(&job_id)
        .ok_or_else(|| AppError::not_found(format!("job not found: {job_id}")))?;
    Ok(Json(JobStatusResponse {
        job_id,
        state: job_state,
    }))
}

/// `POST /logs/stop/{job_id}`. Always acknowledges.
pub(crate) async fn stop(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Json<StopResponse> {
    let job_id = JobId::from(job_id);
    let outcome = state.jobs.stop(&job_id).await;
    debug!(%job_id, ?outcome, "stop handled");
    Json(StopResponse {
        job_id,
        status: "stopped".into(),
    })
}

/// `GET /logs/ws/{job_id}`
pub(crate) async fn logs_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Response {
    ws.on_upgrade(move |socket| serve_logs(socket, state, JobId::from(job_id)))
}

async fn serve_logs(mut socket: WebSocket, state: AppState, job_id: JobId) {
    match state.jobs.subscribe(&job_id).await {
        Ok(sub) => {
            let sent = forward_events(sub, &mut socket).await;
            debug!(%job_id, sent, "log stream finished");
        }
        Err(e) => {
            debug!(%job_id, error = %e, "log stream rejected");
            let body = ErrorBody::new("not_found", e.to_string());
            let _ = socket.send(json_frame(&body)).await;
        }
    }
    let _ = socket.send(Message::Close(None)).await;
}

/// Send each event as one JSON text frame until the stream ends or the
/// client goes away.
pub(crate) async fn forward_events<S>(sub: Subscription, sink: &mut S) -> usize
where
    S: Sink<Message> + Unpin,
{
    let mut frames = sink.with(|event: LogEvent| {
        futures::future::ready(Ok::<_, S::Error>(json_frame(&event)))
    });
    drain(sub, &mut frames).await
}

fn json_frame<T: serde::Serialize>(value: &T) -> Message {
    let text = serde_json::to_string(value).unwrap_or_else(|e| {
        format!(r#"{{"error":{{"code":"internal","message":"{e}"}}}}"#)
    });
    Message::Text(text.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use futures::channel::mpsc;
    use grandguru_core::jobs::EventQueue;
    use grandguru_shared::LogStatus;

    #[tokio::test]
    async fn events_become_json_text_frames() {
        let job = JobId::from("ws1");
        let queue = EventQueue::new(job.clone(), 16, 16);
        queue.publish(LogEvent::new(&job, "https://a.test", LogStatus::Started));
        queue.close(LogEvent::new(&job, "https://a.test", LogStatus::Completed));

        let (mut tx, rx) = mpsc::unbounded::<Message>();
        assert_eq!(forward_events(queue.subscribe(), &mut tx).await, 2);
        drop(tx);

        let frames: Vec<Message> = rx.collect().await;
        let statuses: Vec<String> = frames
            .iter()
            .map(|m| match m {
                Message::Text(text) => {
                    let v: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
                    assert_eq!(v["job_id"], "ws1");
                    v["status"].as_str().unwrap().to_string()
                }
                other => panic!("unexpected frame {other:?}"),
            })
            .collect();
        assert_eq!(statuses, vec!["started", "completed"]);
    }
}
