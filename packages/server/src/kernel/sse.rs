//! SSE streaming of job progress.
//!
//! Subscribes to the job's [`ProgressHub`] channel first, then replays what
//! the store already holds, then forwards live events. Live progress already
//! covered by the replay is dropped, so a client sees each stage number once
//! and in order. The stream ends after the terminal event.

use std::convert::Infallible;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{self, BoxStream, StreamExt};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use super::jobs::{JobError, JobManager};
use super::stream_hub::{JobEvent, ProgressHub};

pub type JobEventStream = BoxStream<'static, Result<Event, Infallible>>;

fn to_sse(event: &JobEvent) -> (Event, bool) {
    let sse = Event::default()
        .event(event.name())
        .data(serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string()));
    (sse, matches!(event, JobEvent::Terminal { .. }))
}

/// Build the SSE response for one job.
pub async fn job_event_stream(
    hub: &ProgressHub,
    manager: &JobManager,
    job_id: Uuid,
) -> Result<Sse<JobEventStream>, JobError> {
    let rx = hub.subscribe(job_id).await;
    let job = manager.get_status(job_id).await?;

    let last_replayed = job.last_stage_number();
    let mut replay: Vec<JobEvent> = job
        .progress_updates
        .iter()
        .cloned()
        .map(JobEvent::Progress)
        .collect();

    let live = if job.is_terminal() {
        replay.push(JobEvent::Terminal {
            status: job.status,
            error_message: job.error_message.clone(),
        });
        stream::empty::<(Event, bool)>().boxed()
    } else {
        BroadcastStream::new(rx)
            .filter_map(move |received| async move {
                match received {
                    Ok(JobEvent::Progress(update)) if update.stage_number <= last_replayed => None,
                    Ok(event) => Some(to_sse(&event)),
                    Err(BroadcastStreamRecvError::Lagged(_)) => {
                        Some((Event::default().event("lagged").data("{}"), false))
                    }
                }
            })
            .boxed()
    };

    let events = stream::iter(replay.iter().map(to_sse).collect::<Vec<_>>())
        .chain(live)
        .scan(false, |finished, (event, terminal)| {
            let item = if *finished {
                None
            } else {
                *finished = terminal;
                Some(Ok::<_, Infallible>(event))
            };
            futures::future::ready(item)
        })
        .boxed();

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
