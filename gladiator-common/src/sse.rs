//! Server-Sent Events (SSE) utilities

use crate::events::EventBus;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

/// Stream pipeline events from `bus` to one SSE client
///
/// With `job` set, only events of that job are forwarded. Lagging clients
/// skip the events they missed and keep streaming.
pub fn pipeline_event_stream(
    bus: &EventBus,
    job: Option<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!(job = ?job, "New SSE client connected to pipeline events");

    let mut rx = bus.subscribe();

    let stream = async_stream::stream! {
        yield Ok(Event::default()
            .event("ConnectionStatus")
            .data("connected"));

        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Some(job) = &job {
                        if event.job() != job {
                            continue;
                        }
                    }
                    match serde_json::to_string(&event) {
                        Ok(data) => {
                            debug!("SSE: Broadcasting {}", event.event_type());
                            yield Ok(Event::default().event(event.event_type()).data(data));
                        }
                        Err(e) => {
                            warn!("SSE: Failed to serialize event {}: {}", event.event_type(), e);
                        }
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("SSE: client lagged, {} events skipped", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    )
}
