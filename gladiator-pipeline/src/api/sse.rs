//! Server-Sent Events for job and stage lifecycle

use crate::AppState;
use axum::{
    extract::{Query, State},
    response::sse::{Event, Sse},
};
use futures::stream::Stream;
use gladiator_common::sse::pipeline_event_stream;
use serde::Deserialize;
use std::convert::Infallible;

#[derive(Debug, Default, Deserialize)]
pub struct EventsQuery {
    /// Only stream events of this job
    pub job: Option<String>,
}

/// GET /events?job=<name>
///
/// Streams JobStarted, StageStarted, StageFinished and JobFinished events.
pub async fn pipeline_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    pipeline_event_stream(&state.event_bus, query.job.filter(|j| !j.is_empty()))
}
