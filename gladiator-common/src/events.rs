//! Pipeline events and completion notifications
//!
//! Two delivery channels exist:
//! - [`NotificationQueue`]: user-facing completion messages, drained by the
//!   next poll (at-most-once).
//! - [`EventBus`]: a broadcast of [`PipelineEvent`]s for SSE subscribers.
//!   Events emitted while nobody listens are dropped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

/// A fire-and-forget message for the user interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub text: String,
}

impl Notification {
    pub fn new(title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            text: text.into(),
        }
    }
}

/// Process-wide queue of pending notifications
#[derive(Debug, Clone, Default)]
pub struct NotificationQueue {
    inner: Arc<Mutex<Vec<Notification>>>,
}

impl NotificationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, notification: Notification) {
        self.lock().push(notification);
    }

    /// Take every pending notification; a second call returns nothing new
    pub fn drain(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Notification>> {
        // A panicking writer cannot leave a Vec half-updated
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Pipeline lifecycle events
///
/// Serialized with an internal `type` tag for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    /// A job task was spawned
    JobStarted {
        job: String,
        rerun: bool,
        timestamp: DateTime<Utc>,
    },

    /// A stage began executing (skipped stages do not emit this)
    StageStarted {
        job: String,
        stage: String,
        name: String,
        timestamp: DateTime<Utc>,
    },

    /// A stage reached a terminal outcome
    StageFinished {
        job: String,
        stage: String,
        /// skipped, completed, cancelled or failed
        outcome: String,
        timestamp: DateTime<Utc>,
    },

    /// The whole pipeline reached a terminal outcome
    JobFinished {
        job: String,
        /// completed, cancelled or failed
        outcome: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        timestamp: DateTime<Utc>,
    },
}

impl PipelineEvent {
    /// Event name used as the SSE `event:` field
    pub fn event_type(&self) -> &str {
        match self {
            PipelineEvent::JobStarted { .. } => "JobStarted",
            PipelineEvent::StageStarted { .. } => "StageStarted",
            PipelineEvent::StageFinished { .. } => "StageFinished",
            PipelineEvent::JobFinished { .. } => "JobFinished",
        }
    }

    pub fn job(&self) -> &str {
        match self {
            PipelineEvent::JobStarted { job, .. }
            | PipelineEvent::StageStarted { job, .. }
            | PipelineEvent::StageFinished { job, .. }
            | PipelineEvent::JobFinished { job, .. } => job,
        }
    }
}

/// Broadcast bus for [`PipelineEvent`]s
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// `capacity` is the number of events buffered before lagging
    /// subscribers start missing old events.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: PipelineEvent,
    ) -> Result<usize, broadcast::error::SendError<PipelineEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
