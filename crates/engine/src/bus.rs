// Typed event bus: one broadcast channel per event category.
//
// Consumers subscribe per category and get a typed receiver; there is no
// string-keyed emitter and no runtime downcasting. Lagging receivers drop
// the oldest events (bounded channels).

use tokio::sync::broadcast;
use uuid::Uuid;

use huddle_common::types::{Location, PresenceRecord, PublishJob, TextOperation};

/// Capacity of each category channel. A receiver that falls further behind
/// than this observes a `Lagged` error and resumes at the oldest retained
/// event.
const CHANNEL_CAPACITY: usize = 256;

/// Connection lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected { resumed: bool },
    Disconnected { reason: String },
    /// Reconnection attempts are exhausted; emitted exactly once.
    Offline,
}

/// Presence cache changes.
#[derive(Debug, Clone, PartialEq)]
pub enum PresenceEvent {
    Updated(PresenceRecord),
    Left { user_id: String },
    Typing { user_id: String, location: Location, active: bool },
}

/// Collaboration session and operation notifications.
#[derive(Debug, Clone, PartialEq)]
pub enum CollabEvent {
    ContentJoined { content_id: Uuid },
    ContentLeft { content_id: Uuid },
    OperationProcessed { content_id: Uuid, op: TextOperation },
    OperationConfirmed { content_id: Uuid, op_id: Uuid },
}

/// Publish-job notifications. Semantic variants fire on status transitions
/// in addition to the generic `Updated`.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    Started(PublishJob),
    Updated(PublishJob),
    Completed(PublishJob),
    Failed(PublishJob),
    Cancelled(PublishJob),
}

/// Analytics cache notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetricEvent {
    /// A batch flush touched these metrics.
    Flushed { metric_ids: Vec<String> },
    ChartUpdated { chart_id: String },
}

/// Shared fan-out hub. Cheap to clone; all clones publish into the same
/// channels.
#[derive(Debug, Clone)]
pub struct EventBus {
    connection: broadcast::Sender<ConnectionEvent>,
    presence: broadcast::Sender<PresenceEvent>,
    collab: broadcast::Sender<CollabEvent>,
    job: broadcast::Sender<JobEvent>,
    metric: broadcast::Sender<MetricEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            connection: broadcast::channel(CHANNEL_CAPACITY).0,
            presence: broadcast::channel(CHANNEL_CAPACITY).0,
            collab: broadcast::channel(CHANNEL_CAPACITY).0,
            job: broadcast::channel(CHANNEL_CAPACITY).0,
            metric: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    pub fn subscribe_connection(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.connection.subscribe()
    }

    pub fn subscribe_presence(&self) -> broadcast::Receiver<PresenceEvent> {
        self.presence.subscribe()
    }

    pub fn subscribe_collab(&self) -> broadcast::Receiver<CollabEvent> {
        self.collab.subscribe()
    }

    pub fn subscribe_jobs(&self) -> broadcast::Receiver<JobEvent> {
        self.job.subscribe()
    }

    pub fn subscribe_metrics(&self) -> broadcast::Receiver<MetricEvent> {
        self.metric.subscribe()
    }

    // A send error just means nobody is listening right now.

    pub(crate) fn emit_connection(&self, event: ConnectionEvent) {
        let _ = self.connection.send(event);
    }

    pub(crate) fn emit_presence(&self, event: PresenceEvent) {
        let _ = self.presence.send(event);
    }

    pub(crate) fn emit_collab(&self, event: CollabEvent) {
        let _ = self.collab.send(event);
    }

    pub(crate) fn emit_job(&self, event: JobEvent) {
        let _ = self.job.send(event);
    }

    pub(crate) fn emit_metric(&self, event: MetricEvent) {
        let _ = self.metric.send(event);
    }
}
