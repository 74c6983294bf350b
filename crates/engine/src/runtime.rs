// The engine's event loop: connect, pump, reconnect with capped backoff,
// and go offline exactly once when retries are exhausted.
//
// The loop owns the connection manager exclusively. Every select arm only
// produces a `Step` value; all connection work happens afterwards, so the
// receive future never aliases the manager.

use std::collections::HashSet;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use huddle_common::protocol::ws::{Topic, WsMessage};

use crate::analytics::LiveAnalyticsService;
use crate::bus::{ConnectionEvent, EventBus};
use crate::collab::CollaborationService;
use crate::presence::PresenceService;
use crate::publishing::PublishingService;
use crate::transport::{ConnectOutcome, ConnectionManager, Transport, TransportEvent};

/// Granularity of the timer arm driving flush and staleness checks.
const TICK: Duration = Duration::from_millis(250);

/// The domain services the runtime routes events into.
#[derive(Clone)]
pub(crate) struct Services {
    pub presence: PresenceService,
    pub collab: CollaborationService,
    pub publishing: PublishingService,
    pub analytics: LiveAnalyticsService,
}

/// Timer knobs for the pump loop.
#[derive(Debug, Clone)]
pub(crate) struct RuntimeConfig {
    pub stale_after: Duration,
    pub prune_interval: Duration,
}

/// Handle to the spawned runtime task.
pub struct RuntimeHandle {
    shutdown_tx: broadcast::Sender<()>,
    task: Option<JoinHandle<()>>,
}

impl RuntimeHandle {
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    pub async fn wait(mut self) {
        self.shutdown();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for RuntimeHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

pub(crate) fn spawn<T: Transport + 'static>(
    conn: ConnectionManager<T>,
    outbound_rx: mpsc::UnboundedReceiver<WsMessage>,
    services: Services,
    bus: EventBus,
    config: RuntimeConfig,
) -> RuntimeHandle {
    let (shutdown_tx, shutdown_rx) = broadcast::channel(4);
    let task = tokio::spawn(run(conn, outbound_rx, services, bus, config, shutdown_rx));
    RuntimeHandle { shutdown_tx, task: Some(task) }
}

enum Step {
    Shutdown,
    Outbound(Option<WsMessage>),
    Inbound(anyhow::Result<Option<TransportEvent>>),
    Tick,
}

pub(crate) async fn run<T: Transport>(
    mut conn: ConnectionManager<T>,
    mut outbound_rx: mpsc::UnboundedReceiver<WsMessage>,
    services: Services,
    bus: EventBus,
    config: RuntimeConfig,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    // Topics the services want, independent of what the current socket has.
    let mut desired: HashSet<Topic> = HashSet::new();
    let mut last_prune = tokio::time::Instant::now();

    'session: loop {
        // ── Connect (with capped backoff) ───────────────────────────
        match conn.connect().await {
            Ok(ConnectOutcome::Connected { resumed }) => {
                bus.emit_connection(ConnectionEvent::Connected { resumed });
                if !resumed {
                    for topic in desired.iter().cloned().collect::<Vec<_>>() {
                        if let Err(e) = conn.subscribe(topic).await {
                            warn!(error = %e, "resubscribe failed");
                        }
                    }
                    services.collab.resend_pending().await;
                }
            }
            Ok(ConnectOutcome::Failed { reason }) => {
                warn!(%reason, "connection attempt failed");
                bus.emit_connection(ConnectionEvent::Disconnected { reason });
                if !wait_for_retry(&mut conn, &bus, &mut shutdown_rx).await {
                    return;
                }
                continue 'session;
            }
            Err(e) => {
                // Misconfiguration (bad URL); retrying cannot help.
                warn!(error = %e, "connection misconfigured; going offline");
                conn.mark_offline();
                bus.emit_connection(ConnectionEvent::Offline);
                return;
            }
        }

        // ── Pump ────────────────────────────────────────────────────
        loop {
            let step = tokio::select! {
                _ = shutdown_rx.recv() => Step::Shutdown,
                frame = outbound_rx.recv() => Step::Outbound(frame),
                event = conn.recv_event() => Step::Inbound(event),
                _ = tokio::time::sleep(TICK) => Step::Tick,
            };

            match step {
                Step::Shutdown => {
                    info!("runtime shutting down");
                    conn.disconnect().await;
                    return;
                }
                Step::Outbound(None) => {
                    // Every service handle dropped; nothing left to drive.
                    debug!("outbound channel closed; stopping runtime");
                    conn.disconnect().await;
                    return;
                }
                Step::Outbound(Some(WsMessage::Subscribe { topic })) => {
                    if desired.insert(topic.clone()) {
                        if let Err(e) = conn.subscribe(topic).await {
                            warn!(error = %e, "subscribe failed");
                        }
                    }
                }
                Step::Outbound(Some(WsMessage::Unsubscribe { topic })) => {
                    if desired.remove(&topic) {
                        if let Err(e) = conn.unsubscribe(topic).await {
                            warn!(error = %e, "unsubscribe failed");
                        }
                    }
                }
                Step::Outbound(Some(msg)) => {
                    // Optimistic delivery: a failed send is logged, local
                    // state already moved on.
                    if let Err(e) = conn.send(&msg).await {
                        warn!(error = %e, "send failed; dropping frame");
                    }
                }
                Step::Inbound(Ok(Some(TransportEvent::Disconnected { reason }))) => {
                    bus.emit_connection(ConnectionEvent::Disconnected { reason });
                    if !wait_for_retry(&mut conn, &bus, &mut shutdown_rx).await {
                        return;
                    }
                    continue 'session;
                }
                Step::Inbound(Ok(Some(event))) => {
                    route(event, &services).await;
                }
                Step::Inbound(Ok(None)) => {}
                Step::Inbound(Err(e)) => {
                    // recv on a dead connection; treat as a drop.
                    bus.emit_connection(ConnectionEvent::Disconnected {
                        reason: format!("receive failed: {e}"),
                    });
                    if !wait_for_retry(&mut conn, &bus, &mut shutdown_rx).await {
                        return;
                    }
                    continue 'session;
                }
                Step::Tick => {
                    services.analytics.flush_elapsed().await;
                    if last_prune.elapsed() >= config.prune_interval {
                        last_prune = tokio::time::Instant::now();
                        let aged = services.presence.prune_stale(config.stale_after).await;
                        if aged > 0 {
                            debug!(aged, "pruned stale presence records");
                        }
                    }
                }
            }
        }
    }
}

/// Sleep out the backoff delay before the next attempt. Returns false when
/// the runtime should stop instead (retries exhausted or shutdown), having
/// emitted the offline event if retries ran out.
async fn wait_for_retry<T: Transport>(
    conn: &mut ConnectionManager<T>,
    bus: &EventBus,
    shutdown_rx: &mut broadcast::Receiver<()>,
) -> bool {
    if !conn.should_reconnect() {
        info!("reconnection attempts exhausted; going offline");
        conn.mark_offline();
        bus.emit_connection(ConnectionEvent::Offline);
        return false;
    }

    let delay = conn.reconnect_delay();
    debug!(?delay, "backing off before reconnect");
    tokio::select! {
        _ = shutdown_rx.recv() => {
            conn.disconnect().await;
            false
        }
        _ = tokio::time::sleep(delay) => true,
    }
}

async fn route(event: TransportEvent, services: &Services) {
    match event {
        TransportEvent::Presence(record) => {
            services.collab.observe_presence(&record).await;
            services.presence.apply_presence(record).await;
        }
        TransportEvent::PresenceLeave { user_id } => {
            services.collab.remove_collaborator(&user_id).await;
            services.presence.apply_leave(&user_id).await;
        }
        TransportEvent::Typing { user_id, location, active } => {
            services.presence.apply_typing(user_id, location, active).await;
        }
        TransportEvent::Operation { content_id, op } => {
            services.collab.apply_remote_operation(content_id, op).await;
        }
        TransportEvent::OperationAck { content_id, op_id, clock } => {
            services.collab.apply_ack(content_id, op_id, clock).await;
        }
        TransportEvent::JobUpdate(job) => {
            services.publishing.apply_job_update(job).await;
        }
        TransportEvent::MetricBatch(updates) => {
            services.analytics.ingest(updates).await;
        }
        TransportEvent::ServerError { code, message, retryable } => {
            warn!(%code, %message, retryable, "server error");
        }
        TransportEvent::Disconnected { .. } => {
            // Handled by the pump before routing.
        }
    }
}
