// Collaboration session: which document is joined, who is editing it, and
// the shared text buffer kept consistent through operational transform.
//
// One session per engine instance. Joining a new document implicitly
// leaves the previous one; there are never two joined documents.
//
// Locally originated operations apply optimistically and stay in a pending
// map until the relay acknowledges them; on a non-resumed reconnect the
// runtime asks for them to be re-sent.

pub mod transform;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use huddle_common::protocol::ws::{Topic, WsMessage};
use huddle_common::types::{
    CursorPosition, OperationKind, PresenceRecord, SelectionRange, TextOperation,
};

use crate::bus::{CollabEvent, EventBus};
use crate::presence::PresenceService;
use crate::transport::Outbound;

/// Operations retained for transforming late arrivals. Anything older has
/// been seen by every live client long ago.
const OPERATION_LOG_CAP: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Idle,
    Joined { content_id: Uuid },
}

#[derive(Debug)]
struct CollabState {
    session: SessionState,
    /// Presence records of users active in the joined document.
    collaborators: HashMap<String, PresenceRecord>,
    /// The shared text, mirrored locally.
    buffer: String,
    /// Applied operations, sorted by `(clock, user_id)`.
    log: Vec<TextOperation>,
    /// Locally originated operations awaiting a relay ack.
    pending: HashMap<Uuid, TextOperation>,
    /// Highest Lamport clock observed or produced.
    clock: u64,
}

impl Default for CollabState {
    fn default() -> Self {
        Self {
            session: SessionState::Idle,
            collaborators: HashMap::new(),
            buffer: String::new(),
            log: Vec::new(),
            pending: HashMap::new(),
            clock: 0,
        }
    }
}

/// Shared collaboration session. Cheap to clone.
#[derive(Clone)]
pub struct CollaborationService {
    state: Arc<RwLock<CollabState>>,
    presence: PresenceService,
    outbound: Outbound,
    bus: EventBus,
}

impl CollaborationService {
    pub fn new(presence: PresenceService, outbound: Outbound, bus: EventBus) -> Self {
        Self { state: Arc::new(RwLock::new(CollabState::default())), presence, outbound, bus }
    }

    // ── Session state machine ───────────────────────────────────────

    /// Join a document. If another document is joined, leave it first.
    pub async fn join_content(&self, content_id: Uuid) {
        let left = {
            let mut state = self.state.write().await;
            match state.session {
                SessionState::Joined { content_id: current } if current == content_id => {
                    return;
                }
                SessionState::Joined { content_id: previous } => {
                    reset_document_state(&mut state);
                    state.session = SessionState::Joined { content_id };
                    Some(previous)
                }
                SessionState::Idle => {
                    state.session = SessionState::Joined { content_id };
                    None
                }
            }
        };

        if let Some(previous) = left {
            self.outbound.unsubscribe(Topic::Content(previous));
            self.bus.emit_collab(CollabEvent::ContentLeft { content_id: previous });
        }
        self.outbound.subscribe(Topic::Content(content_id));
        self.bus.emit_collab(CollabEvent::ContentJoined { content_id });
    }

    /// Leave the joined document, if any.
    pub async fn leave_content(&self) {
        let left = {
            let mut state = self.state.write().await;
            match state.session {
                SessionState::Idle => None,
                SessionState::Joined { content_id } => {
                    reset_document_state(&mut state);
                    state.session = SessionState::Idle;
                    Some(content_id)
                }
            }
        };

        if let Some(content_id) = left {
            self.outbound.unsubscribe(Topic::Content(content_id));
            self.bus.emit_collab(CollabEvent::ContentLeft { content_id });
        }
    }

    pub async fn joined_content(&self) -> Option<Uuid> {
        match self.state.read().await.session {
            SessionState::Idle => None,
            SessionState::Joined { content_id } => Some(content_id),
        }
    }

    /// Presence records of users active in the joined document.
    pub async fn active_collaborators(&self) -> Vec<PresenceRecord> {
        let state = self.state.read().await;
        let mut users: Vec<PresenceRecord> = state.collaborators.values().cloned().collect();
        users.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        users
    }

    /// Seed the local buffer (e.g. from the initial content fetch).
    pub async fn set_content(&self, text: impl Into<String>) {
        self.state.write().await.buffer = text.into();
    }

    pub async fn content(&self) -> String {
        self.state.read().await.buffer.clone()
    }

    // ── Cursor / selection (broadcast-only) ─────────────────────────

    pub async fn update_cursor(&self, offset: u32) {
        self.presence.update_cursor(Some(CursorPosition { offset })).await;
    }

    pub async fn update_selection(&self, anchor: u32, head: u32) {
        self.presence.update_selection(Some(SelectionRange { anchor, head })).await;
    }

    // ── Local edits ─────────────────────────────────────────────────

    pub async fn insert(&self, pos: u32, text: impl Into<String>) -> Option<TextOperation> {
        self.local_edit(pos, OperationKind::Insert { text: text.into() }).await
    }

    pub async fn delete(&self, pos: u32, len: u32) -> Option<TextOperation> {
        self.local_edit(pos, OperationKind::Delete { len }).await
    }

    pub async fn replace(&self, pos: u32, len: u32, text: impl Into<String>) -> Option<TextOperation> {
        self.local_edit(pos, OperationKind::Replace { len, text: text.into() }).await
    }

    /// Build, apply, and broadcast a locally originated operation. Returns
    /// `None` (and does nothing) when no document is joined or the user is
    /// not initialized.
    async fn local_edit(&self, pos: u32, kind: OperationKind) -> Option<TextOperation> {
        let Some(user_id) = self.presence.current_user_id().await else {
            debug!("local edit before initialize_user is a no-op");
            return None;
        };

        let (content_id, op) = {
            let mut state = self.state.write().await;
            let SessionState::Joined { content_id } = state.session else {
                debug!("local edit with no joined document is a no-op");
                return None;
            };

            let base_clock = state.clock;
            state.clock += 1;
            let op = TextOperation {
                id: Uuid::new_v4(),
                user_id,
                pos,
                kind,
                clock: state.clock,
                base_clock,
            };

            transform::apply(&mut state.buffer, &op);
            for component in transform::normalize(op.clone()) {
                insert_sorted(&mut state.log, component);
            }
            trim_log(&mut state.log);
            state.pending.insert(op.id, op.clone());
            (content_id, op)
        };

        self.outbound.send(WsMessage::Operation { content_id, op: op.clone() });
        self.bus.emit_collab(CollabEvent::OperationProcessed { content_id, op: op.clone() });
        Some(op)
    }

    // ── Event application (runtime-driven) ──────────────────────────

    /// Apply a remote operation: advance the clock, transform against every
    /// logged operation the sender had not seen, apply, and log it.
    pub(crate) async fn apply_remote_operation(&self, content_id: Uuid, op: TextOperation) {
        let local_user = self.presence.current_user_id().await;

        let applied = {
            let mut state = self.state.write().await;
            let SessionState::Joined { content_id: joined } = state.session else {
                debug!(%content_id, "operation for a document we have not joined; ignoring");
                return;
            };
            if joined != content_id {
                debug!(%content_id, "operation for a different document; ignoring");
                return;
            }
            if local_user.as_deref() == Some(op.user_id.as_str()) {
                // Our own operation echoed back; the ack path confirms it.
                return;
            }

            state.clock = state.clock.max(op.clock);

            // Rebase over the concurrent part of the log: everything the
            // sender had not seen when the op was generated.
            let unseen: Vec<TextOperation> = state
                .log
                .iter()
                .filter(|earlier| {
                    earlier.clock > op.base_clock && earlier.user_id != op.user_id
                })
                .cloned()
                .collect();
            let components = transform::rebase(op, &unseen);

            for component in &components {
                transform::apply(&mut state.buffer, component);
                insert_sorted(&mut state.log, component.clone());
            }
            trim_log(&mut state.log);
            components
        };

        for op in applied {
            self.bus.emit_collab(CollabEvent::OperationProcessed { content_id, op });
        }
    }

    /// Confirm a pending local operation.
    pub(crate) async fn apply_ack(&self, content_id: Uuid, op_id: Uuid, clock: u64) {
        let confirmed = {
            let mut state = self.state.write().await;
            state.clock = state.clock.max(clock);
            state.pending.remove(&op_id).is_some()
        };
        if confirmed {
            self.bus.emit_collab(CollabEvent::OperationConfirmed { content_id, op_id });
        } else {
            debug!(%op_id, "ack for an unknown operation; ignoring");
        }
    }

    /// Maintain the active-collaborator set from presence traffic.
    pub(crate) async fn observe_presence(&self, record: &PresenceRecord) {
        let mut state = self.state.write().await;
        let SessionState::Joined { content_id } = state.session else {
            return;
        };
        let in_document = record
            .location
            .as_ref()
            .is_some_and(|location| location.content_id == Some(content_id));
        if in_document {
            state.collaborators.insert(record.user_id.clone(), record.clone());
        } else {
            state.collaborators.remove(&record.user_id);
        }
    }

    pub(crate) async fn remove_collaborator(&self, user_id: &str) {
        self.state.write().await.collaborators.remove(user_id);
    }

    /// Operations still awaiting an ack, in total order.
    pub async fn pending_operations(&self) -> Vec<TextOperation> {
        let state = self.state.read().await;
        let mut pending: Vec<TextOperation> = state.pending.values().cloned().collect();
        pending.sort_by(|a, b| a.order_key().cmp(&b.order_key()));
        pending
    }

    /// Re-send every pending operation. Called by the runtime after a
    /// reconnect where the server did not resume the session.
    pub(crate) async fn resend_pending(&self) {
        let (content_id, pending) = {
            let state = self.state.read().await;
            let SessionState::Joined { content_id } = state.session else {
                return;
            };
            let mut pending: Vec<TextOperation> = state.pending.values().cloned().collect();
            pending.sort_by(|a, b| a.order_key().cmp(&b.order_key()));
            (content_id, pending)
        };

        if !pending.is_empty() {
            warn!(count = pending.len(), "re-sending unacknowledged operations");
        }
        for op in pending {
            self.outbound.send(WsMessage::Operation { content_id, op });
        }
    }
}

fn reset_document_state(state: &mut CollabState) {
    state.collaborators.clear();
    state.buffer.clear();
    state.log.clear();
    state.pending.clear();
}

fn insert_sorted(log: &mut Vec<TextOperation>, op: TextOperation) {
    let at = log.partition_point(|existing| existing.order_key() <= op.order_key());
    log.insert(at, op);
}

fn trim_log(log: &mut Vec<TextOperation>) {
    if log.len() > OPERATION_LOG_CAP {
        let excess = log.len() - OPERATION_LOG_CAP;
        log.drain(..excess);
    }
}
