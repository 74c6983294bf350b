// Presence tracking: the local user's status/location plus a cache of
// remote users' presence records.
//
// Local mutations apply optimistically and broadcast through the outbound
// handle; the server's echo lands back through `apply_presence` as the
// confirmation. Remote records are fed exclusively by transport events and
// aged out by `prune_stale`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use huddle_common::protocol::ws::{Topic, WsMessage};
use huddle_common::types::{
    CursorPosition, Location, PageKind, PresenceRecord, SelectionRange, UserStatus,
};

use crate::bus::{EventBus, PresenceEvent};
use crate::transport::Outbound;

/// Seed identity for the distinguished current-user record.
#[derive(Debug, Clone)]
pub struct UserIdentity {
    pub user_id: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

/// Query filter for `users_in_location`. `Some` fields must match the
/// record's location exactly; records with no location never match.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocationFilter {
    pub page: Option<PageKind>,
    pub content_id: Option<Uuid>,
    pub workspace_id: Option<Uuid>,
}

impl LocationFilter {
    pub fn workspace(id: Uuid) -> Self {
        Self { workspace_id: Some(id), ..Self::default() }
    }

    pub fn content(id: Uuid) -> Self {
        Self { content_id: Some(id), ..Self::default() }
    }

    fn matches(&self, location: &Location) -> bool {
        if let Some(page) = self.page {
            if location.page != page {
                return false;
            }
        }
        if let Some(content_id) = self.content_id {
            if location.content_id != Some(content_id) {
                return false;
            }
        }
        if let Some(workspace_id) = self.workspace_id {
            if location.workspace_id != Some(workspace_id) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Default)]
struct PresenceState {
    current_user_id: Option<String>,
    records: HashMap<String, PresenceRecord>,
    /// user id -> location they are typing in. Cleared by the caller; the
    /// service keeps no inactivity timer of its own.
    typing: HashMap<String, Location>,
}

/// Shared presence store. Cheap to clone.
#[derive(Debug, Clone)]
pub struct PresenceService {
    state: Arc<RwLock<PresenceState>>,
    outbound: Outbound,
    bus: EventBus,
}

impl PresenceService {
    pub fn new(outbound: Outbound, bus: EventBus) -> Self {
        Self { state: Arc::new(RwLock::new(PresenceState::default())), outbound, bus }
    }

    // ── Current-user lifecycle ──────────────────────────────────────

    /// Seed the current-user record. Must be called once per session before
    /// other presence operations have any effect.
    pub async fn initialize_user(&self, identity: UserIdentity) {
        let record = PresenceRecord {
            user_id: identity.user_id.clone(),
            display_name: identity.display_name,
            avatar_url: identity.avatar_url,
            status: UserStatus::Online,
            custom_status: None,
            location: None,
            cursor: None,
            selection: None,
            last_active_at: Utc::now(),
        };

        {
            let mut state = self.state.write().await;
            state.current_user_id = Some(identity.user_id);
            state.records.insert(record.user_id.clone(), record.clone());
        }

        self.outbound.send(WsMessage::Presence { record: record.clone() });
        self.bus.emit_presence(PresenceEvent::Updated(record));
    }

    pub async fn current_user_id(&self) -> Option<String> {
        self.state.read().await.current_user_id.clone()
    }

    pub async fn update_status(&self, status: UserStatus) {
        self.mutate_current(|record| record.status = status).await;
    }

    pub async fn update_location(&self, location: Option<Location>) {
        self.mutate_current(|record| record.location = location).await;
    }

    pub async fn update_custom_status(&self, text: Option<String>) {
        self.mutate_current(|record| record.custom_status = text).await;
    }

    pub async fn update_cursor(&self, cursor: Option<CursorPosition>) {
        self.mutate_current(|record| record.cursor = cursor).await;
    }

    pub async fn update_selection(&self, selection: Option<SelectionRange>) {
        self.mutate_current(|record| record.selection = selection).await;
    }

    /// Set or clear the current user's typing flag for a location. There is
    /// no automatic timeout here; callers clear the flag themselves.
    pub async fn set_typing(&self, active: bool, location: Location) {
        let user_id = {
            let mut state = self.state.write().await;
            let Some(user_id) = state.current_user_id.clone() else {
                debug!("set_typing before initialize_user is a no-op");
                return;
            };
            if active {
                state.typing.insert(user_id.clone(), location);
            } else {
                state.typing.remove(&user_id);
            }
            user_id
        };

        self.outbound.send(WsMessage::Typing { user_id: user_id.clone(), location, active });
        self.bus.emit_presence(PresenceEvent::Typing { user_id, location, active });
    }

    /// Apply a closure to the current-user record, stamp activity, and
    /// broadcast the result. No-op before `initialize_user`.
    async fn mutate_current(&self, f: impl FnOnce(&mut PresenceRecord)) {
        let record = {
            let mut state = self.state.write().await;
            let Some(user_id) = state.current_user_id.clone() else {
                debug!("presence mutation before initialize_user is a no-op");
                return;
            };
            let Some(record) = state.records.get_mut(&user_id) else {
                return;
            };
            f(record);
            record.last_active_at = Utc::now();
            record.clone()
        };

        self.outbound.send(WsMessage::Presence { record: record.clone() });
        self.bus.emit_presence(PresenceEvent::Updated(record));
    }

    // ── Topic interest ──────────────────────────────────────────────

    pub fn subscribe_to_workspace(&self, workspace_id: Uuid) {
        self.outbound.subscribe(Topic::Workspace(workspace_id));
    }

    pub fn unsubscribe_from_workspace(&self, workspace_id: Uuid) {
        self.outbound.unsubscribe(Topic::Workspace(workspace_id));
    }

    pub fn subscribe_to_content(&self, content_id: Uuid) {
        self.outbound.subscribe(Topic::Content(content_id));
    }

    pub fn unsubscribe_from_content(&self, content_id: Uuid) {
        self.outbound.unsubscribe(Topic::Content(content_id));
    }

    // ── Event application (runtime-driven) ──────────────────────────

    pub(crate) async fn apply_presence(&self, record: PresenceRecord) {
        {
            let mut state = self.state.write().await;
            state.records.insert(record.user_id.clone(), record.clone());
        }
        self.bus.emit_presence(PresenceEvent::Updated(record));
    }

    pub(crate) async fn apply_leave(&self, user_id: &str) {
        let removed = {
            let mut state = self.state.write().await;
            state.typing.remove(user_id);
            state.records.remove(user_id).is_some()
        };
        if removed {
            self.bus.emit_presence(PresenceEvent::Left { user_id: user_id.to_string() });
        }
    }

    pub(crate) async fn apply_typing(&self, user_id: String, location: Location, active: bool) {
        {
            let mut state = self.state.write().await;
            if active {
                state.typing.insert(user_id.clone(), location);
            } else {
                state.typing.remove(&user_id);
            }
        }
        self.bus.emit_presence(PresenceEvent::Typing { user_id, location, active });
    }

    /// Mark records offline once their last activity exceeds `stale_after`.
    /// Returns how many records were aged out.
    pub async fn prune_stale(&self, stale_after: std::time::Duration) -> usize {
        self.prune_stale_at(stale_after, Utc::now()).await
    }

    /// Like `prune_stale` but with an explicit now (for testing).
    pub(crate) async fn prune_stale_at(
        &self,
        stale_after: std::time::Duration,
        now: DateTime<Utc>,
    ) -> usize {
        let threshold = ChronoDuration::from_std(stale_after).unwrap_or(ChronoDuration::MAX);
        let mut aged = Vec::new();
        {
            let mut state = self.state.write().await;
            let current = state.current_user_id.clone();
            for record in state.records.values_mut() {
                if Some(&record.user_id) == current.as_ref() {
                    continue;
                }
                if record.status != UserStatus::Offline
                    && now.signed_duration_since(record.last_active_at) > threshold
                {
                    record.status = UserStatus::Offline;
                    aged.push(record.clone());
                }
            }
            for record in &aged {
                state.typing.remove(&record.user_id);
            }
        }
        let count = aged.len();
        for record in aged {
            self.bus.emit_presence(PresenceEvent::Updated(record));
        }
        count
    }

    // ── Queries ─────────────────────────────────────────────────────

    pub async fn presence(&self, user_id: &str) -> Option<PresenceRecord> {
        self.state.read().await.records.get(user_id).cloned()
    }

    /// Every record whose status is not offline.
    pub async fn online_users(&self) -> Vec<PresenceRecord> {
        let state = self.state.read().await;
        let mut users: Vec<PresenceRecord> = state
            .records
            .values()
            .filter(|record| record.status != UserStatus::Offline)
            .cloned()
            .collect();
        users.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        users
    }

    pub async fn is_online(&self, user_id: &str) -> bool {
        self.state
            .read()
            .await
            .records
            .get(user_id)
            .is_some_and(|record| record.status != UserStatus::Offline)
    }

    /// Records whose location matches every `Some` field of the filter.
    /// Records with no location are excluded.
    pub async fn users_in_location(&self, filter: LocationFilter) -> Vec<PresenceRecord> {
        let state = self.state.read().await;
        let mut users: Vec<PresenceRecord> = state
            .records
            .values()
            .filter(|record| record.location.as_ref().is_some_and(|loc| filter.matches(loc)))
            .cloned()
            .collect();
        users.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        users
    }

    /// Users currently typing, optionally narrowed to a location filter.
    pub async fn typing_users(&self, filter: Option<LocationFilter>) -> Vec<String> {
        let state = self.state.read().await;
        let mut users: Vec<String> = state
            .typing
            .iter()
            .filter(|(_, location)| filter.as_ref().is_none_or(|f| f.matches(location)))
            .map(|(user_id, _)| user_id.clone())
            .collect();
        users.sort();
        users
    }

    /// Relative "last seen" text for a known user.
    pub async fn last_seen_text(&self, user_id: &str) -> Option<String> {
        let last_active = self.state.read().await.records.get(user_id)?.last_active_at;
        Some(relative_time(Utc::now().signed_duration_since(last_active)))
    }
}

fn relative_time(elapsed: ChronoDuration) -> String {
    let secs = elapsed.num_seconds().max(0);
    if secs < 60 {
        "just now".to_string()
    } else if secs < 3_600 {
        format!("{}m ago", secs / 60)
    } else if secs < 86_400 {
        format!("{}h ago", secs / 3_600)
    } else {
        format!("{}d ago", secs / 86_400)
    }
}
