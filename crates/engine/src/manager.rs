// The real-time manager: owns the services, the event bus, and the spawned
// runtime. Pure orchestration — no domain state of its own beyond the
// initialization guard.

use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use tokio::sync::mpsc;
use uuid::Uuid;

use huddle_common::protocol::ws::{Topic, WsMessage};

use crate::analytics::LiveAnalyticsService;
use crate::bus::EventBus;
use crate::collab::CollaborationService;
use crate::config::EngineConfig;
use crate::presence::PresenceService;
use crate::publishing::PublishingService;
use crate::runtime::{self, RuntimeConfig, RuntimeHandle, Services};
use crate::transport::{ConnectOptions, ConnectionManager, Outbound, ReconnectPolicy, Transport};

/// One engine instance: construct, `initialize` with a transport, use the
/// service accessors, `shutdown` when done. Multiple independent instances
/// can coexist (tests, multi-session hosts); nothing is global.
pub struct RealtimeManager {
    config: EngineConfig,
    bus: EventBus,
    outbound: Outbound,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<WsMessage>>>,
    presence: PresenceService,
    collab: CollaborationService,
    publishing: PublishingService,
    analytics: LiveAnalyticsService,
    runtime: Mutex<Option<RuntimeHandle>>,
}

impl RealtimeManager {
    pub fn new(config: EngineConfig) -> Self {
        let bus = EventBus::new();
        let (outbound, outbound_rx) = Outbound::channel();
        let presence = PresenceService::new(outbound.clone(), bus.clone());
        let collab = CollaborationService::new(presence.clone(), outbound.clone(), bus.clone());
        let publishing = PublishingService::new(
            outbound.clone(),
            bus.clone(),
            config.publish_correlate_timeout(),
        );
        let analytics = LiveAnalyticsService::new(
            outbound.clone(),
            bus.clone(),
            config.analytics.max_batch,
            config.analytics_flush_interval(),
        );

        Self {
            config,
            bus,
            outbound,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            presence,
            collab,
            publishing,
            analytics,
            runtime: Mutex::new(None),
        }
    }

    /// Start the engine over the given transport. Idempotent: a second call
    /// while running is a no-op.
    pub fn initialize<T: Transport + 'static>(&self, transport: T) -> Result<()> {
        let mut runtime = self.runtime.lock().expect("runtime lock poisoned");
        if runtime.is_some() {
            return Ok(());
        }

        let url = self
            .config
            .relay_url
            .clone()
            .ok_or_else(|| anyhow!("relay_url is not configured"))?;
        let session_token = self.config.auth_token.clone().unwrap_or_default();

        let outbound_rx = self
            .outbound_rx
            .lock()
            .expect("outbound lock poisoned")
            .take()
            .context("engine was already shut down; build a new manager")?;

        let conn = ConnectionManager::new(ConnectOptions { url, session_token }, transport)
            .with_policy(ReconnectPolicy {
                base_delay: self.config.reconnect_base_delay(),
                max_delay: self.config.reconnect_max_delay(),
                max_attempts: self.config.reconnect.max_attempts,
            });

        let services = Services {
            presence: self.presence.clone(),
            collab: self.collab.clone(),
            publishing: self.publishing.clone(),
            analytics: self.analytics.clone(),
        };
        let runtime_config = RuntimeConfig {
            stale_after: self.config.presence_stale_after(),
            prune_interval: self.config.presence_stale_after() / 2,
        };

        *runtime = Some(runtime::spawn(
            conn,
            outbound_rx,
            services,
            self.bus.clone(),
            runtime_config,
        ));
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.runtime.lock().expect("runtime lock poisoned").is_some()
    }

    /// Deliberate teardown: stops the runtime without a reconnect attempt
    /// or an offline notification. Idempotent.
    pub async fn shutdown(&self) {
        let handle = self.runtime.lock().expect("runtime lock poisoned").take();
        if let Some(handle) = handle {
            handle.wait().await;
        }
    }

    // ── Service accessors ───────────────────────────────────────────

    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    pub fn presence(&self) -> &PresenceService {
        &self.presence
    }

    pub fn collaboration(&self) -> &CollaborationService {
        &self.collab
    }

    pub fn publishing(&self) -> &PublishingService {
        &self.publishing
    }

    pub fn analytics(&self) -> &LiveAnalyticsService {
        &self.analytics
    }

    // ── Scope fan-out ───────────────────────────────────────────────

    /// Follow a content item: join the collaboration session and register
    /// content-scoped topic interest for presence and publishing updates.
    pub async fn subscribe_to_content(&self, content_id: Uuid) {
        self.presence.subscribe_to_content(content_id);
        self.collab.join_content(content_id).await;
    }

    /// Symmetric teardown of `subscribe_to_content`.
    pub async fn unsubscribe_from_content(&self, content_id: Uuid) {
        if self.collab.joined_content().await == Some(content_id) {
            self.collab.leave_content().await;
        }
        self.presence.unsubscribe_from_content(content_id);
    }

    /// Follow a workflow execution (publish pipeline run).
    pub fn subscribe_to_execution(&self, execution_id: Uuid) {
        self.outbound.subscribe(Topic::Execution(execution_id));
    }

    pub fn unsubscribe_from_execution(&self, execution_id: Uuid) {
        self.outbound.unsubscribe(Topic::Execution(execution_id));
    }

    /// Follow a workspace (dashboard-level presence).
    pub fn subscribe_to_workspace(&self, workspace_id: Uuid) {
        self.presence.subscribe_to_workspace(workspace_id);
    }

    pub fn unsubscribe_from_workspace(&self, workspace_id: Uuid) {
        self.presence.unsubscribe_from_workspace(workspace_id);
    }
}
