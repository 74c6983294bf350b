// Transport layer: connection manager with handshake, topic tracking,
// and capped exponential-backoff reconnection.
//
// The socket itself is abstracted behind the `Transport` trait so the
// manager's lifecycle logic is testable against a scripted mock. Real
// implementations live in `ws` (tokio-tungstenite) and `sse` (reqwest
// event-stream fallback).

pub mod sse;
pub mod ws;

use std::collections::HashSet;
use std::future::Future;
use std::net::IpAddr;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tokio::sync::mpsc;
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

use huddle_common::protocol::ws::{Topic, WsMessage, CURRENT_PROTOCOL_VERSION};
use huddle_common::types::{Location, MetricUpdate, PresenceRecord, PublishJob, TextOperation};

// ── Transport trait ─────────────────────────────────────────────────

/// Abstraction over the wire for testability.
///
/// `recv` returning `Ok(None)` means the peer closed cleanly; `Err` is an
/// abnormal transport failure. Both feed the reconnection policy.
pub trait Transport: Send {
    fn open(&mut self, url: &str) -> impl Future<Output = Result<()>> + Send;
    fn send(&mut self, msg: &WsMessage) -> impl Future<Output = Result<()>> + Send;
    fn recv(&mut self) -> impl Future<Output = Result<Option<WsMessage>>> + Send;
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

// ── Configuration ───────────────────────────────────────────────────

/// Connection parameters for the relay.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Relay WebSocket URL (e.g. `wss://relay.huddle.dev/v1/ws`).
    pub url: String,
    /// Bearer token presented in the Hello frame.
    pub session_token: String,
}

/// Reconnection parameters. `max_attempts` counts retries beyond the
/// initial connect: with the defaults a failing relay sees the first
/// attempt plus retries after 1s, 2s, and 4s before going offline.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_secs(30),
            max_attempts: 3,
        }
    }
}

// ── Connection state ────────────────────────────────────────────────

/// Current state of the connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Reconnection attempts are exhausted; terminal until re-initialized.
    Offline,
}

/// Result of a connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// Handshake completed. `resumed` is false when the server discarded
    /// the previous session, in which case topic interest must be
    /// re-registered and pending operations re-sent.
    Connected { resumed: bool },
    /// Transient failure; the reconnection policy decides what happens next.
    Failed { reason: String },
}

// ── Incoming event ──────────────────────────────────────────────────

/// Events surfaced by `recv_event` for the runtime to route.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Presence(PresenceRecord),
    PresenceLeave { user_id: String },
    Typing { user_id: String, location: Location, active: bool },
    Operation { content_id: Uuid, op: TextOperation },
    OperationAck { content_id: Uuid, op_id: Uuid, clock: u64 },
    JobUpdate(PublishJob),
    MetricBatch(Vec<MetricUpdate>),
    ServerError { code: String, message: String, retryable: bool },
    /// Connection lost; the runtime moves into the backoff path.
    Disconnected { reason: String },
}

// ── Outbound handle ─────────────────────────────────────────────────

/// Write-side handle shared by the services. Frames queue in an unbounded
/// channel and the runtime drains them into the live transport; while
/// disconnected they wait for the next successful connect.
#[derive(Debug, Clone)]
pub struct Outbound {
    tx: mpsc::UnboundedSender<WsMessage>,
}

impl Outbound {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<WsMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Fire-and-forget enqueue. Failure means the runtime is gone.
    pub fn send(&self, msg: WsMessage) {
        if self.tx.send(msg).is_err() {
            warn!("outbound channel closed; dropping frame");
        }
    }

    pub fn subscribe(&self, topic: Topic) {
        self.send(WsMessage::Subscribe { topic });
    }

    pub fn unsubscribe(&self, topic: Topic) {
        self.send(WsMessage::Unsubscribe { topic });
    }
}

// ── Connection manager ──────────────────────────────────────────────

/// Manages the connection lifecycle over an abstract transport.
pub struct ConnectionManager<T: Transport> {
    options: ConnectOptions,
    policy: ReconnectPolicy,
    transport: T,
    state: ConnectionState,
    resume_token: Option<String>,
    topics: HashSet<Topic>,
    consecutive_failures: u32,
    intentional_close: bool,
}

impl<T: Transport> ConnectionManager<T> {
    pub fn new(options: ConnectOptions, transport: T) -> Self {
        Self {
            options,
            policy: ReconnectPolicy::default(),
            transport,
            state: ConnectionState::Disconnected,
            resume_token: None,
            topics: HashSet::new(),
            consecutive_failures: 0,
            intentional_close: false,
        }
    }

    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn topics(&self) -> &HashSet<Topic> {
        &self.topics
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Attempt to connect (or reconnect) to the relay.
    ///
    /// Transient failures come back as `ConnectOutcome::Failed`; only a
    /// misconfigured URL is a hard error.
    pub async fn connect(&mut self) -> Result<ConnectOutcome> {
        validate_relay_url(&self.options.url)?;
        self.state = ConnectionState::Connecting;
        self.intentional_close = false;

        // Step 1: open the socket.
        if let Err(e) = self.transport.open(&self.options.url).await {
            return Ok(self.fail(format!("connection failed: {e}")));
        }

        // Step 2: send the Hello frame.
        let hello = WsMessage::Hello {
            protocol_version: CURRENT_PROTOCOL_VERSION.to_string(),
            session_token: self.options.session_token.clone(),
            resume_token: self.resume_token.clone(),
        };
        if let Err(e) = self.transport.send(&hello).await {
            self.transport.close().await;
            return Ok(self.fail(format!("failed to send hello: {e}")));
        }

        // Step 3: wait for HelloAck; anything else rejects the attempt.
        match self.transport.recv().await {
            Ok(Some(WsMessage::HelloAck { resume_accepted, resume_token, .. })) => {
                if !resume_accepted {
                    // Session wasn't resumed — topic interest is gone.
                    self.topics.clear();
                }
                self.resume_token = Some(resume_token);
                self.state = ConnectionState::Connected;
                self.consecutive_failures = 0;
                info!(resume_accepted, "relay connection established");
                Ok(ConnectOutcome::Connected { resumed: resume_accepted })
            }
            Ok(Some(WsMessage::Error { code, message, .. })) => {
                self.transport.close().await;
                Ok(self.fail(format!("hello rejected: {code}: {message}")))
            }
            Ok(Some(_)) => {
                self.transport.close().await;
                Ok(self.fail("unexpected message in response to hello".to_string()))
            }
            Ok(None) => Ok(self.fail("connection closed during handshake".to_string())),
            Err(e) => {
                self.transport.close().await;
                Ok(self.fail(format!("error during handshake: {e}")))
            }
        }
    }

    fn fail(&mut self, reason: String) -> ConnectOutcome {
        self.state = ConnectionState::Disconnected;
        self.consecutive_failures += 1;
        ConnectOutcome::Failed { reason }
    }

    /// Register server-side interest in a topic. Returns false when the
    /// topic was already subscribed (no frame sent).
    pub async fn subscribe(&mut self, topic: Topic) -> Result<bool> {
        if self.state != ConnectionState::Connected {
            return Err(anyhow!("cannot subscribe: not connected"));
        }
        if !self.topics.insert(topic.clone()) {
            return Ok(false);
        }
        self.transport.send(&WsMessage::Subscribe { topic }).await?;
        Ok(true)
    }

    /// Drop server-side interest in a topic.
    pub async fn unsubscribe(&mut self, topic: Topic) -> Result<()> {
        if self.state != ConnectionState::Connected {
            return Err(anyhow!("cannot unsubscribe: not connected"));
        }
        if self.topics.remove(&topic) {
            self.transport.send(&WsMessage::Unsubscribe { topic }).await?;
        }
        Ok(())
    }

    /// Send an arbitrary frame; fire-and-forget at the protocol level.
    pub async fn send(&mut self, msg: &WsMessage) -> Result<()> {
        if self.state != ConnectionState::Connected {
            return Err(anyhow!("cannot send: not connected"));
        }
        self.transport.send(msg).await
    }

    /// Process the next incoming frame.
    pub async fn recv_event(&mut self) -> Result<Option<TransportEvent>> {
        if self.state != ConnectionState::Connected {
            return Err(anyhow!("cannot receive: not connected"));
        }

        match self.transport.recv().await {
            Ok(Some(WsMessage::Presence { record })) => {
                Ok(Some(TransportEvent::Presence(record)))
            }
            Ok(Some(WsMessage::PresenceLeave { user_id })) => {
                Ok(Some(TransportEvent::PresenceLeave { user_id }))
            }
            Ok(Some(WsMessage::Typing { user_id, location, active })) => {
                Ok(Some(TransportEvent::Typing { user_id, location, active }))
            }
            Ok(Some(WsMessage::Operation { content_id, op })) => {
                Ok(Some(TransportEvent::Operation { content_id, op }))
            }
            Ok(Some(WsMessage::OperationAck { content_id, op_id, clock })) => {
                Ok(Some(TransportEvent::OperationAck { content_id, op_id, clock }))
            }
            Ok(Some(WsMessage::JobUpdate { job })) => Ok(Some(TransportEvent::JobUpdate(job))),
            Ok(Some(WsMessage::MetricBatch { updates })) => {
                Ok(Some(TransportEvent::MetricBatch(updates)))
            }
            Ok(Some(WsMessage::Error { code, message, retryable })) => {
                Ok(Some(TransportEvent::ServerError { code, message, retryable }))
            }
            Ok(Some(_)) => {
                // Ignore frames that only make sense client -> server.
                Ok(None)
            }
            Ok(None) => {
                self.state = ConnectionState::Disconnected;
                self.consecutive_failures += 1;
                Ok(Some(TransportEvent::Disconnected {
                    reason: "connection closed by server".to_string(),
                }))
            }
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                self.consecutive_failures += 1;
                Ok(Some(TransportEvent::Disconnected { reason: format!("transport error: {e}") }))
            }
        }
    }

    /// Deliberate teardown. Suppresses the reconnection policy so a racing
    /// receive error is not mistaken for a mid-session drop.
    pub async fn disconnect(&mut self) {
        self.intentional_close = true;
        self.transport.close().await;
        self.state = ConnectionState::Disconnected;
    }

    /// Mark the connection permanently offline (retries exhausted).
    pub fn mark_offline(&mut self) {
        self.state = ConnectionState::Offline;
    }

    /// Backoff delay before the next attempt: base × 2^(failures − 1),
    /// capped. With the default policy the schedule is 1s, 2s, 4s.
    pub fn reconnect_delay(&self) -> Duration {
        let exp = self.consecutive_failures.saturating_sub(1).min(7);
        let delay = saturating_mul(self.policy.base_delay, 1u64 << exp);
        delay.min(self.policy.max_delay)
    }

    /// Whether another retry is allowed (under max_attempts and not
    /// intentionally closed).
    pub fn should_reconnect(&self) -> bool {
        !self.intentional_close && self.consecutive_failures <= self.policy.max_attempts
    }
}

fn validate_relay_url(value: &str) -> Result<()> {
    let parsed =
        Url::parse(value).map_err(|error| anyhow!("invalid relay url `{value}`: {error}"))?;
    match parsed.scheme() {
        "wss" | "https" => Ok(()),
        "ws" | "http" if is_loopback_host(parsed.host_str()) => Ok(()),
        _ => Err(anyhow!("relay url must use wss (ws is allowed only for localhost testing)")),
    }
}

fn is_loopback_host(host: Option<&str>) -> bool {
    let Some(host) = host else {
        return false;
    };
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    host.parse::<IpAddr>().is_ok_and(|addr| addr.is_loopback())
}

fn saturating_mul(duration: Duration, rhs: u64) -> Duration {
    let nanos = duration.as_nanos().saturating_mul(rhs as u128);
    if nanos > u64::MAX as u128 {
        Duration::from_secs(u64::MAX)
    } else {
        Duration::from_nanos(nanos as u64)
    }
}


#[cfg(test)]
mod tests {
    use super::mock::MockTransport;
    use super::*;
    use huddle_common::types::{JobStatus, PublishJob};

    fn test_options() -> ConnectOptions {
        ConnectOptions {
            url: "wss://relay.test/v1/ws".to_string(),
            session_token: "sess-tok-123".to_string(),
        }
    }

    fn manager_with(transport: MockTransport) -> ConnectionManager<MockTransport> {
        ConnectionManager::new(test_options(), transport)
    }

    fn sample_job(id: &str, status: JobStatus) -> PublishJob {
        PublishJob {
            id: id.to_string(),
            content_id: Uuid::new_v4(),
            platforms: vec!["mastodon".to_string()],
            status,
            progress: 0,
            started_at: None,
            completed_at: None,
            error: None,
            platform_results: Vec::new(),
        }
    }

    // ── Connection lifecycle ────────────────────────────────────────

    #[tokio::test]
    async fn connect_happy_path() {
        let mut transport = MockTransport::default();
        transport.queue_hello_ack(false);

        let mut mgr = manager_with(transport);
        assert_eq!(mgr.state(), ConnectionState::Disconnected);

        let outcome = mgr.connect().await.expect("connect should succeed");
        assert_eq!(outcome, ConnectOutcome::Connected { resumed: false });
        assert_eq!(mgr.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn connect_sends_hello_with_session_token() {
        let mut transport = MockTransport::default();
        transport.queue_hello_ack(false);

        let mut mgr = manager_with(transport);
        mgr.connect().await.expect("connect");

        match &mgr.transport.sent[0] {
            WsMessage::Hello { protocol_version, session_token, resume_token } => {
                assert_eq!(protocol_version, CURRENT_PROTOCOL_VERSION);
                assert_eq!(session_token, "sess-tok-123");
                assert!(resume_token.is_none());
            }
            other => panic!("first frame should be Hello, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn connect_rejects_non_tls_relay_url() {
        let mut mgr = ConnectionManager::new(
            ConnectOptions {
                url: "ws://relay.test/v1/ws".to_string(),
                session_token: "t".to_string(),
            },
            MockTransport::default(),
        );
        let error = mgr.connect().await.expect_err("insecure url should be rejected");
        assert!(error.to_string().contains("must use wss"));
    }

    #[tokio::test]
    async fn connect_allows_plain_ws_on_loopback() {
        let mut transport = MockTransport::default();
        transport.queue_hello_ack(false);

        let mut mgr = ConnectionManager::new(
            ConnectOptions {
                url: "ws://127.0.0.1:9000/v1/ws".to_string(),
                session_token: "t".to_string(),
            },
            transport,
        );
        assert!(mgr.connect().await.is_ok());
    }

    #[tokio::test]
    async fn connect_fails_on_open_error() {
        let mut transport = MockTransport::default();
        transport.open_error = Some("refused".to_string());

        let mut mgr = manager_with(transport);
        let outcome = mgr.connect().await.expect("transient failure is not a hard error");
        match outcome {
            ConnectOutcome::Failed { reason } => assert!(reason.contains("connection failed")),
            other => panic!("expected Failed, got {other:?}"),
        }
        assert_eq!(mgr.state(), ConnectionState::Disconnected);
        assert_eq!(mgr.consecutive_failures(), 1);
    }

    #[tokio::test]
    async fn connect_fails_on_hello_error_response() {
        let mut transport = MockTransport::default();
        transport.queue_recv(WsMessage::Error {
            code: "SYNC_TOKEN_INVALID".to_string(),
            message: "bad token".to_string(),
            retryable: false,
        });

        let mut mgr = manager_with(transport);
        let outcome = mgr.connect().await.expect("should return outcome");
        match outcome {
            ConnectOutcome::Failed { reason } => assert!(reason.contains("hello rejected")),
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn connect_fails_on_unexpected_first_frame() {
        let mut transport = MockTransport::default();
        transport.queue_recv(WsMessage::JobUpdate { job: sample_job("job_1", JobStatus::Queued) });

        let mut mgr = manager_with(transport);
        let outcome = mgr.connect().await.expect("should return outcome");
        assert!(matches!(outcome, ConnectOutcome::Failed { .. }));
    }

    #[tokio::test]
    async fn connect_stores_rotated_resume_token() {
        let mut transport = MockTransport::default();
        transport.queue_hello_ack(false);

        let mut mgr = manager_with(transport);
        mgr.connect().await.expect("connect");
        assert_eq!(mgr.resume_token.as_deref(), Some("resume-next"));
    }

    #[tokio::test]
    async fn resume_accepted_preserves_topics() {
        let mut transport = MockTransport::default();
        transport.queue_hello_ack(true);

        let mut mgr = manager_with(transport);
        mgr.topics.insert(Topic::Content(Uuid::new_v4()));
        mgr.topics.insert(Topic::Workspace(Uuid::new_v4()));

        mgr.connect().await.expect("connect");
        assert_eq!(mgr.topics().len(), 2);
    }

    #[tokio::test]
    async fn resume_not_accepted_clears_topics() {
        let mut transport = MockTransport::default();
        transport.queue_hello_ack(false);

        let mut mgr = manager_with(transport);
        mgr.topics.insert(Topic::Content(Uuid::new_v4()));

        mgr.connect().await.expect("connect");
        assert!(mgr.topics().is_empty());
    }

    // ── Subscribe / send ────────────────────────────────────────────

    #[tokio::test]
    async fn subscribe_sends_frame_and_tracks_topic() {
        let mut transport = MockTransport::default();
        transport.queue_hello_ack(false);

        let mut mgr = manager_with(transport);
        mgr.connect().await.expect("connect");

        let topic = Topic::Content(Uuid::new_v4());
        assert!(mgr.subscribe(topic.clone()).await.expect("subscribe"));
        assert!(mgr.topics().contains(&topic));
        // Hello + Subscribe = 2 frames.
        assert_eq!(mgr.transport.sent.len(), 2);
    }

    #[tokio::test]
    async fn duplicate_subscribe_sends_no_frame() {
        let mut transport = MockTransport::default();
        transport.queue_hello_ack(false);

        let mut mgr = manager_with(transport);
        mgr.connect().await.expect("connect");

        let topic = Topic::Execution(Uuid::new_v4());
        assert!(mgr.subscribe(topic.clone()).await.unwrap());
        assert!(!mgr.subscribe(topic).await.unwrap());
        assert_eq!(mgr.transport.sent.len(), 2); // Hello + one Subscribe
    }

    #[tokio::test]
    async fn unsubscribe_removes_topic() {
        let mut transport = MockTransport::default();
        transport.queue_hello_ack(false);

        let mut mgr = manager_with(transport);
        mgr.connect().await.expect("connect");

        let topic = Topic::Workspace(Uuid::new_v4());
        mgr.subscribe(topic.clone()).await.unwrap();
        mgr.unsubscribe(topic.clone()).await.unwrap();
        assert!(!mgr.topics().contains(&topic));
    }

    #[tokio::test]
    async fn subscribe_fails_when_not_connected() {
        let mut mgr = manager_with(MockTransport::default());
        assert!(mgr.subscribe(Topic::Content(Uuid::new_v4())).await.is_err());
    }

    #[tokio::test]
    async fn send_fails_when_disconnected() {
        let mut mgr = manager_with(MockTransport::default());
        let frame = WsMessage::PresenceLeave { user_id: "u".to_string() };
        assert!(mgr.send(&frame).await.is_err());
    }

    // ── Receive events ──────────────────────────────────────────────

    #[tokio::test]
    async fn recv_maps_job_update() {
        let mut transport = MockTransport::default();
        transport.queue_hello_ack(false);
        transport.queue_recv(WsMessage::JobUpdate { job: sample_job("job_1", JobStatus::Queued) });

        let mut mgr = manager_with(transport);
        mgr.connect().await.expect("connect");

        let event = mgr.recv_event().await.expect("recv").expect("event");
        match event {
            TransportEvent::JobUpdate(job) => assert_eq!(job.id, "job_1"),
            other => panic!("expected JobUpdate, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn recv_ignores_client_only_frames() {
        let mut transport = MockTransport::default();
        transport.queue_hello_ack(false);
        transport.queue_recv(WsMessage::Subscribe { topic: Topic::Content(Uuid::new_v4()) });

        let mut mgr = manager_with(transport);
        mgr.connect().await.expect("connect");
        assert_eq!(mgr.recv_event().await.expect("recv"), None);
    }

    #[tokio::test]
    async fn recv_close_sets_disconnected_and_counts_failure() {
        let mut transport = MockTransport::default();
        transport.queue_hello_ack(false);
        transport.queue_close();

        let mut mgr = manager_with(transport);
        mgr.connect().await.expect("connect");

        let event = mgr.recv_event().await.expect("recv").expect("event");
        assert!(matches!(event, TransportEvent::Disconnected { .. }));
        assert_eq!(mgr.state(), ConnectionState::Disconnected);
        assert_eq!(mgr.consecutive_failures(), 1);
    }

    // ── Reconnection backoff ────────────────────────────────────────

    #[tokio::test]
    async fn backoff_schedule_is_1s_2s_4s() {
        let mut transport = MockTransport::default();
        transport.open_error = Some("refused".to_string());

        let mut mgr = manager_with(transport);

        mgr.connect().await.unwrap();
        assert_eq!(mgr.reconnect_delay(), Duration::from_millis(1_000));

        mgr.connect().await.unwrap();
        assert_eq!(mgr.reconnect_delay(), Duration::from_millis(2_000));

        mgr.connect().await.unwrap();
        assert_eq!(mgr.reconnect_delay(), Duration::from_millis(4_000));
    }

    #[tokio::test]
    async fn backoff_caps_at_max_delay() {
        let mut transport = MockTransport::default();
        transport.open_error = Some("refused".to_string());

        let policy = ReconnectPolicy { max_attempts: u32::MAX, ..ReconnectPolicy::default() };
        let mut mgr = manager_with(transport).with_policy(policy);
        for _ in 0..20 {
            mgr.connect().await.unwrap();
        }
        assert_eq!(mgr.reconnect_delay(), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn successful_connect_resets_failure_count() {
        let mut transport = MockTransport::default();
        transport.open_error = Some("refused".to_string());

        let mut mgr = manager_with(transport);
        mgr.connect().await.unwrap();
        mgr.connect().await.unwrap();
        assert_eq!(mgr.consecutive_failures(), 2);

        mgr.transport.open_error = None;
        mgr.transport.queue_hello_ack(false);
        mgr.connect().await.unwrap();
        assert_eq!(mgr.consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn should_reconnect_allows_three_retries_beyond_initial_attempt() {
        let mut transport = MockTransport::default();
        transport.open_error = Some("refused".to_string());

        let mut mgr = manager_with(transport);
        assert!(mgr.should_reconnect());
        // Initial attempt + three retries may all fail before giving up.
        for _ in 0..3 {
            mgr.connect().await.unwrap();
            assert!(mgr.should_reconnect());
        }
        mgr.connect().await.unwrap();
        assert!(!mgr.should_reconnect()); // fourth failure = retries exhausted
    }

    #[tokio::test]
    async fn intentional_disconnect_suppresses_reconnect() {
        let mut transport = MockTransport::default();
        transport.queue_hello_ack(false);

        let mut mgr = manager_with(transport);
        mgr.connect().await.expect("connect");

        mgr.disconnect().await;
        assert_eq!(mgr.state(), ConnectionState::Disconnected);
        assert!(mgr.transport.closed);
        assert!(!mgr.should_reconnect());
    }

    #[tokio::test]
    async fn mark_offline_is_terminal_state() {
        let mut mgr = manager_with(MockTransport::default());
        mgr.mark_offline();
        assert_eq!(mgr.state(), ConnectionState::Offline);
    }
}
