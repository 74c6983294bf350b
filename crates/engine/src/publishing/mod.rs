// Publish-job tracking: a map of job id -> authoritative job state, fed by
// relay events, with a request/correlate start flow over an otherwise
// fire-and-forget channel.
//
// Status updates are idempotent upserts, last-write-wins by application
// order. Out-of-order delivery is not reconciled; the relay serializes
// updates per job.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::{oneshot, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use huddle_common::protocol::ws::{JobAction, WsMessage};
use huddle_common::types::{JobStatus, PlatformStatus, PublishJob, PublishOptions};

use crate::bus::{EventBus, JobEvent};
use crate::transport::Outbound;

/// Progress history entries kept per job.
const PROGRESS_HISTORY_CAP: usize = 50;

/// One progress observation for a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEntry {
    pub at: DateTime<Utc>,
    pub status: JobStatus,
    pub progress: u8,
}

/// Filter for `jobs`. `Some` fields must match; `limit` truncates the
/// newest-first result.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub content_id: Option<Uuid>,
    pub status: Option<JobStatus>,
    pub platform: Option<String>,
    pub limit: Option<usize>,
}

/// Aggregate success metrics over a time window.
#[derive(Debug, Clone, PartialEq)]
pub struct JobStatistics {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// completed / terminal, in [0, 1]. 0 when nothing terminal yet.
    pub success_rate: f64,
    /// Mean wall-clock duration of completed jobs, if any completed.
    pub mean_completion: Option<Duration>,
    pub per_platform: HashMap<String, PlatformStatistics>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlatformStatistics {
    pub attempts: usize,
    pub successes: usize,
    pub success_rate: f64,
}

#[derive(Debug, Default)]
struct PublishingState {
    jobs: HashMap<String, PublishJob>,
    progress: HashMap<String, VecDeque<ProgressEntry>>,
    /// Start requests awaiting their first matching job update.
    pending_starts: HashMap<String, oneshot::Sender<PublishJob>>,
}

/// Shared publish-job store. Cheap to clone.
#[derive(Clone)]
pub struct PublishingService {
    state: Arc<RwLock<PublishingState>>,
    outbound: Outbound,
    bus: EventBus,
    correlate_timeout: Duration,
}

impl PublishingService {
    pub fn new(outbound: Outbound, bus: EventBus, correlate_timeout: Duration) -> Self {
        Self {
            state: Arc::new(RwLock::new(PublishingState::default())),
            outbound,
            bus,
            correlate_timeout,
        }
    }

    // ── Job lifecycle actions ───────────────────────────────────────

    /// Start a publish job and wait for the relay's first matching update.
    ///
    /// The job id is generated client-side so the returned future can be
    /// correlated; it resolves with the authoritative job state or fails
    /// after the correlate timeout.
    pub async fn start_publishing(
        &self,
        content_id: Uuid,
        platforms: Vec<String>,
        options: PublishOptions,
    ) -> Result<PublishJob> {
        if platforms.is_empty() {
            return Err(anyhow!("cannot publish to zero platforms"));
        }

        let job = PublishJob {
            id: format!("job_{}", Uuid::new_v4().simple()),
            content_id,
            platforms,
            status: JobStatus::Queued,
            progress: 0,
            started_at: None,
            completed_at: None,
            error: None,
            platform_results: Vec::new(),
        };

        let rx = {
            let mut state = self.state.write().await;
            let (tx, rx) = oneshot::channel();
            state.pending_starts.insert(job.id.clone(), tx);
            rx
        };

        self.outbound.send(WsMessage::JobRequest {
            action: JobAction::Start {
                job: job.clone(),
                options: (options != PublishOptions::default()).then_some(options),
            },
        });

        match tokio::time::timeout(self.correlate_timeout, rx).await {
            Ok(Ok(confirmed)) => Ok(confirmed),
            Ok(Err(_)) => Err(anyhow!("publish start correlation dropped")),
            Err(_) => {
                self.state.write().await.pending_starts.remove(&job.id);
                Err(anyhow!(
                    "publish start for {} timed out after {:?}",
                    job.id,
                    self.correlate_timeout
                ))
            }
        }
    }

    /// Request cancellation. The outcome arrives as a later status event.
    pub async fn cancel_publishing(&self, job_id: &str) {
        if !self.state.read().await.jobs.contains_key(job_id) {
            warn!(%job_id, "cancelling a job we have never seen");
        }
        self.outbound.send(WsMessage::JobRequest {
            action: JobAction::Cancel { job_id: job_id.to_string() },
        });
    }

    /// Request a retry, optionally narrowed to specific platforms.
    pub async fn retry_publishing(&self, job_id: &str, platforms: Option<Vec<String>>) {
        self.outbound.send(WsMessage::JobRequest {
            action: JobAction::Retry { job_id: job_id.to_string(), platforms },
        });
    }

    // ── Event application (runtime-driven) ──────────────────────────

    /// Idempotent upsert keyed by job id. The old-vs-new status comparison
    /// decides which semantic events fire alongside the generic update.
    pub(crate) async fn apply_job_update(&self, job: PublishJob) {
        let (old_status, pending) = {
            let mut state = self.state.write().await;
            let old_status = state.jobs.get(&job.id).map(|existing| existing.status);

            let history = state.progress.entry(job.id.clone()).or_default();
            history.push_back(ProgressEntry {
                at: Utc::now(),
                status: job.status,
                progress: job.progress,
            });
            while history.len() > PROGRESS_HISTORY_CAP {
                history.pop_front();
            }

            state.jobs.insert(job.id.clone(), job.clone());
            let pending = state.pending_starts.remove(&job.id);
            (old_status, pending)
        };

        if let Some(tx) = pending {
            // The caller may have timed out and dropped the receiver.
            let _ = tx.send(job.clone());
        }

        let status_changed = old_status != Some(job.status);
        if status_changed {
            match job.status {
                JobStatus::Processing => self.bus.emit_job(JobEvent::Started(job.clone())),
                JobStatus::Completed => self.bus.emit_job(JobEvent::Completed(job.clone())),
                JobStatus::Failed => self.bus.emit_job(JobEvent::Failed(job.clone())),
                JobStatus::Cancelled => self.bus.emit_job(JobEvent::Cancelled(job.clone())),
                JobStatus::Queued | JobStatus::Publishing => {}
            }
        } else {
            debug!(job_id = %job.id, status = ?job.status, "job update with unchanged status");
        }
        self.bus.emit_job(JobEvent::Updated(job));
    }

    // ── Queries ─────────────────────────────────────────────────────

    pub async fn job(&self, job_id: &str) -> Option<PublishJob> {
        self.state.read().await.jobs.get(job_id).cloned()
    }

    /// Jobs matching the filter, newest activity first.
    pub async fn jobs(&self, filter: JobFilter) -> Vec<PublishJob> {
        let state = self.state.read().await;
        let mut jobs: Vec<PublishJob> = state
            .jobs
            .values()
            .filter(|job| filter.content_id.is_none_or(|id| job.content_id == id))
            .filter(|job| filter.status.is_none_or(|status| job.status == status))
            .filter(|job| {
                filter
                    .platform
                    .as_ref()
                    .is_none_or(|platform| job.platforms.iter().any(|p| p == platform))
            })
            .cloned()
            .collect();
        jobs.sort_by(|a, b| {
            let a_at = a.started_at.unwrap_or(DateTime::<Utc>::MIN_UTC);
            let b_at = b.started_at.unwrap_or(DateTime::<Utc>::MIN_UTC);
            b_at.cmp(&a_at).then_with(|| a.id.cmp(&b.id))
        });
        if let Some(limit) = filter.limit {
            jobs.truncate(limit);
        }
        jobs
    }

    /// Jobs that are queued or processing. `Publishing` is deliberately
    /// excluded: the dashboard's "active" counter has always meant the
    /// pre-fanout stages.
    pub async fn active_jobs(&self) -> Vec<PublishJob> {
        let state = self.state.read().await;
        let mut jobs: Vec<PublishJob> = state
            .jobs
            .values()
            .filter(|job| matches!(job.status, JobStatus::Queued | JobStatus::Processing))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.id.cmp(&b.id));
        jobs
    }

    /// Bounded progress history for a job, oldest first.
    pub async fn job_progress(&self, job_id: &str) -> Vec<ProgressEntry> {
        self.state
            .read()
            .await
            .progress
            .get(job_id)
            .map(|history| history.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Success metrics over jobs with activity inside the window.
    pub async fn job_statistics(&self, window: Duration) -> JobStatistics {
        let cutoff = Utc::now()
            - ChronoDuration::from_std(window).unwrap_or(ChronoDuration::MAX);
        let state = self.state.read().await;

        let mut stats = JobStatistics {
            total: 0,
            completed: 0,
            failed: 0,
            cancelled: 0,
            success_rate: 0.0,
            mean_completion: None,
            per_platform: HashMap::new(),
        };
        let mut durations = Vec::new();

        for job in state.jobs.values() {
            let last_activity = job.completed_at.or(job.started_at);
            if last_activity.is_none_or(|at| at < cutoff) {
                continue;
            }
            stats.total += 1;
            match job.status {
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Cancelled => stats.cancelled += 1,
                _ => {}
            }
            if job.status == JobStatus::Completed {
                if let (Some(started), Some(completed)) = (job.started_at, job.completed_at) {
                    if let Ok(elapsed) = completed.signed_duration_since(started).to_std() {
                        durations.push(elapsed);
                    }
                }
            }
            for result in &job.platform_results {
                let entry = stats.per_platform.entry(result.platform.clone()).or_default();
                entry.attempts += 1;
                if result.status == PlatformStatus::Success {
                    entry.successes += 1;
                }
            }
        }

        let terminal = stats.completed + stats.failed + stats.cancelled;
        if terminal > 0 {
            stats.success_rate = stats.completed as f64 / terminal as f64;
        }
        if !durations.is_empty() {
            let total: Duration = durations.iter().sum();
            stats.mean_completion = Some(total / durations.len() as u32);
        }
        for platform in stats.per_platform.values_mut() {
            if platform.attempts > 0 {
                platform.success_rate = platform.successes as f64 / platform.attempts as f64;
            }
        }
        stats
    }

    /// Prune terminal jobs whose completion is older than the threshold.
    /// Returns how many were removed.
    pub async fn clear_completed_jobs(&self, older_than: Duration) -> usize {
        let cutoff = Utc::now()
            - ChronoDuration::from_std(older_than).unwrap_or(ChronoDuration::MAX);
        let mut state = self.state.write().await;
        let doomed: Vec<String> = state
            .jobs
            .values()
            .filter(|job| {
                job.status.is_terminal()
                    && job.completed_at.is_some_and(|at| at < cutoff)
            })
            .map(|job| job.id.clone())
            .collect();
        for id in &doomed {
            state.jobs.remove(id);
            state.progress.remove(id);
        }
        doomed.len()
    }
}


#[cfg(test)]
mod tests {
    use super::tests_support::sample_job;
    use super::*;
    use huddle_common::types::PlatformResult;

    fn service() -> PublishingService {
        let (outbound, _rx) = Outbound::channel();
        PublishingService::new(outbound, EventBus::new(), Duration::from_secs(10))
    }

    fn job_with(id: &str, status: JobStatus, progress: u8) -> PublishJob {
        PublishJob { status, progress, ..sample_job(id) }
    }

    // ── Upsert + semantic events ────────────────────────────────────

    #[tokio::test]
    async fn job_lifecycle_fires_started_and_completed_once() {
        let svc = service();
        let mut events = svc.bus.subscribe_jobs();

        svc.apply_job_update(job_with("job_1", JobStatus::Queued, 0)).await;
        svc.apply_job_update(job_with("job_1", JobStatus::Processing, 10)).await;
        svc.apply_job_update(job_with("job_1", JobStatus::Completed, 100)).await;

        let mut started = 0;
        let mut completed = 0;
        while let Ok(event) = events.try_recv() {
            match event {
                JobEvent::Started(_) => started += 1,
                JobEvent::Completed(_) => completed += 1,
                _ => {}
            }
        }
        assert_eq!(started, 1);
        assert_eq!(completed, 1);

        let job = svc.job("job_1").await.expect("job");
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
    }

    #[tokio::test]
    async fn repeated_status_fires_only_generic_update() {
        let svc = service();
        let mut events = svc.bus.subscribe_jobs();

        svc.apply_job_update(job_with("job_1", JobStatus::Processing, 10)).await;
        svc.apply_job_update(job_with("job_1", JobStatus::Processing, 60)).await;

        let mut started = 0;
        let mut updated = 0;
        while let Ok(event) = events.try_recv() {
            match event {
                JobEvent::Started(_) => started += 1,
                JobEvent::Updated(_) => updated += 1,
                _ => {}
            }
        }
        assert_eq!(started, 1);
        assert_eq!(updated, 2);
    }

    #[tokio::test]
    async fn last_write_wins_by_application_order() {
        let svc = service();
        // Deliberately "out of order": the map reflects application order.
        svc.apply_job_update(job_with("job_1", JobStatus::Completed, 100)).await;
        svc.apply_job_update(job_with("job_1", JobStatus::Processing, 50)).await;
        assert_eq!(svc.job("job_1").await.unwrap().status, JobStatus::Processing);
    }

    // ── Correlation ─────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn start_publishing_resolves_on_matching_update() {
        let (outbound, mut rx) = Outbound::channel();
        let svc =
            PublishingService::new(outbound, EventBus::new(), Duration::from_secs(10));

        let starter = svc.clone();
        let handle = tokio::spawn(async move {
            starter
                .start_publishing(
                    Uuid::new_v4(),
                    vec!["mastodon".to_string()],
                    PublishOptions::default(),
                )
                .await
        });

        // Wait for the start frame to learn the generated job id.
        let job_id = loop {
            match rx.recv().await {
                Some(WsMessage::JobRequest { action: JobAction::Start { job, .. } }) => {
                    break job.id
                }
                Some(_) => continue,
                None => panic!("outbound closed"),
            }
        };

        svc.apply_job_update(job_with(&job_id, JobStatus::Queued, 0)).await;
        let confirmed = handle.await.unwrap().expect("start should resolve");
        assert_eq!(confirmed.id, job_id);
        assert_eq!(confirmed.status, JobStatus::Queued);
    }

    #[tokio::test(start_paused = true)]
    async fn start_publishing_times_out_without_update() {
        let svc = service();
        let result = svc
            .start_publishing(Uuid::new_v4(), vec!["mastodon".to_string()], PublishOptions::default())
            .await;
        assert!(result.unwrap_err().to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn start_publishing_rejects_empty_platform_list() {
        let svc = service();
        assert!(svc
            .start_publishing(Uuid::new_v4(), Vec::new(), PublishOptions::default())
            .await
            .is_err());
    }

    // ── Queries ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn active_jobs_is_queued_union_processing() {
        let svc = service();
        svc.apply_job_update(job_with("job_q", JobStatus::Queued, 0)).await;
        svc.apply_job_update(job_with("job_p", JobStatus::Processing, 10)).await;
        svc.apply_job_update(job_with("job_pub", JobStatus::Publishing, 80)).await;
        svc.apply_job_update(job_with("job_done", JobStatus::Completed, 100)).await;

        let active: Vec<String> = svc.active_jobs().await.into_iter().map(|j| j.id).collect();
        assert_eq!(active, vec!["job_p".to_string(), "job_q".to_string()]);
    }

    #[tokio::test]
    async fn jobs_filter_by_content_status_platform_and_limit() {
        let svc = service();
        let content = Uuid::new_v4();

        let mut a = job_with("job_a", JobStatus::Completed, 100);
        a.content_id = content;
        a.platforms = vec!["mastodon".to_string()];
        let mut b = job_with("job_b", JobStatus::Failed, 30);
        b.content_id = content;
        b.platforms = vec!["bluesky".to_string()];
        let c = job_with("job_c", JobStatus::Completed, 100);

        svc.apply_job_update(a).await;
        svc.apply_job_update(b).await;
        svc.apply_job_update(c).await;

        let by_content =
            svc.jobs(JobFilter { content_id: Some(content), ..JobFilter::default() }).await;
        assert_eq!(by_content.len(), 2);

        let by_status = svc
            .jobs(JobFilter { status: Some(JobStatus::Completed), ..JobFilter::default() })
            .await;
        assert_eq!(by_status.len(), 2);

        let by_platform = svc
            .jobs(JobFilter { platform: Some("bluesky".to_string()), ..JobFilter::default() })
            .await;
        assert_eq!(by_platform.len(), 1);
        assert_eq!(by_platform[0].id, "job_b");

        let limited = svc.jobs(JobFilter { limit: Some(1), ..JobFilter::default() }).await;
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn progress_history_is_capped_at_50() {
        let svc = service();
        for i in 0..60u8 {
            svc.apply_job_update(job_with("job_1", JobStatus::Processing, i.min(100))).await;
        }
        let history = svc.job_progress("job_1").await;
        assert_eq!(history.len(), 50);
        // Oldest entries were evicted.
        assert_eq!(history[0].progress, 10);
    }

    // ── Statistics + pruning ────────────────────────────────────────

    #[tokio::test]
    async fn statistics_compute_success_rate_and_mean_completion() {
        let svc = service();
        let now = Utc::now();

        let mut done = job_with("job_done", JobStatus::Completed, 100);
        done.started_at = Some(now - ChronoDuration::seconds(120));
        done.completed_at = Some(now - ChronoDuration::seconds(60));
        done.platform_results = vec![PlatformResult {
            platform: "mastodon".to_string(),
            status: PlatformStatus::Success,
            post_id: None,
            post_url: None,
            error: None,
            engagement: None,
        }];

        let mut failed = job_with("job_failed", JobStatus::Failed, 40);
        failed.started_at = Some(now - ChronoDuration::seconds(90));
        failed.platform_results = vec![PlatformResult {
            platform: "mastodon".to_string(),
            status: PlatformStatus::Failed,
            post_id: None,
            post_url: None,
            error: Some("rate limited".to_string()),
            engagement: None,
        }];

        svc.apply_job_update(done).await;
        svc.apply_job_update(failed).await;

        let stats = svc.job_statistics(Duration::from_secs(3_600)).await;
        assert_eq!(stats.total, 2);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 1);
        assert!((stats.success_rate - 0.5).abs() < f64::EPSILON);
        assert_eq!(stats.mean_completion, Some(Duration::from_secs(60)));

        let mastodon = &stats.per_platform["mastodon"];
        assert_eq!(mastodon.attempts, 2);
        assert_eq!(mastodon.successes, 1);
    }

    #[tokio::test]
    async fn clear_completed_jobs_prunes_by_age() {
        let svc = service();
        let now = Utc::now();

        let mut old = job_with("job_old", JobStatus::Completed, 100);
        old.completed_at = Some(now - ChronoDuration::hours(2));
        let mut fresh = job_with("job_fresh", JobStatus::Completed, 100);
        fresh.completed_at = Some(now - ChronoDuration::seconds(30));
        let active = job_with("job_active", JobStatus::Processing, 50);

        svc.apply_job_update(old).await;
        svc.apply_job_update(fresh).await;
        svc.apply_job_update(active).await;

        let removed = svc.clear_completed_jobs(Duration::from_secs(3_600)).await;
        assert_eq!(removed, 1);
        assert!(svc.job("job_old").await.is_none());
        assert!(svc.job("job_fresh").await.is_some());
        assert!(svc.job("job_active").await.is_some());
    }
}
