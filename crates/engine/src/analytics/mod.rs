// Live analytics cache: named metrics with deltas, derived chart series,
// and trend classification.
//
// Incoming updates are coalesced before they touch derived state: a batch
// flushes when it reaches `max_batch` items or when the flush interval
// elapses, whichever comes first. This bounds consumer re-render frequency
// under bursty update rates.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use huddle_common::protocol::ws::Topic;
use huddle_common::types::{MetricCategory, MetricUpdate};

use crate::bus::{EventBus, MetricEvent};
use crate::transport::Outbound;

/// Data points retained per chart and per metric history.
const SERIES_CAP: usize = 100;

/// Trend threshold: change-percent beyond ±5% counts as movement.
const TREND_THRESHOLD_PERCENT: f64 = 5.0;

// ── Coalescing buffer ───────────────────────────────────────────────

/// Size-or-interval batch coalescer. Pure state machine; the caller feeds
/// it updates and a clock.
#[derive(Debug)]
pub struct UpdateBuffer {
    max_batch: usize,
    flush_interval: Duration,
    items: Vec<MetricUpdate>,
    last_flush: Instant,
}

impl UpdateBuffer {
    pub fn new(max_batch: usize, flush_interval: Duration) -> Self {
        Self { max_batch, flush_interval, items: Vec::new(), last_flush: Instant::now() }
    }

    /// Queue one update. Returns the full batch when `max_batch` is hit.
    pub fn push(&mut self, update: MetricUpdate, now: Instant) -> Option<Vec<MetricUpdate>> {
        self.items.push(update);
        if self.items.len() >= self.max_batch {
            self.last_flush = now;
            Some(std::mem::take(&mut self.items))
        } else {
            None
        }
    }

    /// Drain the buffer if the flush interval has elapsed.
    pub fn take_if_elapsed(&mut self, now: Instant) -> Option<Vec<MetricUpdate>> {
        if self.items.is_empty() || now.duration_since(self.last_flush) < self.flush_interval {
            return None;
        }
        self.last_flush = now;
        Some(std::mem::take(&mut self.items))
    }

    pub fn pending_count(&self) -> usize {
        self.items.len()
    }
}

// ── Cached metric / chart types ─────────────────────────────────────

/// One cached measurement with its delta against the previous value.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Metric {
    pub id: String,
    pub name: String,
    pub value: f64,
    pub previous_value: Option<f64>,
    /// `value - previous`, absent on the first observation.
    pub change: Option<f64>,
    /// Percent change against the previous value; 0 when the previous
    /// value was 0.
    pub change_percent: Option<f64>,
    pub unit: Option<String>,
    pub category: MetricCategory,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartType {
    Line,
    Bar,
    Pie,
    Area,
    Gauge,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ChartPoint {
    pub at: DateTime<Utc>,
    pub value: f64,
    pub label: Option<String>,
}

/// Registration request for a derived chart.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartConfig {
    pub id: String,
    pub title: String,
    pub chart_type: ChartType,
    /// Metrics this chart aggregates; each update appends a point.
    pub metric_ids: Vec<String>,
    /// Window the consumer asked for (display concern, kept verbatim).
    pub time_range: Duration,
}

/// A live chart: its config plus the bounded series.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveChart {
    pub config: ChartConfig,
    pub points: VecDeque<ChartPoint>,
    pub last_updated: DateTime<Utc>,
}

/// Trend classification over a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
    Up,
    Down,
    Stable,
}

#[derive(Debug)]
struct AnalyticsState {
    buffer: UpdateBuffer,
    metrics: HashMap<String, Metric>,
    /// Per-metric value history for trend classification.
    history: HashMap<String, VecDeque<(DateTime<Utc>, f64)>>,
    charts: HashMap<String, LiveChart>,
}

/// Shared analytics cache. Cheap to clone.
#[derive(Clone)]
pub struct LiveAnalyticsService {
    state: Arc<RwLock<AnalyticsState>>,
    outbound: Outbound,
    bus: EventBus,
}

impl LiveAnalyticsService {
    pub fn new(
        outbound: Outbound,
        bus: EventBus,
        max_batch: usize,
        flush_interval: Duration,
    ) -> Self {
        Self {
            state: Arc::new(RwLock::new(AnalyticsState {
                buffer: UpdateBuffer::new(max_batch, flush_interval),
                metrics: HashMap::new(),
                history: HashMap::new(),
                charts: HashMap::new(),
            })),
            outbound,
            bus,
        }
    }

    // ── Ingestion ───────────────────────────────────────────────────

    /// Queue a batch of incoming updates, flushing any full batches.
    pub(crate) async fn ingest(&self, updates: Vec<MetricUpdate>) {
        let now = Instant::now();
        let mut ready = Vec::new();
        {
            let mut state = self.state.write().await;
            for update in updates {
                if let Some(batch) = state.buffer.push(update, now) {
                    ready.push(batch);
                }
            }
        }
        for batch in ready {
            self.apply_batch(batch).await;
        }
    }

    /// Timer-driven flush; called by the runtime on its tick.
    pub(crate) async fn flush_elapsed(&self) {
        let batch = {
            let mut state = self.state.write().await;
            state.buffer.take_if_elapsed(Instant::now())
        };
        if let Some(batch) = batch {
            self.apply_batch(batch).await;
        }
    }

    async fn apply_batch(&self, batch: Vec<MetricUpdate>) {
        let mut metric_ids = Vec::new();
        let mut touched_charts = Vec::new();
        {
            let mut state = self.state.write().await;
            for update in batch {
                let previous = state.metrics.get(&update.metric_id).map(|m| m.value);
                let (change, change_percent) = match previous {
                    None => (None, None),
                    Some(old) => {
                        let change = update.value - old;
                        let percent = if old == 0.0 { 0.0 } else { change / old * 100.0 };
                        (Some(change), Some(percent))
                    }
                };

                state.metrics.insert(
                    update.metric_id.clone(),
                    Metric {
                        id: update.metric_id.clone(),
                        name: update.name.clone(),
                        value: update.value,
                        previous_value: previous,
                        change,
                        change_percent,
                        unit: update.unit.clone(),
                        category: update.category,
                        updated_at: update.timestamp,
                    },
                );

                let history = state.history.entry(update.metric_id.clone()).or_default();
                history.push_back((update.timestamp, update.value));
                while history.len() > SERIES_CAP {
                    history.pop_front();
                }

                for chart in state.charts.values_mut() {
                    if chart.config.metric_ids.iter().any(|id| id == &update.metric_id) {
                        chart.points.push_back(ChartPoint {
                            at: update.timestamp,
                            value: update.value,
                            label: None,
                        });
                        while chart.points.len() > SERIES_CAP {
                            chart.points.pop_front();
                        }
                        chart.last_updated = Utc::now();
                        touched_charts.push(chart.config.id.clone());
                    }
                }

                metric_ids.push(update.metric_id);
            }
        }

        if metric_ids.is_empty() {
            return;
        }
        self.bus.emit_metric(MetricEvent::Flushed { metric_ids });
        touched_charts.sort();
        touched_charts.dedup();
        for chart_id in touched_charts {
            self.bus.emit_metric(MetricEvent::ChartUpdated { chart_id });
        }
    }

    // ── Charts ──────────────────────────────────────────────────────

    /// Register a chart and subscribe its metrics' topics.
    pub async fn create_chart(&self, config: ChartConfig) {
        for metric_id in &config.metric_ids {
            self.outbound.subscribe(Topic::Metric(metric_id.clone()));
        }
        let mut state = self.state.write().await;
        let chart_id = config.id.clone();
        state.charts.insert(
            chart_id,
            LiveChart { config, points: VecDeque::new(), last_updated: Utc::now() },
        );
    }

    /// Remove a chart, unsubscribing metrics no other chart references.
    pub async fn remove_chart(&self, chart_id: &str) {
        let orphaned = {
            let mut state = self.state.write().await;
            let Some(removed) = state.charts.remove(chart_id) else {
                debug!(%chart_id, "removing an unknown chart");
                return;
            };
            removed
                .config
                .metric_ids
                .into_iter()
                .filter(|metric_id| {
                    !state
                        .charts
                        .values()
                        .any(|chart| chart.config.metric_ids.contains(metric_id))
                })
                .collect::<Vec<_>>()
        };
        for metric_id in orphaned {
            self.outbound.unsubscribe(Topic::Metric(metric_id));
        }
    }

    // ── Queries ─────────────────────────────────────────────────────

    pub async fn metric(&self, metric_id: &str) -> Option<Metric> {
        self.state.read().await.metrics.get(metric_id).cloned()
    }

    pub async fn metrics(&self) -> Vec<Metric> {
        let state = self.state.read().await;
        let mut metrics: Vec<Metric> = state.metrics.values().cloned().collect();
        metrics.sort_by(|a, b| a.id.cmp(&b.id));
        metrics
    }

    pub async fn chart(&self, chart_id: &str) -> Option<LiveChart> {
        self.state.read().await.charts.get(chart_id).cloned()
    }

    /// Classify a metric's direction over the window using the ±5%
    /// change-percent threshold. `None` until two samples fall inside the
    /// window.
    pub async fn trend(&self, metric_id: &str, window: Duration) -> Option<Trend> {
        let cutoff =
            Utc::now() - ChronoDuration::from_std(window).unwrap_or(ChronoDuration::MAX);
        let state = self.state.read().await;
        let history = state.history.get(metric_id)?;
        let mut in_window = history.iter().filter(|(at, _)| *at >= cutoff);
        let (_, first) = in_window.next()?;
        let (_, last) = in_window.last()?;

        let percent = if *first == 0.0 { 0.0 } else { (last - first) / first * 100.0 };
        Some(if percent > TREND_THRESHOLD_PERCENT {
            Trend::Up
        } else if percent < -TREND_THRESHOLD_PERCENT {
            Trend::Down
        } else {
            Trend::Stable
        })
    }

    /// Pending (unflushed) update count, for observability.
    pub async fn pending_updates(&self) -> usize {
        self.state.read().await.buffer.pending_count()
    }
}
