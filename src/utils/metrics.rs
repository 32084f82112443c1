use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::types::Selection;

/// Successful call latencies kept per provider for the average and p95
pub const LATENCY_WINDOW: usize = 1024;

/// How a single provider call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    Timeout,
    Failure,
}

/// Race statistics collector.
///
/// Tracks per-provider attempts and wins, selection paths, cache use and
/// frame throughput. Thread-safe and cheap to clone.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    // Race Metrics
    races_total: AtomicUsize,
    races_all_failed: AtomicUsize,
    qualified_selections: AtomicUsize,
    best_effort_selections: AtomicUsize,
    fallback_used: AtomicUsize,
    winning_scores: RwLock<ScoreTotals>,

    // Per-provider counters
    providers: DashMap<String, ProviderCounters>,

    // Cache Metrics
    cache_hits: AtomicUsize,
    cache_misses: AtomicUsize,

    // Frame Metrics
    frames_processed: AtomicUsize,
    groups_processed: AtomicUsize,

    circuit_breaker_trips: AtomicUsize,

    start_time: Instant,
}

#[derive(Default)]
struct ScoreTotals {
    sum: f64,
    count: usize,
}

#[derive(Default)]
struct ProviderCounters {
    attempts: AtomicUsize,
    successes: AtomicUsize,
    timeouts: AtomicUsize,
    failures: AtomicUsize,
    wins: AtomicUsize,
    latency_ms: RwLock<VecDeque<u64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                races_total: AtomicUsize::new(0),
                races_all_failed: AtomicUsize::new(0),
                qualified_selections: AtomicUsize::new(0),
                best_effort_selections: AtomicUsize::new(0),
                fallback_used: AtomicUsize::new(0),
                winning_scores: RwLock::new(ScoreTotals::default()),
                providers: DashMap::new(),
                cache_hits: AtomicUsize::new(0),
                cache_misses: AtomicUsize::new(0),
                frames_processed: AtomicUsize::new(0),
                groups_processed: AtomicUsize::new(0),
                circuit_breaker_trips: AtomicUsize::new(0),
                start_time: Instant::now(),
            }),
        }
    }

    // Provider Metrics
    pub fn record_attempt(&self, provider: &str, outcome: AttemptOutcome, duration: Duration) {
        let entry = self
            .inner
            .providers
            .entry(provider.to_string())
            .or_default();
        entry.attempts.fetch_add(1, Ordering::Relaxed);
        match outcome {
            AttemptOutcome::Success => {
                entry.successes.fetch_add(1, Ordering::Relaxed);
                let mut window = entry.latency_ms.write();
                if window.len() == LATENCY_WINDOW {
                    window.pop_front();
                }
                window.push_back(duration.as_millis() as u64);
            }
            AttemptOutcome::Timeout => {
                entry.timeouts.fetch_add(1, Ordering::Relaxed);
            }
            AttemptOutcome::Failure => {
                entry.failures.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    // Race Metrics
    pub fn record_race_started(&self) {
        self.inner.races_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_selection(&self, provider: &str, score: f32, selection: Selection) {
        self.inner
            .providers
            .entry(provider.to_string())
            .or_default()
            .wins
            .fetch_add(1, Ordering::Relaxed);
        {
            let mut totals = self.inner.winning_scores.write();
            totals.sum += score as f64;
            totals.count += 1;
        }

        match selection {
            Selection::Qualified => {
                self.inner.qualified_selections.fetch_add(1, Ordering::Relaxed);
            }
            Selection::BestEffort => {
                self.inner.best_effort_selections.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }

    pub fn record_all_failed(&self) {
        self.inner.races_all_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fallback_used(&self) {
        self.inner.fallback_used.fetch_add(1, Ordering::Relaxed);
    }

    // Cache Metrics
    pub fn record_cache_hit(&self) {
        self.inner.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.inner.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    // Frame Metrics
    pub fn record_frame(&self, groups: usize) {
        self.inner.frames_processed.fetch_add(1, Ordering::Relaxed);
        self.inner.groups_processed.fetch_add(groups, Ordering::Relaxed);
    }

    // Circuit Breaker Metrics
    pub fn record_circuit_breaker_trip(&self) {
        self.inner.circuit_breaker_trips.fetch_add(1, Ordering::Relaxed);
    }

    // Get snapshot for reporting
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mean_winning_score = {
            let totals = self.inner.winning_scores.read();
            if totals.count == 0 {
                0.0
            } else {
                totals.sum / totals.count as f64
            }
        };

        let cache_hits = self.inner.cache_hits.load(Ordering::Relaxed);
        let cache_misses = self.inner.cache_misses.load(Ordering::Relaxed);
        let cache_total = cache_hits + cache_misses;
        let cache_hit_rate = if cache_total > 0 {
            cache_hits as f64 / cache_total as f64
        } else {
            0.0
        };

        let providers = self
            .inner
            .providers
            .iter()
            .map(|entry| {
                let c = entry.value();
                let latency: Vec<u64> = c.latency_ms.read().iter().copied().collect();
                let snapshot = ProviderSnapshot {
                    attempts: c.attempts.load(Ordering::Relaxed),
                    successes: c.successes.load(Ordering::Relaxed),
                    timeouts: c.timeouts.load(Ordering::Relaxed),
                    failures: c.failures.load(Ordering::Relaxed),
                    wins: c.wins.load(Ordering::Relaxed),
                    latency_avg_ms: avg(&latency),
                    latency_p95_ms: percentile(&latency, 0.95),
                };
                (entry.key().clone(), snapshot)
            })
            .collect();

        MetricsSnapshot {
            races_total: self.inner.races_total.load(Ordering::Relaxed),
            races_all_failed: self.inner.races_all_failed.load(Ordering::Relaxed),
            qualified_selections: self.inner.qualified_selections.load(Ordering::Relaxed),
            best_effort_selections: self.inner.best_effort_selections.load(Ordering::Relaxed),
            fallback_used: self.inner.fallback_used.load(Ordering::Relaxed),
            mean_winning_score,
            cache_hits,
            cache_misses,
            cache_hit_rate,
            frames_processed: self.inner.frames_processed.load(Ordering::Relaxed),
            groups_processed: self.inner.groups_processed.load(Ordering::Relaxed),
            circuit_breaker_trips: self.inner.circuit_breaker_trips.load(Ordering::Relaxed),
            uptime_seconds: self.inner.start_time.elapsed().as_secs(),
            providers,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSnapshot {
    pub attempts: usize,
    pub successes: usize,
    pub timeouts: usize,
    pub failures: usize,
    pub wins: usize,
    /// Over the last [`LATENCY_WINDOW`] successful calls
    pub latency_avg_ms: u64,
    pub latency_p95_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub races_total: usize,
    pub races_all_failed: usize,
    pub qualified_selections: usize,
    pub best_effort_selections: usize,
    pub fallback_used: usize,
    pub mean_winning_score: f64,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub cache_hit_rate: f64,
    pub frames_processed: usize,
    pub groups_processed: usize,
    pub circuit_breaker_trips: usize,
    pub uptime_seconds: u64,
    /// Keyed by provider id, sorted for stable output
    pub providers: BTreeMap<String, ProviderSnapshot>,
}

fn percentile(values: &[u64], p: f64) -> u64 {
    if values.is_empty() {
        return 0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let idx = ((values.len() as f64 - 1.0) * p) as usize;
    sorted[idx]
}

fn avg(values: &[u64]) -> u64 {
    if values.is_empty() {
        return 0;
    }
    values.iter().sum::<u64>() / values.len() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_recording() {
        let metrics = Metrics::new();

        metrics.record_race_started();
        metrics.record_attempt("deep_google", AttemptOutcome::Success, Duration::from_millis(100));
        metrics.record_attempt("deep_google", AttemptOutcome::Success, Duration::from_millis(300));
        metrics.record_attempt("google", AttemptOutcome::Timeout, Duration::from_secs(8));
        metrics.record_attempt("deep_microsoft", AttemptOutcome::Failure, Duration::from_millis(20));
        metrics.record_selection("deep_google", 0.9, Selection::Qualified);
        metrics.record_selection("deep_google", 0.5, Selection::BestEffort);
        metrics.record_all_failed();
        metrics.record_fallback_used();
        metrics.record_cache_hit();
        metrics.record_cache_miss();
        metrics.record_frame(3);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.races_total, 1);
        assert_eq!(snapshot.races_all_failed, 1);
        assert_eq!(snapshot.qualified_selections, 1);
        assert_eq!(snapshot.best_effort_selections, 1);
        assert_eq!(snapshot.fallback_used, 1);
        assert!((snapshot.mean_winning_score - 0.7).abs() < 1e-6);
        assert_eq!(snapshot.cache_hit_rate, 0.5);
        assert_eq!(snapshot.groups_processed, 3);

        let google = &snapshot.providers["deep_google"];
        assert_eq!(google.attempts, 2);
        assert_eq!(google.successes, 2);
        assert_eq!(google.wins, 2);
        assert_eq!(google.latency_avg_ms, 200);
        assert_eq!(snapshot.providers["google"].timeouts, 1);
        assert_eq!(snapshot.providers["deep_microsoft"].failures, 1);
    }

    #[test]
    fn test_latency_window_is_bounded() {
        let metrics = Metrics::new();
        for _ in 0..LATENCY_WINDOW {
            metrics.record_attempt("google", AttemptOutcome::Success, Duration::from_millis(900));
        }
        for _ in 0..LATENCY_WINDOW {
            metrics.record_attempt("google", AttemptOutcome::Success, Duration::from_millis(100));
            metrics.record_selection("google", 0.8, Selection::Qualified);
        }

        let held = metrics.inner.providers.get("google").unwrap().latency_ms.read().len();
        assert_eq!(held, LATENCY_WINDOW);

        let snapshot = metrics.snapshot();
        let google = &snapshot.providers["google"];
        assert_eq!(google.successes, 2 * LATENCY_WINDOW);
        assert_eq!(google.latency_avg_ms, 100);
        assert_eq!(google.latency_p95_ms, 100);
        assert!((snapshot.mean_winning_score - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_snapshot_serializes() {
        let metrics = Metrics::new();
        metrics.record_attempt("b", AttemptOutcome::Success, Duration::from_millis(5));
        metrics.record_attempt("a", AttemptOutcome::Success, Duration::from_millis(5));

        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        let keys: Vec<_> = json["providers"].as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["a", "b"]);
    }
}
