//! Metrics collection utilities.
//!
//! Aggregates fetch, block and workflow statistics globally and per domain,
//! with latency percentiles over a sliding window.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::blocking::BlockKind;
use crate::core::TaskStatus;

/// Aggregated metrics across all domains.
#[derive(Debug, Clone, Serialize)]
pub struct GlobalStats {
    pub started_at: DateTime<Utc>,
    pub fetches: u64,
    pub fetch_failures: u64,
    pub blocks: u64,
    pub workflows_completed: u64,
    pub workflows_with_warnings: u64,
    pub workflows_failed: u64,
    pub retries: u64,
    pub average_latency: Option<Duration>,
    pub p95_latency: Option<Duration>,
}

impl Default for GlobalStats {
    fn default() -> Self {
        Self {
            started_at: Utc::now(),
            fetches: 0,
            fetch_failures: 0,
            blocks: 0,
            workflows_completed: 0,
            workflows_with_warnings: 0,
            workflows_failed: 0,
            retries: 0,
            average_latency: None,
            p95_latency: None,
        }
    }
}

/// Domain-scoped metrics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct DomainStats {
    pub domain: String,
    pub fetches: u64,
    pub fetch_failures: u64,
    pub consecutive_failures: u32,
    pub last_status: Option<u16>,
    pub blocks: BTreeMap<String, u64>,
    pub workflows: u64,
    pub retries: u64,
    pub average_latency: Option<Duration>,
    pub p95_latency: Option<Duration>,
}

impl DomainStats {
    fn from_accumulator(domain: &str, acc: &DomainAccumulator) -> Self {
        let (avg, p95) = latency_stats(acc.latencies.iter().copied());
        Self {
            domain: domain.to_string(),
            fetches: acc.fetches,
            fetch_failures: acc.fetch_failures,
            consecutive_failures: acc.consecutive_failures,
            last_status: acc.last_status,
            blocks: acc.blocks.clone(),
            workflows: acc.workflows,
            retries: acc.retries,
            average_latency: avg,
            p95_latency: p95,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub global: GlobalStats,
    pub domains: Vec<DomainStats>,
}

impl MetricsSnapshot {
    pub fn domain(&self, domain: &str) -> Option<&DomainStats> {
        self.domains.iter().find(|stats| stats.domain == domain)
    }
}

#[derive(Debug)]
struct DomainAccumulator {
    fetches: u64,
    fetch_failures: u64,
    latencies: VecDeque<Duration>,
    max_window: usize,
    consecutive_failures: u32,
    last_status: Option<u16>,
    blocks: BTreeMap<String, u64>,
    workflows: u64,
    retries: u64,
}

impl DomainAccumulator {
    fn new(max_window: usize) -> Self {
        Self {
            fetches: 0,
            fetch_failures: 0,
            latencies: VecDeque::with_capacity(max_window),
            max_window,
            consecutive_failures: 0,
            last_status: None,
            blocks: BTreeMap::new(),
            workflows: 0,
            retries: 0,
        }
    }

    fn record_fetch(&mut self, status: Option<u16>, latency: Duration) -> bool {
        self.fetches += 1;
        self.last_status = status;

        let failed = status.is_none_or(|code| code >= 500);
        if failed {
            self.fetch_failures += 1;
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        } else {
            self.consecutive_failures = 0;
        }

        if self.latencies.len() == self.max_window {
            self.latencies.pop_front();
        }
        self.latencies.push_back(latency);
        failed
    }
}

/// Average and 95th percentile of a set of samples.
fn latency_stats(samples: impl Iterator<Item = Duration>) -> (Option<Duration>, Option<Duration>) {
    let mut samples: Vec<_> = samples.collect();
    if samples.is_empty() {
        return (None, None);
    }
    samples.sort_unstable();
    let avg = samples.iter().map(Duration::as_secs_f64).sum::<f64>() / samples.len() as f64;
    let p95_index = ((samples.len() as f64 * 0.95).ceil() as usize).saturating_sub(1);
    (Some(Duration::from_secs_f64(avg)), Some(samples[p95_index]))
}

#[derive(Debug)]
struct MetricsState {
    global: GlobalStats,
    max_window: usize,
    domains: HashMap<String, DomainAccumulator>,
}

impl MetricsState {
    fn new(max_window: usize) -> Self {
        Self {
            global: GlobalStats::default(),
            max_window,
            domains: HashMap::new(),
        }
    }

    fn accumulator_mut(&mut self, domain: &str) -> &mut DomainAccumulator {
        self.domains
            .entry(domain.to_string())
            .or_insert_with(|| DomainAccumulator::new(self.max_window))
    }
}

/// Thread-safe metrics collector shared by the orchestrator and its handlers.
#[derive(Clone, Debug)]
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsState>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::with_window(128)
    }

    pub fn with_window(window: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MetricsState::new(window.max(16)))),
        }
    }

    fn state(&self) -> MutexGuard<'_, MetricsState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// `status` is `None` when the fetch produced no response.
    pub fn record_fetch(&self, domain: &str, status: Option<u16>, latency: Duration) {
        let mut guard = self.state();
        let failed = guard.accumulator_mut(domain).record_fetch(status, latency);

        guard.global.fetches += 1;
        if failed {
            guard.global.fetch_failures += 1;
        }
        let blended = match guard.global.average_latency {
            Some(avg) => avg.as_secs_f64() * 0.9 + latency.as_secs_f64() * 0.1,
            None => latency.as_secs_f64(),
        };
        guard.global.average_latency = Some(Duration::from_secs_f64(blended));

        let samples: Vec<Duration> = guard
            .domains
            .values()
            .flat_map(|domain| domain.latencies.iter().copied())
            .collect();
        guard.global.p95_latency = latency_stats(samples.into_iter()).1;
    }

    pub fn record_block(&self, domain: &str, kind: BlockKind) {
        let mut guard = self.state();
        guard.global.blocks += 1;
        *guard
            .accumulator_mut(domain)
            .blocks
            .entry(kind.as_str().to_string())
            .or_default() += 1;
    }

    pub fn record_workflow(&self, domain: &str, status: TaskStatus, retries: u32) {
        let mut guard = self.state();
        match status {
            TaskStatus::Completed => guard.global.workflows_completed += 1,
            TaskStatus::CompletedWithWarnings => guard.global.workflows_with_warnings += 1,
            TaskStatus::Failed => guard.global.workflows_failed += 1,
            TaskStatus::Pending => {}
        }
        guard.global.retries += u64::from(retries);
        let acc = guard.accumulator_mut(domain);
        acc.workflows += 1;
        acc.retries += u64::from(retries);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let guard = self.state();
        let mut domains: Vec<_> = guard
            .domains
            .iter()
            .map(|(domain, acc)| DomainStats::from_accumulator(domain, acc))
            .collect();
        domains.sort_by(|a, b| a.domain.cmp(&b.domain));
        MetricsSnapshot {
            global: guard.global.clone(),
            domains,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
