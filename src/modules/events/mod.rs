//! Workflow event system.
//!
//! Provides hooks for metrics, logging and custom reactions around each stage
//! of a retrieval workflow.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use super::metrics::MetricsCollector;
use crate::blocking::{BlockKind, Tactic};
use crate::core::{EngineKind, TaskStatus};

#[derive(Debug, Clone)]
pub struct DispatchedEvent {
    pub url: Url,
    pub attempt: u32,
    pub engine: EngineKind,
    pub proxy: Option<String>,
    pub difficulty: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct FetchedEvent {
    pub url: Url,
    pub engine: EngineKind,
    /// `None` when the fetch failed before a response arrived.
    pub status: Option<u16>,
    pub latency: Duration,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct BlockedEvent {
    pub domain: String,
    pub kind: BlockKind,
    pub confidence: f32,
    pub indicators: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct EvasionEvent {
    pub domain: String,
    pub tactic: Option<Tactic>,
    pub success: bool,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ValidatedEvent {
    pub domain: String,
    pub valid: bool,
    pub confidence: f64,
    pub errors: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RetryEvent {
    pub domain: String,
    pub attempt: u32,
    pub reason: String,
    pub scheduled_after: Duration,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct FinishedEvent {
    pub domain: String,
    pub status: TaskStatus,
    pub retry_count: u32,
    pub elapsed: Duration,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    Dispatched(DispatchedEvent),
    Fetched(FetchedEvent),
    Blocked(BlockedEvent),
    Evasion(EvasionEvent),
    Validated(ValidatedEvent),
    Retry(RetryEvent),
    Finished(FinishedEvent),
}

/// Trait implemented by event handlers.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &WorkflowEvent);
}

/// Broadcasts events to registered handlers.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self { handlers: Vec::new() }
    }

    pub fn register_handler(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn dispatch(&self, event: WorkflowEvent) {
        for handler in &self.handlers {
            handler.handle(&event);
        }
    }
}

/// Logs events using the `log` crate.
#[derive(Debug)]
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn handle(&self, event: &WorkflowEvent) {
        match event {
            WorkflowEvent::Dispatched(dispatched) => {
                log::debug!(
                    "attempt {} -> {} via {} (proxy={}, difficulty={:.2})",
                    dispatched.attempt,
                    dispatched.url,
                    dispatched.engine,
                    dispatched.proxy.as_deref().unwrap_or("none"),
                    dispatched.difficulty
                );
            }
            WorkflowEvent::Fetched(fetched) => match &fetched.error {
                None => log::debug!(
                    "<- {} {} -> {} ({:.2}s)",
                    fetched.engine,
                    fetched.url,
                    fetched.status.unwrap_or(0),
                    fetched.latency.as_secs_f64()
                ),
                Some(error) => log::error!("fetch {} via {} failed: {error}", fetched.url, fetched.engine),
            },
            WorkflowEvent::Blocked(blocked) => {
                log::warn!(
                    "block detected on {}: {} ({:.2})",
                    blocked.domain,
                    blocked.kind,
                    blocked.confidence
                );
            }
            WorkflowEvent::Evasion(evasion) => {
                log::info!(
                    "evasion {} on {} success={}: {}",
                    evasion.tactic.map(Tactic::as_str).unwrap_or("none"),
                    evasion.domain,
                    evasion.success,
                    evasion.message
                );
            }
            WorkflowEvent::Validated(validated) => {
                log::info!(
                    "validated {} valid={} confidence={:.2} errors={}",
                    validated.domain,
                    validated.valid,
                    validated.confidence,
                    validated.errors
                );
            }
            WorkflowEvent::Retry(retry) => {
                log::info!(
                    "retry {} attempt {} after {:.2}s: {}",
                    retry.domain,
                    retry.attempt,
                    retry.scheduled_after.as_secs_f64(),
                    retry.reason
                );
            }
            WorkflowEvent::Finished(finished) => match finished.status {
                TaskStatus::Failed => log::warn!(
                    "workflow {} failed after {} retries: {}",
                    finished.domain,
                    finished.retry_count,
                    finished.error.as_deref().unwrap_or("unknown error")
                ),
                status => log::info!(
                    "workflow {} finished {:?} in {:.2}s ({} retries)",
                    finished.domain,
                    status,
                    finished.elapsed.as_secs_f64(),
                    finished.retry_count
                ),
            },
        }
    }
}

/// Metrics handler that feeds the metrics collector.
#[derive(Clone, Debug)]
pub struct MetricsHandler {
    metrics: MetricsCollector,
}

impl MetricsHandler {
    pub fn new(metrics: MetricsCollector) -> Self {
        Self { metrics }
    }
}

impl EventHandler for MetricsHandler {
    fn handle(&self, event: &WorkflowEvent) {
        match event {
            WorkflowEvent::Fetched(fetched) => {
                self.metrics.record_fetch(
                    fetched.url.host_str().unwrap_or(""),
                    fetched.status,
                    fetched.latency,
                );
            }
            WorkflowEvent::Blocked(blocked) => {
                self.metrics.record_block(&blocked.domain, blocked.kind);
            }
            WorkflowEvent::Finished(finished) => {
                self.metrics
                    .record_workflow(&finished.domain, finished.status, finished.retry_count);
            }
            _ => {}
        }
    }
}
