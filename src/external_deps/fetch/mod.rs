//! Page fetch engines and site probing.
//!
//! The orchestrator never talks to a transport directly: it asks a
//! [`FetchEngine`] for the page and a [`SiteProber`] for the cheap pre-flight
//! request the dispatcher analyzes. [`ReqwestFetchEngine`] and
//! [`ReqwestSiteProber`] cover the lightweight HTTP path; the full-render
//! engine is supplied by the caller.

mod reqwest_engine;

pub use reqwest_engine::{ReqwestFetchEngine, ReqwestProxyHealthChecker, ReqwestSiteProber};

use async_trait::async_trait;
use http::HeaderMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use url::Url;

use crate::core::{EngineKind, Strategy};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FetchError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid proxy: {0}")]
    InvalidProxy(String),
    #[error("failed to read body: {0}")]
    Body(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    Completed,
    Failed,
}

/// What a fetch engine reports back. Transport failures are data, not errors.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub status: FetchStatus,
    pub http_status: Option<u16>,
    pub headers: HeaderMap,
    pub body: Option<String>,
    pub error: Option<String>,
    pub elapsed: Duration,
}

impl FetchOutcome {
    pub fn completed(http_status: u16, headers: HeaderMap, body: String, elapsed: Duration) -> Self {
        Self {
            status: FetchStatus::Completed,
            http_status: Some(http_status),
            headers,
            body: Some(body),
            error: None,
            elapsed,
        }
    }

    pub fn failed(error: impl fmt::Display, elapsed: Duration) -> Self {
        Self {
            status: FetchStatus::Failed,
            http_status: None,
            headers: HeaderMap::new(),
            body: None,
            error: Some(error.to_string()),
            elapsed,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == FetchStatus::Completed
    }

    /// Status code, `0` when the fetch never produced a response.
    pub fn status_code(&self) -> u16 {
        self.http_status.unwrap_or(0)
    }

    pub fn body_text(&self) -> &str {
        self.body.as_deref().unwrap_or_default()
    }
}

/// Executes a strategy against a locator.
#[async_trait]
pub trait FetchEngine: Send + Sync {
    fn name(&self) -> &'static str;

    /// Must honor the strategy's proxy, headers and timeout.
    async fn fetch(&self, locator: &Url, strategy: &Strategy) -> FetchOutcome;

    /// Release pooled resources.
    async fn shutdown(&self) {}
}

/// Lightweight and full-render engines, selected by [`EngineKind`].
#[derive(Clone)]
pub struct EngineSet {
    lightweight: Arc<dyn FetchEngine>,
    full_render: Arc<dyn FetchEngine>,
}

impl EngineSet {
    pub fn new(lightweight: Arc<dyn FetchEngine>, full_render: Arc<dyn FetchEngine>) -> Self {
        Self {
            lightweight,
            full_render,
        }
    }

    pub fn get(&self, kind: EngineKind) -> &Arc<dyn FetchEngine> {
        match kind {
            EngineKind::Lightweight => &self.lightweight,
            EngineKind::FullRender => &self.full_render,
        }
    }

    /// Run `strategy` on the engine it names, bounded by its timeout plus any
    /// render wait.
    pub async fn fetch(&self, locator: &Url, strategy: &Strategy) -> FetchOutcome {
        fetch_bounded(self.get(strategy.engine).as_ref(), locator, strategy).await
    }

    pub async fn shutdown(&self) {
        self.lightweight.shutdown().await;
        if !Arc::ptr_eq(&self.lightweight, &self.full_render) {
            self.full_render.shutdown().await;
        }
    }
}

impl fmt::Debug for EngineSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineSet")
            .field("lightweight", &self.lightweight.name())
            .field("full_render", &self.full_render.name())
            .finish()
    }
}

/// Run a fetch under a hard deadline; expiry becomes a failed outcome.
pub async fn fetch_bounded(engine: &dyn FetchEngine, locator: &Url, strategy: &Strategy) -> FetchOutcome {
    let limit = strategy.timeout + strategy.wait_time;
    let started = Instant::now();
    match tokio::time::timeout(limit, engine.fetch(locator, strategy)).await {
        Ok(outcome) => outcome,
        Err(_) => {
            log::error!("{} fetch of {locator} timed out after {limit:?}", engine.name());
            FetchOutcome::failed(FetchError::Timeout(limit), started.elapsed())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeMethod {
    /// Headers only.
    Head,
    Get,
}

#[derive(Debug, Clone)]
pub struct ProbeResponse {
    pub status: u16,
    pub headers: HeaderMap,
    /// Empty for `HEAD` probes.
    pub body: String,
}

/// Pre-flight request used by the dispatcher.
#[async_trait]
pub trait SiteProber: Send + Sync {
    async fn probe(
        &self,
        locator: &Url,
        method: ProbeMethod,
        timeout: Duration,
    ) -> Result<ProbeResponse, FetchError>;
}
