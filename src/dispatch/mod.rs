//! Strategy dispatch.
//!
//! Probes a target once, turns the probe into [`SiteSignals`] and derives the
//! [`Strategy`] for the next attempt: engine, proxy tier, headers, render wait
//! and difficulty.

pub mod signals;
pub mod user_agents;

pub use signals::{Framework, SiteSignals};

use http::header::REFERER;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::config::duration_secs;
use crate::core::{EngineKind, Strategy, TargetRequest};
use crate::external_deps::fetch::{ProbeMethod, SiteProber};
use crate::modules::proxy::{ProxyPoolManager, ProxyRecord, ProxyTier};

/// Probe and allocation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    #[serde(with = "duration_secs")]
    pub head_timeout: Duration,
    #[serde(with = "duration_secs")]
    pub get_timeout: Duration,
    /// Start with a `HEAD` probe. A successful `HEAD` carries no body, so the
    /// target is then treated as script-driven.
    pub prefer_head_probe: bool,
    pub proxy_allocation_enabled: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            head_timeout: Duration::from_secs(10),
            get_timeout: Duration::from_secs(15),
            prefer_head_probe: true,
            proxy_allocation_enabled: true,
        }
    }
}

/// Picks an execution strategy per target.
#[derive(Clone)]
pub struct StrategyDispatcher {
    prober: Arc<dyn SiteProber>,
    proxy_pool: Option<Arc<ProxyPoolManager>>,
    config: DispatchConfig,
}

impl StrategyDispatcher {
    pub fn new(prober: Arc<dyn SiteProber>) -> Self {
        Self {
            prober,
            proxy_pool: None,
            config: DispatchConfig::default(),
        }
    }

    pub fn with_proxy_pool(mut self, pool: Arc<ProxyPoolManager>) -> Self {
        self.proxy_pool = Some(pool);
        self
    }

    pub fn with_config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Probe the target. Never fails: an unreachable target yields
    /// [`SiteSignals::unreachable`].
    pub async fn analyze(&self, locator: &Url) -> SiteSignals {
        let head = if self.config.prefer_head_probe {
            match self
                .prober
                .probe(locator, ProbeMethod::Head, self.config.head_timeout)
                .await
            {
                Ok(response) => Some(response),
                Err(err) => {
                    log::debug!("HEAD probe of {locator} failed ({err}); retrying with GET");
                    None
                }
            }
        } else {
            None
        };
        let probe = match head {
            Some(response) => Ok(response),
            None => {
                self.prober
                    .probe(locator, ProbeMethod::Get, self.config.get_timeout)
                    .await
            }
        };

        match probe {
            Ok(response) => {
                let signals = SiteSignals::from_probe(response.status, response.headers, &response.body);
                log::debug!(
                    "analyzed {locator}: status={} js={} spa={} anti_bot={} frameworks={:?}",
                    signals.status,
                    signals.requires_javascript,
                    signals.is_spa,
                    signals.has_anti_bot,
                    signals.frameworks
                );
                signals
            }
            Err(err) => {
                log::error!("failed to analyze {locator}: {err}");
                SiteSignals::unreachable()
            }
        }
    }

    pub fn select_engine(&self, signals: &SiteSignals) -> EngineKind {
        if signals.is_spa || signals.requires_javascript || signals.has_anti_bot {
            EngineKind::FullRender
        } else {
            EngineKind::Lightweight
        }
    }

    /// Difficulty in `[0, 1]`.
    pub fn estimate_difficulty(&self, signals: &SiteSignals) -> f64 {
        let mut difficulty: f64 = 0.0;
        if signals.requires_javascript {
            difficulty += 0.2;
        }
        if signals.is_spa {
            difficulty += 0.3;
        }
        if signals.has_anti_bot {
            difficulty += 0.4;
        }
        if signals.status != 200 {
            difficulty += 0.1;
        }
        difficulty.min(1.0)
    }

    /// Residential proxy for protected targets, datacenter otherwise. `None`
    /// when allocation is off or the tier has nothing healthy.
    pub fn allocate_proxy(&self, signals: &SiteSignals) -> Option<ProxyRecord> {
        if !self.config.proxy_allocation_enabled {
            return None;
        }
        let pool = self.proxy_pool.as_ref()?;
        let tier = if signals.has_anti_bot {
            ProxyTier::Residential
        } else {
            ProxyTier::Datacenter
        };
        let proxy = pool.get_proxy(tier);
        if proxy.is_none() && !pool.is_empty() {
            log::warn!("no healthy {tier} proxy available; continuing without proxy");
        }
        proxy
    }

    /// Full strategy for `request`.
    pub async fn dispatch(&self, request: &TargetRequest) -> Strategy {
        let signals = self.analyze(request.locator()).await;
        self.strategy_for(request, &signals)
    }

    pub fn strategy_for(&self, request: &TargetRequest, signals: &SiteSignals) -> Strategy {
        let engine = self.select_engine(signals);
        let strategy = Strategy {
            engine,
            proxy: self.allocate_proxy(signals),
            headers: user_agents::browser_headers(signals.headers.get(REFERER)),
            wait_time: Duration::from_secs_f64(signals.estimated_load_time),
            javascript_enabled: signals.requires_javascript || signals.is_spa,
            screenshot: request.options().screenshot,
            difficulty: self.estimate_difficulty(signals),
            timeout: request.options().timeout(),
        };
        log::info!(
            "strategy for {}: engine={} proxy={} difficulty={:.2}",
            request.domain(),
            strategy.engine,
            strategy
                .proxy
                .as_ref()
                .map(ProxyRecord::endpoint)
                .unwrap_or_else(|| "none".to_string()),
            strategy.difficulty
        );
        strategy
    }
}

impl fmt::Debug for StrategyDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyDispatcher")
            .field("proxy_pool", &self.proxy_pool.is_some())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{FieldDefinition, FieldType, Schema};
    use crate::external_deps::fetch::{FetchError, ProbeResponse};
    use async_trait::async_trait;
    use http::header::USER_AGENT;
    use http::{HeaderMap, HeaderValue};
    use std::sync::Mutex;

    struct StubProber {
        head: Result<ProbeResponse, FetchError>,
        get: Result<ProbeResponse, FetchError>,
        calls: Mutex<Vec<ProbeMethod>>,
    }

    impl StubProber {
        fn new(head: Result<ProbeResponse, FetchError>, get: Result<ProbeResponse, FetchError>) -> Self {
            Self {
                head,
                get,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SiteProber for StubProber {
        async fn probe(
            &self,
            _locator: &Url,
            method: ProbeMethod,
            _timeout: Duration,
        ) -> Result<ProbeResponse, FetchError> {
            self.calls.lock().unwrap().push(method);
            match method {
                ProbeMethod::Head => self.head.clone(),
                ProbeMethod::Get => self.get.clone(),
            }
        }
    }

    fn page(status: u16, body: &str) -> ProbeResponse {
        ProbeResponse {
            status,
            headers: HeaderMap::new(),
            body: body.to_string(),
        }
    }

    fn request() -> TargetRequest {
        let mut schema = Schema::new();
        schema.insert("title".into(), FieldDefinition::new(FieldType::String, "title"));
        TargetRequest::new("https://shop.example/item", schema).unwrap()
    }

    fn locator() -> Url {
        Url::parse("https://shop.example/item").unwrap()
    }

    #[tokio::test]
    async fn falls_back_to_get_when_head_fails() {
        let prober = Arc::new(StubProber::new(
            Err(FetchError::Transport("reset".into())),
            Ok(page(200, "<html><p>static</p></html>")),
        ));
        let dispatcher = StrategyDispatcher::new(prober.clone());
        let signals = dispatcher.analyze(&locator()).await;
        assert_eq!(signals.status, 200);
        assert!(!signals.requires_javascript);
        assert_eq!(*prober.calls.lock().unwrap(), vec![ProbeMethod::Head, ProbeMethod::Get]);
    }

    #[tokio::test]
    async fn unreachable_target_gets_pessimistic_signals() {
        let prober = Arc::new(StubProber::new(
            Err(FetchError::Transport("refused".into())),
            Err(FetchError::Timeout(Duration::from_secs(15))),
        ));
        let dispatcher = StrategyDispatcher::new(prober);
        let signals = dispatcher.analyze(&locator()).await;
        assert_eq!(signals.status, 0);
        assert!(signals.requires_javascript && signals.is_spa);
        assert!(!signals.has_anti_bot);
        assert_eq!(dispatcher.select_engine(&signals), EngineKind::FullRender);
        assert!((dispatcher.estimate_difficulty(&signals) - 0.6).abs() < 1e-9);
    }

    #[tokio::test]
    async fn static_page_dispatches_lightweight() {
        let prober = Arc::new(StubProber::new(
            Err(FetchError::Transport("unused".into())),
            Ok(page(200, "<html><body><p>catalog</p></body></html>")),
        ));
        let config = DispatchConfig {
            prefer_head_probe: false,
            ..DispatchConfig::default()
        };
        let dispatcher = StrategyDispatcher::new(prober.clone()).with_config(config);
        let strategy = dispatcher.dispatch(&request()).await;
        assert_eq!(strategy.engine, EngineKind::Lightweight);
        assert!(!strategy.javascript_enabled);
        assert_eq!(strategy.difficulty, 0.0);
        assert_eq!(strategy.wait_time, Duration::from_secs(1));
        assert_eq!(strategy.timeout, Duration::from_secs(30));
        assert!(strategy.proxy.is_none());
        assert!(strategy.headers.contains_key(USER_AGENT));
        assert_eq!(*prober.calls.lock().unwrap(), vec![ProbeMethod::Get]);
    }

    #[test]
    fn allocates_tier_by_anti_bot_signal() {
        let pool = Arc::new(ProxyPoolManager::default());
        pool.load_list("http://10.0.0.1:8000", ProxyTier::Datacenter);
        pool.load_list("http://10.0.0.2:8000", ProxyTier::Residential);
        let dispatcher = StrategyDispatcher::new(Arc::new(StubProber::new(
            Ok(page(200, "")),
            Ok(page(200, "")),
        )))
        .with_proxy_pool(pool);

        let mut headers = HeaderMap::new();
        headers.insert("cf-ray", HeaderValue::from_static("8a1b2c"));
        let protected = SiteSignals::from_probe(403, headers, "");
        let open = SiteSignals::from_probe(200, HeaderMap::new(), "<p>plain</p>");

        assert_eq!(dispatcher.allocate_proxy(&protected).unwrap().host, "10.0.0.2");
        assert_eq!(dispatcher.allocate_proxy(&open).unwrap().host, "10.0.0.1");
        assert!((dispatcher.estimate_difficulty(&protected) - 0.7).abs() < 1e-9);
    }
}
