//! Evasion controller.
//!
//! Applies exactly one tactic per call and reports whether the block was
//! escaped. Every network step goes through the [`EngineSet`], so each one is
//! bounded by the strategy timeout.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::blocking::detectors::{BlockClassifier, BlockKind, BlockResponse};
use crate::blocking::tactics::{SuggestedTactic, Tactic, fallback_tactics};
use crate::config::duration_secs;
use crate::core::{EngineKind, Strategy};
use crate::dispatch::user_agents::with_rotated_user_agent;
use crate::external_deps::fetch::{EngineSet, FetchOutcome};
use crate::modules::proxy::{ProxyPoolManager, ProxyRecord, ProxyTier};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvasionConfig {
    /// Cooldown for wait tactics that carry no hint of their own.
    #[serde(with = "duration_secs")]
    pub default_wait: Duration,
    /// Challenge settle time for the full-render tactic.
    #[serde(with = "duration_secs")]
    pub render_wait: Duration,
    #[serde(with = "duration_secs")]
    pub fetch_timeout: Duration,
}

impl Default for EvasionConfig {
    fn default() -> Self {
        Self {
            default_wait: Duration::from_secs(60),
            render_wait: Duration::from_secs(5),
            fetch_timeout: Duration::from_secs(30),
        }
    }
}

/// Outcome of one evasion attempt.
#[derive(Debug, Clone)]
pub struct EvasionResult {
    pub success: bool,
    pub tactic: Option<Tactic>,
    pub message: String,
    /// Page recovered by the tactic, when it fetched one.
    pub body: Option<String>,
    pub http_status: Option<u16>,
    /// Engine that produced `body`.
    pub engine: Option<EngineKind>,
    /// Proxy the tactic switched to.
    pub proxy: Option<ProxyRecord>,
}

impl EvasionResult {
    fn failure(tactic: Option<Tactic>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            tactic,
            message: message.into(),
            body: None,
            http_status: None,
            engine: None,
            proxy: None,
        }
    }

    fn fetched(tactic: Tactic, success: bool, message: String, outcome: FetchOutcome, engine: EngineKind) -> Self {
        Self {
            success,
            tactic: Some(tactic),
            message,
            http_status: outcome.http_status,
            body: outcome.body,
            engine: Some(engine),
            proxy: None,
        }
    }
}

/// Single-step block evasion.
#[derive(Debug, Clone)]
pub struct EvasionController {
    proxy_pool: Arc<ProxyPoolManager>,
    engines: EngineSet,
    classifier: BlockClassifier,
    config: EvasionConfig,
}

impl EvasionController {
    pub fn new(proxy_pool: Arc<ProxyPoolManager>, engines: EngineSet, classifier: BlockClassifier) -> Self {
        Self {
            proxy_pool,
            engines,
            classifier,
            config: EvasionConfig::default(),
        }
    }

    pub fn with_config(mut self, config: EvasionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &EvasionConfig {
        &self.config
    }

    /// Apply `tactic`, or the first fallback tactic for `kind` when none is
    /// given.
    pub async fn evade(
        &self,
        locator: &Url,
        kind: BlockKind,
        strategy: &Strategy,
        tactic: Option<&SuggestedTactic>,
    ) -> EvasionResult {
        let fallback;
        let suggestion = match tactic {
            Some(suggestion) => suggestion,
            None => {
                fallback = fallback_tactics(kind);
                match fallback.first() {
                    Some(first) => first,
                    None => {
                        log::warn!("no evasion tactics for {kind}");
                        return EvasionResult::failure(None, format!("No tactics available for {kind}"));
                    }
                }
            }
        };

        log::info!(
            "evading {kind} on {locator} with {} ({})",
            suggestion.tactic,
            suggestion.reasoning
        );
        let result = match suggestion.tactic {
            Tactic::RotateProxy => self.rotate_proxy(locator, kind, strategy).await,
            Tactic::Wait => self.wait_and_retry(locator, suggestion.wait).await,
            Tactic::FullRender => self.full_render(locator, strategy).await,
            Tactic::ChangeHeaders => self.change_headers(locator, strategy).await,
            Tactic::SolveCaptcha => {
                EvasionResult::failure(Some(Tactic::SolveCaptcha), "CAPTCHA solving not yet implemented")
            }
        };
        if result.success {
            log::info!("evasion succeeded: {}", result.message);
        } else {
            log::warn!("evasion failed: {}", result.message);
        }
        result
    }

    async fn rotate_proxy(&self, locator: &Url, kind: BlockKind, strategy: &Strategy) -> EvasionResult {
        let Some(proxy) = self.proxy_pool.get_proxy(ProxyTier::Residential) else {
            return EvasionResult::failure(Some(Tactic::RotateProxy), "No proxies available");
        };
        log::info!("rotating to proxy {}", proxy.endpoint());

        let mut attempt = Strategy::plain(self.config.fetch_timeout);
        attempt.headers = strategy.headers.clone();
        attempt.proxy = Some(proxy.clone());
        let outcome = self.engines.fetch(locator, &attempt).await;

        if !outcome.is_completed() {
            let cause = outcome.error.clone().unwrap_or_default();
            self.proxy_pool.report_failure(&proxy, &cause);
            let mut result = EvasionResult::failure(Some(Tactic::RotateProxy), format!("Proxy rotation failed: {cause}"));
            result.proxy = Some(proxy);
            return result;
        }

        let verdict = self.classifier.classify(&BlockResponse {
            status: outcome.status_code(),
            headers: &outcome.headers,
            body: outcome.body_text(),
        });
        let mut result = if verdict.is_blocked {
            self.proxy_pool
                .report_failure(&proxy, &format!("still blocked: {}", verdict.kind));
            EvasionResult::failure(
                Some(Tactic::RotateProxy),
                format!("Still blocked after proxy rotation: {}", verdict.kind),
            )
        } else {
            self.proxy_pool.report_success(&proxy);
            EvasionResult::fetched(
                Tactic::RotateProxy,
                true,
                "Successfully evaded with new proxy".to_string(),
                outcome,
                EngineKind::Lightweight,
            )
        };
        result.proxy = Some(proxy);
        result
    }

    async fn wait_and_retry(&self, locator: &Url, hint: Option<Duration>) -> EvasionResult {
        let wait = hint.unwrap_or(self.config.default_wait);
        log::info!("waiting {}s before retrying {locator}", wait.as_secs());
        tokio::time::sleep(wait).await;

        let outcome = self
            .engines
            .fetch(locator, &Strategy::plain(self.config.fetch_timeout))
            .await;
        self.status_result(
            Tactic::Wait,
            outcome,
            EngineKind::Lightweight,
            |status| format!("Retry after {}s - Status: {status}", wait.as_secs()),
            "Retry failed",
        )
    }

    async fn full_render(&self, locator: &Url, strategy: &Strategy) -> EvasionResult {
        let mut attempt = strategy.clone().with_engine(EngineKind::FullRender);
        attempt.wait_time = self.config.render_wait;
        attempt.timeout = self.config.fetch_timeout;

        let outcome = self.engines.fetch(locator, &attempt).await;
        if outcome.is_completed() {
            EvasionResult::fetched(
                Tactic::FullRender,
                true,
                "Successfully accessed with full-render engine".to_string(),
                outcome,
                EngineKind::FullRender,
            )
        } else {
            EvasionResult::failure(
                Some(Tactic::FullRender),
                format!("Full-render attempt failed: {}", outcome.error.unwrap_or_default()),
            )
        }
    }

    async fn change_headers(&self, locator: &Url, strategy: &Strategy) -> EvasionResult {
        let mut attempt = Strategy::plain(self.config.fetch_timeout);
        attempt.headers = with_rotated_user_agent(&strategy.headers);

        let outcome = self.engines.fetch(locator, &attempt).await;
        self.status_result(
            Tactic::ChangeHeaders,
            outcome,
            EngineKind::Lightweight,
            |status| format!("Headers changed - Status: {status}"),
            "Header change failed",
        )
    }

    /// Success iff the fetch completed with `200`.
    fn status_result(
        &self,
        tactic: Tactic,
        outcome: FetchOutcome,
        engine: EngineKind,
        describe: impl FnOnce(u16) -> String,
        failure_prefix: &str,
    ) -> EvasionResult {
        if !outcome.is_completed() {
            return EvasionResult::failure(
                Some(tactic),
                format!("{failure_prefix}: {}", outcome.error.unwrap_or_default()),
            );
        }
        let status = outcome.status_code();
        EvasionResult::fetched(tactic, status == 200, describe(status), outcome, engine)
    }
}
