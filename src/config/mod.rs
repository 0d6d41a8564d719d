//! Settings and configuration module
//!
//! Provides unified configuration with:
//! - Serde defaults for every section
//! - JSON loading
//! - Feature flags for metrics and event logging

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::blocking::EvasionConfig;
use crate::dispatch::DispatchConfig;
use crate::modules::proxy::{ProxyPoolConfig, ProxyTier};
use crate::validation::{RetryPolicy, ValidationConfig};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Engine-wide configuration. Durations are expressed in (fractional)
/// seconds when serialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub max_retries: u32,
    /// Valid results at or above this confidence end the workflow.
    pub acceptance_confidence: f64,
    #[serde(with = "duration_secs")]
    pub extraction_timeout: Duration,
    /// Bound on tactic advisory calls.
    #[serde(with = "duration_secs")]
    pub advisory_timeout: Duration,
    pub dispatch: DispatchConfig,
    pub evasion: EvasionConfig,
    pub validation: ValidationConfig,
    pub retry: RetryPolicy,
    pub proxy: ProxyPoolConfig,
    /// Proxy URLs loaded into the pool at build time.
    pub proxies: Vec<String>,
    pub proxy_tier: ProxyTier,
    pub enable_metrics: bool,
    pub enable_event_logging: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            acceptance_confidence: 0.6,
            extraction_timeout: Duration::from_secs(30),
            advisory_timeout: Duration::from_secs(30),
            dispatch: DispatchConfig::default(),
            evasion: EvasionConfig::default(),
            validation: ValidationConfig::default(),
            retry: RetryPolicy::default(),
            proxy: ProxyPoolConfig::default(),
            proxies: Vec::new(),
            proxy_tier: ProxyTier::Datacenter,
            enable_metrics: true,
            enable_event_logging: true,
        }
    }
}

impl OrchestratorConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let unit = 0.0..=1.0;
        if !unit.contains(&self.acceptance_confidence) {
            return Err(ConfigError::Invalid(format!(
                "acceptance_confidence must be within [0, 1], got {}",
                self.acceptance_confidence
            )));
        }
        if !unit.contains(&self.retry.accept_confidence) || !unit.contains(&self.retry.low_confidence) {
            return Err(ConfigError::Invalid("retry confidence thresholds must be within [0, 1]".into()));
        }
        if !unit.contains(&self.proxy.max_failure_rate) {
            return Err(ConfigError::Invalid(format!(
                "proxy.max_failure_rate must be within [0, 1], got {}",
                self.proxy.max_failure_rate
            )));
        }
        if self.proxy.failure_threshold == 0 {
            return Err(ConfigError::Invalid("proxy.failure_threshold must be at least 1".into()));
        }
        Ok(())
    }
}

/// `Duration` as a number of seconds.
pub mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.dispatch.head_timeout, Duration::from_secs(10));
        assert_eq!(config.dispatch.get_timeout, Duration::from_secs(15));
        assert_eq!(config.evasion.default_wait, Duration::from_secs(60));
        assert_eq!(config.evasion.render_wait, Duration::from_secs(5));
        assert_eq!(config.proxy.failure_threshold, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn loads_partial_json() {
        let config = OrchestratorConfig::from_json_str(
            r#"{
                "max_retries": 5,
                "proxies": ["http://10.0.0.1:8000"],
                "proxy_tier": "residential",
                "evasion": {"default_wait": 1.5},
                "dispatch": {"prefer_head_probe": false}
            }"#,
        )
        .unwrap();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.proxy_tier, ProxyTier::Residential);
        assert_eq!(config.evasion.default_wait, Duration::from_millis(1500));
        assert_eq!(config.evasion.render_wait, Duration::from_secs(5));
        assert!(!config.dispatch.prefer_head_probe);
        assert!(config.enable_metrics);
    }

    #[test]
    fn rejects_out_of_range_thresholds() {
        let err = OrchestratorConfig::from_json_str(r#"{"acceptance_confidence": 1.4}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(matches!(
            OrchestratorConfig::from_json_str("{not json"),
            Err(ConfigError::Parse(_))
        ));
    }
}
