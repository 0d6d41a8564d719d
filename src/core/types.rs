//! Strategy and workflow result types shared across the engine.

use http::HeaderMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use url::Url;

use super::value::FieldMap;
use crate::modules::proxy::ProxyRecord;
use crate::validation::ValidationResult;

/// Fetch engine family selected for an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// Plain HTTP client, no script execution.
    Lightweight,
    /// Headless browser capable of running page scripts.
    FullRender,
}

impl EngineKind {
    /// The other engine; used by switch-engine directives.
    pub fn toggled(self) -> Self {
        match self {
            EngineKind::Lightweight => EngineKind::FullRender,
            EngineKind::FullRender => EngineKind::Lightweight,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EngineKind::Lightweight => "lightweight",
            EngineKind::FullRender => "full_render",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How hard the extraction service should hold to the page content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMode {
    #[default]
    Normal,
    /// Only values literally present in the content; nulls otherwise.
    Strict,
}

/// Execution plan for one fetch attempt.
#[derive(Debug, Clone)]
pub struct Strategy {
    pub engine: EngineKind,
    pub proxy: Option<ProxyRecord>,
    pub headers: HeaderMap,
    pub wait_time: Duration,
    pub javascript_enabled: bool,
    pub screenshot: bool,
    /// Estimated difficulty in `[0, 1]`.
    pub difficulty: f64,
    pub timeout: Duration,
}

impl Strategy {
    /// Bare lightweight strategy with no proxy and no custom headers.
    pub fn plain(timeout: Duration) -> Self {
        Self {
            engine: EngineKind::Lightweight,
            proxy: None,
            headers: HeaderMap::new(),
            wait_time: Duration::ZERO,
            javascript_enabled: false,
            screenshot: false,
            difficulty: 0.0,
            timeout,
        }
    }

    /// Force an engine, keeping the script flag consistent with it.
    pub fn with_engine(mut self, engine: EngineKind) -> Self {
        self.engine = engine;
        if engine == EngineKind::FullRender {
            self.javascript_enabled = true;
        }
        self
    }
}

/// Terminal (or pending) state of a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Completed,
    CompletedWithWarnings,
    Failed,
}

impl TaskStatus {
    pub fn is_success(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::CompletedWithWarnings)
    }
}

/// Loop bookkeeping for one workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkflowState {
    pub attempt: u32,
    pub retry_count: u32,
    pub status: TaskStatus,
}

impl WorkflowState {
    pub fn new() -> Self {
        Self {
            attempt: 0,
            retry_count: 0,
            status: TaskStatus::Pending,
        }
    }
}

impl Default for WorkflowState {
    fn default() -> Self {
        Self::new()
    }
}

/// Full outcome of a workflow, including diagnostics.
#[derive(Debug, Clone)]
pub struct ScrapeResult {
    pub locator: Url,
    pub status: TaskStatus,
    pub data: Option<FieldMap>,
    pub body: Option<String>,
    pub engine: Option<EngineKind>,
    pub validation: Option<ValidationResult>,
    pub error: Option<String>,
    pub warnings: Vec<String>,
    pub retry_count: u32,
    pub execution_time: Duration,
}

impl ScrapeResult {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Caller-facing projection.
    pub fn to_response(&self) -> ScrapeResponse {
        if self.is_success() {
            ScrapeResponse {
                success: true,
                data: self.data.clone(),
                execution_time: self.execution_time.as_secs_f64(),
                retry_count: self.retry_count,
                error: None,
                warnings: self.warnings.clone(),
            }
        } else {
            ScrapeResponse {
                success: false,
                data: None,
                execution_time: self.execution_time.as_secs_f64(),
                retry_count: self.retry_count,
                error: Some(
                    self.error
                        .clone()
                        .unwrap_or_else(|| "unknown error".to_string()),
                ),
                warnings: self.warnings.clone(),
            }
        }
    }
}

/// Serializable response returned to API callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<FieldMap>,
    pub execution_time: f64,
    pub retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_engine_enables_scripts() {
        let strategy = Strategy::plain(Duration::from_secs(30)).with_engine(EngineKind::FullRender);
        assert!(strategy.javascript_enabled);
        assert_eq!(EngineKind::FullRender.toggled(), EngineKind::Lightweight);
    }

    #[test]
    fn failed_results_serialize_error_only() {
        let result = ScrapeResult {
            locator: Url::parse("https://example.com").unwrap(),
            status: TaskStatus::Failed,
            data: None,
            body: None,
            engine: None,
            validation: None,
            error: Some("fetch failed: timeout".into()),
            warnings: Vec::new(),
            retry_count: 3,
            execution_time: Duration::from_millis(1500),
        };
        let json = serde_json::to_value(result.to_response()).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "fetch failed: timeout");
        assert_eq!(json["retry_count"], 3);
        assert!(json.get("data").is_none());
    }
}
