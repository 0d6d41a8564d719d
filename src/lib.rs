//! # scrapex-rs
//!
//! Adaptive retrieval orchestration: fetch a page, notice when a site is
//! pushing back, react, extract structured fields and keep retrying with a
//! different plan until the result is trustworthy or the budget runs out.
//!
//! ## Features
//!
//! - Strategy dispatch from a cheap pre-flight probe (engine, proxy tier, headers)
//! - Tiered proxy pool with health tracking and round-robin rotation
//! - Rule-based block classification with optional advisory tactic suggestions
//! - Single-step evasion: proxy rotation, backoff, full render, header changes
//! - Schema, domain-rule and consistency validation driving retry directives
//! - Workflow events feeding logging and per-domain metrics
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use scrapex_rs::{FieldDefinition, FieldType, Orchestrator, Schema, SelectorExtractor, TargetRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let extractor = SelectorExtractor::new([("title", "h1"), ("price", ".price")])?;
//!     let orchestrator = Orchestrator::builder()
//!         .with_extractor(Arc::new(extractor))
//!         .with_proxies(["http://10.0.0.1:8000"])
//!         .build()?;
//!
//!     let mut schema = Schema::new();
//!     schema.insert("title".into(), FieldDefinition::new(FieldType::String, "product name").required());
//!     schema.insert("price".into(), FieldDefinition::new(FieldType::Float, "price in USD"));
//!
//!     let request = TargetRequest::new("https://example.com/product/42", schema)?;
//!     let result = orchestrator.execute(&request).await;
//!     println!("{}", serde_json::to_string_pretty(&result.to_response())?);
//!     orchestrator.shutdown().await;
//!     Ok(())
//! }
//! ```

mod orchestrator;

pub mod blocking;
pub mod config;
pub mod core;
pub mod dispatch;
pub mod external_deps;
pub mod modules;
pub mod validation;

pub use crate::orchestrator::{
    Orchestrator,
    OrchestratorBuilder,
    OrchestratorError,
    OrchestratorResult,
    WorkflowError,
};

pub use crate::blocking::{
    BlockAnalysis,
    BlockClassifier,
    BlockKind,
    BlockResponse,
    EvasionConfig,
    EvasionController,
    EvasionResult,
    SuggestedTactic,
    Tactic,
};

pub use crate::config::{ConfigError, OrchestratorConfig};

pub use crate::core::{
    EngineKind,
    ExtractionMode,
    FieldDefinition,
    FieldMap,
    FieldType,
    FieldValue,
    RequestError,
    RequestOptions,
    Schema,
    ScrapeResponse,
    ScrapeResult,
    Strategy,
    TargetRequest,
    TaskStatus,
};

pub use crate::dispatch::{DispatchConfig, Framework, SiteSignals, StrategyDispatcher};

pub use crate::external_deps::{
    AdvisoryError,
    ConsistencyAdvisor,
    EngineSet,
    ExtractionService,
    FetchEngine,
    FetchError,
    FetchOutcome,
    FieldAssessment,
    JsonTacticAdvisor,
    ProbeMethod,
    ProbeResponse,
    ReqwestFetchEngine,
    ReqwestProxyHealthChecker,
    ReqwestSiteProber,
    SelectorExtractor,
    SiteProber,
    TacticAdvisor,
    TacticCompletion,
};

pub use crate::modules::{
    DomainStats,
    EventDispatcher,
    EventHandler,
    GlobalStats,
    LoggingHandler,
    MetricsCollector,
    MetricsHandler,
    MetricsSnapshot,
    ProxyHealth,
    ProxyHealthChecker,
    ProxyHealthReport,
    ProxyPoolConfig,
    ProxyPoolManager,
    ProxyRecord,
    ProxyTier,
    WorkflowEvent,
};

pub use crate::validation::{
    DataValidator,
    FieldError,
    RetryAction,
    RetryDirective,
    RetryPolicy,
    ValidationConfig,
    ValidationErrorKind,
    ValidationResult,
};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
