//! High level retrieval orchestration.
//!
//! Wires together the strategy dispatcher, fetch engines, block classifier,
//! evasion controller, extraction service and validator into one bounded
//! retry loop. Every workflow ends in a [`ScrapeResult`]; failures inside a
//! stage are folded into the loop and never escape [`Orchestrator::execute`].

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio::time::sleep;

use crate::blocking::{BlockClassifier, BlockResponse, EvasionController};
use crate::config::{ConfigError, OrchestratorConfig};
use crate::core::{
	EngineKind, ExtractionMode, FieldMap, FieldValue, ScrapeResult, Schema, TargetRequest, TaskStatus,
	WorkflowState,
};
use crate::dispatch::StrategyDispatcher;
use crate::external_deps::advisory::{ConsistencyAdvisor, ExtractionService, TacticAdvisor, bounded};
use crate::external_deps::fetch::{
	EngineSet, FetchEngine, FetchError, ReqwestFetchEngine, ReqwestSiteProber, SiteProber,
};
use crate::modules::events::{
	BlockedEvent, DispatchedEvent, EvasionEvent, EventDispatcher, EventHandler, FetchedEvent,
	FinishedEvent, LoggingHandler, MetricsHandler, RetryEvent, ValidatedEvent, WorkflowEvent,
};
use crate::modules::metrics::MetricsCollector;
use crate::modules::proxy::{ProxyHealthChecker, ProxyHealthReport, ProxyPoolManager};
use crate::validation::{DataValidator, RetryAction, RetryDirective, RetryPolicy, ValidationResult};

/// Result alias used across the orchestration layer.
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Construction-time error surfaced by the builder.
#[derive(Debug, Error)]
pub enum OrchestratorError {
	#[error("missing collaborator: {0}")]
	MissingCollaborator(&'static str),
	#[error(transparent)]
	Config(#[from] ConfigError),
	#[error("fetch layer initialisation failed: {0}")]
	Fetch(#[from] FetchError),
}

/// Failure taxonomy inside a workflow. These never escape `execute`; they end
/// up as the result error or as warnings.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WorkflowError {
	#[error("fetch failed: {0}")]
	Fetch(String),
	#[error("blocked and evasion failed: {0}")]
	UnresolvedBlock(String),
	#[error("extraction failed: {0}")]
	Extraction(String),
	#[error("validation failed: {0}")]
	Validation(String),
	#[error("no healthy proxy available; continuing without proxy")]
	ProxyExhausted,
	#[error("workflow stage fault: {0}")]
	Stage(String),
}

/// Fluent builder for [`Orchestrator`].
pub struct OrchestratorBuilder {
	config: OrchestratorConfig,
	lightweight: Option<Arc<dyn FetchEngine>>,
	full_render: Option<Arc<dyn FetchEngine>>,
	prober: Option<Arc<dyn SiteProber>>,
	extractor: Option<Arc<dyn ExtractionService>>,
	consistency_advisor: Option<Arc<dyn ConsistencyAdvisor>>,
	tactic_advisor: Option<Arc<dyn TacticAdvisor>>,
	proxy_pool: Option<Arc<ProxyPoolManager>>,
	handlers: Vec<Arc<dyn EventHandler>>,
}

impl OrchestratorBuilder {
	pub fn new() -> Self {
		Self {
			config: OrchestratorConfig::default(),
			lightweight: None,
			full_render: None,
			prober: None,
			extractor: None,
			consistency_advisor: None,
			tactic_advisor: None,
			proxy_pool: None,
			handlers: Vec::new(),
		}
	}

	pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
		self.config = config;
		self
	}

	pub fn with_lightweight_engine(mut self, engine: Arc<dyn FetchEngine>) -> Self {
		self.lightweight = Some(engine);
		self
	}

	pub fn with_render_engine(mut self, engine: Arc<dyn FetchEngine>) -> Self {
		self.full_render = Some(engine);
		self
	}

	pub fn with_prober(mut self, prober: Arc<dyn SiteProber>) -> Self {
		self.prober = Some(prober);
		self
	}

	pub fn with_extractor(mut self, extractor: Arc<dyn ExtractionService>) -> Self {
		self.extractor = Some(extractor);
		self
	}

	pub fn with_consistency_advisor(mut self, advisor: Arc<dyn ConsistencyAdvisor>) -> Self {
		self.consistency_advisor = Some(advisor);
		self
	}

	pub fn with_tactic_advisor(mut self, advisor: Arc<dyn TacticAdvisor>) -> Self {
		self.tactic_advisor = Some(advisor);
		self
	}

	/// Share an existing pool. Proxies listed in the config are loaded into it.
	pub fn with_proxy_pool(mut self, pool: Arc<ProxyPoolManager>) -> Self {
		self.proxy_pool = Some(pool);
		self
	}

	pub fn with_proxies<I, S>(mut self, proxies: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.config.proxies = proxies.into_iter().map(Into::into).collect();
		self
	}

	pub fn with_max_retries(mut self, retries: u32) -> Self {
		self.config.max_retries = retries;
		self
	}

	pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
		self.handlers.push(handler);
		self
	}

	pub fn disable_metrics(mut self) -> Self {
		self.config.enable_metrics = false;
		self
	}

	pub fn disable_event_logging(mut self) -> Self {
		self.config.enable_event_logging = false;
		self
	}

	pub fn build(self) -> OrchestratorResult<Orchestrator> {
		Orchestrator::from_builder(self)
	}
}

impl Default for OrchestratorBuilder {
	fn default() -> Self {
		Self::new()
	}
}

/// Next-attempt adjustments carried over from a retry directive.
#[derive(Debug, Clone, Copy, Default)]
struct Overrides {
	engine: Option<EngineKind>,
	mode: ExtractionMode,
	wait: Option<Duration>,
}

impl Overrides {
	fn from_directive(directive: &RetryDirective) -> Self {
		match directive.action {
			RetryAction::SwitchEngine => Self {
				engine: directive.target_engine,
				..Self::default()
			},
			RetryAction::SwitchExtractionMethod | RetryAction::ReExtractStricter => Self {
				mode: ExtractionMode::Strict,
				..Self::default()
			},
			RetryAction::RetrySame => Self {
				wait: directive.wait_hint,
				..Self::default()
			},
		}
	}
}

/// Data produced by an attempt that reached validation.
#[derive(Debug)]
struct Extraction {
	data: FieldMap,
	body: String,
	engine: EngineKind,
	validation: ValidationResult,
}

#[derive(Debug)]
enum AttemptOutcome {
	Accepted(Extraction),
	Retry(Extraction, RetryDirective),
	Fault(WorkflowError),
}

/// Adaptive retrieval orchestrator.
pub struct Orchestrator {
	config: OrchestratorConfig,
	dispatcher: StrategyDispatcher,
	engines: EngineSet,
	classifier: BlockClassifier,
	evasion: EvasionController,
	extractor: Arc<dyn ExtractionService>,
	validator: DataValidator,
	retry_policy: RetryPolicy,
	proxy_pool: Arc<ProxyPoolManager>,
	metrics: Option<MetricsCollector>,
	events: Arc<EventDispatcher>,
}

impl Orchestrator {
	/// Obtain a builder to customise the orchestrator instance.
	pub fn builder() -> OrchestratorBuilder {
		OrchestratorBuilder::new()
	}

	fn from_builder(builder: OrchestratorBuilder) -> OrchestratorResult<Self> {
		let OrchestratorBuilder {
			config,
			lightweight,
			full_render,
			prober,
			extractor,
			consistency_advisor,
			tactic_advisor,
			proxy_pool,
			handlers,
		} = builder;
		config.validate()?;

		let extractor = extractor.ok_or(OrchestratorError::MissingCollaborator("extraction service"))?;
		let lightweight: Arc<dyn FetchEngine> = match lightweight {
			Some(engine) => engine,
			None => Arc::new(ReqwestFetchEngine::new()),
		};
		let full_render = full_render.unwrap_or_else(|| {
			log::warn!("no full-render engine configured; rendering falls back to {}", lightweight.name());
			lightweight.clone()
		});
		let prober: Arc<dyn SiteProber> = match prober {
			Some(prober) => prober,
			None => Arc::new(ReqwestSiteProber::new()?),
		};

		let proxy_pool =
			proxy_pool.unwrap_or_else(|| Arc::new(ProxyPoolManager::new(config.proxy.clone())));
		if !config.proxies.is_empty() {
			proxy_pool.load(config.proxies.iter(), config.proxy_tier);
		}

		let mut classifier = BlockClassifier::new().with_advisory_timeout(config.advisory_timeout);
		if let Some(advisor) = tactic_advisor {
			classifier = classifier.with_advisor(advisor);
		}

		let mut validator = DataValidator::new(config.validation.clone());
		if let Some(advisor) = consistency_advisor {
			validator = validator.with_advisor(advisor);
		}

		let engines = EngineSet::new(lightweight, full_render);
		let dispatcher = StrategyDispatcher::new(prober)
			.with_proxy_pool(proxy_pool.clone())
			.with_config(config.dispatch.clone());
		let evasion = EvasionController::new(proxy_pool.clone(), engines.clone(), classifier.clone())
			.with_config(config.evasion.clone());

		let metrics = config.enable_metrics.then(MetricsCollector::new);
		let mut events = EventDispatcher::new();
		if config.enable_event_logging {
			events.register_handler(Arc::new(LoggingHandler));
		}
		if let Some(ref collector) = metrics {
			events.register_handler(Arc::new(MetricsHandler::new(collector.clone())));
		}
		for handler in handlers {
			events.register_handler(handler);
		}

		Ok(Self {
			retry_policy: config.retry.clone(),
			config,
			dispatcher,
			engines,
			classifier,
			evasion,
			extractor,
			validator,
			proxy_pool,
			metrics,
			events: Arc::new(events),
		})
	}

	pub fn config(&self) -> &OrchestratorConfig {
		&self.config
	}

	pub fn metrics(&self) -> Option<&MetricsCollector> {
		self.metrics.as_ref()
	}

	pub fn proxy_pool(&self) -> &Arc<ProxyPoolManager> {
		&self.proxy_pool
	}

	/// Sweep the pool through `checker` and report its state.
	pub async fn check_proxies(&self, checker: &dyn ProxyHealthChecker) -> ProxyHealthReport {
		self.proxy_pool.health_check(checker).await;
		self.proxy_pool.health_report()
	}

	/// Run one workflow to a terminal state.
	pub async fn execute(&self, request: &TargetRequest) -> ScrapeResult {
		let started = Instant::now();
		let max_retries = self.config.max_retries;
		let mut state = WorkflowState::new();
		let mut overrides = Overrides::default();
		let mut warnings = Vec::new();

		log::info!("starting workflow for {}", request.locator());

		loop {
			state.attempt += 1;
			if let Some(wait) = overrides.wait.take() {
				sleep(wait).await;
			}
			log::info!(
				"attempt {}/{} for {}",
				state.attempt,
				max_retries + 1,
				request.locator()
			);

			let outcome = AssertUnwindSafe(self.run_attempt(request, &state, overrides, &mut warnings))
				.catch_unwind()
				.await
				.unwrap_or_else(|panic| AttemptOutcome::Fault(WorkflowError::Stage(panic_message(panic))));

			match outcome {
				AttemptOutcome::Accepted(extraction) => {
					state.status = TaskStatus::Completed;
					return self.finish(request, state, Some(extraction), None, warnings, started);
				}
				AttemptOutcome::Retry(extraction, directive) => {
					if state.retry_count >= max_retries {
						log::warn!("max retries reached, accepting current result");
						warnings.push(format!(
							"Max retries reached, accepting current result ({})",
							WorkflowError::Validation(directive.reason)
						));
						state.status = TaskStatus::CompletedWithWarnings;
						return self.finish(request, state, Some(extraction), None, warnings, started);
					}
					state.retry_count += 1;
					overrides = Overrides::from_directive(&directive);
					self.emit_retry(request, &state, directive.to_string(), overrides.wait);
				}
				AttemptOutcome::Fault(error) => {
					if state.retry_count >= max_retries {
						state.status = TaskStatus::Failed;
						return self.finish(request, state, None, Some(error), warnings, started);
					}
					state.retry_count += 1;
					overrides.wait = None;
					self.emit_retry(request, &state, error.to_string(), None);
				}
			}
		}
	}

	/// Run every request concurrently; results come back in input order.
	pub async fn execute_batch(self: &Arc<Self>, requests: Vec<TargetRequest>) -> Vec<ScrapeResult> {
		let locators: Vec<_> = requests.iter().map(|request| request.locator().clone()).collect();
		let mut tasks = JoinSet::new();
		for (index, request) in requests.into_iter().enumerate() {
			let orchestrator = Arc::clone(self);
			tasks.spawn(async move { (index, orchestrator.execute(&request).await) });
		}

		let mut results: Vec<Option<ScrapeResult>> = vec![None; locators.len()];
		while let Some(joined) = tasks.join_next().await {
			match joined {
				Ok((index, result)) => results[index] = Some(result),
				Err(err) => log::error!("batch task aborted: {err}"),
			}
		}

		results
			.into_iter()
			.zip(locators)
			.map(|(result, locator)| {
				result.unwrap_or_else(|| ScrapeResult {
					locator,
					status: TaskStatus::Failed,
					data: None,
					body: None,
					engine: None,
					validation: None,
					error: Some(WorkflowError::Stage("task aborted".into()).to_string()),
					warnings: Vec::new(),
					retry_count: 0,
					execution_time: Duration::ZERO,
				})
			})
			.collect()
	}

	/// Release engine resources.
	pub async fn shutdown(&self) {
		self.engines.shutdown().await;
	}

	async fn run_attempt(
		&self,
		request: &TargetRequest,
		state: &WorkflowState,
		overrides: Overrides,
		warnings: &mut Vec<String>,
	) -> AttemptOutcome {
		let locator = request.locator();
		let domain = request.domain().to_string();

		let mut strategy = self.dispatcher.dispatch(request).await;
		if let Some(engine) = overrides.engine {
			strategy = strategy.with_engine(engine);
		}
		if strategy.proxy.is_none()
			&& self.config.dispatch.proxy_allocation_enabled
			&& !self.proxy_pool.is_empty()
		{
			let exhausted = WorkflowError::ProxyExhausted.to_string();
			if !warnings.contains(&exhausted) {
				warnings.push(exhausted);
			}
		}
		self.events.dispatch(WorkflowEvent::Dispatched(DispatchedEvent {
			url: locator.clone(),
			attempt: state.attempt,
			engine: strategy.engine,
			proxy: strategy.proxy.as_ref().map(|proxy| proxy.endpoint()),
			difficulty: strategy.difficulty,
			timestamp: chrono::Utc::now(),
		}));

		let outcome = self.engines.fetch(locator, &strategy).await;
		self.events.dispatch(WorkflowEvent::Fetched(FetchedEvent {
			url: locator.clone(),
			engine: strategy.engine,
			status: outcome.http_status,
			latency: outcome.elapsed,
			error: outcome.error.clone(),
			timestamp: chrono::Utc::now(),
		}));
		if !outcome.is_completed() {
			let cause = outcome.error.unwrap_or_else(|| "unknown fetch error".to_string());
			if let Some(proxy) = &strategy.proxy {
				self.proxy_pool.report_failure(proxy, &cause);
			}
			return AttemptOutcome::Fault(WorkflowError::Fetch(cause));
		}

		let analysis = self
			.classifier
			.analyze(&BlockResponse {
				status: outcome.status_code(),
				headers: &outcome.headers,
				body: outcome.body_text(),
			})
			.await;

		let status = outcome.status_code();
		let mut body = outcome.body.unwrap_or_default();
		let mut engine = strategy.engine;
		if analysis.is_blocked {
			self.events.dispatch(WorkflowEvent::Blocked(BlockedEvent {
				domain: domain.clone(),
				kind: analysis.kind,
				confidence: analysis.confidence,
				indicators: analysis.indicators.clone(),
				timestamp: chrono::Utc::now(),
			}));
			if let Some(proxy) = &strategy.proxy {
				self.proxy_pool
					.report_failure(proxy, &format!("blocked: {}", analysis.kind));
			}

			let Some(tactic) = analysis.suggested_tactics.first() else {
				return AttemptOutcome::Fault(WorkflowError::UnresolvedBlock(format!(
					"No tactics available for {}",
					analysis.kind
				)));
			};
			let evasion = self
				.evasion
				.evade(locator, analysis.kind, &strategy, Some(tactic))
				.await;
			self.events.dispatch(WorkflowEvent::Evasion(EvasionEvent {
				domain: domain.clone(),
				tactic: evasion.tactic,
				success: evasion.success,
				message: evasion.message.clone(),
				timestamp: chrono::Utc::now(),
			}));
			match evasion.body {
				Some(recovered) if evasion.success => {
					body = recovered;
					engine = evasion.engine.unwrap_or(engine);
				}
				_ => return AttemptOutcome::Fault(WorkflowError::UnresolvedBlock(evasion.message)),
			}
		} else if !(200..300).contains(&status) {
			if let Some(proxy) = &strategy.proxy {
				self.proxy_pool.report_failure(proxy, &format!("HTTP {status}"));
			}
			return AttemptOutcome::Fault(WorkflowError::Fetch(format!("HTTP {status}")));
		} else if let Some(proxy) = &strategy.proxy {
			self.proxy_pool.report_success(proxy);
		}

		let schema = request.schema();
		let data = match bounded(
			self.config.extraction_timeout,
			self.extractor.extract(&body, schema, overrides.mode),
		)
		.await
		{
			Ok(data) => data,
			Err(err) => {
				let error = WorkflowError::Extraction(err.to_string());
				log::error!("{error}");
				warnings.push(error.to_string());
				null_fields(schema)
			}
		};

		let validation = self.validator.validate(&data, schema, Some(&body)).await;
		self.events.dispatch(WorkflowEvent::Validated(ValidatedEvent {
			domain,
			valid: validation.valid,
			confidence: validation.overall_confidence,
			errors: validation.errors.len(),
			timestamp: chrono::Utc::now(),
		}));

		let accepted = validation.valid && validation.overall_confidence >= self.config.acceptance_confidence;
		let directive = if accepted {
			None
		} else {
			self.retry_policy.suggest_retry(&validation, &strategy)
		};
		let extraction = Extraction {
			data,
			body,
			engine,
			validation,
		};
		// The policy only declines to retry a valid result.
		match directive {
			Some(directive) => AttemptOutcome::Retry(extraction, directive),
			None => AttemptOutcome::Accepted(extraction),
		}
	}

	fn emit_retry(&self, request: &TargetRequest, state: &WorkflowState, reason: String, wait: Option<Duration>) {
		self.events.dispatch(WorkflowEvent::Retry(RetryEvent {
			domain: request.domain().to_string(),
			attempt: state.attempt + 1,
			reason,
			scheduled_after: wait.unwrap_or_default(),
			timestamp: chrono::Utc::now(),
		}));
	}

	fn finish(
		&self,
		request: &TargetRequest,
		state: WorkflowState,
		extraction: Option<Extraction>,
		error: Option<WorkflowError>,
		warnings: Vec<String>,
		started: Instant,
	) -> ScrapeResult {
		let execution_time = started.elapsed();
		let error = error.map(|error| error.to_string());
		self.events.dispatch(WorkflowEvent::Finished(FinishedEvent {
			domain: request.domain().to_string(),
			status: state.status,
			retry_count: state.retry_count,
			elapsed: execution_time,
			error: error.clone(),
			timestamp: chrono::Utc::now(),
		}));

		let (data, body, engine, validation) = match extraction {
			Some(extraction) => (
				Some(extraction.data),
				Some(extraction.body),
				Some(extraction.engine),
				Some(extraction.validation),
			),
			None => (None, None, None, None),
		};
		ScrapeResult {
			locator: request.locator().clone(),
			status: state.status,
			data,
			body,
			engine,
			validation,
			error,
			warnings,
			retry_count: state.retry_count,
			execution_time,
		}
	}
}

fn null_fields(schema: &Schema) -> FieldMap {
	schema.keys().map(|field| (field.clone(), FieldValue::Null)).collect()
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
	if let Some(message) = panic.downcast_ref::<&str>() {
		(*message).to_string()
	} else if let Some(message) = panic.downcast_ref::<String>() {
		message.clone()
	} else {
		"panic in workflow stage".to_string()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::core::{FieldDefinition, FieldType, Strategy};
	use crate::external_deps::advisory::AdvisoryError;
	use crate::external_deps::fetch::{FetchOutcome, ProbeMethod, ProbeResponse};
	use async_trait::async_trait;
	use http::HeaderMap;
	use std::sync::Mutex;
	use url::Url;

	struct StaticProber;

	#[async_trait]
	impl SiteProber for StaticProber {
		async fn probe(&self, _locator: &Url, _method: ProbeMethod, _timeout: Duration) -> Result<ProbeResponse, FetchError> {
			Ok(ProbeResponse {
				status: 200,
				headers: HeaderMap::new(),
				body: "<html><body><h1>Lamp</h1></body></html>".into(),
			})
		}
	}

	struct PageEngine;

	#[async_trait]
	impl FetchEngine for PageEngine {
		fn name(&self) -> &'static str {
			"page"
		}

		async fn fetch(&self, _locator: &Url, _strategy: &Strategy) -> FetchOutcome {
			FetchOutcome::completed(200, HeaderMap::new(), "<h1>Lamp</h1>".into(), Duration::from_millis(3))
		}
	}

	/// Returns `title` as null until strict mode is requested.
	struct StrictOnlyExtractor {
		modes: Mutex<Vec<ExtractionMode>>,
	}

	#[async_trait]
	impl ExtractionService for StrictOnlyExtractor {
		async fn extract(&self, _body: &str, _schema: &Schema, mode: ExtractionMode) -> Result<FieldMap, AdvisoryError> {
			self.modes.lock().unwrap().push(mode);
			let mut data = FieldMap::new();
			let title = match mode {
				ExtractionMode::Normal => FieldValue::Null,
				ExtractionMode::Strict => FieldValue::from("Lamp"),
			};
			data.insert("title".into(), title);
			Ok(data)
		}
	}

	struct PanickingExtractor;

	#[async_trait]
	impl ExtractionService for PanickingExtractor {
		async fn extract(&self, _body: &str, _schema: &Schema, _mode: ExtractionMode) -> Result<FieldMap, AdvisoryError> {
			panic!("extractor crashed");
		}
	}

	fn request() -> TargetRequest {
		let mut schema = Schema::new();
		schema.insert("title".into(), FieldDefinition::new(FieldType::String, "name").required());
		TargetRequest::new("https://shop.example/lamp", schema).unwrap()
	}

	fn builder(extractor: Arc<dyn ExtractionService>) -> OrchestratorBuilder {
		Orchestrator::builder()
			.with_prober(Arc::new(StaticProber))
			.with_lightweight_engine(Arc::new(PageEngine))
			.with_extractor(extractor)
			.disable_event_logging()
	}

	#[test]
	fn build_requires_extractor() {
		let err = Orchestrator::builder()
			.with_prober(Arc::new(StaticProber))
			.with_lightweight_engine(Arc::new(PageEngine))
			.build()
			.err()
			.unwrap();
		assert!(matches!(err, OrchestratorError::MissingCollaborator(_)));
	}

	#[tokio::test]
	async fn low_confidence_retry_switches_to_strict_extraction() {
		let extractor = Arc::new(StrictOnlyExtractor { modes: Mutex::new(Vec::new()) });
		let orchestrator = builder(extractor.clone()).build().unwrap();
		let result = orchestrator.execute(&request()).await;

		assert_eq!(result.status, TaskStatus::Completed);
		assert_eq!(result.retry_count, 1);
		assert_eq!(
			*extractor.modes.lock().unwrap(),
			vec![ExtractionMode::Normal, ExtractionMode::Strict]
		);
		assert_eq!(result.data.unwrap()["title"], FieldValue::from("Lamp"));
	}

	#[tokio::test]
	async fn stage_panics_become_failures() {
		let orchestrator = builder(Arc::new(PanickingExtractor)).with_max_retries(1).build().unwrap();
		let result = orchestrator.execute(&request()).await;
		assert_eq!(result.status, TaskStatus::Failed);
		assert_eq!(result.retry_count, 1);
		assert!(result.error.unwrap().contains("extractor crashed"));
	}

	#[tokio::test]
	async fn exhausted_pool_is_reported_as_warning() {
		let pool = Arc::new(ProxyPoolManager::default());
		pool.load_list("http://10.0.0.9:8000", crate::modules::proxy::ProxyTier::Mobile);
		let extractor = Arc::new(StrictOnlyExtractor { modes: Mutex::new(Vec::new()) });
		let orchestrator = builder(extractor).with_proxy_pool(pool).build().unwrap();
		let result = orchestrator.execute(&request()).await;
		assert!(result.warnings.contains(&WorkflowError::ProxyExhausted.to_string()));
	}

	struct UnavailableEngine;

	#[async_trait]
	impl FetchEngine for UnavailableEngine {
		fn name(&self) -> &'static str {
			"unavailable"
		}

		async fn fetch(&self, _locator: &Url, _strategy: &Strategy) -> FetchOutcome {
			FetchOutcome::completed(503, HeaderMap::new(), "<html>Service Unavailable</html>".into(), Duration::from_millis(3))
		}
	}

	struct LampExtractor;

	#[async_trait]
	impl ExtractionService for LampExtractor {
		async fn extract(&self, _body: &str, _schema: &Schema, _mode: ExtractionMode) -> Result<FieldMap, AdvisoryError> {
			let mut data = FieldMap::new();
			data.insert("title".into(), FieldValue::from("Lamp"));
			Ok(data)
		}
	}

	#[tokio::test]
	async fn server_errors_count_against_the_proxy() {
		use crate::modules::proxy::{ProxyRecord, ProxyTier};

		let pool = Arc::new(ProxyPoolManager::default());
		pool.load_list("http://10.0.0.7:8000", ProxyTier::Datacenter);
		let orchestrator = Orchestrator::builder()
			.with_prober(Arc::new(StaticProber))
			.with_lightweight_engine(Arc::new(UnavailableEngine))
			.with_extractor(Arc::new(LampExtractor))
			.with_proxy_pool(pool.clone())
			.with_max_retries(2)
			.disable_event_logging()
			.build()
			.unwrap();

		let result = orchestrator.execute(&request()).await;

		assert_eq!(result.status, TaskStatus::Failed);
		assert_eq!(result.error.as_deref(), Some("fetch failed: HTTP 503"));
		let proxy = ProxyRecord::parse("http://10.0.0.7:8000", ProxyTier::Datacenter).unwrap();
		let health = pool.health_of(&proxy).unwrap();
		assert_eq!(health.success_count, 0);
		assert_eq!(health.consecutive_failures, 3);
		assert!(!pool.is_healthy(&proxy));
		assert!(pool.get_proxy(ProxyTier::Datacenter).is_none());
	}

	#[tokio::test]
	async fn policy_acceptance_below_gate_completes() {
		let config = OrchestratorConfig {
			acceptance_confidence: 0.8,
			retry: RetryPolicy {
				accept_confidence: 0.5,
				..RetryPolicy::default()
			},
			enable_event_logging: false,
			..OrchestratorConfig::default()
		};
		let orchestrator = builder(Arc::new(LampExtractor)).with_config(config).build().unwrap();

		let result = orchestrator.execute(&request()).await;

		assert_eq!(result.status, TaskStatus::Completed);
		assert_eq!(result.retry_count, 0);
		assert!(result.warnings.is_empty());
	}
}
