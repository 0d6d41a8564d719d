//! Cross-cutting services module
//!
//! Proxy pool health, workflow events and metrics shared by the orchestration
//! layer.

pub mod events;
pub mod metrics;
pub mod proxy;

// Re-export commonly used types
pub use events::{
    BlockedEvent, DispatchedEvent, EvasionEvent, EventDispatcher, EventHandler, FetchedEvent,
    FinishedEvent, LoggingHandler, MetricsHandler, RetryEvent, ValidatedEvent, WorkflowEvent,
};
pub use metrics::{DomainStats, GlobalStats, MetricsCollector, MetricsSnapshot};
pub use proxy::{
    ProxyHealth, ProxyHealthChecker, ProxyHealthReport, ProxyParseError, ProxyPoolConfig,
    ProxyPoolManager, ProxyProtocol, ProxyRecord, ProxyStatus, ProxyTier,
};
