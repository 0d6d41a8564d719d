//! Integrations that rely on third-party services.
//!
//! This module groups the fetch engines and advisory service adapters that
//! bridge the orchestration core with the outside world.

pub mod advisory;
pub mod fetch;

pub use advisory::{
    AdvisoryError, ConsistencyAdvisor, ExtractionService, FieldAssessment, JsonTacticAdvisor,
    SelectorExtractor, TacticAdvisor, TacticCompletion,
};
pub use fetch::{
    EngineSet, FetchEngine, FetchError, FetchOutcome, FetchStatus, ProbeMethod, ProbeResponse,
    ReqwestFetchEngine, ReqwestProxyHealthChecker, ReqwestSiteProber, SiteProber,
};
