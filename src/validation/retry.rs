use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::{ValidationErrorKind, ValidationResult};
use crate::config::duration_secs;
use crate::core::{EngineKind, Strategy};

/// What to do differently on the next attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryAction {
    RetrySame,
    SwitchEngine,
    SwitchExtractionMethod,
    ReExtractStricter,
}

impl RetryAction {
    pub fn as_str(self) -> &'static str {
        match self {
            RetryAction::RetrySame => "retry",
            RetryAction::SwitchEngine => "switch_engine",
            RetryAction::SwitchExtractionMethod => "switch_extraction_method",
            RetryAction::ReExtractStricter => "re_extract",
        }
    }
}

impl fmt::Display for RetryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryDirective {
    pub action: RetryAction,
    pub reason: String,
    pub target_engine: Option<EngineKind>,
    pub wait_hint: Option<Duration>,
    pub stricter_extraction: bool,
}

impl RetryDirective {
    pub fn new(action: RetryAction, reason: impl Into<String>) -> Self {
        Self {
            action,
            reason: reason.into(),
            target_engine: None,
            wait_hint: None,
            stricter_extraction: false,
        }
    }

    pub fn with_engine(mut self, engine: EngineKind) -> Self {
        self.target_engine = Some(engine);
        self
    }

    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait_hint = Some(wait);
        self
    }

    pub fn stricter(mut self) -> Self {
        self.stricter_extraction = true;
        self
    }
}

impl fmt::Display for RetryDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.action, self.reason)
    }
}

/// Maps a validation verdict to the next action.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Valid results strictly above this need no retry.
    pub accept_confidence: f64,
    /// Below this the extraction method is switched.
    pub low_confidence: f64,
    #[serde(with = "duration_secs")]
    pub consistency_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            accept_confidence: 0.7,
            low_confidence: 0.6,
            consistency_wait: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// `None` means accept.
    pub fn suggest_retry(&self, result: &ValidationResult, strategy: &Strategy) -> Option<RetryDirective> {
        if result.valid && result.overall_confidence > self.accept_confidence {
            return None;
        }

        let directive = if result.overall_confidence < self.low_confidence {
            RetryDirective::new(
                RetryAction::SwitchExtractionMethod,
                format!("Low confidence ({:.2})", result.overall_confidence),
            )
            .stricter()
        } else if result.has_error(ValidationErrorKind::is_missing) {
            RetryDirective::new(RetryAction::SwitchEngine, "Missing required fields")
                .with_engine(strategy.engine.toggled())
        } else if result.has_error(|kind| kind == ValidationErrorKind::TypeMismatch) {
            RetryDirective::new(RetryAction::ReExtractStricter, "Type validation failed").stricter()
        } else if result.has_error(|kind| kind == ValidationErrorKind::Consistency) {
            RetryDirective::new(RetryAction::RetrySame, "Consistency validation failed")
                .with_wait(self.consistency_wait)
        } else {
            RetryDirective::new(RetryAction::RetrySame, "Validation failed")
        };
        log::debug!("retry suggested: {directive}");
        Some(directive)
    }
}
