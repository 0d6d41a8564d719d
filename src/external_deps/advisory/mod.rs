//! Advisory service integrations.
//!
//! Extraction, consistency scoring and tactic suggestion are delegated to
//! outside services (typically language-model backed). The engine only sees
//! these traits; every call is bounded by a timeout and every failure has a
//! rule-based fallback in the calling component.

mod selectors;

pub use selectors::SelectorExtractor;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::blocking::detectors::BlockKind;
use crate::blocking::tactics::{SuggestedTactic, parse_tactics};
use crate::core::{ExtractionMode, FieldMap, Schema};

#[derive(Debug, Error)]
pub enum AdvisoryError {
    #[error("advisory service unavailable: {0}")]
    Unavailable(String),
    #[error("advisory call timed out after {0:?}")]
    Timeout(Duration),
    #[error("malformed advisory response: {0}")]
    Malformed(String),
    #[error("advisory service error: {0}")]
    Service(String),
}

impl From<serde_json::Error> for AdvisoryError {
    fn from(err: serde_json::Error) -> Self {
        AdvisoryError::Malformed(err.to_string())
    }
}

/// Turns page content into field values.
#[async_trait]
pub trait ExtractionService: Send + Sync {
    /// Every schema field should be present in the result, `Null` when not
    /// found.
    async fn extract(
        &self,
        body: &str,
        schema: &Schema,
        mode: ExtractionMode,
    ) -> Result<FieldMap, AdvisoryError>;
}

/// Per-field verdict of a consistency check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldAssessment {
    pub confidence: f64,
    #[serde(default = "default_appears")]
    pub appears_in_source: bool,
    #[serde(default)]
    pub issues: Vec<String>,
}

fn default_appears() -> bool {
    true
}

/// Checks extracted values against the source content.
#[async_trait]
pub trait ConsistencyAdvisor: Send + Sync {
    async fn assess(
        &self,
        data: &FieldMap,
        content: &str,
        schema: &Schema,
    ) -> Result<IndexMap<String, FieldAssessment>, AdvisoryError>;
}

/// Suggests evasion tactics for a detected block.
#[async_trait]
pub trait TacticAdvisor: Send + Sync {
    /// `body_excerpt` is capped at 2000 characters and `headers` at the first
    /// ten response headers.
    async fn suggest_tactics(
        &self,
        kind: BlockKind,
        body_excerpt: &str,
        headers: &[(String, String)],
    ) -> Result<Vec<SuggestedTactic>, AdvisoryError>;
}

/// Produces the raw tactic payload for a block, as returned by a
/// text-completion backend.
#[async_trait]
pub trait TacticCompletion: Send + Sync {
    async fn complete(
        &self,
        kind: BlockKind,
        body_excerpt: &str,
        headers: &[(String, String)],
    ) -> Result<String, AdvisoryError>;
}

/// [`TacticAdvisor`] over a completion that answers with
/// `{"tactics": [{"tactic", "priority", "reasoning", "wait_time"}]}`.
pub struct JsonTacticAdvisor<C> {
    completion: C,
}

impl<C: TacticCompletion> JsonTacticAdvisor<C> {
    pub fn new(completion: C) -> Self {
        Self { completion }
    }
}

#[async_trait]
impl<C: TacticCompletion> TacticAdvisor for JsonTacticAdvisor<C> {
    async fn suggest_tactics(
        &self,
        kind: BlockKind,
        body_excerpt: &str,
        headers: &[(String, String)],
    ) -> Result<Vec<SuggestedTactic>, AdvisoryError> {
        let payload = self.completion.complete(kind, body_excerpt, headers).await?;
        Ok(parse_tactics(&payload)?)
    }
}

/// Run an advisory future under `limit`, mapping expiry to
/// [`AdvisoryError::Timeout`].
pub async fn bounded<T, F>(limit: Duration, call: F) -> Result<T, AdvisoryError>
where
    F: std::future::Future<Output = Result<T, AdvisoryError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(AdvisoryError::Timeout(limit)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assessment_defaults_to_present() {
        let assessment: FieldAssessment = serde_json::from_str(r#"{"confidence": 0.8}"#).unwrap();
        assert!(assessment.appears_in_source);
        assert!(assessment.issues.is_empty());
    }

    struct CannedCompletion(&'static str);

    #[async_trait]
    impl TacticCompletion for CannedCompletion {
        async fn complete(
            &self,
            _kind: BlockKind,
            _body_excerpt: &str,
            _headers: &[(String, String)],
        ) -> Result<String, AdvisoryError> {
            Ok(self.0.to_string())
        }
    }

    #[tokio::test]
    async fn json_advisor_parses_completion() {
        use crate::blocking::tactics::Tactic;

        let advisor = JsonTacticAdvisor::new(CannedCompletion(
            r#"{"tactics": [
                {"tactic": "rotate_proxy", "priority": 2, "reasoning": "fresh ip"},
                {"tactic": "wait", "priority": 1, "reasoning": "cool down", "wait_time": 0}
            ]}"#,
        ));
        let tactics = advisor.suggest_tactics(BlockKind::RateLimit, "", &[]).await.unwrap();
        assert_eq!(tactics.len(), 2);
        assert_eq!(tactics[0].tactic, Tactic::Wait);
        assert_eq!(tactics[0].wait, Some(Duration::ZERO));
        assert_eq!(tactics[1].tactic, Tactic::RotateProxy);
        assert_eq!(tactics[1].wait, None);
    }

    #[tokio::test]
    async fn json_advisor_reports_malformed_completion() {
        let advisor = JsonTacticAdvisor::new(CannedCompletion("I think you should rotate"));
        let result = advisor.suggest_tactics(BlockKind::IpBlock, "", &[]).await;
        assert!(matches!(result, Err(AdvisoryError::Malformed(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_reports_timeouts() {
        let result: Result<(), AdvisoryError> = bounded(Duration::from_secs(1), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(AdvisoryError::Timeout(_))));
    }
}
