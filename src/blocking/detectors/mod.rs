//! Block detection module.
//!
//! Classifies a fetched response into the block taxonomy using an ordered rule
//! table (first match wins) and attaches evasion tactics for blocked
//! responses.

use http::HeaderMap;
use http::header::SERVER;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::blocking::tactics::{SuggestedTactic, fallback_tactics};
use crate::core::truncate_chars;
use crate::external_deps::advisory::{TacticAdvisor, bounded};

const ADVISORY_BODY_CHARS: usize = 2000;
const ADVISORY_HEADER_COUNT: usize = 10;

/// Anti-bot block categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    None,
    IpBlock,
    RateLimit,
    Cloudflare,
    #[serde(rename = "recaptcha")]
    ReCaptcha,
    #[serde(rename = "hcaptcha")]
    HCaptcha,
    #[serde(rename = "funcaptcha")]
    FunCaptcha,
    #[serde(rename = "captcha_unknown")]
    UnknownCaptcha,
    #[serde(rename = "datadome")]
    DataDome,
    #[serde(rename = "perimeterx")]
    PerimeterX,
}

impl BlockKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BlockKind::None => "none",
            BlockKind::IpBlock => "ip_block",
            BlockKind::RateLimit => "rate_limit",
            BlockKind::Cloudflare => "cloudflare",
            BlockKind::ReCaptcha => "recaptcha",
            BlockKind::HCaptcha => "hcaptcha",
            BlockKind::FunCaptcha => "funcaptcha",
            BlockKind::UnknownCaptcha => "captcha_unknown",
            BlockKind::DataDome => "datadome",
            BlockKind::PerimeterX => "perimeterx",
        }
    }

    pub fn is_captcha(self) -> bool {
        matches!(
            self,
            BlockKind::ReCaptcha
                | BlockKind::HCaptcha
                | BlockKind::FunCaptcha
                | BlockKind::UnknownCaptcha
        )
    }
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Borrowed view of a response under inspection.
#[derive(Debug, Clone, Copy)]
pub struct BlockResponse<'a> {
    pub status: u16,
    pub headers: &'a HeaderMap,
    pub body: &'a str,
}

/// Classifier verdict.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockAnalysis {
    pub is_blocked: bool,
    pub kind: BlockKind,
    /// `0.0` exactly when `kind` is [`BlockKind::None`].
    pub confidence: f32,
    pub indicators: Vec<String>,
    /// Ordered by priority; empty when not blocked.
    pub suggested_tactics: Vec<SuggestedTactic>,
    /// Id of the rule that fired.
    pub rule_id: Option<&'static str>,
}

impl BlockAnalysis {
    pub fn clear() -> Self {
        Self {
            is_blocked: false,
            kind: BlockKind::None,
            confidence: 0.0,
            indicators: Vec::new(),
            suggested_tactics: Vec::new(),
            rule_id: None,
        }
    }
}

#[derive(Debug)]
struct RuleMatch {
    kind: BlockKind,
    confidence: f32,
    indicators: Vec<String>,
}

impl RuleMatch {
    fn new(kind: BlockKind, confidence: f32, indicators: Vec<String>) -> Self {
        Self {
            kind,
            confidence,
            indicators,
        }
    }
}

/// Response data precomputed once per classification.
struct Inspection<'a> {
    status: u16,
    headers: &'a HeaderMap,
    body_lower: String,
}

impl Inspection<'_> {
    fn contains(&self, needle: &str) -> bool {
        self.body_lower.contains(&needle.to_lowercase())
    }

    fn matched(&self, needles: &[&str]) -> Vec<String> {
        needles
            .iter()
            .filter(|needle| self.contains(needle))
            .map(|needle| needle.to_string())
            .collect()
    }
}

type RuleFn = fn(&Inspection<'_>) -> Option<RuleMatch>;

/// One entry of the ordered rule table.
struct BlockRule {
    id: &'static str,
    evaluate: RuleFn,
}

const CLOUDFLARE_INDICATORS: &[&str] = &[
    "Checking your browser",
    "cf-browser-verification",
    "cf_clearance",
    "Just a moment",
    "ray ID",
    "cloudflare",
];

const CAPTCHA_INDICATORS: &[&str] = &[
    "recaptcha",
    "hcaptcha",
    "funcaptcha",
    "I'm not a robot",
    "g-recaptcha",
    "h-captcha",
];

const RATE_LIMIT_INDICATORS: &[&str] = &["Too many requests", "Rate limit exceeded", "429", "slow down"];

/// Evaluated top to bottom; the first match decides the verdict.
static RULES: &[BlockRule] = &[
    BlockRule {
        id: "http_403",
        evaluate: forbidden_status,
    },
    BlockRule {
        id: "http_429",
        evaluate: too_many_requests_status,
    },
    BlockRule {
        id: "cloudflare_body",
        evaluate: cloudflare_body,
    },
    BlockRule {
        id: "cloudflare_headers",
        evaluate: cloudflare_headers,
    },
    BlockRule {
        id: "captcha",
        evaluate: captcha_markers,
    },
    BlockRule {
        id: "datadome",
        evaluate: datadome_markers,
    },
    BlockRule {
        id: "perimeterx",
        evaluate: perimeterx_markers,
    },
    BlockRule {
        id: "rate_limit_body",
        evaluate: rate_limit_body,
    },
];

fn forbidden_status(response: &Inspection<'_>) -> Option<RuleMatch> {
    (response.status == 403).then(|| {
        RuleMatch::new(BlockKind::IpBlock, 0.90, vec!["HTTP 403 Forbidden".into()])
    })
}

fn too_many_requests_status(response: &Inspection<'_>) -> Option<RuleMatch> {
    (response.status == 429).then(|| {
        RuleMatch::new(
            BlockKind::RateLimit,
            0.95,
            vec!["HTTP 429 Too Many Requests".into()],
        )
    })
}

fn cloudflare_body(response: &Inspection<'_>) -> Option<RuleMatch> {
    let matched = response.matched(CLOUDFLARE_INDICATORS);
    (!matched.is_empty()).then(|| RuleMatch::new(BlockKind::Cloudflare, 0.90, matched))
}

fn cloudflare_headers(response: &Inspection<'_>) -> Option<RuleMatch> {
    let server_is_cloudflare = response
        .headers
        .get(SERVER)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|server| server.to_ascii_lowercase().contains("cloudflare"));
    (response.headers.contains_key("cf-ray") || server_is_cloudflare).then(|| {
        RuleMatch::new(
            BlockKind::Cloudflare,
            0.85,
            vec!["Cloudflare headers detected".into()],
        )
    })
}

fn captcha_markers(response: &Inspection<'_>) -> Option<RuleMatch> {
    let matched = response.matched(CAPTCHA_INDICATORS);
    if matched.is_empty() {
        return None;
    }
    let (kind, confidence) = if response.contains("recaptcha") {
        (BlockKind::ReCaptcha, 0.95)
    } else if response.contains("hcaptcha") {
        (BlockKind::HCaptcha, 0.95)
    } else if response.contains("funcaptcha") {
        (BlockKind::FunCaptcha, 0.90)
    } else {
        (BlockKind::UnknownCaptcha, 0.80)
    };
    Some(RuleMatch::new(kind, confidence, matched))
}

fn datadome_markers(response: &Inspection<'_>) -> Option<RuleMatch> {
    response.contains("datadome").then(|| {
        RuleMatch::new(BlockKind::DataDome, 0.90, vec!["DataDome detected".into()])
    })
}

fn perimeterx_markers(response: &Inspection<'_>) -> Option<RuleMatch> {
    (response.contains("_px") || response.contains("perimeterx")).then(|| {
        RuleMatch::new(
            BlockKind::PerimeterX,
            0.90,
            vec!["PerimeterX detected".into()],
        )
    })
}

fn rate_limit_body(response: &Inspection<'_>) -> Option<RuleMatch> {
    let matched = response.matched(RATE_LIMIT_INDICATORS);
    (!matched.is_empty()).then(|| RuleMatch::new(BlockKind::RateLimit, 0.85, matched))
}

/// Rule-table block classifier with optional tactic advisor.
#[derive(Clone)]
pub struct BlockClassifier {
    advisor: Option<Arc<dyn TacticAdvisor>>,
    advisory_timeout: Duration,
}

impl BlockClassifier {
    pub fn new() -> Self {
        Self {
            advisor: None,
            advisory_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_advisor(mut self, advisor: Arc<dyn TacticAdvisor>) -> Self {
        self.advisor = Some(advisor);
        self
    }

    pub fn with_advisory_timeout(mut self, timeout: Duration) -> Self {
        self.advisory_timeout = timeout;
        self
    }

    /// Ids of the rule table in evaluation order.
    pub fn rule_ids() -> impl Iterator<Item = &'static str> {
        RULES.iter().map(|rule| rule.id)
    }

    /// Synchronous verdict without tactics.
    pub fn classify(&self, response: &BlockResponse<'_>) -> BlockAnalysis {
        let inspection = Inspection {
            status: response.status,
            headers: response.headers,
            body_lower: response.body.to_lowercase(),
        };

        for rule in RULES {
            if let Some(found) = (rule.evaluate)(&inspection) {
                log::debug!(
                    "block rule {} matched: {} ({:.2})",
                    rule.id,
                    found.kind,
                    found.confidence
                );
                return BlockAnalysis {
                    is_blocked: true,
                    kind: found.kind,
                    confidence: found.confidence,
                    indicators: found.indicators,
                    suggested_tactics: Vec::new(),
                    rule_id: Some(rule.id),
                };
            }
        }

        BlockAnalysis::clear()
    }

    /// Classify and, when blocked, attach the suggested tactics.
    pub async fn analyze(&self, response: &BlockResponse<'_>) -> BlockAnalysis {
        let mut analysis = self.classify(response);
        if analysis.is_blocked {
            analysis.suggested_tactics = self.suggest_tactics(analysis.kind, response).await;
        }
        analysis
    }

    /// Advisor tactics, or the fallback table when the advisor is absent,
    /// fails or returns nothing usable.
    pub async fn suggest_tactics(
        &self,
        kind: BlockKind,
        response: &BlockResponse<'_>,
    ) -> Vec<SuggestedTactic> {
        let Some(advisor) = &self.advisor else {
            return fallback_tactics(kind);
        };

        let excerpt = truncate_chars(response.body, ADVISORY_BODY_CHARS);
        let headers: Vec<(String, String)> = response
            .headers
            .iter()
            .take(ADVISORY_HEADER_COUNT)
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();

        match bounded(
            self.advisory_timeout,
            advisor.suggest_tactics(kind, excerpt, &headers),
        )
        .await
        {
            Ok(mut tactics) if !tactics.is_empty() => {
                tactics.sort_by_key(|tactic| tactic.priority);
                tactics
            }
            Ok(_) => {
                log::warn!("tactic advisor returned no tactics for {kind}; using fallback table");
                fallback_tactics(kind)
            }
            Err(err) => {
                log::error!("failed to get advisory tactics: {err}");
                fallback_tactics(kind)
            }
        }
    }
}

impl Default for BlockClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BlockClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockClassifier")
            .field("advisor", &self.advisor.is_some())
            .field("advisory_timeout", &self.advisory_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocking::tactics::Tactic;
    use crate::external_deps::advisory::AdvisoryError;
    use async_trait::async_trait;

    struct ResponseFixture {
        headers: HeaderMap,
        body: String,
        status: u16,
    }

    impl ResponseFixture {
        fn new(body: &str, status: u16) -> Self {
            Self {
                headers: HeaderMap::new(),
                body: body.to_string(),
                status,
            }
        }

        fn with_header(mut self, name: &'static str, value: &'static str) -> Self {
            self.headers.insert(name, value.parse().unwrap());
            self
        }

        fn response(&self) -> BlockResponse<'_> {
            BlockResponse {
                status: self.status,
                headers: &self.headers,
                body: &self.body,
            }
        }
    }

    fn classify(fixture: &ResponseFixture) -> BlockAnalysis {
        BlockClassifier::new().classify(&fixture.response())
    }

    #[test]
    fn forbidden_is_ip_block() {
        let analysis = classify(&ResponseFixture::new("<html>Forbidden</html>", 403));
        assert!(analysis.is_blocked);
        assert_eq!(analysis.kind, BlockKind::IpBlock);
        assert_eq!(analysis.confidence, 0.90);
        assert_eq!(analysis.indicators, vec!["HTTP 403 Forbidden".to_string()]);
    }

    #[test]
    fn status_rules_win_over_body_markers() {
        let fixture = ResponseFixture::new("Just a moment... recaptcha", 429);
        assert_eq!(classify(&fixture).kind, BlockKind::RateLimit);
        assert_eq!(classify(&fixture).confidence, 0.95);
    }

    #[test]
    fn just_a_moment_is_cloudflare() {
        let analysis = classify(&ResponseFixture::new(
            "<title>Just a moment...</title>",
            200,
        ));
        assert_eq!(analysis.kind, BlockKind::Cloudflare);
        assert!(analysis.confidence >= 0.85);
        assert_eq!(analysis.rule_id, Some("cloudflare_body"));
    }

    #[test]
    fn cloudflare_headers_without_markers() {
        let fixture = ResponseFixture::new("<html>ok</html>", 200).with_header("cf-ray", "8a1b2c3d4e");
        let analysis = classify(&fixture);
        assert_eq!(analysis.kind, BlockKind::Cloudflare);
        assert_eq!(analysis.confidence, 0.85);

        let server = ResponseFixture::new("<html>ok</html>", 200).with_header("server", "Cloudflare");
        assert_eq!(classify(&server).kind, BlockKind::Cloudflare);
    }

    #[test]
    fn captcha_kinds() {
        let recaptcha = classify(&ResponseFixture::new(r#"<div class="g-recaptcha"></div>"#, 200));
        assert_eq!(recaptcha.kind, BlockKind::ReCaptcha);
        assert_eq!(recaptcha.confidence, 0.95);

        let hcaptcha = classify(&ResponseFixture::new(r#"<div class="h-captcha hcaptcha"></div>"#, 200));
        assert_eq!(hcaptcha.kind, BlockKind::HCaptcha);

        let unknown = classify(&ResponseFixture::new("Please confirm I'm not a robot", 200));
        assert_eq!(unknown.kind, BlockKind::UnknownCaptcha);
        assert_eq!(unknown.confidence, 0.80);
    }

    #[test]
    fn vendor_and_rate_limit_markers() {
        assert_eq!(
            classify(&ResponseFixture::new("<script src=\"//js.datadome.co\"></script>", 200)).kind,
            BlockKind::DataDome
        );
        assert_eq!(
            classify(&ResponseFixture::new("window._pxAppId = 'PX123';", 200)).kind,
            BlockKind::PerimeterX
        );
        let limited = classify(&ResponseFixture::new("Slow down, please", 200));
        assert_eq!(limited.kind, BlockKind::RateLimit);
        assert_eq!(limited.confidence, 0.85);
    }

    #[test]
    fn clean_response_has_zero_confidence() {
        let analysis = classify(&ResponseFixture::new("<html><h1>Products</h1></html>", 200));
        assert!(!analysis.is_blocked);
        assert_eq!(analysis.kind, BlockKind::None);
        assert_eq!(analysis.confidence, 0.0);
        assert!(analysis.indicators.is_empty());
    }

    #[test]
    fn rule_table_order_is_stable() {
        let ids: Vec<_> = BlockClassifier::rule_ids().collect();
        assert_eq!(ids.first(), Some(&"http_403"));
        assert_eq!(ids.last(), Some(&"rate_limit_body"));
    }

    struct FailingAdvisor;

    #[async_trait]
    impl TacticAdvisor for FailingAdvisor {
        async fn suggest_tactics(
            &self,
            _kind: BlockKind,
            _body_excerpt: &str,
            _headers: &[(String, String)],
        ) -> Result<Vec<SuggestedTactic>, AdvisoryError> {
            Err(AdvisoryError::Unavailable("no api key".into()))
        }
    }

    struct HeaderCountingAdvisor;

    #[async_trait]
    impl TacticAdvisor for HeaderCountingAdvisor {
        async fn suggest_tactics(
            &self,
            _kind: BlockKind,
            body_excerpt: &str,
            headers: &[(String, String)],
        ) -> Result<Vec<SuggestedTactic>, AdvisoryError> {
            assert!(headers.len() <= 10);
            assert!(body_excerpt.chars().count() <= 2000);
            Ok(vec![SuggestedTactic::new(Tactic::ChangeHeaders, 1, "new fingerprint")])
        }
    }

    #[tokio::test]
    async fn advisor_failure_falls_back_to_table() {
        let classifier = BlockClassifier::new().with_advisor(Arc::new(FailingAdvisor));
        let fixture = ResponseFixture::new("", 403);
        let analysis = classifier.analyze(&fixture.response()).await;
        assert_eq!(analysis.suggested_tactics.len(), 1);
        assert_eq!(analysis.suggested_tactics[0].tactic, Tactic::RotateProxy);
    }

    #[tokio::test]
    async fn advisor_receives_bounded_context() {
        let classifier = BlockClassifier::new().with_advisor(Arc::new(HeaderCountingAdvisor));
        let mut fixture = ResponseFixture::new(&"x".repeat(5000), 429);
        for idx in 0..15 {
            fixture.headers.insert(
                http::HeaderName::from_bytes(format!("x-extra-{idx}").as_bytes()).unwrap(),
                "1".parse().unwrap(),
            );
        }
        let analysis = classifier.analyze(&fixture.response()).await;
        assert_eq!(analysis.suggested_tactics[0].tactic, Tactic::ChangeHeaders);
    }
}
