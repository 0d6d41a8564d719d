//! Evasion tactics and the rule-based fallback table.
//!
//! Tactics normally come from a [`TacticAdvisor`](crate::external_deps::advisory::TacticAdvisor);
//! when none is configured, or it fails, [`fallback_tactics`] supplies a fixed
//! list per block kind.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::blocking::detectors::BlockKind;

/// One way of getting past a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tactic {
    RotateProxy,
    /// Sleep, then retry without proxy or custom headers.
    Wait,
    /// Re-fetch through the full-render engine.
    #[serde(alias = "stealth_browser")]
    FullRender,
    ChangeHeaders,
    SolveCaptcha,
}

impl Tactic {
    pub fn as_str(self) -> &'static str {
        match self {
            Tactic::RotateProxy => "rotate_proxy",
            Tactic::Wait => "wait",
            Tactic::FullRender => "full_render",
            Tactic::ChangeHeaders => "change_headers",
            Tactic::SolveCaptcha => "solve_captcha",
        }
    }
}

impl fmt::Display for Tactic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown tactic `{0}`")]
pub struct UnknownTactic(pub String);

impl FromStr for Tactic {
    type Err = UnknownTactic;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "rotate_proxy" => Ok(Tactic::RotateProxy),
            "wait" => Ok(Tactic::Wait),
            "full_render" | "stealth_browser" => Ok(Tactic::FullRender),
            "change_headers" => Ok(Tactic::ChangeHeaders),
            "solve_captcha" => Ok(Tactic::SolveCaptcha),
            other => Err(UnknownTactic(other.to_string())),
        }
    }
}

/// A tactic with its priority (1 = first), rationale and wait hint.
///
/// `wait` is `None` when no hint was given; `Some(Duration::ZERO)` means
/// retry immediately.
#[derive(Debug, Clone, PartialEq)]
pub struct SuggestedTactic {
    pub tactic: Tactic,
    pub priority: u8,
    pub reasoning: String,
    pub wait: Option<Duration>,
}

impl SuggestedTactic {
    pub fn new(tactic: Tactic, priority: u8, reasoning: impl Into<String>) -> Self {
        Self {
            tactic,
            priority,
            reasoning: reasoning.into(),
            wait: None,
        }
    }

    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = Some(wait);
        self
    }
}

/// Fixed tactic list per block kind, ordered by priority.
pub fn fallback_tactics(kind: BlockKind) -> Vec<SuggestedTactic> {
    match kind {
        BlockKind::IpBlock => vec![SuggestedTactic::new(
            Tactic::RotateProxy,
            1,
            "IP is blocked, need new IP",
        )],
        BlockKind::RateLimit => vec![
            SuggestedTactic::new(Tactic::Wait, 1, "Rate limit requires cooldown")
                .with_wait(Duration::from_secs(60)),
            SuggestedTactic::new(Tactic::RotateProxy, 2, "Get fresh IP to reset rate limit"),
        ],
        BlockKind::Cloudflare => vec![
            SuggestedTactic::new(Tactic::FullRender, 1, "Cloudflare requires browser fingerprint")
                .with_wait(Duration::from_secs(5)),
            SuggestedTactic::new(Tactic::RotateProxy, 2, "Try residential proxy"),
        ],
        BlockKind::ReCaptcha => vec![SuggestedTactic::new(
            Tactic::SolveCaptcha,
            1,
            "Need to solve reCAPTCHA",
        )],
        BlockKind::HCaptcha => vec![SuggestedTactic::new(
            Tactic::SolveCaptcha,
            1,
            "Need to solve hCAPTCHA",
        )],
        _ => Vec::new(),
    }
}

#[derive(Debug, Deserialize)]
struct RawTacticList {
    #[serde(default)]
    tactics: Vec<RawTactic>,
}

#[derive(Debug, Deserialize)]
struct RawTactic {
    tactic: String,
    #[serde(default)]
    priority: Option<u8>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    wait_time: Option<f64>,
}

/// Parse an advisory payload of the form
/// `{"tactics": [{"tactic", "priority", "reasoning", "wait_time"}]}`.
///
/// Unknown tactic names are dropped with a warning; the result is sorted by
/// priority.
pub(crate) fn parse_tactics(payload: &str) -> Result<Vec<SuggestedTactic>, serde_json::Error> {
    let raw: RawTacticList = serde_json::from_str(payload)?;
    let mut tactics: Vec<SuggestedTactic> = raw
        .tactics
        .into_iter()
        .enumerate()
        .filter_map(|(position, entry)| match entry.tactic.parse::<Tactic>() {
            Ok(tactic) => {
                let priority = entry
                    .priority
                    .unwrap_or_else(|| u8::try_from(position + 1).unwrap_or(u8::MAX));
                let mut suggestion =
                    SuggestedTactic::new(tactic, priority, entry.reasoning.unwrap_or_default());
                suggestion.wait = entry
                    .wait_time
                    .filter(|secs| secs.is_finite() && *secs >= 0.0)
                    .map(Duration::from_secs_f64);
                Some(suggestion)
            }
            Err(err) => {
                log::warn!("dropping advisory tactic: {err}");
                None
            }
        })
        .collect();
    tactics.sort_by_key(|tactic| tactic.priority);
    Ok(tactics)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_waits_before_rotating() {
        let tactics = fallback_tactics(BlockKind::RateLimit);
        assert_eq!(tactics.len(), 2);
        assert_eq!(tactics[0].tactic, Tactic::Wait);
        assert_eq!(tactics[0].wait, Some(Duration::from_secs(60)));
        assert_eq!(tactics[1].wait, None);
        assert_eq!(tactics[1].tactic, Tactic::RotateProxy);
        assert!(fallback_tactics(BlockKind::DataDome).is_empty());
    }

    #[test]
    fn parses_advisory_payload() {
        let payload = r#"{"tactics": [
            {"tactic": "rotate_proxy", "priority": 2, "reasoning": "fresh ip", "wait_time": 0},
            {"tactic": "teleport", "priority": 3},
            {"tactic": "stealth_browser", "priority": 1, "reasoning": "js check", "wait_time": 5}
        ]}"#;
        let tactics = parse_tactics(payload).unwrap();
        assert_eq!(tactics.len(), 2);
        assert_eq!(tactics[0].tactic, Tactic::FullRender);
        assert_eq!(tactics[0].wait, Some(Duration::from_secs(5)));
        assert_eq!(tactics[1].tactic, Tactic::RotateProxy);
    }

    #[test]
    fn rejects_malformed_payload() {
        assert!(parse_tactics("not json").is_err());
    }
}
